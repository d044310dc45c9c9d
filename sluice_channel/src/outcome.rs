use std::fmt;

/// The result of submitting one row or one batch of rows.
///
/// An outcome is either a success or a non-empty list of per-row errors,
/// ordered by row position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InsertOutcome {
    errors: Vec<InsertError>,
}

/// A row rejected by the ingestion service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertError {
    /// Position of the row within its submission.
    pub row_index: u64,
    /// Why the row was rejected.
    pub message: String,
    /// Columns in the row that don't exist in the table.
    pub extra_columns: Vec<String>,
    /// Non-nullable table columns missing from the row.
    pub missing_not_null_columns: Vec<String>,
    /// Non-nullable table columns that were given a null value.
    pub null_value_for_not_null_columns: Vec<String>,
}

impl InsertOutcome {
    pub fn success() -> Self {
        Self::default()
    }

    /// Creates an outcome from a list of row errors.
    ///
    /// Errors are sorted by row position so that the first one always
    /// describes the first failing row.
    pub fn with_errors(mut errors: Vec<InsertError>) -> Self {
        errors.sort_by_key(|error| error.row_index);
        Self { errors }
    }

    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn errors(&self) -> &[InsertError] {
        &self.errors
    }

    pub fn first_error(&self) -> Option<&InsertError> {
        self.errors.first()
    }

    pub fn into_errors(self) -> Vec<InsertError> {
        self.errors
    }

    /// Shifts row positions by `offset`.
    ///
    /// Used to express positions relative to a unit of work when rows are
    /// submitted one at a time.
    pub fn rebase(mut self, offset: u64) -> Self {
        for error in self.errors.iter_mut() {
            error.row_index += offset;
        }
        self
    }
}

impl InsertError {
    pub fn new(row_index: u64, message: impl Into<String>) -> Self {
        Self {
            row_index,
            message: message.into(),
            extra_columns: Vec::new(),
            missing_not_null_columns: Vec::new(),
            null_value_for_not_null_columns: Vec::new(),
        }
    }

    pub fn with_extra_columns(mut self, columns: Vec<String>) -> Self {
        self.extra_columns = columns;
        self
    }

    pub fn with_missing_not_null_columns(mut self, columns: Vec<String>) -> Self {
        self.missing_not_null_columns = columns;
        self
    }

    pub fn with_null_value_for_not_null_columns(mut self, columns: Vec<String>) -> Self {
        self.null_value_for_not_null_columns = columns;
        self
    }
}

impl fmt::Display for InsertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "row {}: {}", self.row_index, self.message)?;

        if !self.extra_columns.is_empty() {
            write!(f, " (extra columns: {})", self.extra_columns.join(", "))?;
        }

        if !self.missing_not_null_columns.is_empty() {
            write!(
                f,
                " (missing not null columns: {})",
                self.missing_not_null_columns.join(", ")
            )?;
        }

        if !self.null_value_for_not_null_columns.is_empty() {
            write!(
                f,
                " (null values for not null columns: {})",
                self.null_value_for_not_null_columns.join(", ")
            )?;
        }

        Ok(())
    }
}

impl std::error::Error for InsertError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_error_is_first_failing_row() {
        let outcome = InsertOutcome::with_errors(vec![
            InsertError::new(4, "bad"),
            InsertError::new(1, "worse"),
        ]);

        assert!(outcome.has_errors());
        assert_eq!(outcome.first_error().unwrap().row_index, 1);
        assert_eq!(outcome.errors().len(), 2);
    }

    #[test]
    fn test_rebase() {
        let outcome = InsertOutcome::with_errors(vec![InsertError::new(0, "bad")]).rebase(7);
        assert_eq!(outcome.first_error().unwrap().row_index, 7);
    }

    #[test]
    fn test_display() {
        let error = InsertError::new(2, "invalid row")
            .with_extra_columns(vec!["\"foo\"".to_string()])
            .with_missing_not_null_columns(vec!["ID".to_string()]);

        assert_eq!(
            error.to_string(),
            "row 2: invalid row (extra columns: \"foo\") (missing not null columns: ID)"
        );
    }

    #[test]
    fn test_success() {
        let outcome = InsertOutcome::success();
        assert!(outcome.is_success());
        assert!(outcome.first_error().is_none());
    }
}
