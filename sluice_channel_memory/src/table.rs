//! Table definitions and per-row validation.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use sluice_channel::InsertError;
use sluice_resources::{Row, Value};

/// The type of a table column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// Accepts any value.
    Any,
    Text,
    Number,
    Boolean,
    Date,
    Timestamp,
    /// JSON document, given as JSON text.
    Variant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDefinition {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
}

/// The columns of a table.
///
/// A table with an open schema accepts any column. Its column names are
/// resolved the same way, so `"id"` and `ID` remain different columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDefinition {
    columns: Vec<ColumnDefinition>,
    open: bool,
}

impl ColumnDefinition {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}

impl TableDefinition {
    pub fn new(columns: Vec<ColumnDefinition>) -> Self {
        Self {
            columns,
            open: false,
        }
    }

    /// A table that accepts any column with any value.
    pub fn open() -> Self {
        Self {
            columns: Vec::new(),
            open: true,
        }
    }

    pub fn columns(&self) -> &[ColumnDefinition] {
        &self.columns
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Finds the column a row key refers to.
    ///
    /// A double-quoted key matches the column name exactly, an unquoted key
    /// matches the upper-cased column name.
    pub fn resolve_column(&self, key: &str) -> Option<&ColumnDefinition> {
        let name = resolve_name(key);
        self.columns.iter().find(|column| column.name == name)
    }

    /// Validates a row, returning it keyed by resolved column names.
    pub fn validate_row(&self, row_index: u64, row: &Row) -> Result<Row, InsertError> {
        let mut resolved = Row::with_capacity(row.len());
        let mut extra_columns = Vec::new();
        let mut null_columns = Vec::new();
        let mut type_errors = Vec::new();

        for (key, value) in row.iter() {
            if self.open {
                resolved.insert(resolve_name(key), value.clone());
                continue;
            }

            let Some(column) = self.resolve_column(key) else {
                extra_columns.push(key.to_string());
                continue;
            };

            if value.is_null() {
                if !column.nullable {
                    null_columns.push(column.name.clone());
                }
                resolved.insert(column.name.clone(), Value::Null);
                continue;
            }

            match check_type(column.column_type, value) {
                Ok(()) => {
                    resolved.insert(column.name.clone(), value.clone());
                }
                Err(message) => type_errors.push(format!("column {}: {message}", column.name)),
            }
        }

        let missing_columns = self
            .columns
            .iter()
            .filter(|column| !column.nullable && !resolved.contains(&column.name))
            .filter(|column| !null_columns.contains(&column.name))
            .map(|column| column.name.clone())
            .collect::<Vec<_>>();

        if extra_columns.is_empty()
            && missing_columns.is_empty()
            && null_columns.is_empty()
            && type_errors.is_empty()
        {
            return Ok(resolved);
        }

        let message = if type_errors.is_empty() {
            "row does not match the table columns".to_string()
        } else {
            type_errors.join("; ")
        };

        Err(InsertError::new(row_index, message)
            .with_extra_columns(extra_columns)
            .with_missing_not_null_columns(missing_columns)
            .with_null_value_for_not_null_columns(null_columns))
    }
}

fn resolve_name(key: &str) -> String {
    match key
        .strip_prefix('"')
        .and_then(|inner| inner.strip_suffix('"'))
    {
        Some(quoted) if !quoted.is_empty() => quoted.to_string(),
        _ => key.to_uppercase(),
    }
}

fn check_type(column_type: ColumnType, value: &Value) -> Result<(), String> {
    let accepted = match (column_type, value) {
        (ColumnType::Any | ColumnType::Text, _) => true,
        (ColumnType::Number, Value::Integer(_) | Value::Float(_)) => true,
        (ColumnType::Number, Value::String(s)) => s.trim().parse::<f64>().is_ok(),
        (ColumnType::Boolean, Value::Boolean(_)) => true,
        (ColumnType::Boolean, Value::String(s)) => {
            matches!(s.to_lowercase().as_str(), "true" | "false")
        }
        (ColumnType::Date, Value::Date(_)) => true,
        (ColumnType::Date, Value::Timestamp(_) | Value::TimestampTz(_)) => {
            return Err(format!(
                "date value must not have a time of day, got {value}"
            ));
        }
        (ColumnType::Date, Value::String(s)) => NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok(),
        (ColumnType::Timestamp, Value::Date(_) | Value::Timestamp(_) | Value::TimestampTz(_)) => {
            true
        }
        (ColumnType::Timestamp, Value::String(s)) => {
            DateTime::parse_from_rfc3339(s).is_ok()
                || s.parse::<NaiveDateTime>().is_ok()
        }
        (ColumnType::Variant, Value::String(s)) => {
            return serde_json::from_str::<serde_json::Value>(s)
                .map(|_| ())
                .map_err(|err| format!("invalid JSON: {err}"));
        }
        (ColumnType::Variant, _) => true,
        _ => false,
    };

    if accepted {
        Ok(())
    } else {
        Err(format!(
            "cannot store {} value {value} in a {column_type:?} column",
            value.type_name()
        ))
    }
}
