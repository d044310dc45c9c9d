//! Destination identities.
//!
//! A destination identifies one ingestion channel into one table. The same
//! table can be written through several channels, each with its own name.

use std::fmt;

use snafu::Snafu;

/// Default channel name used when none is configured.
pub const DEFAULT_CHANNEL_NAME: &str = "channel1";

/// Errors that can occur when building resource identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
pub enum ResourceError {
    #[snafu(display("missing destination {component}: value must not be empty"))]
    EmptyComponent { component: &'static str },
    #[snafu(display("invalid destination {component} '{value}': {message}"))]
    InvalidComponent {
        component: &'static str,
        value: String,
        message: &'static str,
    },
}

pub type ResourceResult<T, E = ResourceError> = ::std::result::Result<T, E>;

/// The `(database, schema, table, channel)` tuple identifying a channel.
///
/// Two identities built from equal components compare and hash equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DestinationIdentity {
    database: String,
    schema: String,
    table: String,
    channel_name: String,
}

impl DestinationIdentity {
    /// Create a new destination identity, validating every component.
    pub fn new(
        database: impl Into<String>,
        schema: impl Into<String>,
        table: impl Into<String>,
        channel_name: impl Into<String>,
    ) -> ResourceResult<Self> {
        let identity = Self {
            database: database.into(),
            schema: schema.into(),
            table: table.into(),
            channel_name: channel_name.into(),
        };

        validate_component("database", &identity.database)?;
        validate_component("schema", &identity.schema)?;
        validate_component("table", &identity.table)?;
        validate_component("channel name", &identity.channel_name)?;

        Ok(identity)
    }

    /// Create a new destination identity without validation.
    ///
    /// # Panics
    ///
    /// Panics if any component is invalid.
    pub fn new_unchecked(
        database: impl Into<String>,
        schema: impl Into<String>,
        table: impl Into<String>,
        channel_name: impl Into<String>,
    ) -> Self {
        Self::new(database, schema, table, channel_name).expect("destination must be valid")
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn channel_name(&self) -> &str {
        &self.channel_name
    }

    /// The fully qualified table name, `database.schema.table`.
    pub fn table_name(&self) -> String {
        format!("{}.{}.{}", self.database, self.schema, self.table)
    }

    /// The stable composite key, `database.schema.table:channel`.
    pub fn key(&self) -> String {
        format!("{}:{}", self.table_name(), self.channel_name)
    }
}

impl fmt::Display for DestinationIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

fn validate_component(component: &'static str, value: &str) -> ResourceResult<()> {
    if value.trim().is_empty() {
        return Err(ResourceError::EmptyComponent { component });
    }

    if value.chars().any(char::is_control) {
        return Err(ResourceError::InvalidComponent {
            component,
            value: value.to_string(),
            message: "control characters are not allowed",
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_key_format() {
        let identity = DestinationIdentity::new_unchecked("DB", "PUBLIC", "EVENTS", "channel1");
        assert_eq!(identity.key(), "DB.PUBLIC.EVENTS:channel1");
        assert_eq!(identity.table_name(), "DB.PUBLIC.EVENTS");
        assert_eq!(identity.to_string(), "DB.PUBLIC.EVENTS:channel1");
    }

    #[test]
    fn test_equal_components_are_equal() {
        let a = DestinationIdentity::new_unchecked("DB", "PUBLIC", "EVENTS", "channel1");
        let b = DestinationIdentity::new(
            String::from("DB"),
            "PUBLIC".to_string(),
            "EVENTS",
            format!("channel{}", 1),
        )
        .unwrap();

        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn test_rejects_empty_components() {
        let err = DestinationIdentity::new("DB", "", "EVENTS", "channel1").unwrap_err();
        assert_eq!(err, ResourceError::EmptyComponent { component: "schema" });

        let err = DestinationIdentity::new("DB", "PUBLIC", "EVENTS", "  ").unwrap_err();
        assert_eq!(
            err,
            ResourceError::EmptyComponent {
                component: "channel name"
            }
        );
    }

    #[test]
    fn test_rejects_control_characters() {
        let err = DestinationIdentity::new("DB", "PUBLIC", "EV\nENTS", "channel1").unwrap_err();
        assert!(matches!(
            err,
            ResourceError::InvalidComponent {
                component: "table",
                ..
            }
        ));
    }
}
