use std::fmt;

use crate::error::{ChannelError, Result};

/// Client name reported to the ingestion service when none is configured.
pub const DEFAULT_CLIENT_NAME: &str = "SLUICE";

/// Parameters used to build the ingestion service client.
#[derive(Clone)]
pub struct ConnectionConfig {
    /// The service endpoint URL.
    pub endpoint: String,
    /// The user the client authenticates as.
    pub principal: String,
    /// The user's private key.
    pub credential: String,
    /// The role to assume, if any.
    pub role: Option<String>,
    /// The client name reported to the service.
    pub client_name: String,
}

impl ConnectionConfig {
    pub fn new(
        endpoint: impl Into<String>,
        principal: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            principal: principal.into(),
            credential: credential.into(),
            role: None,
            client_name: DEFAULT_CLIENT_NAME.to_string(),
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn with_client_name(mut self, client_name: impl Into<String>) -> Self {
        self.client_name = client_name.into();
        self
    }

    /// Checks that every required parameter is present.
    pub fn validate(&self) -> Result<()> {
        require("endpoint", &self.endpoint)?;
        require("principal", &self.principal)?;
        require("credential", &self.credential)?;
        require("client name", &self.client_name)?;

        if let Some(role) = &self.role {
            require("role", role)?;
        }

        Ok(())
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("endpoint", &self.endpoint)
            .field("principal", &self.principal)
            .field("credential", &"<redacted>")
            .field("role", &self.role)
            .field("client_name", &self.client_name)
            .finish()
    }
}

fn require(name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(ChannelError::Configuration {
            message: format!("missing required connection parameter: {name}"),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_config() {
        let config = ConnectionConfig::new("https://acme.example.com", "INGEST", "secret")
            .with_role("LOADER");
        assert!(config.validate().is_ok());
        assert_eq!(config.client_name, DEFAULT_CLIENT_NAME);
    }

    #[test]
    fn test_missing_parameters() {
        for (config, missing) in [
            (ConnectionConfig::new("", "INGEST", "secret"), "endpoint"),
            (ConnectionConfig::new("https://x", " ", "secret"), "principal"),
            (ConnectionConfig::new("https://x", "INGEST", ""), "credential"),
            (
                ConnectionConfig::new("https://x", "INGEST", "secret").with_role(""),
                "role",
            ),
        ] {
            let err = config.validate().unwrap_err();
            match err {
                ChannelError::Configuration { message } => {
                    assert!(message.ends_with(missing), "{message}")
                }
                other => panic!("unexpected error {other:?}"),
            }
        }
    }

    #[test]
    fn test_debug_redacts_credential() {
        let config = ConnectionConfig::new("https://x", "INGEST", "super-secret");
        let debug = format!("{config:?}");
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("<redacted>"));
    }
}
