use snafu::Snafu;
use sluice_resources::DestinationIdentity;

/// Errors reported by an ingestion service implementation.
///
/// The message is forwarded to the unit's failure report, so it should
/// describe what the remote side rejected.
#[derive(Debug, Clone, Snafu)]
#[snafu(visibility(pub))]
pub enum ServiceError {
    /// The channel was closed, or invalidated by the remote side.
    #[snafu(display("channel {channel} is closed: {reason}"))]
    ChannelClosed { channel: String, reason: String },
    #[snafu(display("{resource} not found: {name}"))]
    NotFound {
        resource: &'static str,
        name: String,
    },
    #[snafu(display("invalid request: {message}"))]
    InvalidArgument { message: String },
    #[snafu(display("ingestion service unavailable: {message}"))]
    Unavailable { message: String },
    #[snafu(display("request timed out: {message}"))]
    Timeout { message: String },
    #[snafu(display("internal ingestion service error: {message}"))]
    Internal { message: String },
}

/// Channel registry error types.
#[derive(Debug, Clone, Snafu)]
#[snafu(visibility(pub))]
pub enum ChannelError {
    /// Missing or invalid connection parameters.
    #[snafu(display("configuration error: {message}"))]
    Configuration { message: String },
    /// A channel was requested before the registry was configured.
    #[snafu(display("channel registry is not configured"))]
    NotConfigured,
    #[snafu(display("failed to connect to ingestion service at {endpoint}: {source}"))]
    Connection {
        endpoint: String,
        source: ServiceError,
    },
    /// The remote open-channel call failed.
    #[snafu(display("failed to open channel {identity}: {source}"))]
    ChannelCreation {
        identity: DestinationIdentity,
        source: ServiceError,
    },
    /// The cached channel was closed by the remote side and has been evicted.
    #[snafu(display("channel {identity} was closed by the ingestion service"))]
    ChannelInvalidated { identity: DestinationIdentity },
    #[snafu(display("failed to close channel {identity}: {source}"))]
    ChannelClose {
        identity: DestinationIdentity,
        source: ServiceError,
    },
}

pub type Result<T, E = ChannelError> = std::result::Result<T, E>;

impl ServiceError {
    pub fn is_channel_closed(&self) -> bool {
        matches!(self, ServiceError::ChannelClosed { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ServiceError::NotFound { .. })
    }
}
