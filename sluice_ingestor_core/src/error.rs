use std::sync::Arc;

use snafu::Snafu;
use sluice_channel::{ChannelError, InsertError, ServiceError};
use sluice_resources::DestinationIdentity;

use crate::{pipeline::UnitState, reader::ReaderError};

/// Errors that route a unit to failure.
///
/// The message is reported with the failed unit, so it should tell the user
/// what to fix.
#[derive(Debug, Clone, Snafu)]
#[snafu(visibility(pub))]
pub enum IngestError {
    /// Invalid pipeline options.
    #[snafu(display("configuration error: {message}"))]
    Configuration { message: String },
    /// The channel could not be obtained from the registry.
    #[snafu(display("channel unavailable: {source}"))]
    ChannelUnavailable { source: ChannelError },
    /// The remote side closed the channel.
    #[snafu(display("channel {identity} was closed: {message}"))]
    ChannelClosed {
        identity: DestinationIdentity,
        message: String,
    },
    #[snafu(display("failed to decode records: {source}"))]
    Decode { source: ReaderError },
    #[snafu(display("i/o error: {message}"))]
    Io {
        message: &'static str,
        #[snafu(source(from(std::io::Error, Arc::new)))]
        source: Arc<std::io::Error>,
    },
    /// Rows rejected by the ingestion service.
    ///
    /// Never empty, ordered by row position within the unit.
    #[snafu(display("{}", display_row_errors(errors)))]
    RowValidation { errors: Vec<InsertError> },
    /// The submit call itself failed.
    #[snafu(display("failed to submit rows: {source}"))]
    Submission { source: ServiceError },
    #[snafu(display("failed to serialize row: {source}"))]
    Serialize {
        #[snafu(source(from(serde_json::Error, Arc::new)))]
        source: Arc<serde_json::Error>,
    },
    #[snafu(display("invalid unit state transition from {from} to {to}"))]
    InvalidTransition { from: UnitState, to: UnitState },
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;

/// Unit worker error types.
#[derive(Debug, Clone, Snafu)]
#[snafu(visibility(pub))]
pub enum WorkerError {
    #[snafu(display("reply channel closed"))]
    ReplyChannelClosed,
    #[snafu(display("failed to close channel on shutdown: {source}"))]
    Shutdown { source: ChannelError },
}

impl IngestError {
    /// The rows rejected by the service, if that's why the unit failed.
    pub fn row_errors(&self) -> &[InsertError] {
        match self {
            IngestError::RowValidation { errors } => errors,
            _ => &[],
        }
    }
}

fn display_row_errors(errors: &[InsertError]) -> String {
    match errors {
        [] => "row validation failed".to_string(),
        [first] => format!("row validation failed: {first}"),
        [first, rest @ ..] => format!(
            "row validation failed: {first} (and {} more rows)",
            rest.len()
        ),
    }
}
