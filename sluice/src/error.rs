use std::path::PathBuf;

use snafu::Snafu;
use sluice_channel::ChannelError;
use sluice_ingestor_core::{IngestError, WorkerError};
use sluice_observability::ObservabilityError;
use sluice_resources::ResourceError;

/// CLI error types.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CliError {
    #[snafu(display("Invalid destination"))]
    InvalidDestination { source: ResourceError },
    #[snafu(display("Invalid {name} argument: {message}"))]
    InvalidArgument { name: &'static str, message: String },
    #[snafu(display("Channel registry error"))]
    Channel { source: ChannelError },
    #[snafu(display("Failed to create ingestion pipeline"))]
    Pipeline { source: IngestError },
    #[snafu(display("Unit worker error"))]
    Worker { source: WorkerError },
    #[snafu(display("Unit worker task failed"))]
    WorkerTask { source: tokio::task::JoinError },
    #[snafu(display("Failed to read {}", path.display()))]
    ReadInput {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("IO error"))]
    Io { source: std::io::Error },
    #[snafu(display("Failed to initialize observability"))]
    Observability { source: ObservabilityError },
    #[snafu(display("{failed} of {total} units routed to failure"))]
    FailedUnits { failed: usize, total: usize },
}

pub type Result<T, E = CliError> = std::result::Result<T, E>;
