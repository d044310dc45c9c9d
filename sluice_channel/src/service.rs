//! The streaming ingestion capability consumed by the channel registry.
//!
//! Implementations talk to a remote table-ingestion service. Sluice doesn't
//! own the wire protocol: it only needs to open named channels into a table,
//! submit rows through them, and close them.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use sluice_resources::{DestinationIdentity, Row};
use uuid::Uuid;

use crate::{config::ConnectionConfig, error::ServiceError, outcome::InsertOutcome};

pub type ServiceResult<T, E = ServiceError> = std::result::Result<T, E>;

/// What the remote side does with the valid rows of a batch that also
/// contains invalid rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnErrorOption {
    /// Commit the valid rows and report the invalid ones.
    #[default]
    Continue,
    /// Report the first invalid row and commit nothing.
    Abort,
    /// Report every invalid row and commit nothing.
    SkipBatch,
}

/// Request to open a channel into a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenChannelRequest {
    /// Unique identity of this open attempt.
    pub request_id: Uuid,
    pub channel_name: String,
    pub database: String,
    pub schema: String,
    pub table: String,
    pub on_error: OnErrorOption,
}

/// Factory creating service clients from connection parameters.
#[async_trait]
pub trait IngestServiceFactory: Send + Sync {
    async fn connect(&self, config: &ConnectionConfig) -> ServiceResult<Arc<dyn IngestService>>;
}

/// A client of the remote streaming ingestion service.
#[async_trait]
pub trait IngestService: Send + Sync {
    /// Opens a channel into the table named in the request.
    async fn open_channel(
        &self,
        request: OpenChannelRequest,
    ) -> ServiceResult<Arc<dyn IngestChannel>>;
}

/// An open channel into one table.
#[async_trait]
pub trait IngestChannel: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Returns true once the channel is closed, locally or by the remote side.
    fn is_closed(&self) -> bool;

    /// Submits an ordered batch of rows.
    async fn insert_rows(&self, rows: Vec<Row>) -> ServiceResult<InsertOutcome>;

    /// Submits a single row.
    async fn insert_row(&self, row: Row) -> ServiceResult<InsertOutcome> {
        self.insert_rows(vec![row]).await
    }

    async fn close(&self) -> ServiceResult<()>;
}

impl OpenChannelRequest {
    /// Creates a request with a freshly generated request id.
    pub fn new(identity: &DestinationIdentity, on_error: OnErrorOption) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            channel_name: identity.channel_name().to_string(),
            database: identity.database().to_string(),
            schema: identity.schema().to_string(),
            table: identity.table().to_string(),
            on_error,
        }
    }

    /// The fully qualified table name, `database.schema.table`.
    pub fn table_name(&self) -> String {
        format!("{}.{}.{}", self.database, self.schema, self.table)
    }
}

impl fmt::Display for OnErrorOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OnErrorOption::Continue => write!(f, "continue"),
            OnErrorOption::Abort => write!(f, "abort"),
            OnErrorOption::SkipBatch => write!(f, "skip_batch"),
        }
    }
}
