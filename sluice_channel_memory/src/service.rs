//! In-memory implementation of the ingestion service.
//!
//! Tables live in memory and are created up front. Rows are validated against
//! the table definition the same way the remote service does, and faults can
//! be injected to exercise failure paths. Suitable for testing and local
//! development.

use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use sluice_channel::{
    ConnectionConfig, IngestChannel, IngestService, IngestServiceFactory, InsertOutcome,
    OnErrorOption, OpenChannelRequest, ServiceError, ServiceResult,
};
use sluice_resources::{DestinationIdentity, Row};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::table::TableDefinition;

/// In-memory ingestion service.
///
/// Cloning is cheap, clones share the same tables and channels.
#[derive(Clone, Default)]
pub struct InMemoryIngestService {
    state: Arc<ServiceState>,
}

#[derive(Default)]
struct ServiceState {
    store: Mutex<ServiceStore>,
    faults: Mutex<Faults>,
    opened_channels: AtomicUsize,
    submissions: AtomicUsize,
    submitted_rows: AtomicUsize,
    connections: AtomicUsize,
}

#[derive(Default)]
struct ServiceStore {
    /// Map of fully qualified table name to table.
    tables: HashMap<String, Table>,
    /// Map of fully qualified table name and channel name to the channel.
    channels: HashMap<(String, String), Arc<InMemoryChannel>>,
}

#[derive(Default)]
struct Faults {
    open: Option<ServiceError>,
    insert: Option<ServiceError>,
    connect: Option<ServiceError>,
}

struct Table {
    definition: TableDefinition,
    rows: Vec<Row>,
}

/// A channel opened on the in-memory service.
pub struct InMemoryChannel {
    name: String,
    table_name: String,
    request_id: Uuid,
    on_error: OnErrorOption,
    closed: AtomicBool,
    state: Arc<ServiceState>,
}

impl InMemoryIngestService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates or replaces a table.
    pub async fn create_table(
        &self,
        database: &str,
        schema: &str,
        table: &str,
        definition: TableDefinition,
    ) {
        let table_name = format!("{database}.{schema}.{table}");
        let mut store = self.state.store.lock().await;
        store.tables.insert(
            table_name,
            Table {
                definition,
                rows: Vec::new(),
            },
        );
    }

    /// Returns the rows committed to the table, in commit order.
    pub async fn rows(&self, table_name: &str) -> ServiceResult<Vec<Row>> {
        let store = self.state.store.lock().await;
        store
            .tables
            .get(table_name)
            .map(|table| table.rows.clone())
            .ok_or_else(|| ServiceError::NotFound {
                resource: "table",
                name: table_name.to_string(),
            })
    }

    /// Makes the next open-channel call fail with the given error.
    pub async fn fail_next_open(&self, error: ServiceError) {
        self.state.faults.lock().await.open = Some(error);
    }

    /// Makes the next insert call on any channel fail with the given error.
    pub async fn fail_next_insert(&self, error: ServiceError) {
        self.state.faults.lock().await.insert = Some(error);
    }

    /// Makes the next connect call fail with the given error.
    pub async fn fail_next_connect(&self, error: ServiceError) {
        self.state.faults.lock().await.connect = Some(error);
    }

    /// Closes a channel as if the remote side had invalidated it.
    ///
    /// Returns false if no such channel is open.
    pub async fn close_channel_remotely(&self, identity: &DestinationIdentity) -> bool {
        let key = (identity.table_name(), identity.channel_name().to_string());
        let store = self.state.store.lock().await;
        match store.channels.get(&key) {
            Some(channel) => !channel.closed.swap(true, Ordering::SeqCst),
            None => false,
        }
    }

    /// The number of channels opened so far.
    pub fn opened_channels(&self) -> usize {
        self.state.opened_channels.load(Ordering::SeqCst)
    }

    /// The number of insert calls accepted so far, successful or not.
    pub fn submissions(&self) -> usize {
        self.state.submissions.load(Ordering::SeqCst)
    }

    /// The number of rows received so far, valid or not.
    pub fn submitted_rows(&self) -> usize {
        self.state.submitted_rows.load(Ordering::SeqCst)
    }

    /// The number of clients created through the factory.
    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IngestServiceFactory for InMemoryIngestService {
    async fn connect(&self, config: &ConnectionConfig) -> ServiceResult<Arc<dyn IngestService>> {
        if let Some(error) = self.state.faults.lock().await.connect.take() {
            return Err(error);
        }

        self.state.connections.fetch_add(1, Ordering::SeqCst);
        debug!(endpoint = %config.endpoint, principal = %config.principal, "in-memory client connected");

        Ok(Arc::new(self.clone()))
    }
}

#[async_trait]
impl IngestService for InMemoryIngestService {
    async fn open_channel(
        &self,
        request: OpenChannelRequest,
    ) -> ServiceResult<Arc<dyn IngestChannel>> {
        if let Some(error) = self.state.faults.lock().await.open.take() {
            return Err(error);
        }

        let table_name = request.table_name();
        let mut store = self.state.store.lock().await;

        if !store.tables.contains_key(&table_name) {
            return Err(ServiceError::NotFound {
                resource: "table",
                name: table_name,
            });
        }

        let channel = Arc::new(InMemoryChannel {
            name: request.channel_name.clone(),
            table_name: table_name.clone(),
            request_id: request.request_id,
            on_error: request.on_error,
            closed: AtomicBool::new(false),
            state: self.state.clone(),
        });

        // Reopening a channel invalidates the previous one with the same name.
        if let Some(previous) = store
            .channels
            .insert((table_name, request.channel_name), channel.clone())
        {
            previous.closed.store(true, Ordering::SeqCst);
        }

        self.state.opened_channels.fetch_add(1, Ordering::SeqCst);

        Ok(channel)
    }
}

impl InMemoryChannel {
    /// The request id of the open call that created this channel.
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    fn closed_error(&self) -> ServiceError {
        ServiceError::ChannelClosed {
            channel: format!("{}:{}", self.table_name, self.name),
            reason: "channel was closed or reopened".to_string(),
        }
    }
}

#[async_trait]
impl IngestChannel for InMemoryChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn insert_rows(&self, rows: Vec<Row>) -> ServiceResult<InsertOutcome> {
        if self.is_closed() {
            return Err(self.closed_error());
        }

        if let Some(error) = self.state.faults.lock().await.insert.take() {
            return Err(error);
        }

        let mut store = self.state.store.lock().await;
        let table = store
            .tables
            .get_mut(&self.table_name)
            .ok_or_else(|| ServiceError::NotFound {
                resource: "table",
                name: self.table_name.clone(),
            })?;

        self.state.submissions.fetch_add(1, Ordering::SeqCst);
        self.state
            .submitted_rows
            .fetch_add(rows.len(), Ordering::SeqCst);

        let mut accepted = Vec::with_capacity(rows.len());
        let mut errors = Vec::new();

        for (index, row) in rows.iter().enumerate() {
            match table.definition.validate_row(index as u64, row) {
                Ok(stored) => accepted.push(stored),
                Err(error) => {
                    errors.push(error);
                    if self.on_error == OnErrorOption::Abort {
                        break;
                    }
                }
            }
        }

        let commit = errors.is_empty() || self.on_error == OnErrorOption::Continue;
        if commit {
            table.rows.extend(accepted);
        }

        debug!(
            table = %self.table_name,
            channel = %self.name,
            rows = rows.len(),
            errors = errors.len(),
            committed = commit,
            "rows inserted"
        );

        Ok(InsertOutcome::with_errors(errors))
    }

    async fn close(&self) -> ServiceResult<()> {
        self.closed.store(true, Ordering::SeqCst);

        let key = (self.table_name.clone(), self.name.clone());
        let mut store = self.state.store.lock().await;
        if store
            .channels
            .get(&key)
            .is_some_and(|channel| channel.request_id == self.request_id)
        {
            store.channels.remove(&key);
        }

        Ok(())
    }
}

impl fmt::Debug for InMemoryChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryChannel")
            .field("name", &self.name)
            .field("table_name", &self.table_name)
            .field("request_id", &self.request_id)
            .field("on_error", &self.on_error)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl fmt::Debug for InMemoryIngestService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryIngestService")
            .field("opened_channels", &self.opened_channels())
            .field("submissions", &self.submissions())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use sluice_resources::Value;

    use super::*;
    use crate::table::{ColumnDefinition, ColumnType};

    fn identity() -> DestinationIdentity {
        DestinationIdentity::new_unchecked("DB", "PUBLIC", "EVENTS", "channel1")
    }

    async fn service() -> InMemoryIngestService {
        let service = InMemoryIngestService::new();
        service
            .create_table(
                "DB",
                "PUBLIC",
                "EVENTS",
                TableDefinition::new(vec![
                    ColumnDefinition::new("ID", ColumnType::Number).not_null(),
                    ColumnDefinition::new("NAME", ColumnType::Text),
                ]),
            )
            .await;
        service
    }

    async fn open(
        service: &InMemoryIngestService,
        on_error: OnErrorOption,
    ) -> Arc<dyn IngestChannel> {
        service
            .open_channel(OpenChannelRequest::new(&identity(), on_error))
            .await
            .unwrap()
    }

    fn rows() -> Vec<Row> {
        vec![
            Row::new().with("ID", 1_i64),
            Row::new().with("NAME", "missing id"),
            Row::new().with("ID", 3_i64),
            Row::new().with("ID", "not a number"),
        ]
    }

    #[tokio::test]
    async fn test_open_missing_table() {
        let service = InMemoryIngestService::new();
        let err = service
            .open_channel(OpenChannelRequest::new(&identity(), OnErrorOption::Continue))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_continue_commits_valid_rows() {
        let service = service().await;
        let channel = open(&service, OnErrorOption::Continue).await;

        let outcome = channel.insert_rows(rows()).await.unwrap();
        let indices = outcome.errors().iter().map(|e| e.row_index).collect::<Vec<_>>();
        assert_eq!(indices, vec![1, 3]);

        let stored = service.rows("DB.PUBLIC.EVENTS").await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[1].get("ID"), Some(&Value::Integer(3)));
    }

    #[tokio::test]
    async fn test_abort_stops_at_first_error() {
        let service = service().await;
        let channel = open(&service, OnErrorOption::Abort).await;

        let outcome = channel.insert_rows(rows()).await.unwrap();
        assert_eq!(outcome.errors().len(), 1);
        assert_eq!(outcome.first_error().unwrap().row_index, 1);
        assert!(service.rows("DB.PUBLIC.EVENTS").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_skip_batch_reports_all_errors() {
        let service = service().await;
        let channel = open(&service, OnErrorOption::SkipBatch).await;

        let outcome = channel.insert_rows(rows()).await.unwrap();
        assert_eq!(outcome.errors().len(), 2);
        assert!(service.rows("DB.PUBLIC.EVENTS").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reopen_invalidates_previous_channel() {
        let service = service().await;
        let first = open(&service, OnErrorOption::Continue).await;
        let second = open(&service, OnErrorOption::Continue).await;

        assert!(first.is_closed());
        assert!(!second.is_closed());

        let err = first.insert_row(Row::new().with("ID", 1_i64)).await.unwrap_err();
        assert!(err.is_channel_closed());
        assert_eq!(service.opened_channels(), 2);
    }

    #[tokio::test]
    async fn test_close_channel_remotely() {
        let service = service().await;
        let channel = open(&service, OnErrorOption::Continue).await;

        assert!(service.close_channel_remotely(&identity()).await);
        assert!(channel.is_closed());
        assert!(!service.close_channel_remotely(&identity()).await);
    }

    #[tokio::test]
    async fn test_injected_faults() {
        let service = service().await;
        service
            .fail_next_open(ServiceError::Unavailable {
                message: "down".to_string(),
            })
            .await;

        let err = service
            .open_channel(OpenChannelRequest::new(&identity(), OnErrorOption::Continue))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Unavailable { .. }));

        let channel = open(&service, OnErrorOption::Continue).await;
        service
            .fail_next_insert(ServiceError::Timeout {
                message: "slow".to_string(),
            })
            .await;

        let err = channel.insert_row(Row::new().with("ID", 1_i64)).await.unwrap_err();
        assert!(matches!(err, ServiceError::Timeout { .. }));

        channel.insert_row(Row::new().with("ID", 1_i64)).await.unwrap();
        assert_eq!(service.submissions(), 1);
    }

    #[tokio::test]
    async fn test_factory_connect() {
        let service = service().await;
        let config = ConnectionConfig::new("memory://", "INGEST", "key");

        let client = service.connect(&config).await.unwrap();
        client
            .open_channel(OpenChannelRequest::new(&identity(), OnErrorOption::Continue))
            .await
            .unwrap();

        assert_eq!(service.connections(), 1);
        assert_eq!(service.opened_channels(), 1);
    }
}
