#![allow(dead_code)]

use std::sync::Arc;

use sluice_channel::{ChannelRegistry, ConnectionConfig};
use sluice_channel_memory::{ColumnDefinition, ColumnType, InMemoryIngestService, TableDefinition};
use sluice_ingestor_core::{
    IngestionPipeline, IngestionUnit, JsonLinesReaderFactory, PipelineOptions,
};
use sluice_resources::{DestinationIdentity, Row};

pub const DATABASE: &str = "DB";
pub const SCHEMA: &str = "PUBLIC";
pub const TABLE: &str = "EVENTS";
pub const TABLE_NAME: &str = "DB.PUBLIC.EVENTS";

pub fn destination() -> DestinationIdentity {
    DestinationIdentity::new_unchecked(DATABASE, SCHEMA, TABLE, "channel1")
}

/// A table keyed by a non-nullable `ID` with a case-sensitive `name` column.
pub fn people_table() -> TableDefinition {
    TableDefinition::new(vec![
        ColumnDefinition::new("ID", ColumnType::Number).not_null(),
        ColumnDefinition::new("name", ColumnType::Text),
        ColumnDefinition::new("BIRTHDAY", ColumnType::Date),
    ])
}

pub async fn create_service(table: TableDefinition) -> InMemoryIngestService {
    let service = InMemoryIngestService::new();
    service.create_table(DATABASE, SCHEMA, TABLE, table).await;
    service
}

pub async fn create_registry(service: &InMemoryIngestService) -> Arc<ChannelRegistry> {
    let registry = Arc::new(ChannelRegistry::new(Arc::new(service.clone())));
    registry
        .configure(ConnectionConfig::new("memory://", "INGEST", "private-key"))
        .await
        .expect("configure");
    registry
}

pub async fn create_pipeline(
    service: &InMemoryIngestService,
    options: PipelineOptions,
) -> IngestionPipeline {
    let registry = create_registry(service).await;
    IngestionPipeline::new(
        registry,
        Some(Arc::new(JsonLinesReaderFactory::new())),
        options,
    )
    .expect("create pipeline")
}

pub fn json_unit(lines: &[&str]) -> IngestionUnit {
    IngestionUnit::new(lines.join("\n")).with_attribute("mime.type", "application/json")
}

pub async fn stored_rows(service: &InMemoryIngestService) -> Vec<Row> {
    service.rows(TABLE_NAME).await.expect("rows")
}
