//! Ingestion of units of work into streaming ingestion channels.
//!
//! A unit's body is decoded into records, records are turned into rows, and
//! rows are submitted through the channel cached by the
//! [`ChannelRegistry`](sluice_channel::ChannelRegistry). Each unit ends up
//! routed to success or failure.

pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod reader;
pub mod row_builder;
pub mod unit;
pub mod worker;

pub use error::{IngestError, Result, WorkerError};
pub use pipeline::{
    FailurePolicy, IngestionPipeline, InsertStrategy, PipelineOptions, Relationship, RoutedUnit,
    UnitReport, UnitState,
};
pub use reader::{
    FieldType, JsonLinesReaderFactory, Record, RecordField, RecordReader, RecordReaderFactory,
    RecordSchema, ReaderError,
};
pub use row_builder::{
    DEFAULT_TARGET_COLUMN, DEFAULT_TIMESTAMP_COLUMN, RowBuilder, TransformMode, VariantEncoding,
};
pub use unit::IngestionUnit;
pub use worker::{DEFAULT_CONCURRENCY, UnitWorker, UnitWorkerClient, run_background_worker};
