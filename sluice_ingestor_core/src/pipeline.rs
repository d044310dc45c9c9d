//! Processing of one unit of work, from channel lookup to routing.
//!
//! Each unit goes through `Pending`, `Transforming` and `Inserting` before
//! ending up `Succeeded` or `Failed`. A unit can also fail before any row is
//! submitted. Units are never retried.

use std::{fmt, io::Read, sync::Arc};

use snafu::ResultExt;
use sluice_channel::{ChannelError, ChannelHandle, ChannelRegistry, InsertOutcome, InsertError};
use sluice_observability::KeyValue;
use sluice_resources::{DestinationIdentity, Row};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    error::{DecodeSnafu, IngestError, IoSnafu, Result},
    metrics::IngestionMetrics,
    reader::{RecordReader, RecordReaderFactory},
    row_builder::{RowBuilder, TransformMode},
    unit::IngestionUnit,
};

/// How rows are submitted to the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InsertStrategy {
    /// Submit each row as soon as it's built.
    #[default]
    RowByRow,
    /// Submit all rows of the unit in one batch.
    WholeUnit,
}

/// What to do once a row is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Stop at the first rejected row.
    #[default]
    FailFast,
    /// Keep submitting and report every rejected row.
    CollectAll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    Pending,
    Transforming,
    Inserting,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relationship {
    Success,
    Failure,
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub destination: DestinationIdentity,
    pub mode: TransformMode,
    pub insert_strategy: InsertStrategy,
    pub failure_policy: FailurePolicy,
    pub timestamp_column: Option<String>,
}

/// What happened to a unit.
#[derive(Debug, Clone)]
pub struct UnitReport {
    pub unit_id: Uuid,
    pub state: UnitState,
    pub rows_built: u64,
    pub rows_submitted: u64,
    pub error: Option<IngestError>,
}

/// A processed unit and the relationship it was routed to.
#[derive(Debug, Clone)]
pub struct RoutedUnit {
    pub unit: IngestionUnit,
    pub relationship: Relationship,
    pub report: UnitReport,
}

pub struct IngestionPipeline {
    registry: Arc<ChannelRegistry>,
    reader_factory: Option<Arc<dyn RecordReaderFactory>>,
    row_builder: RowBuilder,
    options: PipelineOptions,
    metrics: IngestionMetrics,
}

/// The rows of one unit, built lazily.
enum RowSource<'a> {
    Body(Option<Row>),
    Records {
        reader: Box<dyn RecordReader>,
        builder: &'a RowBuilder,
    },
}

impl PipelineOptions {
    pub fn new(destination: DestinationIdentity) -> Self {
        Self {
            destination,
            mode: TransformMode::FieldWise,
            insert_strategy: InsertStrategy::default(),
            failure_policy: FailurePolicy::default(),
            timestamp_column: None,
        }
    }

    pub fn with_mode(mut self, mode: TransformMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_insert_strategy(mut self, insert_strategy: InsertStrategy) -> Self {
        self.insert_strategy = insert_strategy;
        self
    }

    pub fn with_failure_policy(mut self, failure_policy: FailurePolicy) -> Self {
        self.failure_policy = failure_policy;
        self
    }

    /// Adds the ingestion time to every row, in the given column.
    ///
    /// Only supported in raw and variant modes.
    pub fn with_ingestion_timestamp(mut self, column: impl Into<String>) -> Self {
        self.timestamp_column = Some(column.into());
        self
    }

    fn validate(&self, has_reader: bool) -> Result<()> {
        let invalid = |message: &str| {
            Err(IngestError::Configuration {
                message: message.to_string(),
            })
        };

        if self.mode.reads_records() && !has_reader {
            return invalid("a record reader is required in field-wise and variant modes");
        }

        if self.timestamp_column.is_some() && self.mode == TransformMode::FieldWise {
            return invalid("the ingestion timestamp is only supported in raw and variant modes");
        }

        match &self.mode {
            TransformMode::Raw { target_column } | TransformMode::Variant { target_column, .. }
                if target_column.trim().is_empty() =>
            {
                invalid("the target column must not be empty")
            }
            _ if self
                .timestamp_column
                .as_ref()
                .is_some_and(|column| column.trim().is_empty()) =>
            {
                invalid("the timestamp column must not be empty")
            }
            _ => Ok(()),
        }
    }
}

impl UnitState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, UnitState::Succeeded | UnitState::Failed)
    }

    pub fn can_transition_to(&self, next: UnitState) -> bool {
        use UnitState::*;

        matches!(
            (self, next),
            (Pending, Transforming)
                | (Transforming, Inserting)
                | (Inserting, Succeeded)
                | (Pending | Transforming | Inserting, Failed)
        )
    }
}

impl UnitReport {
    fn new(unit_id: Uuid) -> Self {
        Self {
            unit_id,
            state: UnitState::Pending,
            rows_built: 0,
            rows_submitted: 0,
            error: None,
        }
    }

    fn transition(&mut self, next: UnitState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(IngestError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }

        self.state = next;
        Ok(())
    }

    fn fail(&mut self, error: IngestError) {
        if !self.state.is_terminal() {
            self.state = UnitState::Failed;
        }
        self.error = Some(error);
    }
}

impl IngestionPipeline {
    pub fn new(
        registry: Arc<ChannelRegistry>,
        reader_factory: Option<Arc<dyn RecordReaderFactory>>,
        options: PipelineOptions,
    ) -> Result<Self> {
        options.validate(reader_factory.is_some())?;

        let mut row_builder = RowBuilder::new(options.mode.clone());
        if let Some(column) = &options.timestamp_column {
            row_builder = row_builder.with_ingestion_timestamp(column.clone());
        }

        Ok(Self {
            registry,
            reader_factory,
            row_builder,
            options,
            metrics: IngestionMetrics::default(),
        })
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.registry
    }

    /// Processes one unit and routes it to success or failure.
    ///
    /// Errors never escape: they're reported in the routed unit.
    pub async fn process(&self, unit: IngestionUnit) -> RoutedUnit {
        let mut report = UnitReport::new(unit.id());
        let table = KeyValue::new("table", self.options.destination.table_name());

        let relationship = match self.run(&unit, &mut report).await {
            Ok(()) => {
                self.metrics.succeeded_units.add(1, &[table]);
                info!(
                    unit_id = %unit.id(),
                    destination = %self.options.destination,
                    rows = report.rows_submitted,
                    "unit routed to success"
                );
                Relationship::Success
            }
            Err(error) => {
                self.metrics.failed_units.add(1, &[table]);
                warn!(
                    unit_id = %unit.id(),
                    destination = %self.options.destination,
                    rows_submitted = report.rows_submitted,
                    %error,
                    "unit routed to failure"
                );
                report.fail(error);
                Relationship::Failure
            }
        };

        RoutedUnit {
            unit,
            relationship,
            report,
        }
    }

    /// Closes the pipeline's channel.
    pub async fn shutdown(&self) -> sluice_channel::Result<()> {
        self.registry.close(&self.options.destination).await
    }

    async fn run(&self, unit: &IngestionUnit, report: &mut UnitReport) -> Result<()> {
        let destination = &self.options.destination;
        let handle = self
            .registry
            .get_or_create(destination)
            .await
            .map_err(|source| match source {
                ChannelError::ChannelInvalidated { identity } => IngestError::ChannelClosed {
                    identity,
                    message: "channel was closed by the ingestion service".to_string(),
                },
                source => IngestError::ChannelUnavailable { source },
            })?;

        report.transition(UnitState::Transforming)?;

        let mut rows = self.row_source(unit)?;
        let mut batch = Vec::new();
        let mut row_errors = Vec::new();

        while let Some(row) = rows.next_row()? {
            report.rows_built += 1;

            match self.options.insert_strategy {
                InsertStrategy::WholeUnit => batch.push(row),
                InsertStrategy::RowByRow => {
                    if report.state != UnitState::Inserting {
                        report.transition(UnitState::Inserting)?;
                    }

                    let row_index = report.rows_built - 1;
                    let outcome = self.submit(&handle, vec![row]).await?.rebase(row_index);
                    report.rows_submitted += 1;

                    if outcome.has_errors() {
                        row_errors.extend(outcome.into_errors());
                        if self.options.failure_policy == FailurePolicy::FailFast {
                            break;
                        }
                    }
                }
            }
        }

        if report.state != UnitState::Inserting {
            report.transition(UnitState::Inserting)?;
        }

        if !batch.is_empty() {
            let batch_size = batch.len() as u64;
            let outcome = self.submit(&handle, batch).await?;
            report.rows_submitted += batch_size;
            row_errors.extend(outcome.into_errors());
        }

        if !row_errors.is_empty() {
            return Err(IngestError::RowValidation { errors: row_errors });
        }

        report.transition(UnitState::Succeeded)
    }

    fn row_source(&self, unit: &IngestionUnit) -> Result<RowSource<'_>> {
        let Some(factory) = self.reader_factory.as_ref().filter(|_| self.options.mode.reads_records())
        else {
            let mut body = Vec::with_capacity(unit.size() as usize);
            unit.read().read_to_end(&mut body).context(IoSnafu {
                message: "failed to read unit body",
            })?;

            let row = self.row_builder.build_raw_row(&body)?;
            return Ok(RowSource::Body(Some(row)));
        };

        let reader = factory
            .create_reader(unit.attributes(), Box::new(unit.read()), unit.size())
            .context(DecodeSnafu)?;

        debug!(
            unit_id = %unit.id(),
            fields = reader.schema().len(),
            "record reader created"
        );

        Ok(RowSource::Records {
            reader,
            builder: &self.row_builder,
        })
    }

    async fn submit(&self, handle: &ChannelHandle, rows: Vec<Row>) -> Result<InsertOutcome> {
        let row_count = rows.len() as u64;

        let result = match <[Row; 1]>::try_from(rows) {
            Ok([row]) => handle.insert_row(row).await,
            Err(rows) => handle.insert_rows(rows).await,
        };

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(source) if source.is_channel_closed() => {
                self.registry.invalidate(handle);
                return Err(IngestError::ChannelClosed {
                    identity: handle.identity().clone(),
                    message: source.to_string(),
                });
            }
            Err(source) => return Err(IngestError::Submission { source }),
        };

        self.metrics.submitted_rows.add(
            row_count,
            &[KeyValue::new("table", handle.identity().table_name())],
        );

        if let Some(first) = outcome.first_error() {
            debug_first_error(first);
        }

        Ok(outcome)
    }
}

impl RowSource<'_> {
    fn next_row(&mut self) -> Result<Option<Row>> {
        match self {
            RowSource::Body(row) => Ok(row.take()),
            RowSource::Records { reader, builder } => {
                let Some(record) = reader.next_record().context(DecodeSnafu)? else {
                    return Ok(None);
                };

                builder.build_record_row(reader.schema(), &record).map(Some)
            }
        }
    }
}

fn debug_first_error(error: &InsertError) {
    debug!(
        row_index = error.row_index,
        message = %error.message,
        extra_columns = ?error.extra_columns,
        missing_not_null_columns = ?error.missing_not_null_columns,
        null_value_for_not_null_columns = ?error.null_value_for_not_null_columns,
        "row rejected"
    );
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitState::Pending => write!(f, "pending"),
            UnitState::Transforming => write!(f, "transforming"),
            UnitState::Inserting => write!(f, "inserting"),
            UnitState::Succeeded => write!(f, "succeeded"),
            UnitState::Failed => write!(f, "failed"),
        }
    }
}

impl fmt::Display for Relationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Relationship::Success => write!(f, "success"),
            Relationship::Failure => write!(f, "failure"),
        }
    }
}
