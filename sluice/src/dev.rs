use std::{path::PathBuf, sync::Arc};

use clap::{Args, ValueEnum};
use futures::future::join_all;
use snafu::ResultExt;
use sluice_channel::{ChannelRegistry, ConnectionConfig};
use sluice_channel_memory::{InMemoryIngestService, TableDefinition};
use sluice_ingestor_core::{
    DEFAULT_CONCURRENCY, DEFAULT_TARGET_COLUMN, DEFAULT_TIMESTAMP_COLUMN, FailurePolicy,
    IngestionPipeline, IngestionUnit, InsertStrategy, JsonLinesReaderFactory, PipelineOptions,
    RecordReaderFactory, Relationship, RoutedUnit, TransformMode, UnitWorker, VariantEncoding,
    WorkerError,
};
use sluice_resources::{DEFAULT_CHANNEL_NAME, DestinationIdentity};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::{
    ChannelSnafu, FailedUnitsSnafu, InvalidArgumentSnafu, InvalidDestinationSnafu, IoSnafu,
    PipelineSnafu, ReadInputSnafu, Result, WorkerSnafu, WorkerTaskSnafu,
};

#[derive(Debug, Args)]
pub struct DevArgs {
    /// Input files, one unit each.
    ///
    /// Reads a single unit from stdin when no file is given.
    files: Vec<PathBuf>,
    #[clap(flatten)]
    connection: ConnectionArgs,
    #[clap(flatten)]
    destination: DestinationArgs,
    #[clap(flatten)]
    pipeline: PipelineArgs,
}

/// Arguments for connecting to the ingestion service.
#[derive(Debug, Args, Clone)]
pub struct ConnectionArgs {
    /// The ingestion service endpoint URL.
    #[arg(long, env = "SLUICE_ENDPOINT")]
    endpoint: String,
    /// The user to authenticate as.
    #[arg(long, env = "SLUICE_USER")]
    user: String,
    /// The user's private key.
    #[arg(long, env = "SLUICE_PRIVATE_KEY", hide_env_values = true)]
    private_key: String,
    /// The role to assume.
    #[arg(long, env = "SLUICE_ROLE")]
    role: Option<String>,
}

/// Arguments identifying the destination channel.
#[derive(Debug, Args, Clone)]
pub struct DestinationArgs {
    #[arg(long)]
    database: String,
    #[arg(long)]
    schema: String,
    #[arg(long)]
    table: String,
    /// The name of the channel used to write into the table.
    #[arg(long, default_value = DEFAULT_CHANNEL_NAME)]
    channel: String,
}

#[derive(Debug, Args, Clone)]
pub struct PipelineArgs {
    /// How records become rows.
    #[arg(long, value_enum, default_value_t = Mode::FieldWise)]
    mode: Mode,
    #[arg(long, value_enum, default_value_t = Strategy::RowByRow)]
    insert_strategy: Strategy,
    #[arg(long, value_enum, default_value_t = Policy::FailFast)]
    failure_policy: Policy,
    /// The column receiving the body in raw mode, or the JSON object in
    /// variant mode.
    #[arg(long, default_value = DEFAULT_TARGET_COLUMN)]
    target_column: String,
    #[arg(long, value_enum, default_value_t = Encoding::Stringified)]
    variant_encoding: Encoding,
    /// Add the ingestion time to every row.
    ///
    /// Only supported in raw and variant modes.
    #[arg(long)]
    add_ingestion_timestamp: bool,
    #[arg(long, default_value = DEFAULT_TIMESTAMP_COLUMN)]
    timestamp_column: String,
    /// The number of units processed at the same time.
    #[arg(long, default_value_t = DEFAULT_CONCURRENCY)]
    concurrency: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    FieldWise,
    Raw,
    Variant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Strategy {
    RowByRow,
    WholeUnit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Policy {
    FailFast,
    CollectAll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Encoding {
    Stringified,
    Typed,
}

impl DevArgs {
    pub async fn run(self, ct: CancellationToken) -> Result<()> {
        let destination = self.destination.identity()?;
        let options = self.pipeline.options(destination.clone())?;

        let service = InMemoryIngestService::new();
        service
            .create_table(
                destination.database(),
                destination.schema(),
                destination.table(),
                TableDefinition::open(),
            )
            .await;

        let registry = Arc::new(ChannelRegistry::new(Arc::new(service.clone())));
        registry
            .configure(self.connection.config())
            .await
            .context(ChannelSnafu {})?;

        let reader_factory: Option<Arc<dyn RecordReaderFactory>> =
            Some(Arc::new(JsonLinesReaderFactory::new()));
        let pipeline = IngestionPipeline::new(registry, reader_factory, options)
            .context(PipelineSnafu {})?;

        let units = read_units(&self.files).await?;
        let total = units.len();

        println!("Starting sluice in development mode");
        println!("Destination: {destination}");
        println!("Units: {total}");

        let worker = UnitWorker::new(Arc::new(pipeline), self.pipeline.concurrency);
        let client = worker.client();
        let worker_fut = tokio::spawn(worker.run(ct.child_token()));

        let routed = join_all(units.into_iter().map(|(name, unit)| {
            let client = client.clone();
            async move { (name, client.submit(unit).await) }
        }))
        .await;

        // The worker stops once its last client is gone.
        drop(client);

        let failed = print_routed(routed)?;

        worker_fut
            .await
            .context(WorkerTaskSnafu {})?
            .context(WorkerSnafu {})?;

        let stored = service
            .rows(&destination.table_name())
            .await
            .map(|rows| rows.len())
            .unwrap_or_default();

        info!(stored, "rows committed to {}", destination.table_name());
        println!("Rows committed to {}: {stored}", destination.table_name());

        if failed > 0 {
            return FailedUnitsSnafu { failed, total }.fail();
        }

        Ok(())
    }
}

impl ConnectionArgs {
    fn config(&self) -> ConnectionConfig {
        let config = ConnectionConfig::new(&self.endpoint, &self.user, &self.private_key);
        match &self.role {
            Some(role) => config.with_role(role),
            None => config,
        }
    }
}

impl DestinationArgs {
    fn identity(&self) -> Result<DestinationIdentity> {
        DestinationIdentity::new(&self.database, &self.schema, &self.table, &self.channel)
            .context(InvalidDestinationSnafu {})
    }
}

impl PipelineArgs {
    fn options(&self, destination: DestinationIdentity) -> Result<PipelineOptions> {
        if self.concurrency == 0 {
            return InvalidArgumentSnafu {
                name: "concurrency",
                message: "must be at least 1",
            }
            .fail();
        }

        let mode = match (self.mode, self.variant_encoding) {
            (Mode::FieldWise, _) => TransformMode::FieldWise,
            (Mode::Raw, _) => TransformMode::raw(&self.target_column),
            (Mode::Variant, Encoding::Stringified) => TransformMode::Variant {
                target_column: self.target_column.clone(),
                encoding: VariantEncoding::Stringified,
            },
            (Mode::Variant, Encoding::Typed) => TransformMode::Variant {
                target_column: self.target_column.clone(),
                encoding: VariantEncoding::Typed,
            },
        };

        let insert_strategy = match self.insert_strategy {
            Strategy::RowByRow => InsertStrategy::RowByRow,
            Strategy::WholeUnit => InsertStrategy::WholeUnit,
        };

        let failure_policy = match self.failure_policy {
            Policy::FailFast => FailurePolicy::FailFast,
            Policy::CollectAll => FailurePolicy::CollectAll,
        };

        let mut options = PipelineOptions::new(destination)
            .with_mode(mode)
            .with_insert_strategy(insert_strategy)
            .with_failure_policy(failure_policy);

        if self.add_ingestion_timestamp {
            options = options.with_ingestion_timestamp(&self.timestamp_column);
        }

        Ok(options)
    }
}

/// Prints where each unit was routed and returns the number of failed units.
fn print_routed(routed: Vec<(String, Result<RoutedUnit, WorkerError>)>) -> Result<usize> {
    let mut failed = 0_usize;
    for (name, routed) in routed {
        let routed = routed.context(WorkerSnafu {})?;
        match (&routed.relationship, &routed.report.error) {
            (Relationship::Failure, Some(error)) => {
                failed += 1;
                println!("{name}: {} ({error})", routed.relationship);
            }
            _ => println!(
                "{name}: {} ({} rows)",
                routed.relationship, routed.report.rows_submitted
            ),
        }
    }

    Ok(failed)
}

async fn read_units(files: &[PathBuf]) -> Result<Vec<(String, IngestionUnit)>> {
    if files.is_empty() {
        let mut content = Vec::new();
        tokio::io::stdin()
            .read_to_end(&mut content)
            .await
            .context(IoSnafu {})?;
        return Ok(vec![("stdin".to_string(), IngestionUnit::new(content))]);
    }

    let mut units = Vec::with_capacity(files.len());
    for path in files {
        let content = tokio::fs::read(path)
            .await
            .context(ReadInputSnafu { path: path.clone() })?;

        let name = path.display().to_string();
        let unit = IngestionUnit::new(content).with_attribute("filename", name.clone());
        units.push((name, unit));
    }

    Ok(units)
}
