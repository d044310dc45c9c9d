use std::sync::Arc;

use futures::{StreamExt, stream::FuturesUnordered};
use snafu::ResultExt;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    error::{ReplyChannelClosedSnafu, ShutdownSnafu, WorkerError},
    pipeline::{IngestionPipeline, RoutedUnit},
    unit::IngestionUnit,
};

pub const DEFAULT_CONCURRENCY: usize = 4;

/// Processes units in the background, several at a time.
///
/// The worker stops when cancelled or once every client is dropped and the
/// queue is drained. The pipeline's channel is closed on exit.
pub struct UnitWorker {
    tx: mpsc::Sender<UnitWithReply>,
    rx: mpsc::Receiver<UnitWithReply>,
    pipeline: Arc<IngestionPipeline>,
    concurrency: usize,
}

#[derive(Clone)]
pub struct UnitWorkerClient {
    tx: mpsc::Sender<UnitWithReply>,
}

struct UnitWithReply {
    unit: IngestionUnit,
    reply: oneshot::Sender<RoutedUnit>,
}

pub async fn run_background_worker(
    worker: UnitWorker,
    ct: CancellationToken,
) -> Result<(), WorkerError> {
    worker.run(ct).await
}

impl UnitWorker {
    pub fn new(pipeline: Arc<IngestionPipeline>, concurrency: usize) -> Self {
        let concurrency = concurrency.max(1);
        let (tx, rx) = mpsc::channel(concurrency * 2);

        Self {
            tx,
            rx,
            pipeline,
            concurrency,
        }
    }

    pub fn client(&self) -> UnitWorkerClient {
        UnitWorkerClient {
            tx: self.tx.clone(),
        }
    }

    /// Runs the worker until it's cancelled or its clients are gone.
    ///
    /// On cancellation, units in flight or still queued are dropped without
    /// being routed; their clients get [`WorkerError::ReplyChannelClosed`].
    pub async fn run(self, ct: CancellationToken) -> Result<(), WorkerError> {
        let UnitWorker {
            tx,
            mut rx,
            pipeline,
            concurrency,
        } = self;

        // Only clients keep the queue open from now on.
        drop(tx);

        let mut tasks = FuturesUnordered::new();
        let mut receiving = true;

        info!(concurrency, destination = %pipeline.options().destination, "unit worker started");

        loop {
            tokio::select! {
                _ = ct.cancelled() => {
                    debug!(in_flight = tasks.len(), "unit worker cancelled");
                    break;
                }
                unit_with_reply = rx.recv(), if receiving && tasks.len() < concurrency => {
                    let Some(UnitWithReply { unit, reply }) = unit_with_reply else {
                        receiving = false;
                        if tasks.is_empty() {
                            break;
                        }
                        continue;
                    };

                    tasks.push(process_unit(pipeline.clone(), unit, reply));
                }
                _ = tasks.next(), if !tasks.is_empty() => {
                    if !receiving && tasks.is_empty() {
                        break;
                    }
                }
            }
        }

        drop(tasks);

        pipeline.shutdown().await.context(ShutdownSnafu)?;
        info!("unit worker stopped");

        Ok(())
    }
}

impl UnitWorkerClient {
    /// Queues a unit and waits until it's routed.
    pub async fn submit(&self, unit: IngestionUnit) -> Result<RoutedUnit, WorkerError> {
        let (tx, rx) = oneshot::channel();

        self.tx
            .send(UnitWithReply { unit, reply: tx })
            .await
            .or_else(|_| ReplyChannelClosedSnafu {}.fail())?;

        rx.await.or_else(|_| ReplyChannelClosedSnafu {}.fail())
    }
}

async fn process_unit(
    pipeline: Arc<IngestionPipeline>,
    unit: IngestionUnit,
    reply: oneshot::Sender<RoutedUnit>,
) {
    let routed = pipeline.process(unit).await;
    let _ = reply.send(routed);
}
