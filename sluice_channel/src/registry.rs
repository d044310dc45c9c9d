//! Cache of open ingestion channels keyed by destination identity.
//!
//! Channels are opened lazily, the first time a destination is requested, and
//! stay open until they are closed explicitly or the ingestion service reports
//! them closed.
//!
//! Each destination owns a once-cell slot in a concurrent map. Concurrent
//! requests for the same destination wait on the same slot, so only one of
//! them opens the remote channel; requests for other destinations never wait
//! on each other.

use std::sync::Arc;

use dashmap::DashMap;
use snafu::{OptionExt, ResultExt};
use sluice_resources::{DestinationIdentity, Row};
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    config::ConnectionConfig,
    error::{
        ChannelCloseSnafu, ChannelCreationSnafu, ChannelError, ConnectionSnafu,
        NotConfiguredSnafu, Result, ServiceError,
    },
    metrics::RegistryMetrics,
    outcome::InsertOutcome,
    service::{
        IngestChannel, IngestService, IngestServiceFactory, OnErrorOption, OpenChannelRequest,
        ServiceResult,
    },
};

type ChannelSlot = Arc<OnceCell<Arc<ChannelHandle>>>;

/// An open channel bound to a destination.
///
/// Handles are owned by the [`ChannelRegistry`]. Callers borrow them for the
/// duration of one unit of work and must not keep them around afterwards.
#[derive(Debug)]
pub struct ChannelHandle {
    identity: DestinationIdentity,
    open_request_id: Uuid,
    on_error: OnErrorOption,
    channel: Arc<dyn IngestChannel>,
}

pub struct ChannelRegistry {
    factory: Arc<dyn IngestServiceFactory>,
    service: RwLock<Option<Arc<dyn IngestService>>>,
    channels: DashMap<String, ChannelSlot>,
    metrics: RegistryMetrics,
}

impl ChannelRegistry {
    pub fn new(factory: Arc<dyn IngestServiceFactory>) -> Self {
        Self {
            factory,
            service: RwLock::new(None),
            channels: DashMap::new(),
            metrics: RegistryMetrics::default(),
        }
    }

    /// Builds the ingestion service client, replacing the current one.
    ///
    /// Channels already cached stay bound to the client that opened them.
    pub async fn configure(&self, config: ConnectionConfig) -> Result<()> {
        config.validate()?;

        let service = self
            .factory
            .connect(&config)
            .await
            .context(ConnectionSnafu {
                endpoint: config.endpoint.clone(),
            })?;

        let replaced = self.service.write().await.replace(service).is_some();

        info!(
            endpoint = %config.endpoint,
            principal = %config.principal,
            role = ?config.role,
            replaced,
            "ingestion service configured"
        );

        Ok(())
    }

    /// Returns the channel for the destination, opening it if needed.
    ///
    /// A cached channel that the ingestion service reports as closed is
    /// evicted and reported as [`ChannelError::ChannelInvalidated`]; the next
    /// call opens a new one.
    pub async fn get_or_create(&self, identity: &DestinationIdentity) -> Result<Arc<ChannelHandle>> {
        let key = identity.key();
        let slot = self.slot(&key);

        // A failed open leaves the slot empty. The slot stays in the map so that
        // callers already waiting on it retry in place.
        let handle = slot
            .get_or_try_init(|| self.open_channel(identity))
            .await?
            .clone();

        if !handle.is_valid() {
            warn!(
                destination = %identity,
                open_request_id = %handle.open_request_id,
                "cached channel was closed by the ingestion service"
            );
            self.invalidate(&handle);
            return Err(ChannelError::ChannelInvalidated {
                identity: identity.clone(),
            });
        }

        Ok(handle)
    }

    /// Evicts the handle from the cache, if it is still the cached one.
    ///
    /// The remote channel isn't closed: this is used once the service has
    /// already reported it closed.
    pub fn invalidate(&self, handle: &ChannelHandle) {
        let removed = self.channels.remove_if(&handle.identity.key(), |_, cached| {
            cached
                .get()
                .is_some_and(|cached| cached.open_request_id == handle.open_request_id)
        });

        if removed.is_some() {
            self.metrics.open_channels.add(-1, &[]);
            debug!(destination = %handle.identity, "channel evicted from cache");
        }
    }

    /// Removes the destination's channel from the cache and closes it.
    ///
    /// Closing a destination that has no cached channel is a no-op. An open
    /// still in flight is waited for, then closed.
    pub async fn close(&self, identity: &DestinationIdentity) -> Result<()> {
        let key = identity.key();
        let Some(slot) = self.channels.get(&key).map(|slot| slot.value().clone()) else {
            return Ok(());
        };

        let Some(handle) = Self::wait_for_open(&slot).await else {
            return Ok(());
        };

        let removed = self.channels.remove_if(&key, |_, cached| {
            Arc::ptr_eq(cached, &slot)
                && cached
                    .get()
                    .is_some_and(|cached| cached.open_request_id == handle.open_request_id)
        });

        // Someone else closed or evicted it first.
        if removed.is_none() {
            return Ok(());
        }

        self.metrics.open_channels.add(-1, &[]);

        handle
            .channel
            .close()
            .await
            .context(ChannelCloseSnafu {
                identity: identity.clone(),
            })?;

        info!(
            destination = %identity,
            open_request_id = %handle.open_request_id,
            "channel closed"
        );

        Ok(())
    }

    /// Closes every cached channel.
    ///
    /// All channels are closed even if some fail; the first error is returned.
    pub async fn close_all(&self) -> Result<()> {
        let identities = self
            .channels
            .iter()
            .filter_map(|entry| entry.value().get().map(|handle| handle.identity.clone()))
            .collect::<Vec<_>>();

        let mut first_error = None;
        for identity in identities {
            if let Err(error) = self.close(&identity).await {
                warn!(destination = %identity, error = %error, "failed to close channel");
                first_error.get_or_insert(error);
            }
        }

        match first_error {
            None => Ok(()),
            Some(error) => Err(error),
        }
    }

    /// Returns true if an open channel is cached for the destination.
    pub fn contains(&self, identity: &DestinationIdentity) -> bool {
        self.channels
            .get(&identity.key())
            .is_some_and(|slot| slot.initialized())
    }

    /// The number of cached channels.
    pub fn len(&self) -> usize {
        self.channels
            .iter()
            .filter(|entry| entry.value().initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, key: &str) -> ChannelSlot {
        if let Some(slot) = self.channels.get(key) {
            return slot.value().clone();
        }

        self.channels
            .entry(key.to_string())
            .or_default()
            .value()
            .clone()
    }

    /// Returns the slot's channel, waiting for an open in progress to finish.
    ///
    /// Returns `None` if the slot is empty and nobody is opening it, or if the
    /// open in progress failed.
    async fn wait_for_open(slot: &ChannelSlot) -> Option<Arc<ChannelHandle>> {
        slot.get_or_try_init(|| std::future::ready(Err(())))
            .await
            .ok()
            .cloned()
    }

    async fn open_channel(&self, identity: &DestinationIdentity) -> Result<Arc<ChannelHandle>> {
        let service = self
            .service
            .read()
            .await
            .clone()
            .context(NotConfiguredSnafu)?;

        let request = OpenChannelRequest::new(identity, OnErrorOption::Continue);
        let open_request_id = request.request_id;

        debug!(destination = %identity, %open_request_id, "opening channel");

        let channel = match service.open_channel(request).await {
            Ok(channel) => channel,
            Err(source) => {
                self.metrics.failed_channels.add(1, &[]);
                return Err(source).context(ChannelCreationSnafu {
                    identity: identity.clone(),
                });
            }
        };

        self.metrics.created_channels.add(1, &[]);
        self.metrics.open_channels.add(1, &[]);

        info!(
            destination = %identity,
            %open_request_id,
            channel = channel.name(),
            "channel opened"
        );

        Ok(Arc::new(ChannelHandle {
            identity: identity.clone(),
            open_request_id,
            on_error: OnErrorOption::Continue,
            channel,
        }))
    }
}

impl ChannelHandle {
    pub fn identity(&self) -> &DestinationIdentity {
        &self.identity
    }

    /// The identity of the open request that created this channel.
    pub fn open_request_id(&self) -> Uuid {
        self.open_request_id
    }

    pub fn on_error(&self) -> OnErrorOption {
        self.on_error
    }

    /// Returns false once the remote side closed the channel.
    pub fn is_valid(&self) -> bool {
        !self.channel.is_closed()
    }

    pub async fn insert_row(&self, row: Row) -> ServiceResult<InsertOutcome> {
        self.ensure_open()?;
        self.channel.insert_row(row).await
    }

    pub async fn insert_rows(&self, rows: Vec<Row>) -> ServiceResult<InsertOutcome> {
        self.ensure_open()?;
        self.channel.insert_rows(rows).await
    }

    fn ensure_open(&self) -> ServiceResult<()> {
        if self.channel.is_closed() {
            return Err(ServiceError::ChannelClosed {
                channel: self.identity.to_string(),
                reason: "channel is no longer open".to_string(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Mutex,
            atomic::{AtomicBool, AtomicUsize, Ordering},
        },
        time::Duration,
    };

    use async_trait::async_trait;
    use futures::future::join_all;

    use super::*;

    #[derive(Default)]
    struct CountingService {
        opened: AtomicUsize,
        fail_next: AtomicBool,
        channels: Mutex<Vec<Arc<CountingChannel>>>,
    }

    #[derive(Debug)]
    struct CountingChannel {
        name: String,
        closed: AtomicBool,
    }

    struct CountingFactory {
        service: Arc<CountingService>,
    }

    #[async_trait]
    impl IngestServiceFactory for CountingFactory {
        async fn connect(&self, _config: &ConnectionConfig) -> ServiceResult<Arc<dyn IngestService>> {
            Ok(self.service.clone())
        }
    }

    #[async_trait]
    impl IngestService for CountingService {
        async fn open_channel(
            &self,
            request: OpenChannelRequest,
        ) -> ServiceResult<Arc<dyn IngestChannel>> {
            assert_eq!(request.on_error, OnErrorOption::Continue);

            // Keep the open in flight long enough for concurrent callers to pile up.
            tokio::time::sleep(Duration::from_millis(20)).await;

            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(ServiceError::Unavailable {
                    message: "service is down".to_string(),
                });
            }

            self.opened.fetch_add(1, Ordering::SeqCst);
            let channel = Arc::new(CountingChannel {
                name: request.channel_name,
                closed: AtomicBool::new(false),
            });
            self.channels.lock().unwrap().push(channel.clone());
            Ok(channel)
        }
    }

    #[async_trait]
    impl IngestChannel for CountingChannel {
        fn name(&self) -> &str {
            &self.name
        }

        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }

        async fn insert_rows(&self, _rows: Vec<Row>) -> ServiceResult<InsertOutcome> {
            Ok(InsertOutcome::success())
        }

        async fn close(&self) -> ServiceResult<()> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn identity(channel: &str) -> DestinationIdentity {
        DestinationIdentity::new_unchecked("DB", "PUBLIC", "EVENTS", channel)
    }

    async fn configured_registry() -> (Arc<ChannelRegistry>, Arc<CountingService>) {
        let service = Arc::new(CountingService::default());
        let factory = Arc::new(CountingFactory {
            service: service.clone(),
        });
        let registry = Arc::new(ChannelRegistry::new(factory));
        registry
            .configure(ConnectionConfig::new("https://acme.example.com", "INGEST", "key"))
            .await
            .expect("configure");
        (registry, service)
    }

    #[tokio::test]
    async fn test_configure_rejects_missing_parameters() {
        let service = Arc::new(CountingService::default());
        let registry = ChannelRegistry::new(Arc::new(CountingFactory { service }));

        let err = registry
            .configure(ConnectionConfig::new("https://acme.example.com", "INGEST", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::Configuration { .. }));
    }

    #[tokio::test]
    async fn test_get_or_create_requires_configuration() {
        let service = Arc::new(CountingService::default());
        let registry = ChannelRegistry::new(Arc::new(CountingFactory { service }));

        let err = registry.get_or_create(&identity("channel1")).await.unwrap_err();
        assert!(matches!(err, ChannelError::NotConfigured));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_get_or_create_caches_channel() {
        let (registry, service) = configured_registry().await;

        let first = registry.get_or_create(&identity("channel1")).await.unwrap();
        let second = registry.get_or_create(&identity("channel1")).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(service.opened.load(Ordering::SeqCst), 1);
        assert!(registry.contains(&identity("channel1")));
        assert_eq!(first.on_error(), OnErrorOption::Continue);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_get_or_create_opens_one_channel() {
        let (registry, service) = configured_registry().await;

        let tasks = (0..16).map(|_| {
            let registry = registry.clone();
            tokio::spawn(async move { registry.get_or_create(&identity("channel1")).await })
        });

        let handles = join_all(tasks)
            .await
            .into_iter()
            .map(|result| result.expect("task").expect("get_or_create"))
            .collect::<Vec<_>>();

        assert_eq!(service.opened.load(Ordering::SeqCst), 1);
        let first_id = handles[0].open_request_id();
        assert!(handles.iter().all(|h| h.open_request_id() == first_id));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_distinct_identities_open_distinct_channels() {
        let (registry, service) = configured_registry().await;

        let channel1 = identity("channel1");
        let channel2 = identity("channel2");
        let (a, b) = tokio::join!(
            registry.get_or_create(&channel1),
            registry.get_or_create(&channel2),
        );

        assert_ne!(a.unwrap().open_request_id(), b.unwrap().open_request_id());
        assert_eq!(service.opened.load(Ordering::SeqCst), 2);
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn test_open_failure_is_surfaced() {
        let (registry, service) = configured_registry().await;
        service.fail_next.store(true, Ordering::SeqCst);

        let err = registry.get_or_create(&identity("channel1")).await.unwrap_err();
        assert!(matches!(
            err,
            ChannelError::ChannelCreation {
                source: ServiceError::Unavailable { .. },
                ..
            }
        ));
        assert!(!registry.contains(&identity("channel1")));

        // Nothing is retried internally, the next call opens a new channel.
        registry.get_or_create(&identity("channel1")).await.unwrap();
        assert_eq!(service.opened.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_retry_after_failed_open() {
        let (registry, service) = configured_registry().await;
        service.fail_next.store(true, Ordering::SeqCst);

        let tasks = (0..2).map(|_| {
            let registry = registry.clone();
            tokio::spawn(async move { registry.get_or_create(&identity("channel1")).await })
        });

        let results = join_all(tasks)
            .await
            .into_iter()
            .map(|result| result.expect("task"))
            .collect::<Vec<_>>();

        assert_eq!(results.iter().filter(|r| r.is_err()).count(), 1);
        let opened = results
            .into_iter()
            .find_map(|r| r.ok())
            .expect("one caller opens the channel");

        // The channel opened by the retrying caller is the cached one.
        assert!(registry.contains(&identity("channel1")));
        let cached = registry.get_or_create(&identity("channel1")).await.unwrap();
        assert!(Arc::ptr_eq(&opened, &cached));
        assert_eq!(service.opened.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_close_waits_for_open_in_flight() {
        let (registry, service) = configured_registry().await;

        let opening = tokio::spawn({
            let registry = registry.clone();
            async move { registry.get_or_create(&identity("channel1")).await }
        });

        // Let the open start, it takes 20ms to complete.
        tokio::time::sleep(Duration::from_millis(5)).await;
        registry.close(&identity("channel1")).await.unwrap();

        // The opener sees the channel either before or after it was closed.
        match opening.await.expect("task") {
            Ok(handle) => assert!(!handle.is_valid()),
            Err(err) => assert!(matches!(err, ChannelError::ChannelInvalidated { .. })),
        }
        assert!(!registry.contains(&identity("channel1")));
        assert_eq!(service.opened.load(Ordering::SeqCst), 1);
        assert!(service.channels.lock().unwrap()[0].is_closed());
    }

    #[tokio::test]
    async fn test_close_then_reopen() {
        let (registry, service) = configured_registry().await;

        let first = registry.get_or_create(&identity("channel1")).await.unwrap();
        registry.close(&identity("channel1")).await.unwrap();

        assert!(!first.is_valid());
        assert!(!registry.contains(&identity("channel1")));

        let second = registry.get_or_create(&identity("channel1")).await.unwrap();
        assert_ne!(first.open_request_id(), second.open_request_id());
        assert!(second.is_valid());
        assert_eq!(service.opened.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_close_missing_is_noop() {
        let (registry, _service) = configured_registry().await;
        registry.close(&identity("never-used")).await.unwrap();
    }

    #[tokio::test]
    async fn test_remotely_closed_channel_is_evicted() {
        let (registry, service) = configured_registry().await;

        let first = registry.get_or_create(&identity("channel1")).await.unwrap();
        service.channels.lock().unwrap()[0]
            .closed
            .store(true, Ordering::SeqCst);

        let err = first.insert_row(Row::new()).await.unwrap_err();
        assert!(err.is_channel_closed());

        let err = registry.get_or_create(&identity("channel1")).await.unwrap_err();
        assert!(matches!(err, ChannelError::ChannelInvalidated { .. }));
        assert!(!registry.contains(&identity("channel1")));

        let second = registry.get_or_create(&identity("channel1")).await.unwrap();
        assert_ne!(first.open_request_id(), second.open_request_id());
    }

    #[tokio::test]
    async fn test_invalidate_ignores_stale_handle() {
        let (registry, _service) = configured_registry().await;

        let first = registry.get_or_create(&identity("channel1")).await.unwrap();
        registry.close(&identity("channel1")).await.unwrap();
        let second = registry.get_or_create(&identity("channel1")).await.unwrap();

        registry.invalidate(&first);
        assert!(registry.contains(&identity("channel1")));

        registry.invalidate(&second);
        assert!(!registry.contains(&identity("channel1")));
    }

    #[tokio::test]
    async fn test_close_all() {
        let (registry, service) = configured_registry().await;

        registry.get_or_create(&identity("channel1")).await.unwrap();
        registry.get_or_create(&identity("channel2")).await.unwrap();
        registry.close_all().await.unwrap();

        assert!(registry.is_empty());
        assert!(
            service
                .channels
                .lock()
                .unwrap()
                .iter()
                .all(|channel| channel.is_closed())
        );
    }
}
