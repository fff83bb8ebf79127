//! Live location tracking: one background worker per tracked entity.

use crate::config::{BackoffConfig, StreamConfig, TrackerConfig};
use crate::connection::{SessionShared, StreamWorker};
use crate::identity::{Credential, IdentitySource};
use crate::listener::LocationListener;
use crate::metrics::StreamMetrics;
use crate::router::ShardRouter;
use crate::sample::LocationSample;
use crate::session::{ConnectionState, SessionSnapshot, StreamSession};
use crate::transport::StreamTransport;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tracing::info;

/// Entry point for live location tracking.
///
/// Holds the shard router, identity source and transport shared by every
/// session it starts.
///
/// # Example
///
/// ```ignore
/// use fleet_tracker::{LiveLocationStream, TrackerConfig, WsTransport, Identity};
/// use std::sync::Arc;
///
/// let config = TrackerConfig::from_env()?;
/// let stream = LiveLocationStream::new(&config, Arc::new(Identity::anonymous()), WsTransport::new());
///
/// let handle = stream.track("BUS-42", None, |id: &str, sample: &LocationSample| {
///     println!("{} -> {}, {}", id, sample.latitude, sample.longitude);
/// });
///
/// // Later, or simply drop the handle
/// handle.cancel();
/// ```
pub struct LiveLocationStream<T: StreamTransport, I: IdentitySource> {
    router: Arc<ShardRouter>,
    identity: Arc<I>,
    transport: Arc<T>,
    stream: StreamConfig,
    backoff: BackoffConfig,
    metrics: Arc<StreamMetrics>,
}

impl<T: StreamTransport, I: IdentitySource> LiveLocationStream<T, I> {
    pub fn new(config: &TrackerConfig, identity: Arc<I>, transport: T) -> Self {
        Self {
            router: Arc::new(ShardRouter::new(
                config.shards.clone(),
                config.auth_endpoint.clone(),
            )),
            identity,
            transport: Arc::new(transport),
            stream: config.stream.clone(),
            backoff: config.backoff.clone(),
            metrics: Arc::new(StreamMetrics::new()),
        }
    }

    /// Shard router used to resolve stream endpoints
    pub fn router(&self) -> &ShardRouter {
        &self.router
    }

    /// Counters shared by all sessions
    pub fn metrics(&self) -> Arc<StreamMetrics> {
        self.metrics.clone()
    }

    /// Transport used for every session
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Start tracking `entity_id`.
    ///
    /// `credential` overrides the identity source's credential for this
    /// session. The worker runs until the returned handle is cancelled or
    /// dropped.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn track<L: LocationListener>(
        &self,
        entity_id: impl Into<String>,
        credential: Option<Credential>,
        listener: L,
    ) -> TrackingHandle {
        let entity_id = entity_id.into();
        let shared = Arc::new(SessionShared::new(&entity_id));

        let worker = StreamWorker {
            entity_id: entity_id.clone(),
            credential,
            router: self.router.clone(),
            identity: self.identity.clone(),
            transport: self.transport.clone(),
            listener,
            stream: self.stream.clone(),
            backoff: self.backoff.clone(),
            metrics: self.metrics.clone(),
            shared: shared.clone(),
        };

        info!("[TRACK-{}] Tracking started", entity_id);
        self.metrics.session_started();
        let task = tokio::spawn(worker.run());

        TrackingHandle {
            entity_id,
            shared,
            task: Mutex::new(Some(task)),
            freshness_threshold: self.stream.freshness_threshold,
            metrics: self.metrics.clone(),
        }
    }
}

/// Handle to one tracking session.
///
/// Dropping the handle cancels the session.
pub struct TrackingHandle {
    entity_id: String,
    shared: Arc<SessionShared>,
    task: Mutex<Option<JoinHandle<()>>>,
    freshness_threshold: Duration,
    metrics: Arc<StreamMetrics>,
}

impl TrackingHandle {
    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    /// Latest accepted sample
    pub fn current_sample(&self) -> Option<LocationSample> {
        self.shared.read(StreamSession::latest_sample)
    }

    /// Local time the latest sample was accepted
    pub fn last_update_time(&self) -> Option<Instant> {
        self.shared.read(StreamSession::last_update)
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.read(StreamSession::state)
    }

    /// Failed connection attempts since the stream was last open
    pub fn retry_count(&self) -> u32 {
        self.shared.read(StreamSession::retry_count)
    }

    /// True until the first sample arrives
    pub fn is_loading(&self) -> bool {
        self.shared.read(StreamSession::is_loading)
    }

    /// True when the latest sample is older than the freshness threshold
    pub fn is_stale(&self) -> bool {
        let now = Instant::now();
        self.shared
            .read(|session| session.is_stale(self.freshness_threshold, now))
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let now = Instant::now();
        self.shared
            .read(|session| session.snapshot(self.freshness_threshold, now))
    }

    pub fn is_closed(&self) -> bool {
        self.state().is_closed()
    }

    /// Stop tracking. Idempotent.
    ///
    /// Waits for an in-flight listener callback to finish; once this returns
    /// no further callbacks are made. Safe to call from inside a callback.
    pub fn cancel(&self) {
        if self.shared.close() {
            self.metrics.session_ended();
            info!("[TRACK-{}] Tracking cancelled", self.entity_id);
        }
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}

impl Drop for TrackingHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for TrackingHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackingHandle")
            .field("entity_id", &self.entity_id)
            .field("state", &self.state())
            .finish()
    }
}
