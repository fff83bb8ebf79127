use crate::config::{BackoffConfig, StreamConfig};
use crate::error::{Error, ErrorKind};
use crate::health::IdleMonitor;
use crate::identity::{Credential, IdentitySource};
use crate::listener::LocationListener;
use crate::metrics::StreamMetrics;
use crate::router::{Purpose, ShardRouter};
use crate::sample::LocationSample;
use crate::session::{Delivery, StreamSession};
use crate::transport::{Frame, FrameStream, StreamRequest, StreamTransport};
use crate::Result;
use futures_util::StreamExt;
use parking_lot::{Mutex, ReentrantMutex};
use std::fmt;
use std::sync::Arc;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// State shared between a tracking handle and its worker.
///
/// `delivery` is held for every listener callback and by [`close`]; once
/// `close` returns no callback is running and none will start.
///
/// [`close`]: SessionShared::close
pub(crate) struct SessionShared {
    session: Mutex<StreamSession>,
    delivery: ReentrantMutex<()>,
    token: CancellationToken,
}

impl SessionShared {
    pub(crate) fn new(entity_id: &str) -> Self {
        Self {
            session: Mutex::new(StreamSession::new(entity_id)),
            delivery: ReentrantMutex::new(()),
            token: CancellationToken::new(),
        }
    }

    /// Read the session without touching the delivery gate
    pub(crate) fn read<R>(&self, f: impl FnOnce(&StreamSession) -> R) -> R {
        f(&*self.session.lock())
    }

    /// Close the session and signal the worker to stop.
    ///
    /// Returns `false` if it was already closed.
    pub(crate) fn close(&self) -> bool {
        let _gate = self.delivery.lock();
        let closed = self.session.lock().close();
        self.token.cancel();
        closed
    }
}

/// Why an open stream ended
enum Disconnect {
    CloseFrame,
    EndOfStream,
    IdleTimeout,
    Transport(Error),
    Cancelled,
}

impl fmt::Display for Disconnect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Disconnect::CloseFrame => f.write_str("server sent close"),
            Disconnect::EndOfStream => f.write_str("stream ended"),
            Disconnect::IdleTimeout => f.write_str("idle timeout"),
            Disconnect::Transport(e) => write!(f, "transport error: {}", e),
            Disconnect::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Drives one tracking session: connect, consume, back off, repeat.
///
/// Never gives up on its own; only cancellation ends it.
pub(crate) struct StreamWorker<T, I, L> {
    pub(crate) entity_id: String,
    pub(crate) credential: Option<Credential>,
    pub(crate) router: Arc<ShardRouter>,
    pub(crate) identity: Arc<I>,
    pub(crate) transport: Arc<T>,
    pub(crate) listener: L,
    pub(crate) stream: StreamConfig,
    pub(crate) backoff: BackoffConfig,
    pub(crate) metrics: Arc<StreamMetrics>,
    pub(crate) shared: Arc<SessionShared>,
}

impl<T, I, L> StreamWorker<T, I, L>
where
    T: StreamTransport,
    I: IdentitySource,
    L: LocationListener,
{
    /// Run until the session is cancelled
    pub(crate) async fn run(self) {
        let token = self.shared.token.clone();
        tokio::select! {
            _ = token.cancelled() => {
                debug!("[TRACK-{}] Worker cancelled", self.entity_id);
            }
            _ = self.run_loop() => {
                debug!("[TRACK-{}] Worker stopped (session closed)", self.entity_id);
            }
        }
    }

    async fn run_loop(&self) {
        let mut is_first_attempt = true;

        loop {
            if !is_first_attempt {
                let retry_count = self.shared.read(StreamSession::retry_count);
                let delay = self.backoff.delay_for_attempt(retry_count);
                debug!(
                    "[TRACK-{}] Reconnecting in {:?} (retry {})",
                    self.entity_id, delay, retry_count
                );
                tokio::time::sleep(delay).await;
                self.metrics.record_reconnect_attempt();
            }
            is_first_attempt = false;

            let (request, frames) = match self.connect().await {
                Ok(connected) => connected,
                Err(e) => {
                    self.metrics.record_connect_failure();
                    if e.kind() == ErrorKind::Timeout {
                        self.metrics.record_connect_timeout();
                    }
                    if e.is_transport() {
                        warn!("[TRACK-{}] Connection attempt failed: {}", self.entity_id, e);
                    } else {
                        error!("[TRACK-{}] Cannot open stream: {}", self.entity_id, e);
                    }
                    if !self.transition(StreamSession::mark_attempt_failed) {
                        return;
                    }
                    continue;
                }
            };

            if !self.transition(StreamSession::mark_open) {
                return;
            }
            self.metrics.record_connection();
            info!("[TRACK-{}] Connected to {}", self.entity_id, request.url);

            let reason = self.consume(frames).await;
            if matches!(reason, Disconnect::Cancelled) {
                return;
            }

            self.metrics.record_disconnect();
            match &reason {
                Disconnect::Transport(_) => {
                    warn!("[TRACK-{}] Disconnected: {}", self.entity_id, reason)
                }
                _ => info!("[TRACK-{}] Disconnected: {}", self.entity_id, reason),
            }

            if !self.transition(StreamSession::mark_disconnected) {
                return;
            }
        }
    }

    /// Resolve the shard for the current partition key and open a stream
    async fn connect(&self) -> Result<(StreamRequest, FrameStream)> {
        let key = self.identity.partition_key();
        let endpoint = self.router.resolve_endpoint(Purpose::Data, key);
        let credential = self
            .credential
            .clone()
            .or_else(|| self.identity.credential());
        let request =
            StreamRequest::build(endpoint, &self.stream.stream_path, &self.entity_id, credential)?;

        debug!(
            "[TRACK-{}] Connecting to {} (shard={}, partition_key={:?})",
            self.entity_id,
            request.url,
            self.router.shard_index(key),
            key
        );

        let connect_timeout = self.stream.connect_timeout;
        let frames = timeout(connect_timeout, self.transport.connect(&request))
            .await
            .map_err(|_| Error::Timeout(connect_timeout))??;

        Ok((request, frames))
    }

    /// Consume frames until the stream ends or goes idle
    async fn consume(&self, mut frames: FrameStream) -> Disconnect {
        let mut idle = IdleMonitor::new(self.stream.idle_timeout);

        loop {
            let next_check = idle.time_until_check();

            tokio::select! {
                frame = frames.next() => {
                    let frame = match frame {
                        Some(Ok(frame)) => frame,
                        Some(Err(e)) => return Disconnect::Transport(e),
                        None => return Disconnect::EndOfStream,
                    };
                    idle.record_frame();

                    match frame {
                        Frame::Payload(payload) => {
                            self.metrics.record_message_received();
                            if self.handle_payload(&payload) == Some(Delivery::Closed) {
                                return Disconnect::Cancelled;
                            }
                        }
                        Frame::KeepAlive => {
                            trace!("[TRACK-{}] Keep-alive", self.entity_id);
                        }
                        Frame::Close => return Disconnect::CloseFrame,
                    }
                }

                _ = tokio::time::sleep(next_check.unwrap_or_default()), if next_check.is_some() => {
                    if idle.is_idle_timeout() {
                        self.metrics.record_idle_timeout();
                        debug!(
                            "[TRACK-{}] No frames for {:?} ({} received on this connection)",
                            self.entity_id,
                            self.stream.idle_timeout.unwrap_or_default(),
                            idle.frames_received()
                        );
                        return Disconnect::IdleTimeout;
                    }
                }
            }
        }
    }

    /// Parse and deliver one payload; `None` if it was malformed
    fn handle_payload(&self, payload: &str) -> Option<Delivery> {
        match LocationSample::from_payload(payload) {
            Ok(sample) => Some(self.deliver(sample)),
            Err(e) => {
                self.metrics.record_sample_malformed();
                debug!("[TRACK-{}] Dropping malformed payload: {}", self.entity_id, e);
                None
            }
        }
    }

    /// Offer a sample and notify the listener, all under the delivery gate
    fn deliver(&self, sample: LocationSample) -> Delivery {
        let _gate = self.shared.delivery.lock();
        let delivery = self.shared.session.lock().offer(sample, Instant::now());

        match delivery {
            Delivery::Accepted => {
                self.metrics.record_sample_accepted();
                self.listener.on_sample(&self.entity_id, &sample);
            }
            Delivery::Dropped(verdict) => {
                self.metrics.record_sample_dropped();
                trace!(
                    "[TRACK-{}] Dropped {:?} sample (t={})",
                    self.entity_id,
                    verdict,
                    sample.timestamp
                );
            }
            Delivery::Closed => {}
        }

        delivery
    }

    /// Apply a session transition and report a state change.
    ///
    /// Returns `false` once the session is closed.
    fn transition(&self, apply: impl FnOnce(&mut StreamSession) -> bool) -> bool {
        let _gate = self.shared.delivery.lock();
        let (before, after) = {
            let mut session = self.shared.session.lock();
            let before = session.state();
            if !apply(&mut *session) {
                return false;
            }
            (before, session.state())
        };

        if before != after {
            debug!("[TRACK-{}] {:?} -> {:?}", self.entity_id, before, after);
            self.listener.on_state_change(&self.entity_id, after);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Identity;
    use crate::mock::MockTransport;
    use crate::router::{PartitionKey, ShardTable};
    use crate::session::ConnectionState;
    use tokio::time::Duration;

    #[derive(Default)]
    struct Recorded {
        samples: Mutex<Vec<u64>>,
        states: Mutex<Vec<ConnectionState>>,
    }

    #[derive(Clone, Default)]
    struct Recorder(Arc<Recorded>);

    impl std::ops::Deref for Recorder {
        type Target = Recorded;

        fn deref(&self) -> &Recorded {
            &self.0
        }
    }

    impl LocationListener for Recorder {
        fn on_sample(&self, _entity_id: &str, sample: &LocationSample) {
            self.samples.lock().push(sample.timestamp);
        }

        fn on_state_change(&self, _entity_id: &str, state: ConnectionState) {
            self.states.lock().push(state);
        }
    }

    fn worker(
        transport: Arc<MockTransport>,
        recorder: Recorder,
    ) -> StreamWorker<MockTransport, Identity, Recorder> {
        let table = ShardTable::standard(
            "https://s1.example.com",
            "https://s2.example.com",
            "https://s3.example.com",
        );
        StreamWorker {
            entity_id: "BUS-7".to_string(),
            credential: None,
            router: Arc::new(ShardRouter::new(table, "https://auth.example.com")),
            identity: Arc::new(Identity::new(Some(PartitionKey::new(4000)), None)),
            transport,
            listener: recorder,
            stream: StreamConfig {
                idle_timeout: Some(Duration::from_secs(5)),
                ..StreamConfig::default()
            },
            backoff: BackoffConfig::default(),
            metrics: Arc::new(StreamMetrics::new()),
            shared: Arc::new(SessionShared::new("BUS-7")),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transition_reports_changes_only() {
        let recorder = Recorder::default();
        let worker = worker(Arc::new(MockTransport::new()), recorder.clone());

        assert!(worker.transition(StreamSession::mark_attempt_failed));
        assert!(worker.transition(StreamSession::mark_attempt_failed));
        assert!(worker.transition(StreamSession::mark_open));

        assert_eq!(
            *recorder.states.lock(),
            vec![ConnectionState::Reconnecting, ConnectionState::Open]
        );

        worker.shared.close();
        assert!(!worker.transition(StreamSession::mark_disconnected));
        assert_eq!(recorder.states.lock().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_and_stale_payloads_are_counted() {
        let recorder = Recorder::default();
        let worker = worker(Arc::new(MockTransport::new()), recorder.clone());
        worker.transition(StreamSession::mark_open);

        assert_eq!(worker.handle_payload("not json"), None);
        assert_eq!(
            worker.handle_payload(r#"{"lat":1.0,"long":2.0,"t":10}"#),
            Some(Delivery::Accepted)
        );
        assert!(matches!(
            worker.handle_payload(r#"{"lat":1.0,"long":2.0,"t":9}"#),
            Some(Delivery::Dropped(_))
        ));

        assert_eq!(*recorder.samples.lock(), vec![10]);
        assert_eq!(worker.metrics.samples_malformed(), 1);
        assert_eq!(worker.metrics.samples_accepted(), 1);
        assert_eq!(worker.metrics.samples_dropped(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_resolves_shard_for_partition_key() {
        let transport = Arc::new(MockTransport::new());
        let _feed = transport.accept();
        let worker = worker(transport.clone(), Recorder::default());

        let (request, _frames) = worker.connect().await.unwrap();
        assert_eq!(request.url.as_str(), "wss://s3.example.com/api/live?id=BUS-7");
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_times_out() {
        let transport = Arc::new(MockTransport::new());
        transport.hang();
        let worker = worker(transport, Recorder::default());

        let result = worker.connect().await;
        assert!(matches!(result, Err(Error::Timeout(d)) if d == Duration::from_secs(10)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_consume_stops_on_idle_timeout() {
        let transport = Arc::new(MockTransport::new());
        let feed = transport.accept();
        let worker = worker(transport, Recorder::default());

        let (_request, frames) = worker.connect().await.unwrap();
        feed.keep_alive();

        let reason = worker.consume(frames).await;
        assert!(matches!(reason, Disconnect::IdleTimeout));
        assert_eq!(worker.metrics.idle_timeouts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_consume_stops_on_close_frame() {
        let transport = Arc::new(MockTransport::new());
        let feed = transport.accept();
        let worker = worker(transport, Recorder::default());

        let (_request, frames) = worker.connect().await.unwrap();
        feed.close();

        assert!(matches!(worker.consume(frames).await, Disconnect::CloseFrame));
    }
}
