use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics for observability
///
/// Counters shared by every session of one
/// [`LiveLocationStream`](crate::LiveLocationStream). Dropped and malformed
/// samples are only counted here; they never reach the consumer.
///
/// # Example
/// ```ignore
/// let metrics = stream.metrics();
///
/// println!("Connections: {}", metrics.connections());
/// println!("Dropped samples: {}", metrics.samples_dropped());
///
/// let snapshot = metrics.snapshot();
/// ```
#[derive(Debug, Default)]
pub struct StreamMetrics {
    connections_total: AtomicU64,
    reconnect_attempts_total: AtomicU64,
    connect_failures_total: AtomicU64,
    connect_timeouts_total: AtomicU64,
    disconnects_total: AtomicU64,
    messages_received_total: AtomicU64,
    samples_accepted_total: AtomicU64,
    samples_dropped_total: AtomicU64,
    samples_malformed_total: AtomicU64,
    idle_timeouts_total: AtomicU64,
    active_sessions: AtomicU64,
}

impl StreamMetrics {
    /// Create a new metrics instance
    pub fn new() -> Self {
        Self::default()
    }

    // ========== Getters ==========

    /// Get total connections established
    pub fn connections(&self) -> u64 {
        self.connections_total.load(Ordering::Relaxed)
    }

    /// Get total connection attempts made after a failure or disconnect
    pub fn reconnect_attempts(&self) -> u64 {
        self.reconnect_attempts_total.load(Ordering::Relaxed)
    }

    /// Get total failed connection attempts (timeouts included)
    pub fn connect_failures(&self) -> u64 {
        self.connect_failures_total.load(Ordering::Relaxed)
    }

    /// Get total connection attempts that timed out
    pub fn connect_timeouts(&self) -> u64 {
        self.connect_timeouts_total.load(Ordering::Relaxed)
    }

    /// Get total drops of an open stream
    pub fn disconnects(&self) -> u64 {
        self.disconnects_total.load(Ordering::Relaxed)
    }

    /// Get total payload frames received
    pub fn messages_received(&self) -> u64 {
        self.messages_received_total.load(Ordering::Relaxed)
    }

    /// Get total samples delivered to consumers
    pub fn samples_accepted(&self) -> u64 {
        self.samples_accepted_total.load(Ordering::Relaxed)
    }

    /// Get total duplicate or out-of-order samples dropped
    pub fn samples_dropped(&self) -> u64 {
        self.samples_dropped_total.load(Ordering::Relaxed)
    }

    /// Get total payloads that were not valid samples
    pub fn samples_malformed(&self) -> u64 {
        self.samples_malformed_total.load(Ordering::Relaxed)
    }

    /// Get total idle-timeout reconnects
    pub fn idle_timeouts(&self) -> u64 {
        self.idle_timeouts_total.load(Ordering::Relaxed)
    }

    /// Get number of sessions not yet cancelled
    pub fn active_sessions(&self) -> u64 {
        self.active_sessions.load(Ordering::Relaxed)
    }

    // ========== Recording methods (called internally) ==========

    pub(crate) fn record_connection(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reconnect_attempt(&self) {
        self.reconnect_attempts_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_connect_failure(&self) {
        self.connect_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_connect_timeout(&self) {
        self.connect_timeouts_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_disconnect(&self) {
        self.disconnects_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_message_received(&self) {
        self.messages_received_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_sample_accepted(&self) {
        self.samples_accepted_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_sample_dropped(&self) {
        self.samples_dropped_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_sample_malformed(&self) {
        self.samples_malformed_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_idle_timeout(&self) {
        self.idle_timeouts_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn session_started(&self) {
        self.active_sessions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn session_ended(&self) {
        // Saturate rather than wrap if a session is ended twice
        let _ = self
            .active_sessions
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    /// Get a point-in-time snapshot of all metrics for export
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_total: self.connections_total.load(Ordering::Acquire),
            reconnect_attempts_total: self.reconnect_attempts_total.load(Ordering::Acquire),
            connect_failures_total: self.connect_failures_total.load(Ordering::Acquire),
            connect_timeouts_total: self.connect_timeouts_total.load(Ordering::Acquire),
            disconnects_total: self.disconnects_total.load(Ordering::Acquire),
            messages_received_total: self.messages_received_total.load(Ordering::Acquire),
            samples_accepted_total: self.samples_accepted_total.load(Ordering::Acquire),
            samples_dropped_total: self.samples_dropped_total.load(Ordering::Acquire),
            samples_malformed_total: self.samples_malformed_total.load(Ordering::Acquire),
            idle_timeouts_total: self.idle_timeouts_total.load(Ordering::Acquire),
            active_sessions: self.active_sessions.load(Ordering::Acquire),
        }
    }
}

/// A point-in-time snapshot of all metrics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub connections_total: u64,
    pub reconnect_attempts_total: u64,
    pub connect_failures_total: u64,
    pub connect_timeouts_total: u64,
    pub disconnects_total: u64,
    pub messages_received_total: u64,
    pub samples_accepted_total: u64,
    pub samples_dropped_total: u64,
    pub samples_malformed_total: u64,
    pub idle_timeouts_total: u64,
    pub active_sessions: u64,
}
