use crate::sample::{LocationSample, SampleGate, SampleVerdict};
use tokio::time::{Duration, Instant};

/// Lifecycle state of one tracking session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// First connection attempt in progress
    Connecting,
    /// Stream established, samples flowing
    Open,
    /// Waiting out backoff or retrying after a failure
    Reconnecting,
    /// Cancelled by the consumer; terminal
    Closed,
}

impl ConnectionState {
    /// Whether the session has been cancelled
    pub fn is_closed(self) -> bool {
        self == ConnectionState::Closed
    }
}

/// Outcome of offering a sample to a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Sample accepted and stored
    Accepted,
    /// Sample failed the ordering check
    Dropped(SampleVerdict),
    /// Session is closed; nothing is delivered
    Closed,
}

/// Point-in-time view of a session
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub entity_id: String,
    pub state: ConnectionState,
    pub latest_sample: Option<LocationSample>,
    pub last_update: Option<Instant>,
    pub retry_count: u32,
    pub is_loading: bool,
    pub is_stale: bool,
}

/// Live state of one "track this entity" request.
///
/// Transitions are methods; each returns `false` (and changes nothing)
/// once the session is closed, so a late event from a dying connection
/// can never resurrect it.
#[derive(Debug)]
pub struct StreamSession {
    entity_id: String,
    state: ConnectionState,
    latest_sample: Option<LocationSample>,
    last_update: Option<Instant>,
    retry_count: u32,
    gate: SampleGate,
}

impl StreamSession {
    /// New session in the `Connecting` state
    pub fn new(entity_id: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            state: ConnectionState::Connecting,
            latest_sample: None,
            last_update: None,
            retry_count: 0,
            gate: SampleGate::new(),
        }
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn latest_sample(&self) -> Option<LocationSample> {
        self.latest_sample
    }

    /// Local time the latest sample was accepted
    pub fn last_update(&self) -> Option<Instant> {
        self.last_update
    }

    /// Failed attempts since the stream was last open
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Connection established
    pub fn mark_open(&mut self) -> bool {
        if self.state.is_closed() {
            return false;
        }
        self.state = ConnectionState::Open;
        true
    }

    /// An open stream dropped; retries start from zero
    pub fn mark_disconnected(&mut self) -> bool {
        if self.state.is_closed() {
            return false;
        }
        self.state = ConnectionState::Reconnecting;
        self.retry_count = 0;
        true
    }

    /// A connection attempt failed
    pub fn mark_attempt_failed(&mut self) -> bool {
        if self.state.is_closed() {
            return false;
        }
        self.state = ConnectionState::Reconnecting;
        self.retry_count = self.retry_count.saturating_add(1);
        true
    }

    /// Enter the terminal state. Returns `false` if already closed.
    pub fn close(&mut self) -> bool {
        if self.state.is_closed() {
            return false;
        }
        self.state = ConnectionState::Closed;
        true
    }

    /// Offer a sample received at `now`
    pub fn offer(&mut self, sample: LocationSample, now: Instant) -> Delivery {
        if self.state.is_closed() {
            return Delivery::Closed;
        }
        match self.gate.offer(&sample) {
            SampleVerdict::Accepted => {
                self.latest_sample = Some(sample);
                self.last_update = Some(now);
                Delivery::Accepted
            }
            verdict => Delivery::Dropped(verdict),
        }
    }

    /// True until the first sample is accepted (and not after cancel)
    pub fn is_loading(&self) -> bool {
        !self.state.is_closed() && self.latest_sample.is_none()
    }

    /// True when the last accepted sample is older than `threshold`
    pub fn is_stale(&self, threshold: Duration, now: Instant) -> bool {
        self.last_update
            .map(|t| now.saturating_duration_since(t) > threshold)
            .unwrap_or(false)
    }

    /// Snapshot with derived flags evaluated at `now`
    pub fn snapshot(&self, threshold: Duration, now: Instant) -> SessionSnapshot {
        SessionSnapshot {
            entity_id: self.entity_id.clone(),
            state: self.state,
            latest_sample: self.latest_sample,
            last_update: self.last_update,
            retry_count: self.retry_count,
            is_loading: self.is_loading(),
            is_stale: self.is_stale(threshold, now),
        }
    }
}
