use tokio::time::{Duration, Instant};

/// Upper bound on how long the worker sleeps between idle checks
const MAX_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Tracks liveness of an open stream.
///
/// Any frame (sample or keep-alive) counts as proof of life. When nothing
/// arrives within the idle timeout the connection is considered dead and
/// the worker reconnects.
#[derive(Debug)]
pub struct IdleMonitor {
    idle_timeout: Option<Duration>,

    /// Time of last frame received
    last_frame_received: Instant,

    /// Frames seen on this connection
    frames_received: u64,
}

impl IdleMonitor {
    /// Create a monitor; the clock starts now
    pub fn new(idle_timeout: Option<Duration>) -> Self {
        Self {
            idle_timeout,
            last_frame_received: Instant::now(),
            frames_received: 0,
        }
    }

    /// Record that a frame arrived
    pub fn record_frame(&mut self) {
        self.last_frame_received = Instant::now();
        self.frames_received += 1;
    }

    /// Check if the idle timeout has been exceeded
    pub fn is_idle_timeout(&self) -> bool {
        match self.idle_timeout {
            None => false,
            Some(timeout) => self.last_frame_received.elapsed() >= timeout,
        }
    }

    /// How long to sleep before the next idle check, `None` when disabled
    pub fn time_until_check(&self) -> Option<Duration> {
        self.idle_timeout.map(|timeout| {
            timeout
                .saturating_sub(self.last_frame_received.elapsed())
                .min(MAX_CHECK_INTERVAL)
        })
    }

    /// Frames seen on this connection
    pub fn frames_received(&self) -> u64 {
        self.frames_received
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_initial_state() {
        let monitor = IdleMonitor::new(Some(Duration::from_millis(200)));
        assert!(!monitor.is_idle_timeout());
        assert_eq!(monitor.frames_received(), 0);
        assert_eq!(monitor.time_until_check(), Some(Duration::from_millis(200)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout() {
        let monitor = IdleMonitor::new(Some(Duration::from_millis(200)));
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(monitor.is_idle_timeout());
        assert_eq!(monitor.time_until_check(), Some(Duration::ZERO));
    }

    #[tokio::test(start_paused = true)]
    async fn test_frame_resets_timeout() {
        let mut monitor = IdleMonitor::new(Some(Duration::from_millis(200)));
        tokio::time::sleep(Duration::from_millis(150)).await;
        monitor.record_frame();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!monitor.is_idle_timeout());
        assert_eq!(monitor.frames_received(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_never_times_out() {
        let monitor = IdleMonitor::new(None);
        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert!(!monitor.is_idle_timeout());
        assert_eq!(monitor.time_until_check(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_interval_is_capped() {
        let monitor = IdleMonitor::new(Some(Duration::from_secs(60)));
        assert_eq!(monitor.time_until_check(), Some(MAX_CHECK_INTERVAL));
    }
}
