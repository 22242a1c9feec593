use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Delays the supervisor waits between recovery attempts.
/// `attempt` starts at 1 for the first retry after a failure.
pub trait RetryPolicy: Send + Sync {
    fn reconnect_delay(&self, attempt: u32) -> Duration;
    fn snapshot_retry_delay(&self, attempt: u32) -> Duration;
    fn poll_interval(&self) -> Duration;
}

/// Constant delays, retried forever.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedDelay {
    pub reconnect: Duration,
    pub snapshot_retry: Duration,
    pub poll: Duration,
}

// Zero intervals would spin the event loop
const MIN_DELAY: Duration = Duration::from_millis(1);

impl FixedDelay {
    pub fn new(reconnect: Duration, snapshot_retry: Duration, poll: Duration) -> Self {
        Self {
            reconnect: reconnect.max(MIN_DELAY),
            snapshot_retry: snapshot_retry.max(MIN_DELAY),
            poll: poll.max(MIN_DELAY),
        }
    }

    pub fn from_millis(reconnect: u64, snapshot_retry: u64, poll: u64) -> Self {
        Self::new(
            Duration::from_millis(reconnect),
            Duration::from_millis(snapshot_retry),
            Duration::from_millis(poll),
        )
    }

    /// Shortest legal delays, for tests.
    pub fn zero() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO, Duration::ZERO)
    }
}

impl Default for FixedDelay {
    fn default() -> Self {
        Self::from_millis(5_000, 5_000, 2_000)
    }
}

impl RetryPolicy for FixedDelay {
    fn reconnect_delay(&self, _attempt: u32) -> Duration {
        self.reconnect
    }

    fn snapshot_retry_delay(&self, _attempt: u32) -> Duration {
        self.snapshot_retry
    }

    fn poll_interval(&self) -> Duration {
        self.poll
    }
}

/// Wall-clock source for tick timestamps.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}
