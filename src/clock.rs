// src/clock.rs

use async_trait::async_trait;
use std::fmt::Debug;
use std::time::Duration;

/// Source of wall-clock time and the suspension point for every wait.
///
/// Timestamps are milliseconds since the Unix epoch so they survive a
/// restart when written to the state file.
#[async_trait]
pub trait Clock: Send + Sync + Debug {
    /// Current time in milliseconds since the Unix epoch
    fn now_millis(&self) -> i64;

    /// Suspend for `duration`. Dropping the returned future cancels the wait.
    async fn sleep(&self, duration: Duration);
}

/// Clock backed by the system time and the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Milliseconds from `now` until `deadline`, or zero if it already passed
pub(crate) fn millis_until(deadline: i64, now: i64) -> Duration {
    Duration::from_millis(deadline.saturating_sub(now).max(0) as u64)
}
