// src/algorithms/mod.rs

pub mod sliding_window;

#[cfg(test)]
mod tests;

pub use sliding_window::{RequestEntry, SlidingWindowLog, HOUR_MS, MINUTE_MS};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Why an admission check refused a request, in evaluation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    /// The upstream API sent a 429 and its Retry-After has not elapsed
    Throttled,
    /// Self-imposed backoff after consecutive failures
    Backoff,
    RateLimitMinute,
    RateLimitHour,
    /// Minimum spacing once recent volume reaches the burst allowance
    BurstProtection,
}

impl DenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyReason::Throttled => "throttled",
            DenyReason::Backoff => "backoff",
            DenyReason::RateLimitMinute => "rate_limit_minute",
            DenyReason::RateLimitHour => "rate_limit_hour",
            DenyReason::BurstProtection => "burst_protection",
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of an admission check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDecision {
    /// Whether the request may proceed now
    pub allowed: bool,

    /// How long the caller should wait before checking again
    pub wait_time: Option<Duration>,

    /// Which rule refused the request
    pub reason: Option<DenyReason>,

    /// Absolute resume time (epoch millis) when the tenant is throttled
    pub retry_after: Option<i64>,
}

impl RateLimitDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            wait_time: None,
            reason: None,
            retry_after: None,
        }
    }

    pub fn deny(reason: DenyReason, wait_time: Duration) -> Self {
        Self {
            allowed: false,
            wait_time: Some(wait_time),
            reason: Some(reason),
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, retry_after: i64) -> Self {
        self.retry_after = Some(retry_after);
        self
    }
}
