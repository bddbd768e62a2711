// src/limiter/retry_after.rs

use std::time::Duration;
use tracing::warn;

/// Longest throttle a single Retry-After value can impose
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(24 * 60 * 60);

/// Parses a Retry-After value into a delay relative to `now_millis`.
///
/// The value can be either:
/// - a number of seconds ("30", "2.5")
/// - an HTTP-date ("Wed, 21 Oct 2015 07:28:00 GMT")
///
/// Delays longer than [`MAX_RETRY_AFTER`] are clamped to it.
/// Returns `None` when the value is missing or unusable.
pub fn parse_retry_after(value: Option<&str>, now_millis: i64) -> Option<Duration> {
    let value = value?.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(seconds) = value.parse::<f64>() {
        if seconds.is_finite() && seconds >= 0.0 {
            let max_ms = MAX_RETRY_AFTER.as_millis() as f64;
            return Some(Duration::from_millis((seconds * 1000.0).round().min(max_ms) as u64));
        }
        return None;
    }

    if let Ok(date) = chrono::DateTime::parse_from_rfc2822(value) {
        let delta = date.timestamp_millis().saturating_sub(now_millis).max(0) as u64;
        return Some(Duration::from_millis(delta).min(MAX_RETRY_AFTER));
    }

    warn!(value, "Could not parse Retry-After value");
    None
}
