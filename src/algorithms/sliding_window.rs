// src/algorithms/sliding_window.rs

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const MINUTE_MS: i64 = 60_000;
pub const HOUR_MS: i64 = 60 * MINUTE_MS;

/// One recorded request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestEntry {
    /// Epoch millis when the request was recorded
    #[serde(default)]
    pub timestamp: i64,

    #[serde(default)]
    pub operation: String,

    #[serde(default = "default_success")]
    pub success: bool,
}

fn default_success() -> bool {
    true
}

/// Sliding window log of timestamped requests
///
/// Unlike a bucketed window this keeps every entry, so the count for any
/// window length ending at `now` is exact and the time until a slot frees
/// up is known to the millisecond. Entries older than the longest window
/// are dropped by [`SlidingWindowLog::prune`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlidingWindowLog {
    entries: Vec<RequestEntry>,
}

impl SlidingWindowLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: RequestEntry) {
        self.entries.push(entry);
    }

    /// Drop entries at or before `now - horizon_ms`; returns how many were removed
    pub fn prune(&mut self, now: i64, horizon_ms: i64) -> usize {
        let cutoff = now - horizon_ms;
        let before = self.entries.len();
        self.entries.retain(|entry| entry.timestamp > cutoff);
        before - self.entries.len()
    }

    /// Number of entries inside the window `(now - window_ms, now]`
    pub fn count_within(&self, now: i64, window_ms: i64) -> usize {
        let cutoff = now - window_ms;
        self.entries
            .iter()
            .filter(|entry| entry.timestamp > cutoff)
            .count()
    }

    /// Oldest timestamp still inside the window
    pub fn oldest_within(&self, now: i64, window_ms: i64) -> Option<i64> {
        let cutoff = now - window_ms;
        self.entries
            .iter()
            .map(|entry| entry.timestamp)
            .filter(|&ts| ts > cutoff)
            .min()
    }

    /// Time until the oldest in-window entry ages out, freeing a slot
    pub fn time_until_slot(&self, now: i64, window_ms: i64) -> Duration {
        match self.oldest_within(now, window_ms) {
            Some(oldest) => Duration::from_millis((oldest + window_ms - now).max(1) as u64),
            None => Duration::ZERO,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RequestEntry> {
        self.entries.iter()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
