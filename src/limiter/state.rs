// src/limiter/state.rs

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::algorithms::{SlidingWindowLog, HOUR_MS};

/// Admission state for one tenant
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProjectLimiterState {
    /// Append-only log, pruned to the last hour
    pub requests: SlidingWindowLog,

    /// Epoch millis of the most recent recorded request
    pub last_request: Option<i64>,

    /// Reset to 0 by any successful `record_request`
    pub consecutive_failures: u32,

    /// Every request is refused before this instant
    pub backoff_until: Option<i64>,
}

impl ProjectLimiterState {
    /// No requests in the last hour, no recent request, no pending backoff
    pub fn is_idle(&self, now: i64) -> bool {
        self.requests.count_within(now, HOUR_MS) == 0
            && self.last_request.map_or(true, |last| now - last > HOUR_MS)
            && self.backoff_until.map_or(true, |until| until <= now)
    }
}

/// Cooldown entered after the upstream API answered 429
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ThrottleState {
    pub throttled_at: i64,

    /// Absolute epoch millis at which requests may resume
    pub retry_after: i64,

    pub consecutive_throttles: u32,

    /// Delay in millis taken from the latest 429
    pub last_retry_after: u64,
}

impl ThrottleState {
    pub fn is_active(&self, now: i64) -> bool {
        now < self.retry_after
    }
}

/// Everything the limiter holds for a single tenant
#[derive(Debug, Clone, Default)]
pub(crate) struct TenantState {
    pub limits: ProjectLimiterState,
    pub throttle: Option<ThrottleState>,
}

/// On-disk document written by the state store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PersistedSnapshot {
    pub project_limits: HashMap<String, ProjectLimiterState>,
    pub throttle_state: HashMap<String, ThrottleState>,
    pub saved_at: i64,
}

impl PersistedSnapshot {
    /// Discard request entries older than an hour and throttles that expired
    pub fn discard_stale(&mut self, now: i64) {
        for state in self.project_limits.values_mut() {
            state.requests.prune(now, HOUR_MS);
        }
        self.throttle_state
            .retain(|_, throttle| throttle.is_active(now));
    }
}
