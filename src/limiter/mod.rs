// src/limiter/mod.rs
//! Per-tenant admission control for the deployment API.
//!
//! Every tenant gets a sliding window log, a failure backoff and an
//! optional throttle entered when the upstream API answers 429. Checks
//! are evaluated in a fixed order and the first rule that refuses wins:
//!
//! 1. throttle (upstream Retry-After still running)
//! 2. backoff (consecutive failures)
//! 3. per-minute cap
//! 4. per-hour cap
//! 5. burst spacing
//!
//! State is shared by every clone of a [`RateLimiter`]. Each tenant sits
//! behind its own mutex; the tenant map is only write-locked to add or
//! drop tenants. Lock order is always map, then tenant.

pub mod retry_after;
mod state;

#[cfg(test)]
mod tests;

pub use retry_after::{parse_retry_after, MAX_RETRY_AFTER};
pub use state::{PersistedSnapshot, ProjectLimiterState, ThrottleState};

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn, Instrument};

use crate::algorithms::{DenyReason, RateLimitDecision, RequestEntry, HOUR_MS, MINUTE_MS};
use crate::clock::{millis_until, Clock, SystemClock};
use crate::config::RateLimiterConfig;
use crate::error::{ClientError, Result};
use crate::rate_limit_event;
use crate::resilience::ExponentialBackoff;
use crate::storage::StateStore;
use state::TenantState;

type TenantHandle = Arc<Mutex<TenantState>>;

struct Shared<S> {
    config: RateLimiterConfig,
    store: S,
    clock: Arc<dyn Clock>,
    backoff: ExponentialBackoff,
    tenants: RwLock<HashMap<String, TenantHandle>>,
    /// Serialises snapshot builds and writes so an older snapshot never lands last
    save_lock: Mutex<()>,
    save_pending: AtomicBool,
}

/// Adaptive per-tenant rate limiter with persisted state
pub struct RateLimiter<S: StateStore> {
    shared: Arc<Shared<S>>,
}

impl<S: StateStore> Clone for RateLimiter<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S: StateStore> fmt::Debug for RateLimiter<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("store", &self.shared.store.location())
            .field("max_per_minute", &self.shared.config.max_requests_per_minute)
            .field("max_per_hour", &self.shared.config.max_requests_per_hour)
            .finish()
    }
}

/// Read-only view of one tenant
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantStatus {
    pub tenant_id: String,
    pub requests_last_minute: usize,
    pub requests_last_hour: usize,
    pub max_requests_per_minute: usize,
    pub max_requests_per_hour: usize,
    pub consecutive_failures: u32,
    pub last_request: Option<i64>,
    pub backoff_remaining_ms: Option<u64>,
    pub throttled: bool,
    pub throttle_remaining_ms: Option<u64>,
    pub consecutive_throttles: u32,
}

/// What a cleanup sweep removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub entries_pruned: usize,
    pub throttles_removed: usize,
    pub tenants_removed: usize,
}

impl CleanupReport {
    pub fn changed(&self) -> bool {
        self.entries_pruned + self.throttles_removed + self.tenants_removed > 0
    }
}

impl<S: StateStore> RateLimiter<S> {
    pub fn new(config: RateLimiterConfig, store: S) -> Self {
        Self::with_clock(config, store, Arc::new(SystemClock))
    }

    pub fn with_clock(config: RateLimiterConfig, store: S, clock: Arc<dyn Clock>) -> Self {
        let backoff = ExponentialBackoff::new(config.backoff());
        Self {
            shared: Arc::new(Shared {
                config,
                store,
                clock,
                backoff,
                tenants: RwLock::new(HashMap::new()),
                save_lock: Mutex::new(()),
                save_pending: AtomicBool::new(false),
            }),
        }
    }

    /// Construct and load whatever the store holds.
    ///
    /// A missing or unreadable snapshot is logged and the limiter starts empty.
    pub async fn open(config: RateLimiterConfig, store: S) -> Self {
        Self::open_with_clock(config, store, Arc::new(SystemClock)).await
    }

    pub async fn open_with_clock(
        config: RateLimiterConfig,
        store: S,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let limiter = Self::with_clock(config, store, clock);
        if let Err(e) = limiter.reload().await {
            warn!(
                location = %limiter.shared.store.location(),
                error = %e,
                "Starting with empty rate limiter state"
            );
        }
        limiter
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.shared.config
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.shared.clock)
    }

    pub fn store(&self) -> &S {
        &self.shared.store
    }

    fn now(&self) -> i64 {
        self.shared.clock.now_millis()
    }

    async fn existing(&self, tenant_id: &str) -> Option<TenantHandle> {
        self.shared.tenants.read().await.get(tenant_id).cloned()
    }

    /// Get or lazily create the tenant's state
    async fn tenant(&self, tenant_id: &str) -> TenantHandle {
        if let Some(handle) = self.existing(tenant_id).await {
            return handle;
        }
        let mut tenants = self.shared.tenants.write().await;
        Arc::clone(
            tenants
                .entry(tenant_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(TenantState::default()))),
        )
    }

    /// Decide whether a request for `tenant_id` may go out now
    pub async fn check_rate_limit(&self, tenant_id: &str, operation: &str) -> RateLimitDecision {
        let handle = self.tenant(tenant_id).await;
        let decision = {
            let mut state = handle.lock().await;
            self.evaluate(&mut state, self.now())
        };

        rate_limit_event!(tenant_id, operation, decision);
        self.schedule_save();
        decision
    }

    fn evaluate(&self, state: &mut TenantState, now: i64) -> RateLimitDecision {
        let config = &self.shared.config;

        if let Some(throttle) = &state.throttle {
            if throttle.is_active(now) {
                return RateLimitDecision::deny(
                    DenyReason::Throttled,
                    millis_until(throttle.retry_after, now),
                )
                .with_retry_after(throttle.retry_after);
            }
        }

        if let Some(until) = state.limits.backoff_until {
            if now < until {
                return RateLimitDecision::deny(DenyReason::Backoff, millis_until(until, now));
            }
        }

        let requests = &mut state.limits.requests;
        requests.prune(now, HOUR_MS);

        let per_minute = requests.count_within(now, MINUTE_MS);
        if per_minute >= config.max_requests_per_minute {
            return RateLimitDecision::deny(
                DenyReason::RateLimitMinute,
                requests.time_until_slot(now, MINUTE_MS),
            );
        }

        if requests.count_within(now, HOUR_MS) >= config.max_requests_per_hour {
            return RateLimitDecision::deny(
                DenyReason::RateLimitHour,
                requests.time_until_slot(now, HOUR_MS),
            );
        }

        if per_minute >= config.burst_allowance {
            if let Some(last) = state.limits.last_request {
                let spacing = config.burst_spacing.as_millis() as i64;
                let since = now - last;
                if since < spacing {
                    return RateLimitDecision::deny(
                        DenyReason::BurstProtection,
                        Duration::from_millis((spacing - since) as u64),
                    );
                }
            }
        }

        RateLimitDecision::allow()
    }

    /// Record a successful request
    pub async fn record_request(&self, tenant_id: &str, operation: &str) {
        let now = self.now();
        let handle = self.tenant(tenant_id).await;
        {
            let mut state = handle.lock().await;
            state.limits.requests.push(RequestEntry {
                timestamp: now,
                operation: operation.to_string(),
                success: true,
            });
            state.limits.last_request = Some(now);
            state.limits.consecutive_failures = 0;

            if state.limits.backoff_until.is_some_and(|until| until <= now) {
                state.limits.backoff_until = None;
            }
            if state.throttle.as_ref().is_some_and(|t| !t.is_active(now)) {
                state.throttle = None;
            }
        }
        self.schedule_save();
    }

    /// Record an upstream 429.
    ///
    /// `retry_after` is the raw Retry-After value (seconds or HTTP-date).
    /// Returns the delay the throttle was set for.
    pub async fn record_rate_limit(&self, tenant_id: &str, retry_after: Option<&str>) -> Duration {
        let now = self.now();
        let delay = parse_retry_after(retry_after, now)
            .unwrap_or(self.shared.config.default_retry_after);
        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        let deadline = now.saturating_add(i64::try_from(delay_ms).unwrap_or(i64::MAX));

        let handle = self.tenant(tenant_id).await;
        let (failures, throttles) = {
            let mut state = handle.lock().await;
            state.limits.consecutive_failures += 1;
            let failures = state.limits.consecutive_failures;

            // An expired throttle starts a fresh streak
            let throttle = match state.throttle.take() {
                Some(t) if t.is_active(now) => t,
                _ => ThrottleState::default(),
            };
            let throttle = state.throttle.insert(ThrottleState {
                throttled_at: now,
                retry_after: throttle.retry_after.max(deadline),
                consecutive_throttles: throttle.consecutive_throttles + 1,
                last_retry_after: delay_ms,
            });
            let throttles = throttle.consecutive_throttles;

            self.extend_backoff(&mut state.limits, failures, now);
            (failures, throttles)
        };

        warn!(
            tenant_id,
            retry_after_ms = delay_ms,
            consecutive_failures = failures,
            consecutive_throttles = throttles,
            "Upstream API throttled tenant"
        );
        self.schedule_save();
        delay
    }

    /// Record a failed request; only retryable failures start a backoff
    pub async fn record_failure(&self, tenant_id: &str, error: &ClientError) {
        let now = self.now();
        let retryable = error.is_retryable();
        let handle = self.tenant(tenant_id).await;
        let failures = {
            let mut state = handle.lock().await;
            state.limits.consecutive_failures += 1;
            let failures = state.limits.consecutive_failures;
            if retryable {
                self.extend_backoff(&mut state.limits, failures, now);
            }
            failures
        };

        debug!(
            tenant_id,
            consecutive_failures = failures,
            retryable,
            error = %error,
            "Recorded failed request"
        );
        self.schedule_save();
    }

    fn extend_backoff(&self, limits: &mut ProjectLimiterState, failures: u32, now: i64) {
        let delay = i64::try_from(self.shared.backoff.base_delay(failures).as_millis())
            .unwrap_or(i64::MAX);
        let until = now.saturating_add(delay);
        limits.backoff_until = Some(limits.backoff_until.map_or(until, |prev| prev.max(until)));
    }

    /// Current counters for `tenant_id`. Does not create state.
    pub async fn get_status(&self, tenant_id: &str) -> TenantStatus {
        let now = self.now();
        let config = &self.shared.config;
        let mut status = TenantStatus {
            tenant_id: tenant_id.to_string(),
            requests_last_minute: 0,
            requests_last_hour: 0,
            max_requests_per_minute: config.max_requests_per_minute,
            max_requests_per_hour: config.max_requests_per_hour,
            consecutive_failures: 0,
            last_request: None,
            backoff_remaining_ms: None,
            throttled: false,
            throttle_remaining_ms: None,
            consecutive_throttles: 0,
        };

        let Some(handle) = self.existing(tenant_id).await else {
            return status;
        };
        let state = handle.lock().await;

        status.requests_last_minute = state.limits.requests.count_within(now, MINUTE_MS);
        status.requests_last_hour = state.limits.requests.count_within(now, HOUR_MS);
        status.consecutive_failures = state.limits.consecutive_failures;
        status.last_request = state.limits.last_request;
        status.backoff_remaining_ms = state
            .limits
            .backoff_until
            .filter(|&until| until > now)
            .map(|until| (until - now) as u64);

        if let Some(throttle) = &state.throttle {
            status.consecutive_throttles = throttle.consecutive_throttles;
            if throttle.is_active(now) {
                status.throttled = true;
                status.throttle_remaining_ms = Some((throttle.retry_after - now) as u64);
            }
        }
        status
    }

    /// How long a caller pacing itself should wait before the next request.
    ///
    /// Remaining throttle or backoff time when one is active, otherwise 5s
    /// at 80% of the per-minute cap, 2s at 60%, and zero below that.
    pub async fn get_suggested_wait_time(&self, tenant_id: &str) -> Duration {
        let status = self.get_status(tenant_id).await;

        let blocked = status
            .throttle_remaining_ms
            .unwrap_or(0)
            .max(status.backoff_remaining_ms.unwrap_or(0));
        if blocked > 0 {
            return Duration::from_millis(blocked);
        }

        let usage = status.requests_last_minute as f64 / status.max_requests_per_minute as f64;
        if usage >= 0.8 {
            Duration::from_secs(5)
        } else if usage >= 0.6 {
            Duration::from_secs(2)
        } else {
            Duration::ZERO
        }
    }

    /// Prune old entries, expired throttles and idle tenants.
    ///
    /// Tenants another task is currently working with are left alone.
    pub async fn cleanup(&self) -> CleanupReport {
        let now = self.now();
        let mut report = CleanupReport::default();

        {
            let mut tenants = self.shared.tenants.write().await;
            tenants.retain(|_, handle| {
                let Ok(mut state) = handle.try_lock() else {
                    return true;
                };

                report.entries_pruned += state.limits.requests.prune(now, HOUR_MS);
                if state.throttle.as_ref().is_some_and(|t| !t.is_active(now)) {
                    state.throttle = None;
                    report.throttles_removed += 1;
                }

                // The map lock is held, so nobody can pick up a new handle
                let in_use = Arc::strong_count(handle) > 1;
                let idle = state.limits.is_idle(now) && state.throttle.is_none();
                if idle && !in_use {
                    report.tenants_removed += 1;
                    false
                } else {
                    true
                }
            });
        }

        if report.changed() {
            debug!(
                entries_pruned = report.entries_pruned,
                throttles_removed = report.throttles_removed,
                tenants_removed = report.tenants_removed,
                "Rate limiter cleanup"
            );
            self.schedule_save();
        }
        report
    }

    /// Clear one tenant, or every tenant when `tenant_id` is `None`
    pub async fn reset(&self, tenant_id: Option<&str>) {
        {
            let mut tenants = self.shared.tenants.write().await;
            match tenant_id {
                Some(id) => {
                    tenants.remove(id);
                }
                None => tenants.clear(),
            }
        }
        info!(tenant_id = tenant_id.unwrap_or("*"), "Rate limiter state reset");
        self.schedule_save();
    }

    /// Tracked tenant ids, sorted
    pub async fn tenants(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.shared.tenants.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Copy of the current state in its persisted shape
    pub async fn snapshot(&self) -> PersistedSnapshot {
        let handles: Vec<(String, TenantHandle)> = self
            .shared
            .tenants
            .read()
            .await
            .iter()
            .map(|(id, handle)| (id.clone(), Arc::clone(handle)))
            .collect();

        let mut snapshot = PersistedSnapshot {
            saved_at: self.now(),
            ..PersistedSnapshot::default()
        };
        for (id, handle) in handles {
            let state = handle.lock().await;
            snapshot
                .project_limits
                .insert(id.clone(), state.limits.clone());
            if let Some(throttle) = &state.throttle {
                snapshot.throttle_state.insert(id, throttle.clone());
            }
        }
        snapshot
    }

    /// Write the current state to the store now
    pub async fn save(&self) -> Result<()> {
        let _guard = self.shared.save_lock.lock().await;
        self.shared.save_pending.store(false, Ordering::Release);
        let snapshot = self.snapshot().await;
        self.shared.store.save(&snapshot).await
    }

    /// Replace in-memory state with what the store holds, minus stale entries
    pub async fn reload(&self) -> Result<()> {
        let Some(mut snapshot) = self.shared.store.load().await? else {
            return Ok(());
        };
        snapshot.discard_stale(self.now());

        let mut loaded: HashMap<String, TenantState> = HashMap::new();
        for (id, limits) in snapshot.project_limits {
            loaded.entry(id).or_default().limits = limits;
        }
        for (id, throttle) in snapshot.throttle_state {
            loaded.entry(id).or_default().throttle = Some(throttle);
        }

        let count = loaded.len();
        let mut tenants = self.shared.tenants.write().await;
        *tenants = loaded
            .into_iter()
            .map(|(id, state)| (id, Arc::new(Mutex::new(state))))
            .collect();

        info!(
            location = %self.shared.store.location(),
            tenants = count,
            "Loaded rate limiter state"
        );
        Ok(())
    }

    /// Queue a background save unless one is already waiting.
    ///
    /// Failures are logged and never reach the caller.
    fn schedule_save(&self) {
        if self.shared.save_pending.swap(true, Ordering::AcqRel) {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            self.shared.save_pending.store(false, Ordering::Release);
            return;
        };

        let limiter = self.clone();
        runtime.spawn(async move {
            if let Err(e) = limiter.save().await {
                warn!(
                    location = %limiter.shared.store.location(),
                    error = %e,
                    "Failed to persist rate limiter state"
                );
            }
        }
        .in_current_span());
    }

    /// Run [`RateLimiter::cleanup`] every `cleanup_interval` until stopped
    pub fn spawn_cleanup(&self) -> CleanupTask {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let limiter = self.clone();
        let period = self.shared.config.cleanup_interval.max(Duration::from_millis(1));

        let handle = tokio::spawn(async move {
            let mut ticker = time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        limiter.cleanup().await;
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("Rate limiter cleanup task stopped");
        });

        CleanupTask {
            stop: stop_tx,
            handle: Some(handle),
        }
    }

    /// Final flush, then drop all tenant state
    pub async fn shutdown(&self) {
        if let Err(e) = self.save().await {
            warn!(error = %e, "Final rate limiter flush failed");
        }
        self.shared.tenants.write().await.clear();
        info!("Rate limiter shut down");
    }
}

/// Handle to the background cleanup sweep. Dropping it aborts the task.
#[derive(Debug)]
pub struct CleanupTask {
    stop: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl CleanupTask {
    /// Signal the task and wait for it to exit
    pub async fn stop(mut self) {
        let _ = self.stop.send(true);
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for CleanupTask {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
