// src/limiter/tests/mod.rs



use crate::config::RateLimiterConfig;

pub(crate) fn config(max_per_minute: usize, max_per_hour: usize, burst: usize) -> RateLimiterConfig {
    RateLimiterConfig {
        max_requests_per_minute: max_per_minute,
        max_requests_per_hour: max_per_hour,
        burst_allowance: burst,
        ..RateLimiterConfig::default()
    }
}
