use rand;
use std::time::Duration;

const MAX_EXPONENT: u32 = 1024;

/// Configuration for exponential backoff
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// Delay for the first failure
    pub initial_backoff: Duration,
    /// Upper bound for any delay, jitter included
    pub max_backoff: Duration,
    /// Multiplier applied per additional failure
    pub backoff_multiplier: f64,
    /// Fraction of the base delay added or removed at random (0.25 = ±25%)
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(1000),
            max_backoff: Duration::from_millis(30_000),
            backoff_multiplier: 2.0,
            jitter: 0.25,
        }
    }
}

/// Exponential backoff calculator
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    config: BackoffConfig,
}

impl ExponentialBackoff {
    /// Create a new exponential backoff with the given configuration
    pub fn new(config: BackoffConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    /// `min(initial * multiplier^(attempt-1), max)` without jitter.
    ///
    /// `attempt` is 1-based; 0 is treated as 1.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        // Any exponent past this already saturates at max_backoff
        let exp = attempt.clamp(1, MAX_EXPONENT) as i32 - 1;
        let base_ms = self.config.initial_backoff.as_millis() as f64;
        let backoff_ms = base_ms * self.config.backoff_multiplier.powi(exp);
        let max_ms = self.config.max_backoff.as_millis() as f64;
        Duration::from_millis(backoff_ms.min(max_ms) as u64)
    }

    /// Base delay perturbed by up to ±jitter, never above `max_backoff`
    pub fn calculate_backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if self.config.jitter <= 0.0 {
            return base;
        }

        // Uniform factor in [1 - jitter, 1 + jitter)
        let factor = 1.0 + self.config.jitter * (rand::random::<f64>() * 2.0 - 1.0);
        let jittered_ms = (base.as_millis() as f64 * factor).max(0.0) as u64;
        Duration::from_millis(jittered_ms).min(self.config.max_backoff)
    }

    /// Random extra in `[0, jitter * base)`, meant to be added on top of a fixed floor
    pub fn jitter_extra(&self, attempt: u32) -> Duration {
        if self.config.jitter <= 0.0 {
            return Duration::ZERO;
        }
        let base_ms = self.base_delay(attempt).as_millis() as f64;
        Duration::from_millis((base_ms * self.config.jitter * rand::random::<f64>()) as u64)
    }
}
