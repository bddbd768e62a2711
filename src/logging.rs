use std::sync::Once;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// Ensure initialization happens only once
static INIT: Once = Once::new();

/// Initialize the logging system with sensible defaults.
///
/// Log level can be set using the RUST_LOG environment variable.
/// Example: RUST_LOG=debug,deploy_client=trace
pub fn init() {
    init_with_default("info");
}

/// Same as [`init`] but with a caller-chosen fallback filter
pub fn init_with_default(default_filter: &str) {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

        // try_init: a test harness may already own the global subscriber
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(true) // Include module path in logs
                    .with_thread_ids(true) // Useful for debugging concurrency issues
                    .with_line_number(true),
            )
            .try_init();

        tracing::debug!("Logging initialized");
    });
}

/// Macro for logging admission decisions
#[macro_export]
macro_rules! rate_limit_event {
    ($tenant:expr, $operation:expr, $decision:expr) => {
        if $decision.allowed {
            tracing::trace!(
                tenant_id = $tenant,
                operation = $operation,
                allowed = true,
                "Rate limit check"
            )
        } else {
            tracing::debug!(
                tenant_id = $tenant,
                operation = $operation,
                allowed = false,
                reason = $decision.reason.map(|r| r.as_str()).unwrap_or("unknown"),
                wait_ms = $decision.wait_time.map(|w| w.as_millis() as u64).unwrap_or(0),
                "Rate limit check"
            )
        }
    };
}

/// Macro for logging state store operations with timing
#[macro_export]
macro_rules! persistence_op {
    ($operation:expr, $location:expr, $result:expr, $elapsed_ms:expr) => {
        tracing::debug!(
            operation = $operation,
            location = %$location,
            success = $result.is_ok(),
            elapsed_ms = $elapsed_ms,
            "State store operation"
        )
    };
}
