// library entry
pub mod algorithms;
pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod limiter;
pub mod logging;
pub mod resilience;
pub mod signing;
pub mod storage;

#[cfg(test)]
mod test_utils;

// Re-export key components for convenience
pub use algorithms::{DenyReason, RateLimitDecision};
pub use client::{
    ApiRequest, HttpTransport, ReqwestTransport, RequestExecutor, RequestOptions,
};
pub use clock::{Clock, SystemClock};
pub use config::{ClientConfig, Credentials, RateLimiterConfig};
pub use error::{ClientError, Result};
pub use limiter::{CleanupTask, RateLimiter, TenantStatus};
pub use logging::init as init_logging;
pub use signing::SignatureGenerator;
pub use storage::{FileStateStore, MemoryStateStore, StateStore};
