// src/client/mod.rs
//! Signed, rate limited calls against the deployment API.
//!
//! [`RequestExecutor::execute`] drives one logical call through admission,
//! signing, the HTTP exchange and outcome classification, looping on
//! local rate limits, upstream 429s and transient failures.

pub mod endpoint;
mod response;
pub mod transport;

#[cfg(test)]
mod tests;

pub use transport::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, TransportError};

use reqwest::Method;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::algorithms::DenyReason;
use crate::clock::Clock;
use crate::config::{ClientConfig, Credentials, DEFAULT_API_URL};
use crate::error::{ClientError, Result};
use crate::limiter::RateLimiter;
use crate::resilience::{BackoffConfig, ExponentialBackoff};
use crate::signing::SignatureGenerator;
use crate::storage::StateStore;
use response::Outcome;

/// Upper bound on a single sleep after a 429
pub const MAX_THROTTLE_SLEEP: Duration = Duration::from_secs(30);

/// Per-call knobs
#[derive(Debug, Clone)]
pub struct RequestOptions {
    /// Timeout of each HTTP exchange
    pub timeout: Duration,

    /// Attempts allowed for throttled or transient failures (at least one)
    pub max_retries: u32,

    /// First retry delay after a transient failure, doubled per attempt
    pub retry_delay: Duration,

    /// Wait used when a refused admission check carries no wait time
    pub rate_limit_wait: Duration,

    /// Total time this call may spend waiting on local rate limits.
    /// `None` waits as long as it takes.
    pub max_rate_limit_wait: Option<Duration>,

    pub tenant_id: Option<String>,

    /// Endpoint override for this call
    pub api_url: Option<String>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_delay: Duration::from_millis(1000),
            rate_limit_wait: Duration::from_millis(1000),
            max_rate_limit_wait: None,
            tenant_id: None,
            api_url: None,
        }
    }
}

impl RequestOptions {
    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = Some(api_url.into());
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_rate_limit_wait(mut self, budget: Duration) -> Self {
        self.max_rate_limit_wait = Some(budget);
        self
    }
}

/// One logical API call
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub payload: Option<Value>,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            path: path.into(),
            payload: None,
        }
    }

    pub fn post(path: impl Into<String>, payload: Value) -> Self {
        Self {
            method: Method::POST,
            path: path.into(),
            payload: Some(payload),
        }
    }

    /// Operation label recorded in the limiter's request log
    pub fn operation(&self) -> String {
        format!("{} {}", self.method, self.path.trim_start_matches('/'))
    }

    fn body(&self) -> Result<String> {
        match &self.payload {
            None | Some(Value::Null) => Ok(String::new()),
            Some(payload) => serde_json::to_string(payload)
                .map_err(|e| ClientError::Parse(format!("request payload: {}", e))),
        }
    }
}

/// Runs API calls through the rate limiter, signer and transport
#[derive(Debug)]
pub struct RequestExecutor<T: HttpTransport, S: StateStore> {
    transport: T,
    limiter: RateLimiter<S>,
    signer: SignatureGenerator,
    clock: Arc<dyn Clock>,
    config: ClientConfig,
}

impl<T: HttpTransport, S: StateStore> RequestExecutor<T, S> {
    /// Sleeps go through the limiter's clock
    pub fn new(transport: T, limiter: RateLimiter<S>, config: ClientConfig) -> Self {
        let clock = limiter.clock();
        Self {
            transport,
            limiter,
            signer: SignatureGenerator::default(),
            clock,
            config,
        }
    }

    pub fn with_signer(mut self, signer: SignatureGenerator) -> Self {
        self.signer = signer;
        self
    }

    pub fn limiter(&self) -> &RateLimiter<S> {
        &self.limiter
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub async fn get(
        &self,
        credentials: &Credentials,
        path: &str,
        options: &RequestOptions,
    ) -> Result<Value> {
        self.execute(credentials, &ApiRequest::get(path), options)
            .await
    }

    pub async fn post(
        &self,
        credentials: &Credentials,
        path: &str,
        payload: Value,
        options: &RequestOptions,
    ) -> Result<Value> {
        self.execute(credentials, &ApiRequest::post(path, payload), options)
            .await
    }

    /// Execute one logical call, retrying throttled and transient failures.
    ///
    /// Waiting on a local rate limit does not use up an attempt. Dropping
    /// the returned future cancels any pending wait.
    pub async fn execute(
        &self,
        credentials: &Credentials,
        request: &ApiRequest,
        options: &RequestOptions,
    ) -> Result<Value> {
        let tenant = endpoint::resolve_tenant(
            options.tenant_id.as_deref(),
            credentials,
            &request.path,
        );
        let operation = request.operation();

        let base = options
            .api_url
            .as_deref()
            .or(self.config.api_url.as_deref())
            .unwrap_or(DEFAULT_API_URL);
        let url = endpoint::build_url(base, &request.path)?;
        let signed_path = endpoint::path_and_query(&url);
        let body = request.body()?;

        let max_attempts = options.max_retries.max(1);
        let backoff = ExponentialBackoff::new(BackoffConfig {
            initial_backoff: options.retry_delay,
            max_backoff: self.limiter.config().max_backoff,
            backoff_multiplier: 2.0,
            jitter: self.limiter.config().jitter,
        });

        let mut attempt: u32 = 1;
        let mut rate_limit_waited = Duration::ZERO;

        loop {
            let decision = self.limiter.check_rate_limit(&tenant, &operation).await;
            if !decision.allowed {
                let reason = decision.reason.unwrap_or(DenyReason::Backoff);
                let wait = decision
                    .wait_time
                    .filter(|w| !w.is_zero())
                    .unwrap_or(options.rate_limit_wait);

                if let Some(budget) = options.max_rate_limit_wait {
                    if rate_limit_waited + wait > budget {
                        return Err(ClientError::RateLimitExceeded {
                            tenant,
                            reason,
                            wait,
                        });
                    }
                }

                debug!(
                    tenant_id = %tenant,
                    operation = %operation,
                    attempt,
                    reason = reason.as_str(),
                    wait_ms = wait.as_millis() as u64,
                    "Waiting for rate limiter"
                );
                self.clock.sleep(wait).await;
                rate_limit_waited += wait;
                continue;
            }

            let authorization = self.signer.sign(
                &credentials.client_key,
                &credentials.client_secret,
                request.method.as_str(),
                &signed_path,
                &body,
            )?;

            let http_request = HttpRequest {
                method: request.method.clone(),
                url: url.to_string(),
                headers: vec![
                    ("Authorization".to_string(), authorization),
                    ("Content-Type".to_string(), "application/json".to_string()),
                ],
                body: body.clone(),
                timeout: options.timeout,
            };

            let outcome = match self.transport.send(http_request).await {
                Ok(response) => response::classify(&response),
                Err(e) => Outcome::Failed(e.into()),
            };

            match outcome {
                Outcome::Success(value) => {
                    self.limiter.record_request(&tenant, &operation).await;
                    info!(tenant_id = %tenant, operation = %operation, attempt, "API request succeeded");
                    return Ok(value);
                }
                Outcome::Throttled { retry_after } => {
                    let delay = self
                        .limiter
                        .record_rate_limit(&tenant, retry_after.as_deref())
                        .await;
                    if attempt >= max_attempts {
                        return Err(ClientError::Throttled {
                            attempts: attempt,
                            retry_after: delay,
                        });
                    }

                    let wait = delay.min(MAX_THROTTLE_SLEEP);
                    warn!(
                        tenant_id = %tenant,
                        operation = %operation,
                        attempt,
                        wait_ms = wait.as_millis() as u64,
                        "API throttled request, retrying"
                    );
                    self.clock.sleep(wait).await;
                }
                Outcome::Failed(err) if err.is_retryable() => {
                    self.limiter.record_failure(&tenant, &err).await;
                    if attempt >= max_attempts {
                        return Err(ClientError::RetriesExhausted {
                            attempts: attempt,
                            last: Box::new(err),
                        });
                    }

                    // Spread retries above whatever backoff the limiter now holds
                    let held = self
                        .limiter
                        .get_status(&tenant)
                        .await
                        .backoff_remaining_ms
                        .map(Duration::from_millis)
                        .unwrap_or_default();
                    let wait =
                        held.max(backoff.base_delay(attempt)) + backoff.jitter_extra(attempt);
                    warn!(
                        tenant_id = %tenant,
                        operation = %operation,
                        attempt,
                        wait_ms = wait.as_millis() as u64,
                        error = %err,
                        "Transient failure, retrying"
                    );
                    self.clock.sleep(wait).await;
                }
                Outcome::Failed(err) => {
                    self.limiter.record_failure(&tenant, &err).await;
                    warn!(tenant_id = %tenant, operation = %operation, attempt, error = %err, "API request failed");
                    return Err(err);
                }
            }

            attempt += 1;
        }
    }
}
