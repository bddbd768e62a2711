// src/config/mod.rs

use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{ClientError, Result};
use crate::resilience::BackoffConfig;

/// Built-in API base used when neither the call nor the environment overrides it
pub const DEFAULT_API_URL: &str = "https://paasportal.episerver.net/api/v1.0/";

/// Scheme tag placed in front of the signed Authorization value
pub const DEFAULT_AUTH_SCHEME: &str = "epi-hmac";

/// Configuration for the per-tenant rate limiter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    #[serde(default = "default_max_per_minute")]
    pub max_requests_per_minute: usize,

    #[serde(default = "default_max_per_hour")]
    pub max_requests_per_hour: usize,

    /// Requests per minute after which consecutive calls must be spaced out
    #[serde(default = "default_burst_allowance")]
    pub burst_allowance: usize,

    /// Minimum spacing enforced by burst protection
    #[serde(default = "default_burst_spacing", with = "duration_serde")]
    pub burst_spacing: Duration,

    #[serde(default = "default_initial_backoff", with = "duration_serde")]
    pub initial_backoff: Duration,

    #[serde(default = "default_max_backoff", with = "duration_serde")]
    pub max_backoff: Duration,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Fraction by which retry delays are perturbed either way
    #[serde(default = "default_jitter")]
    pub jitter: f64,

    /// Throttle applied when a 429 carries no usable Retry-After
    #[serde(default = "default_retry_after", with = "duration_serde")]
    pub default_retry_after: Duration,

    /// How often the background sweep runs
    #[serde(default = "default_cleanup_interval", with = "duration_serde")]
    pub cleanup_interval: Duration,

    /// Where the JSON snapshot is written
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,
}

fn default_max_per_minute() -> usize {
    60
}

fn default_max_per_hour() -> usize {
    1000
}

fn default_burst_allowance() -> usize {
    10
}

fn default_burst_spacing() -> Duration {
    Duration::from_millis(1000)
}

fn default_initial_backoff() -> Duration {
    Duration::from_millis(1000)
}

fn default_max_backoff() -> Duration {
    Duration::from_millis(30_000)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> f64 {
    0.25
}

fn default_retry_after() -> Duration {
    Duration::from_secs(60)
}

fn default_cleanup_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_state_path() -> PathBuf {
    env::temp_dir()
        .join("deploy-client")
        .join("rate-limiter-state.json")
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_requests_per_minute: default_max_per_minute(),
            max_requests_per_hour: default_max_per_hour(),
            burst_allowance: default_burst_allowance(),
            burst_spacing: default_burst_spacing(),
            initial_backoff: default_initial_backoff(),
            max_backoff: default_max_backoff(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: default_jitter(),
            default_retry_after: default_retry_after(),
            cleanup_interval: default_cleanup_interval(),
            state_path: default_state_path(),
        }
    }
}

impl RateLimiterConfig {
    /// Defaults overridden by `DEPLOY_RATE_LIMIT_*` environment variables.
    ///
    /// Durations are given in milliseconds.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(v) = env_parse("DEPLOY_RATE_LIMIT_PER_MINUTE")? {
            config.max_requests_per_minute = v;
        }
        if let Some(v) = env_parse("DEPLOY_RATE_LIMIT_PER_HOUR")? {
            config.max_requests_per_hour = v;
        }
        if let Some(v) = env_parse("DEPLOY_RATE_LIMIT_BURST")? {
            config.burst_allowance = v;
        }
        if let Some(ms) = env_parse::<u64>("DEPLOY_RATE_LIMIT_INITIAL_BACKOFF_MS")? {
            config.initial_backoff = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse::<u64>("DEPLOY_RATE_LIMIT_MAX_BACKOFF_MS")? {
            config.max_backoff = Duration::from_millis(ms);
        }
        if let Some(v) = env_parse("DEPLOY_RATE_LIMIT_BACKOFF_MULTIPLIER")? {
            config.backoff_multiplier = v;
        }
        if let Some(v) = env_parse("DEPLOY_RATE_LIMIT_JITTER")? {
            config.jitter = v;
        }
        if let Ok(path) = env::var("DEPLOY_RATE_LIMIT_STATE_PATH") {
            config.state_path = PathBuf::from(path);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_requests_per_minute == 0 || self.max_requests_per_hour == 0 {
            return Err(ClientError::Config(
                "request caps must be greater than zero".to_string(),
            ));
        }
        if self.backoff_multiplier < 1.0 {
            return Err(ClientError::Config(format!(
                "backoff multiplier must be at least 1.0, got {}",
                self.backoff_multiplier
            )));
        }
        if !(0.0..1.0).contains(&self.jitter) {
            return Err(ClientError::Config(format!(
                "jitter must be in [0, 1), got {}",
                self.jitter
            )));
        }
        Ok(())
    }

    /// Backoff settings for the limiter's own failure backoff (no jitter)
    pub fn backoff(&self) -> BackoffConfig {
        BackoffConfig {
            initial_backoff: self.initial_backoff,
            max_backoff: self.max_backoff,
            backoff_multiplier: self.backoff_multiplier,
            jitter: 0.0,
        }
    }
}

/// API credentials. The secret is base64 encoded as issued by the portal.
#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub client_key: String,
    pub client_secret: String,
    #[serde(default)]
    pub project_id: Option<String>,
}

impl Credentials {
    pub fn new(client_key: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_key: client_key.into(),
            client_secret: client_secret.into(),
            project_id: None,
        }
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }
}

// The secret must never reach a log line
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("client_key", &self.client_key)
            .field("client_secret", &"<redacted>")
            .field("project_id", &self.project_id)
            .finish()
    }
}

/// Client-level settings supplied by the surrounding tool
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub credentials: Option<Credentials>,

    /// Environment-level endpoint override
    pub api_url: Option<String>,
}

impl ClientConfig {
    /// Read `DEPLOY_CLIENT_KEY`, `DEPLOY_CLIENT_SECRET`, `DEPLOY_PROJECT_ID`
    /// and `DEPLOY_API_URL`. Credentials are only set when both key and
    /// secret are present.
    pub fn from_env() -> Self {
        let credentials = match (env::var("DEPLOY_CLIENT_KEY"), env::var("DEPLOY_CLIENT_SECRET")) {
            (Ok(key), Ok(secret)) if !key.is_empty() && !secret.is_empty() => {
                let mut creds = Credentials::new(key, secret);
                creds.project_id = env::var("DEPLOY_PROJECT_ID").ok().filter(|p| !p.is_empty());
                Some(creds)
            }
            _ => None,
        };

        Self {
            credentials,
            api_url: env::var("DEPLOY_API_URL").ok().filter(|u| !u.is_empty()),
        }
    }

    pub fn require_credentials(&self) -> Result<&Credentials> {
        self.credentials.as_ref().ok_or_else(|| {
            ClientError::Config(
                "DEPLOY_CLIENT_KEY and DEPLOY_CLIENT_SECRET must be set".to_string(),
            )
        })
    }
}

fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| ClientError::Config(format!("invalid value for {}: {}", name, e))),
        Err(_) => Ok(None),
    }
}

// Helper module to serialize/deserialize Duration with serde
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
