// for error definitions
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::algorithms::DenyReason;

#[derive(Error, Debug)]
pub enum ClientError {
    /// Signature or credential material is malformed. Never retried.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// A local per-tenant cap is still in force after the caller's wait budget ran out
    #[error("Rate limit exceeded for tenant '{tenant}' ({reason}); retry in about {}", fmt_wait(.wait))]
    RateLimitExceeded {
        tenant: String,
        reason: DenyReason,
        wait: Duration,
    },

    /// The upstream API answered 429 on every attempt
    #[error("API throttled the request (HTTP 429) after {attempts} attempts; retry in about {}", fmt_wait(.retry_after))]
    Throttled { attempts: u32, retry_after: Duration },

    /// A single transient failure (network level or 502/503/504)
    #[error("Transient {kind} error: {message}")]
    Transient {
        kind: TransientKind,
        message: String,
    },

    /// Retryable failures persisted through every attempt
    #[error("Request failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<ClientError>,
    },

    /// The API understood the request and rejected it
    #[error("API rejected the request{}: {}", fmt_status(.status), fmt_errors(.errors))]
    Application {
        status: Option<u16>,
        errors: Vec<String>,
    },

    /// Response body could not be parsed
    #[error("Failed to parse API response: {0}")]
    Parse(String),

    /// Errors related to the persisted limiter state
    #[error("Storage error: {0}")]
    Storage(StorageError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ClientError {
    /// Whether the failure class is worth another attempt with backoff.
    ///
    /// Only transient failures qualify. Throttling and local rate limits are
    /// handled by their own wait paths before they ever surface as errors.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::Transient { .. })
    }

    pub(crate) fn transport(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        ClientError::Transient {
            kind: TransientKind::Network(kind),
            message: message.into(),
        }
    }
}

/// Storage-specific errors
#[derive(Error, Debug)]
pub enum StorageError {
    /// Filesystem errors while reading or writing the state file
    #[error("I/O error: {0}")]
    Io(String),

    /// Data serialization/deserialization errors
    #[error("Data serialization error: {0}")]
    Serialization(String),

    /// The backing store refused the operation
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Network-level failure kinds recorded by the transport when it first sees the error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    ConnectionRefused,
    ConnectionReset,
    TimedOut,
    DnsLookup,
    NetworkUnreachable,
    /// Connection could not be established for another reason
    Connect,
    /// Anything else (malformed request, redirect loops, body decoding)
    Other,
}

impl TransportErrorKind {
    pub fn is_retryable(self) -> bool {
        !matches!(self, TransportErrorKind::Other)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransportErrorKind::ConnectionRefused => "connection refused",
            TransportErrorKind::ConnectionReset => "connection reset",
            TransportErrorKind::TimedOut => "timed out",
            TransportErrorKind::DnsLookup => "dns lookup",
            TransportErrorKind::NetworkUnreachable => "network unreachable",
            TransportErrorKind::Connect => "connect",
            TransportErrorKind::Other => "transport",
        }
    }
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What made a failure transient
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransientKind {
    Network(TransportErrorKind),
    /// Upstream gateway status: 502, 503 or 504
    Status(u16),
}

impl fmt::Display for TransientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransientKind::Network(kind) => write!(f, "network ({})", kind),
            TransientKind::Status(code) => write!(f, "upstream (HTTP {})", code),
        }
    }
}

// implement conversions from serde_json::Error to ClientError
impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Storage(StorageError::Serialization(err.to_string()))
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        ClientError::Storage(StorageError::Io(err.to_string()))
    }
}

/// Render a wait as a short human readable estimate ("45s", "2m 5s", "1h 3m").
pub fn format_wait(wait: Duration) -> String {
    let secs = (wait.as_millis() as u64).div_ceil(1000);
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        let (m, s) = (secs / 60, secs % 60);
        if s == 0 {
            format!("{}m", m)
        } else {
            format!("{}m {}s", m, s)
        }
    } else {
        let (h, m) = (secs / 3600, (secs % 3600) / 60);
        if m == 0 {
            format!("{}h", h)
        } else {
            format!("{}h {}m", h, m)
        }
    }
}

fn fmt_wait(wait: &Duration) -> String {
    format_wait(*wait)
}

fn fmt_status(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default()
}

fn fmt_errors(errors: &[String]) -> String {
    if errors.is_empty() {
        "no error details returned".to_string()
    } else {
        errors.join("; ")
    }
}

// define a Result type alias for convenience
pub type Result<T> = std::result::Result<T, ClientError>;
