// src/client/transport.rs

use async_trait::async_trait;
use reqwest::Method;
use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt::Debug;
use std::io;
use std::time::Duration;
use thiserror::Error;

use crate::error::{ClientError, Result, TransportErrorKind};

/// A fully signed request, ready for the wire
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
    pub timeout: Duration,
}

impl HttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Status, headers and body text of a response. Header names are lowercase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Failure observed before any HTTP status was available
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<TransportError> for ClientError {
    fn from(err: TransportError) -> Self {
        if err.kind.is_retryable() {
            ClientError::transport(err.kind, err.message)
        } else {
            ClientError::Application {
                status: None,
                errors: vec![err.to_string()],
            }
        }
    }
}

/// Port for sending HTTP requests
#[async_trait]
pub trait HttpTransport: Send + Sync + Debug {
    async fn send(&self, request: HttpRequest) -> std::result::Result<HttpResponse, TransportError>;
}

/// reqwest-backed transport
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("deploy_client/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ClientError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> std::result::Result<HttpResponse, TransportError> {
        let mut builder = self
            .client
            .request(request.method, &request.url)
            .timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body);
        }

        let response = builder.send().await.map_err(transport_error)?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let body = response.text().await.map_err(transport_error)?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

fn transport_error(err: reqwest::Error) -> TransportError {
    TransportError::new(classify_reqwest_error(&err), err.to_string())
}

/// Map a reqwest error onto a transport kind without looking at its message
pub(crate) fn classify_reqwest_error(err: &reqwest::Error) -> TransportErrorKind {
    if err.is_timeout() {
        return TransportErrorKind::TimedOut;
    }

    let mut dns_failure = false;
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            if let Some(kind) = io_kind(io_err.kind()) {
                return kind;
            }
        }
        if let Some(hyper_err) = cause.downcast_ref::<hyper::Error>() {
            if let Some(kind) = hyper_kind(hyper_err) {
                return kind;
            }
        }
        dns_failure |= is_dns_failure(cause);
        source = cause.source();
    }

    if dns_failure {
        TransportErrorKind::DnsLookup
    } else if err.is_connect() {
        TransportErrorKind::Connect
    } else {
        TransportErrorKind::Other
    }
}

/// hyper errors raised when the peer goes away or stalls mid-exchange
fn hyper_kind(err: &hyper::Error) -> Option<TransportErrorKind> {
    if err.is_incomplete_message() || err.is_closed() || err.is_canceled() {
        Some(TransportErrorKind::ConnectionReset)
    } else if err.is_timeout() {
        Some(TransportErrorKind::TimedOut)
    } else {
        None
    }
}

// The connector's error type is private; resolver failures carry this fixed prefix
fn is_dns_failure(cause: &(dyn StdError + 'static)) -> bool {
    cause.to_string().starts_with("dns error")
}

fn io_kind(kind: io::ErrorKind) -> Option<TransportErrorKind> {
    match kind {
        io::ErrorKind::ConnectionRefused => Some(TransportErrorKind::ConnectionRefused),
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::UnexpectedEof => Some(TransportErrorKind::ConnectionReset),
        io::ErrorKind::TimedOut => Some(TransportErrorKind::TimedOut),
        io::ErrorKind::AddrNotAvailable
        | io::ErrorKind::NetworkUnreachable
        | io::ErrorKind::HostUnreachable
        | io::ErrorKind::NetworkDown => Some(TransportErrorKind::NetworkUnreachable),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_headers_are_case_insensitive() {
        let response = HttpResponse::new(429, "").with_header("Retry-After", "2");
        assert_eq!(response.header("retry-after"), Some("2"));
        assert_eq!(response.header("RETRY-AFTER"), Some("2"));
        assert!(!response.is_success());
    }

    #[test]
    fn test_io_kinds_map_to_transport_kinds() {
        assert_eq!(
            io_kind(io::ErrorKind::ConnectionReset),
            Some(TransportErrorKind::ConnectionReset)
        );
        assert_eq!(
            io_kind(io::ErrorKind::ConnectionRefused),
            Some(TransportErrorKind::ConnectionRefused)
        );
        assert_eq!(
            io_kind(io::ErrorKind::HostUnreachable),
            Some(TransportErrorKind::NetworkUnreachable)
        );
        assert_eq!(
            io_kind(io::ErrorKind::NetworkUnreachable),
            Some(TransportErrorKind::NetworkUnreachable)
        );
        assert_eq!(io_kind(io::ErrorKind::InvalidData), None);
    }

    #[derive(Debug)]
    struct ConnectorError(&'static str);

    impl std::fmt::Display for ConnectorError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(self.0)
        }
    }

    impl std::error::Error for ConnectorError {}

    #[test]
    fn test_resolver_failures_are_recognised() {
        assert!(is_dns_failure(&ConnectorError("dns error")));
        assert!(is_dns_failure(&ConnectorError(
            "dns error: failed to lookup address information"
        )));
        assert!(!is_dns_failure(&ConnectorError("tcp connect error")));
        assert!(TransportErrorKind::DnsLookup.is_retryable());
    }

    #[test]
    fn test_non_retryable_transport_errors_are_not_transient() {
        let err: ClientError = TransportError::new(TransportErrorKind::Other, "bad url").into();
        assert!(!err.is_retryable());

        let err: ClientError =
            TransportError::new(TransportErrorKind::ConnectionReset, "reset").into();
        assert!(err.is_retryable());
    }
}
