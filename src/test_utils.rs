// src/test_utils.rs

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::client::{HttpRequest, HttpResponse, HttpTransport, TransportError};
use crate::clock::Clock;
use crate::config::RateLimiterConfig;
use crate::error::TransportErrorKind;
use crate::limiter::RateLimiter;
use crate::storage::MemoryStateStore;

/// 2023-11-14T22:13:20Z
pub const START_MILLIS: i64 = 1_700_000_000_000;

/// Clock with controlled time; `sleep` advances it instead of waiting
#[derive(Debug)]
pub struct MockClock {
    now: AtomicI64,
    sleeps: Mutex<Vec<Duration>>,
}

impl MockClock {
    pub fn new() -> Arc<Self> {
        Self::starting_at(START_MILLIS)
    }

    pub fn starting_at(millis: i64) -> Arc<Self> {
        Arc::new(Self {
            now: AtomicI64::new(millis),
            sleeps: Mutex::new(Vec::new()),
        })
    }

    pub fn advance(&self, duration: Duration) {
        self.now
            .fetch_add(duration.as_millis() as i64, Ordering::SeqCst);
    }

    /// Every duration passed to `sleep`, in order
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

#[async_trait]
impl Clock for MockClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
        self.advance(duration);
        tokio::task::yield_now().await;
    }
}

/// Transport replaying a queue of canned responses and errors
#[derive(Debug)]
pub struct ScriptedTransport {
    clock: Arc<MockClock>,
    script: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
    requests: Mutex<Vec<(i64, HttpRequest)>>,
}

impl ScriptedTransport {
    pub fn new(clock: Arc<MockClock>) -> Self {
        Self {
            clock,
            script: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn respond(self, response: HttpResponse) -> Self {
        self.script.lock().unwrap().push_back(Ok(response));
        self
    }

    pub fn fail(self, kind: TransportErrorKind, message: &str) -> Self {
        self.script
            .lock()
            .unwrap()
            .push_back(Err(TransportError::new(kind, message)));
        self
    }

    /// Requests seen so far
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|(_, r)| r.clone())
            .collect()
    }

    /// Mock clock reading at the moment each request was sent
    pub fn sent_at(&self) -> Vec<i64> {
        self.requests.lock().unwrap().iter().map(|(t, _)| *t).collect()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests
            .lock()
            .unwrap()
            .push((self.clock.now_millis(), request));
        self.script.lock().unwrap().pop_front().unwrap_or_else(|| {
            Err(TransportError::new(
                TransportErrorKind::Other,
                "no scripted response left",
            ))
        })
    }
}

/// Limiter over an in-memory store driven by `clock`
pub fn test_limiter(
    config: RateLimiterConfig,
    clock: &Arc<MockClock>,
) -> RateLimiter<MemoryStateStore> {
    RateLimiter::with_clock(config, MemoryStateStore::new(), clock.clone())
}
