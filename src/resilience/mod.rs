// src/resilience/mod.rs
//! Retry pacing shared by the request executor and the rate limiter.
//!
//! The limiter uses the plain exponential formula to compute how long a
//! tenant stays in backoff after consecutive failures. The executor adds
//! random jitter on top so that many clients retrying the same outage do
//! not wake up at the same instant.

mod exponential_backoff;

#[cfg(test)]
mod tests;

pub use exponential_backoff::{BackoffConfig, ExponentialBackoff};
