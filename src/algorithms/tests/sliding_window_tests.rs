use std::time::Duration;

use crate::algorithms::{DenyReason, RateLimitDecision, RequestEntry, SlidingWindowLog, MINUTE_MS};

fn entry(timestamp: i64) -> RequestEntry {
    RequestEntry {
        timestamp,
        operation: "test".to_string(),
        success: true,
    }
}

fn log_with(timestamps: &[i64]) -> SlidingWindowLog {
    let mut log = SlidingWindowLog::new();
    for &ts in timestamps {
        log.push(entry(ts));
    }
    log
}

#[test]
fn test_count_within_excludes_window_boundary() {
    let now = 1_000_000;
    let log = log_with(&[now - MINUTE_MS, now - MINUTE_MS + 1, now - 10, now]);

    // An entry exactly one window old has aged out
    assert_eq!(log.count_within(now, MINUTE_MS), 3);
    assert_eq!(log.count_within(now, 100), 2);
}

#[test]
fn test_prune_drops_only_old_entries() {
    let now = 10_000_000;
    let mut log = log_with(&[now - 3_600_001, now - 3_600_000, now - 3_599_999, now]);

    let removed = log.prune(now, 3_600_000);
    assert_eq!(removed, 2);
    assert_eq!(log.len(), 2);
    assert!(log.iter().all(|e| e.timestamp > now - 3_600_000));
}

#[test]
fn test_time_until_slot_tracks_oldest_in_window() {
    let now = 500_000;
    let log = log_with(&[now - 70_000, now - 45_000, now - 5_000]);

    // The 70s old entry is outside the minute; the 45s one frees up in 15s
    assert_eq!(
        log.time_until_slot(now, MINUTE_MS),
        Duration::from_millis(15_000)
    );
    assert_eq!(SlidingWindowLog::new().time_until_slot(now, MINUTE_MS), Duration::ZERO);
}

#[test]
fn test_time_until_slot_is_positive_for_entries_at_now() {
    let now = 42_000;
    let log = log_with(&[now]);
    assert_eq!(log.time_until_slot(now, MINUTE_MS), Duration::from_millis(60_000));
}

#[test]
fn test_log_serializes_as_plain_array() {
    let log = log_with(&[1, 2]);
    let json = serde_json::to_value(&log).unwrap();
    assert!(json.is_array());
    assert_eq!(json[0]["timestamp"], 1);
    assert_eq!(json[1]["operation"], "test");

    // Missing fields default instead of failing
    let parsed: SlidingWindowLog = serde_json::from_str(r#"[{"timestamp": 7}]"#).unwrap();
    let first = parsed.iter().next().unwrap();
    assert_eq!(first.timestamp, 7);
    assert!(first.success);
    assert!(first.operation.is_empty());
}

#[test]
fn test_decision_constructors() {
    let allowed = RateLimitDecision::allow();
    assert!(allowed.allowed);
    assert!(allowed.reason.is_none());

    let denied = RateLimitDecision::deny(DenyReason::Throttled, Duration::from_secs(3))
        .with_retry_after(99);
    assert!(!denied.allowed);
    assert_eq!(denied.reason, Some(DenyReason::Throttled));
    assert_eq!(denied.wait_time, Some(Duration::from_secs(3)));
    assert_eq!(denied.retry_after, Some(99));
    assert_eq!(DenyReason::BurstProtection.to_string(), "burst_protection");
}
