// src/storage/tests/file_tests.rs

use tempfile::TempDir;

use super::common;
use crate::error::{ClientError, StorageError};
use crate::storage::{FileStateStore, StateStore};

#[tokio::test]
async fn test_file_store_basic_operations() {
    let dir = TempDir::new().unwrap();
    let store = FileStateStore::new(dir.path().join("a").join("b").join("state.json"));

    common::test_save_load_overwrite(&store).await.unwrap();
    assert!(store.path().exists());
    // Temp file is renamed away after every write
    assert!(!dir.path().join("a").join("b").join("state.json.tmp").exists());
}

#[tokio::test]
async fn test_document_shape() {
    let dir = TempDir::new().unwrap();
    let store = FileStateStore::new(dir.path().join("state.json"));
    store.save(&common::sample_snapshot(1_000_000)).await.unwrap();

    let raw = std::fs::read_to_string(store.path()).unwrap();
    let json: serde_json::Value = serde_json::from_str(&raw).unwrap();

    let limits = &json["projectLimits"]["p1"];
    assert_eq!(limits["lastRequest"], 995_000);
    assert_eq!(limits["consecutiveFailures"], 2);
    assert_eq!(limits["backoffUntil"], 1_002_000);
    assert!(limits["requests"].is_array());
    assert_eq!(limits["requests"][0]["timestamp"], 995_000);
    assert_eq!(limits["requests"][0]["success"], true);

    let throttle = &json["throttleState"]["p1"];
    assert_eq!(throttle["throttledAt"], 1_000_000);
    assert_eq!(throttle["retryAfter"], 1_030_000);
    assert_eq!(throttle["consecutiveThrottles"], 1);
    assert_eq!(throttle["lastRetryAfter"], 30_000);
    assert_eq!(json["savedAt"], 1_000_000);
}

#[tokio::test]
async fn test_missing_and_empty_files_load_as_nothing() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("state.json");
    let store = FileStateStore::new(&path);
    assert_eq!(store.load().await.unwrap(), None);

    std::fs::write(&path, "   \n").unwrap();
    assert_eq!(store.load().await.unwrap(), None);
}

#[tokio::test]
async fn test_partial_documents_default_missing_fields() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("state.json");
    std::fs::write(
        &path,
        r#"{"throttleState":{"p1":{"retryAfter":99}},"futureField":[1,2]}"#,
    )
    .unwrap();

    let snapshot = FileStateStore::new(&path).load().await.unwrap().unwrap();
    assert!(snapshot.project_limits.is_empty());
    assert_eq!(snapshot.saved_at, 0);
    let throttle = &snapshot.throttle_state["p1"];
    assert_eq!(throttle.retry_after, 99);
    assert_eq!(throttle.consecutive_throttles, 0);
}

#[tokio::test]
async fn test_corrupt_file_is_serialization_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("state.json");
    std::fs::write(&path, "{\"projectLimits\": [").unwrap();

    let err = FileStateStore::new(&path).load().await.unwrap_err();
    match err {
        ClientError::Storage(StorageError::Serialization(message)) => {
            assert!(message.contains("state.json"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}
