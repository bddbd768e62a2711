// src/storage/memory.rs

// In-memory state store (for testing and processes that opt out of persistence)
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::{ClientError, Result, StorageError};
use crate::limiter::PersistedSnapshot;
use crate::storage::StateStore;

/// In-memory state store
///
/// Clones share the same slot, so a test can hand one clone to a limiter,
/// drop the limiter and open a fresh one on another clone to simulate a
/// restart.
#[derive(Debug, Clone, Default)]
pub struct MemoryStateStore {
    slot: Arc<RwLock<Option<PersistedSnapshot>>>,
    saves: Arc<AtomicUsize>,
    fail_saves: Arc<AtomicBool>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate the store as if a previous process had saved it
    pub fn with_snapshot(snapshot: PersistedSnapshot) -> Self {
        Self {
            slot: Arc::new(RwLock::new(Some(snapshot))),
            ..Self::default()
        }
    }

    /// Make every subsequent save fail, as a full disk would
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Number of successful saves so far
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Last saved snapshot, if any
    pub async fn snapshot(&self) -> Option<PersistedSnapshot> {
        self.slot.read().await.clone()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self) -> Result<Option<PersistedSnapshot>> {
        Ok(self.slot.read().await.clone())
    }

    async fn save(&self, snapshot: &PersistedSnapshot) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(ClientError::Storage(StorageError::Unavailable(
                "memory store configured to fail saves".to_string(),
            )));
        }

        *self.slot.write().await = Some(snapshot.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}
