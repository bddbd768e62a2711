// src/storage/mod.rs

pub mod file;
pub mod memory;

#[cfg(test)]
mod tests;

pub use file::FileStateStore;
pub use memory::MemoryStateStore;

use super::error::Result;
use crate::limiter::PersistedSnapshot;
use async_trait::async_trait;
use std::fmt::Debug;

/// Port through which the rate limiter persists its state
///
/// The limiter only ever needs the whole snapshot, so the port is a plain
/// load/save pair. Implementations must be safe to call concurrently;
/// the limiter serialises its own saves.
#[async_trait]
pub trait StateStore: Send + Sync + Debug + 'static {
    /// Returns `None` when nothing has been saved yet
    async fn load(&self) -> Result<Option<PersistedSnapshot>>;

    /// Replace the stored snapshot
    async fn save(&self, snapshot: &PersistedSnapshot) -> Result<()>;

    /// Human readable location for log lines
    fn location(&self) -> String;
}
