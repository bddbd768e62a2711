// src/storage/file.rs

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::fs;

use crate::error::{ClientError, Result, StorageError};
use crate::limiter::PersistedSnapshot;
use crate::persistence_op;
use crate::storage::StateStore;

/// JSON file state store
///
/// Writes go to a sibling temp file that is renamed over the target, so a
/// crash mid-write leaves the previous snapshot intact.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "state.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    async fn read_snapshot(&self) -> Result<Option<PersistedSnapshot>> {
        let raw = match fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if raw.trim().is_empty() {
            return Ok(None);
        }

        let snapshot = serde_json::from_str(&raw).map_err(|e| {
            ClientError::Storage(StorageError::Serialization(format!(
                "{}: {}",
                self.path.display(),
                e
            )))
        })?;
        Ok(Some(snapshot))
    }

    async fn write_snapshot(&self, snapshot: &PersistedSnapshot) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let json = serde_json::to_vec_pretty(snapshot)?;
        let temp = self.temp_path();
        fs::write(&temp, json).await?;
        fs::rename(&temp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn load(&self) -> Result<Option<PersistedSnapshot>> {
        let start = Instant::now();
        let result = self.read_snapshot().await;
        persistence_op!("load", self.path.display().to_string(), result, start.elapsed().as_millis() as u64);
        result
    }

    async fn save(&self, snapshot: &PersistedSnapshot) -> Result<()> {
        let start = Instant::now();
        let result = self.write_snapshot(snapshot).await;
        persistence_op!("save", self.path.display().to_string(), result, start.elapsed().as_millis() as u64);
        result
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}
