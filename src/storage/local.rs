//! Local filesystem backend for the delivered key set.

use std::collections::HashSet;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};
use crate::storage::{SeenSnapshot, SeenStorage};

/// Stores keys as a JSON document at a fixed path.
#[derive(Debug, Clone)]
pub struct LocalSeenStorage {
    path: PathBuf,
}

impl LocalSeenStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Write bytes atomically (write to temp, then rename).
    async fn write_bytes(&self, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = self.path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Read bytes, returning None if the file doesn't exist.
    async fn read_bytes(&self) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Io(e)),
        }
    }
}

#[async_trait]
impl SeenStorage for LocalSeenStorage {
    async fn load(&self) -> Result<HashSet<String>> {
        match self.read_bytes().await? {
            Some(bytes) => {
                let snapshot: SeenSnapshot = serde_json::from_slice(&bytes)?;
                log::info!(
                    "Loaded {} seen key(s) from {}",
                    snapshot.keys.len(),
                    self.path.display()
                );
                Ok(snapshot.keys.into_iter().collect())
            }
            None => {
                log::warn!("No seen file at {}; starting empty", self.path.display());
                Ok(HashSet::new())
            }
        }
    }

    async fn save(&self, keys: Vec<String>) -> Result<()> {
        let snapshot = SeenSnapshot::new(keys);
        let bytes = serde_json::to_vec_pretty(&snapshot)?;
        self.write_bytes(&bytes).await?;
        log::debug!("Saved {} seen key(s)", snapshot.count);
        Ok(())
    }
}
