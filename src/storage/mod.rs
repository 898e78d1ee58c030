//! Persistence of delivered identity keys across restarts.
//!
//! The dedup store itself is purely in-memory. A [`SeenStorage`] backend is
//! consulted at the process boundaries only: once at startup to seed the
//! store, then periodically and on shutdown to save a snapshot.
//!
//! ```text
//! storage/
//! ├── config.toml    # relay configuration
//! └── seen.json      # delivered keys
//! ```

pub mod local;

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use local::LocalSeenStorage;

/// On-disk form of the delivered key set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeenSnapshot {
    pub saved_at: DateTime<Utc>,
    pub count: usize,
    pub keys: Vec<String>,
}

impl SeenSnapshot {
    pub fn new(mut keys: Vec<String>) -> Self {
        keys.sort();
        Self {
            saved_at: Utc::now(),
            count: keys.len(),
            keys,
        }
    }
}

/// Backend for the delivered key set.
#[async_trait]
pub trait SeenStorage: Send + Sync {
    /// Load previously saved keys. A missing store yields an empty set.
    async fn load(&self) -> Result<HashSet<String>>;

    /// Replace the saved keys with `keys`.
    async fn save(&self, keys: Vec<String>) -> Result<()>;
}
