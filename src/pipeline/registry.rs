//! Configured sources and their per-source poll state.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use serde::Serialize;

use crate::error::Result;
use crate::models::{Config, PollStatus, SourceConfig};
use crate::services::{build_source, Source};

/// Where a source is in its poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourcePhase {
    Idle,
    Polling,
}

/// Observable state of one source. Never consulted for scheduling.
#[derive(Debug, Clone, Serialize)]
pub struct SourceState {
    pub phase: SourcePhase,
    pub last: PollStatus,
    pub polls: u64,
    pub failures: u64,
}

impl Default for SourceState {
    fn default() -> Self {
        Self {
            phase: SourcePhase::Idle,
            last: PollStatus::Never,
            polls: 0,
            failures: 0,
        }
    }
}

/// A source adapter together with its configuration and state.
pub struct SourceEntry {
    pub config: SourceConfig,
    pub source: Arc<dyn Source>,
    state: Mutex<SourceState>,
}

impl SourceEntry {
    pub fn new(config: SourceConfig, source: Arc<dyn Source>) -> Self {
        Self {
            config,
            source,
            state: Mutex::new(SourceState::default()),
        }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    fn lock(&self) -> MutexGuard<'_, SourceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> SourceState {
        self.lock().clone()
    }

    pub(crate) fn begin_poll(&self) {
        self.lock().phase = SourcePhase::Polling;
    }

    pub(crate) fn record_success(&self, records: usize, new_items: usize) {
        let mut state = self.lock();
        state.phase = SourcePhase::Idle;
        state.polls += 1;
        state.last = PollStatus::Succeeded {
            at: Utc::now(),
            records,
            new_items,
        };
    }

    pub(crate) fn record_failure(&self, error: impl Into<String>) {
        let mut state = self.lock();
        state.phase = SourcePhase::Idle;
        state.polls += 1;
        state.failures += 1;
        state.last = PollStatus::Failed {
            at: Utc::now(),
            error: error.into(),
        };
    }
}

/// Ordered, fixed-for-the-run list of sources.
pub struct SourceRegistry {
    entries: Vec<Arc<SourceEntry>>,
}

impl SourceRegistry {
    pub fn new(entries: Vec<SourceEntry>) -> Self {
        Self {
            entries: entries.into_iter().map(Arc::new).collect(),
        }
    }

    /// Build one adapter per configured source.
    pub fn from_config(config: &Config, client: &reqwest::Client) -> Result<Self> {
        let entries = config
            .sources
            .iter()
            .map(|source| Ok(SourceEntry::new(source.clone(), build_source(source, client)?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(entries))
    }

    pub fn entries(&self) -> &[Arc<SourceEntry>] {
        &self.entries
    }

    pub fn get(&self, id: &str) -> Option<&Arc<SourceEntry>> {
        self.entries.iter().find(|e| e.id() == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of every source's state, in registry order.
    pub fn states(&self) -> Vec<(String, SourceState)> {
        self.entries
            .iter()
            .map(|e| (e.id().to_string(), e.state()))
            .collect()
    }
}
