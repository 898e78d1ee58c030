//! Composes registry, scheduler, dedup store and delivery into the
//! running relay.
//!
//! Startup order: spawn the delivery worker, then one poll loop per source,
//! each polling immediately. With catch-up enabled a loop's first cycle is
//! the bounded catch-up cycle; sources never wait on each other.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::models::{CatchUpConfig, Config};
use crate::pipeline::dedup::DedupStore;
use crate::pipeline::delivery::{Batch, DeliveryCounts, DeliveryPipeline, DeliveryStats};
use crate::pipeline::registry::{SourceRegistry, SourceState};
use crate::pipeline::scheduler::{CycleMode, PollContext, source_loop};
use crate::services::{FileFetcher, Sink};
use crate::storage::SeenStorage;

/// Read-only view of the running relay.
#[derive(Clone)]
pub struct StatusHandle {
    registry: Arc<SourceRegistry>,
    dedup: Arc<DedupStore>,
    stats: Arc<DeliveryStats>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceStatus {
    pub id: String,
    #[serde(flatten)]
    pub state: SourceState,
}

#[derive(Debug, Clone, Serialize)]
pub struct RelayStatus {
    pub sources: Vec<SourceStatus>,
    pub seen: usize,
    pub in_flight: usize,
    pub delivery: DeliveryCounts,
}

impl StatusHandle {
    pub fn snapshot(&self) -> RelayStatus {
        RelayStatus {
            sources: self
                .registry
                .states()
                .into_iter()
                .map(|(id, state)| SourceStatus { id, state })
                .collect(),
            seen: self.dedup.len(),
            in_flight: self.dedup.in_flight(),
            delivery: self.stats.counts(),
        }
    }
}

/// The relay process.
pub struct Orchestrator {
    registry: Arc<SourceRegistry>,
    dedup: Arc<DedupStore>,
    pipeline: DeliveryPipeline,
    context: PollContext,
    queue: mpsc::UnboundedReceiver<Batch>,
    catch_up: CatchUpConfig,
    storage: Option<Arc<dyn SeenStorage>>,
    save_interval: Duration,
}

impl Orchestrator {
    pub fn new(
        config: &Config,
        registry: SourceRegistry,
        sink: Arc<dyn Sink>,
        fetcher: Arc<dyn FileFetcher>,
        dedup: Arc<DedupStore>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            registry: Arc::new(registry),
            pipeline: DeliveryPipeline::new(sink, fetcher, Arc::clone(&dedup), config.delivery.clone()),
            context: PollContext::new(config, Arc::clone(&dedup), tx),
            dedup,
            queue: rx,
            catch_up: config.catch_up.clone(),
            storage: None,
            save_interval: Duration::from_secs(config.storage.save_interval_secs),
        }
    }

    /// Persist delivered keys through `storage` while running.
    pub fn with_storage(mut self, storage: Arc<dyn SeenStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Override the catch-up setting from configuration.
    pub fn with_catch_up(mut self, enabled: bool) -> Self {
        self.catch_up.enabled = enabled;
        self
    }

    pub fn status(&self) -> StatusHandle {
        StatusHandle {
            registry: Arc::clone(&self.registry),
            dedup: Arc::clone(&self.dedup),
            stats: self.pipeline.stats(),
        }
    }

    /// Run until `shutdown` resolves, then stop every task and save once more.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let Self {
            registry,
            dedup,
            pipeline,
            context,
            queue,
            catch_up,
            storage,
            save_interval,
        } = self;
        let context = Arc::new(context);

        let mut tasks: Vec<JoinHandle<()>> = Vec::new();
        tasks.push(tokio::spawn(pipeline.run(queue)));

        let catch_up_mode = catch_up.enabled.then_some(CycleMode::CatchUp {
            limit: catch_up.limit,
            mark_rest_seen: catch_up.mark_rest_seen,
        });
        if catch_up_mode.is_some() {
            log::info!("Catch-up: first {} item(s) per source", catch_up.limit);
        }

        for entry in registry.entries() {
            tasks.push(tokio::spawn(source_loop(
                Arc::clone(entry),
                Arc::clone(&context),
                catch_up_mode,
            )));
        }

        if let Some(storage) = &storage {
            tasks.push(tokio::spawn(save_loop(
                Arc::clone(storage),
                Arc::clone(&dedup),
                save_interval,
            )));
        }
        log::info!("Relay running with {} source(s)", registry.len());

        shutdown.await;
        log::info!("Shutdown requested");

        for task in &tasks {
            task.abort();
        }

        if let Some(storage) = storage {
            storage.save(dedup.snapshot()).await?;
            log::info!("Saved {} seen key(s)", dedup.len());
        }
        Ok(())
    }
}

async fn save_loop(storage: Arc<dyn SeenStorage>, dedup: Arc<DedupStore>, every: Duration) {
    if every.is_zero() {
        return;
    }
    loop {
        tokio::time::sleep(every).await;
        if let Err(e) = storage.save(dedup.snapshot()).await {
            log::warn!("Failed to save seen keys: {e}");
        }
    }
}
