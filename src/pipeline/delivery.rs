//! Delivery pipeline.
//!
//! A single worker drains the batch queue and talks to the sink one
//! message at a time. Every send is followed by the pacing delay. A
//! rate-limit answer suspends the worker for exactly the advised wait and
//! then retries the same message, so nothing else reaches the sink in
//! between. Keys are committed to the dedup store only after the sink
//! accepted the item; failed items are released for the next poll.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::FutureExt;
use serde::Serialize;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::models::{Attachment, DeliveryConfig, Item, Payload};
use crate::pipeline::dedup::DedupStore;
use crate::pipeline::render::{render_caption, render_text, split_message};
use crate::services::{FileFetcher, SendOutcome, Sink};

/// Destination and annotation for a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub target: String,
    pub hashtag: String,
}

/// Items from one poll cycle of one source, in discovery order.
#[derive(Debug, Clone)]
pub struct Batch {
    pub source_id: String,
    pub route: Route,
    pub items: Vec<Item>,
}

/// Result of delivering one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// The sink kept rate limiting past the configured number of waits
    RateLimited(Duration),
    PermanentFailure(String),
}

/// Counters exposed on the status endpoint.
#[derive(Debug, Default)]
pub struct DeliveryStats {
    delivered: AtomicU64,
    failed: AtomicU64,
    rate_limit_waits: AtomicU64,
    file_fallbacks: AtomicU64,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct DeliveryCounts {
    pub delivered: u64,
    pub failed: u64,
    pub rate_limit_waits: u64,
    pub file_fallbacks: u64,
}

impl DeliveryStats {
    pub fn counts(&self) -> DeliveryCounts {
        DeliveryCounts {
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            rate_limit_waits: self.rate_limit_waits.load(Ordering::Relaxed),
            file_fallbacks: self.file_fallbacks.load(Ordering::Relaxed),
        }
    }
}

/// Sequential, rate-limit aware sender.
pub struct DeliveryPipeline {
    sink: Arc<dyn Sink>,
    fetcher: Arc<dyn FileFetcher>,
    dedup: Arc<DedupStore>,
    config: DeliveryConfig,
    stats: Arc<DeliveryStats>,
}

impl DeliveryPipeline {
    pub fn new(
        sink: Arc<dyn Sink>,
        fetcher: Arc<dyn FileFetcher>,
        dedup: Arc<DedupStore>,
        config: DeliveryConfig,
    ) -> Self {
        Self {
            sink,
            fetcher,
            dedup,
            config,
            stats: Arc::new(DeliveryStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<DeliveryStats> {
        Arc::clone(&self.stats)
    }

    /// Drain the queue until every sender is dropped.
    pub async fn run(self, mut queue: UnboundedReceiver<Batch>) {
        while let Some(batch) = queue.recv().await {
            log::info!(
                "[{}] Delivering {} new item(s)",
                batch.source_id,
                batch.items.len()
            );
            for item in &batch.items {
                self.process(item, &batch.route).await;
            }
        }
        log::debug!("Delivery queue closed");
    }

    /// Deliver one item and settle its dedup claim.
    ///
    /// Panics inside the attempt are contained here.
    pub async fn process(&self, item: &Item, route: &Route) {
        let attempt = AssertUnwindSafe(self.deliver(item, route)).catch_unwind().await;
        match attempt {
            Ok(Delivery::Delivered) => {
                self.dedup.mark_delivered(&item.identity_key);
                self.stats.delivered.fetch_add(1, Ordering::Relaxed);
                log::info!("[{}] Posted '{}'", item.source_tag, item.title);
            }
            Ok(Delivery::RateLimited(wait)) => {
                self.dedup.release(&item.identity_key);
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                log::warn!(
                    "[{}] Giving up on '{}' for this cycle: still rate limited ({}s)",
                    item.source_tag,
                    item.title,
                    wait.as_secs()
                );
            }
            Ok(Delivery::PermanentFailure(reason)) => {
                self.dedup.release(&item.identity_key);
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                log::warn!(
                    "[{}] Failed to post '{}': {}",
                    item.source_tag,
                    item.title,
                    reason
                );
            }
            Err(_) => {
                self.dedup.release(&item.identity_key);
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                log::error!(
                    "[{}] Delivery of '{}' panicked; skipped for this cycle",
                    item.source_tag,
                    item.title
                );
            }
        }
    }

    /// Send every message that makes up `item`.
    pub async fn deliver(&self, item: &Item, route: &Route) -> Delivery {
        let footer = self.config.footer.as_deref();

        let attachment = match &item.payload {
            Payload::File { url } if self.config.attach_files => {
                match self.fetcher.fetch(url).await {
                    Ok(attachment) => Some(attachment),
                    Err(e) => {
                        log::warn!(
                            "[{}] Could not fetch {}: {}; posting the link instead",
                            item.source_tag,
                            url,
                            e
                        );
                        self.stats.file_fallbacks.fetch_add(1, Ordering::Relaxed);
                        None
                    }
                }
            }
            Payload::Blob { attachment, .. } => Some(attachment.clone()),
            _ => None,
        };

        if let Some(attachment) = attachment {
            let caption = render_caption(item, &route.hashtag, footer, self.config.max_caption_len);
            match self.send_file_with_backoff(&route.target, &attachment, &caption).await {
                Delivery::PermanentFailure(reason) => {
                    log::warn!(
                        "[{}] Attachment for '{}' rejected ({}); posting the link instead",
                        item.source_tag,
                        item.title,
                        reason
                    );
                    self.stats.file_fallbacks.fetch_add(1, Ordering::Relaxed);
                }
                other => return other,
            }
        }

        let text = render_text(item, &route.hashtag, footer);
        for chunk in split_message(&text, self.config.max_message_len) {
            match self.send_text_with_backoff(&route.target, &chunk).await {
                Delivery::Delivered => {}
                other => return other,
            }
        }
        Delivery::Delivered
    }

    async fn send_text_with_backoff(&self, target: &str, text: &str) -> Delivery {
        self.with_backoff(move || self.sink.send_text(target, text)).await
    }

    async fn send_file_with_backoff(&self, target: &str, file: &Attachment, caption: &str) -> Delivery {
        self.with_backoff(move || self.sink.send_file(target, file, caption)).await
    }

    /// Repeat one send until it succeeds, honoring rate-limit waits and
    /// retrying a hard failure once.
    async fn with_backoff<F, Fut>(&self, mut send: F) -> Delivery
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = SendOutcome>,
    {
        let mut waits = 0u32;
        let mut failures = 0u32;
        loop {
            let outcome = send().await;
            match outcome {
                SendOutcome::Sent => {
                    tokio::time::sleep(self.config.pacing()).await;
                    return Delivery::Delivered;
                }
                SendOutcome::RateLimited(wait) => {
                    if waits >= self.config.max_rate_limit_waits {
                        return Delivery::RateLimited(wait);
                    }
                    waits += 1;
                    self.stats.rate_limit_waits.fetch_add(1, Ordering::Relaxed);
                    log::warn!("Sink rate limited; waiting {}s", wait.as_secs_f64());
                    tokio::time::sleep(wait).await;
                }
                SendOutcome::Failed(reason) => {
                    failures += 1;
                    tokio::time::sleep(self.config.pacing()).await;
                    if failures > 1 {
                        return Delivery::PermanentFailure(reason);
                    }
                    log::debug!("Send failed ({reason}); retrying once");
                }
            }
        }
    }
}
