//! Per-source poll loops.
//!
//! Each source runs in its own task: poll, normalize, filter, claim new
//! keys, hand the batch to the delivery queue, sleep one interval, repeat.
//! Nothing a source does can reach another source's loop; the only shared
//! state is the dedup store.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::mpsc::UnboundedSender;

use crate::error::{AppError, Result};
use crate::models::{Config, Item, RawRecord};
use crate::pipeline::dedup::DedupStore;
use crate::pipeline::delivery::{Batch, Route};
use crate::pipeline::filter::ItemFilter;
use crate::pipeline::normalize::normalize;
use crate::pipeline::registry::SourceEntry;

/// What a cycle does with newly discovered items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleMode {
    /// Deliver every new item
    Steady,
    /// Deliver only the first `limit` new items. The others are recorded as
    /// delivered when `mark_rest_seen` is set and left for the next poll
    /// otherwise.
    CatchUp { limit: usize, mark_rest_seen: bool },
}

/// Counts reported by one successful cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub records: usize,
    pub kept: usize,
    pub queued: usize,
    pub marked_seen: usize,
}

/// Everything a poll loop needs besides its own source.
pub struct PollContext {
    pub dedup: Arc<DedupStore>,
    pub filter: ItemFilter,
    pub max_items: usize,
    pub poll_timeout: Duration,
    pub default_target: String,
    pub queue: UnboundedSender<Batch>,
}

impl PollContext {
    pub fn new(config: &Config, dedup: Arc<DedupStore>, queue: UnboundedSender<Batch>) -> Self {
        Self {
            dedup,
            filter: ItemFilter::new(&config.filter),
            max_items: config.crawler.max_items,
            poll_timeout: config.crawler.timeout(),
            default_target: config.sink.chat_id.clone(),
            queue,
        }
    }

    fn route(&self, entry: &SourceEntry) -> Route {
        Route {
            target: entry
                .config
                .target
                .clone()
                .unwrap_or_else(|| self.default_target.clone()),
            hashtag: entry.config.tag().to_string(),
        }
    }
}

/// Poll once, contained: timeouts and panics become this source's failure.
async fn fetch(entry: &SourceEntry, timeout: Duration) -> Result<Vec<RawRecord>> {
    let poll = AssertUnwindSafe(entry.source.poll()).catch_unwind();
    match tokio::time::timeout(timeout, poll).await {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => Err(AppError::poll(entry.id(), "poll panicked")),
        Err(_) => Err(AppError::timeout(
            format!("polling {}", entry.id()),
            timeout.as_secs(),
        )),
    }
}

/// Run one poll cycle for `entry`.
///
/// Errors are recorded on the entry and returned; the caller only logs them.
pub async fn run_cycle(entry: &SourceEntry, ctx: &PollContext, mode: CycleMode) -> Result<CycleReport> {
    entry.begin_poll();

    let records = match fetch(entry, ctx.poll_timeout).await {
        Ok(records) => records,
        Err(e) => {
            entry.record_failure(e.to_string());
            return Err(e);
        }
    };

    let mut report = CycleReport {
        records: records.len(),
        ..CycleReport::default()
    };

    let items: Vec<Item> = records
        .into_iter()
        .take(ctx.max_items)
        .map(|raw| normalize(raw, entry.id()))
        .collect();
    let items = ctx.filter.apply(items);
    report.kept = items.len();

    let mut batch = Vec::new();
    for item in items {
        if !ctx.dedup.try_claim(&item.identity_key) {
            continue;
        }
        match mode {
            CycleMode::CatchUp { limit, mark_rest_seen } if batch.len() >= limit => {
                if mark_rest_seen {
                    ctx.dedup.mark_delivered(&item.identity_key);
                    report.marked_seen += 1;
                } else {
                    ctx.dedup.release(&item.identity_key);
                }
            }
            _ => batch.push(item),
        }
    }
    report.queued = batch.len();

    if !batch.is_empty() {
        let keys: Vec<String> = batch.iter().map(|i| i.identity_key.clone()).collect();
        let sent = ctx.queue.send(Batch {
            source_id: entry.id().to_string(),
            route: ctx.route(entry),
            items: batch,
        });
        if sent.is_err() {
            for key in &keys {
                ctx.dedup.release(key);
            }
            let e = AppError::poll(entry.id(), "delivery queue closed");
            entry.record_failure(e.to_string());
            return Err(e);
        }
    }

    entry.record_success(report.records, report.queued);
    log::info!(
        "[{}] Poll ok: {} record(s), {} kept, {} new{}",
        entry.id(),
        report.records,
        report.kept,
        report.queued,
        if report.marked_seen > 0 {
            format!(", {} marked seen", report.marked_seen)
        } else {
            String::new()
        }
    );
    Ok(report)
}

/// Poll `entry` forever, one interval apart, starting immediately.
///
/// With `catch_up` set, cycles run in that mode until one succeeds; a
/// source that is down at startup therefore still gets a bounded first
/// delivery once it recovers.
pub async fn source_loop(entry: Arc<SourceEntry>, ctx: Arc<PollContext>, catch_up: Option<CycleMode>) {
    let interval = entry.config.interval();
    log::info!("[{}] Polling every {}s", entry.id(), interval.as_secs());
    let mut mode = catch_up.unwrap_or(CycleMode::Steady);

    loop {
        match run_cycle(&entry, &ctx, mode).await {
            Ok(_) => mode = CycleMode::Steady,
            Err(e) if mode == CycleMode::Steady => log::warn!("[{}] Poll failed: {}", entry.id(), e),
            Err(e) => log::warn!("[{}] Catch-up poll failed, retrying next cycle: {}", entry.id(), e),
        }
        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use super::*;
    use crate::models::{SourceConfig, SourceKind};
    use crate::services::Source;

    struct ListSource {
        records: Mutex<Vec<Vec<RawRecord>>>,
    }

    #[async_trait]
    impl Source for ListSource {
        fn id(&self) -> &str {
            "list"
        }

        async fn poll(&self) -> Result<Vec<RawRecord>> {
            let mut polls = self.records.lock().unwrap();
            if polls.is_empty() {
                return Ok(Vec::new());
            }
            Ok(polls.remove(0))
        }
    }

    /// Fails its first poll, then serves `records` on every poll.
    struct FlakySource {
        polls: Mutex<usize>,
        records: Vec<RawRecord>,
    }

    #[async_trait]
    impl Source for FlakySource {
        fn id(&self) -> &str {
            "flaky"
        }

        async fn poll(&self) -> Result<Vec<RawRecord>> {
            let mut polls = self.polls.lock().unwrap();
            *polls += 1;
            if *polls == 1 {
                return Err(AppError::poll("flaky", "connection reset"));
            }
            Ok(self.records.clone())
        }
    }

    struct HangingSource;

    #[async_trait]
    impl Source for HangingSource {
        fn id(&self) -> &str {
            "hang"
        }

        async fn poll(&self) -> Result<Vec<RawRecord>> {
            futures::future::pending().await
        }
    }

    struct PanickingSource;

    #[async_trait]
    impl Source for PanickingSource {
        fn id(&self) -> &str {
            "panic"
        }

        async fn poll(&self) -> Result<Vec<RawRecord>> {
            panic!("selector blew up")
        }
    }

    fn source_config(id: &str) -> SourceConfig {
        SourceConfig {
            id: id.to_string(),
            kind: SourceKind::Rss,
            url: "https://example.com/rss".to_string(),
            interval_secs: 60,
            tag: None,
            target: Some("@dest".to_string()),
            selectors: None,
        }
    }

    fn entry(id: &str, source: Arc<dyn Source>) -> SourceEntry {
        SourceEntry::new(source_config(id), source)
    }

    fn records(ids: &[&str]) -> Vec<RawRecord> {
        ids.iter()
            .map(|id| RawRecord::new(format!("Title {id}"), format!("magnet:?xt=urn:btih:{id}")))
            .collect()
    }

    fn context() -> (PollContext, mpsc::UnboundedReceiver<Batch>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let ctx = PollContext::new(&Config::default(), Arc::new(DedupStore::new()), tx);
        (ctx, rx)
    }

    #[tokio::test]
    async fn test_new_items_queued_once() {
        let source = Arc::new(ListSource {
            records: Mutex::new(vec![records(&["x"]), records(&["x", "y"])]),
        });
        let entry = entry("a", source);
        let (ctx, mut rx) = context();

        let first = run_cycle(&entry, &ctx, CycleMode::Steady).await.unwrap();
        assert_eq!(first.queued, 1);
        let batch = rx.try_recv().unwrap();
        assert_eq!(batch.route.target, "@dest");
        assert_eq!(batch.route.hashtag, "a");
        ctx.dedup.mark_delivered(&batch.items[0].identity_key);

        let second = run_cycle(&entry, &ctx, CycleMode::Steady).await.unwrap();
        assert_eq!(second.queued, 1);
        let batch = rx.try_recv().unwrap();
        assert_eq!(batch.items[0].title, "Title y");
    }

    #[tokio::test]
    async fn test_in_flight_items_not_requeued() {
        let source = Arc::new(ListSource {
            records: Mutex::new(vec![records(&["x"]), records(&["x"])]),
        });
        let entry = entry("a", source);
        let (ctx, _rx) = context();

        run_cycle(&entry, &ctx, CycleMode::Steady).await.unwrap();
        let report = run_cycle(&entry, &ctx, CycleMode::Steady).await.unwrap();
        assert_eq!(report.queued, 0);
    }

    #[tokio::test]
    async fn test_catch_up_limits_and_marks_rest() {
        let ids: Vec<String> = (0..8).map(|i| i.to_string()).collect();
        let ids: Vec<&str> = ids.iter().map(String::as_str).collect();
        let source = Arc::new(ListSource {
            records: Mutex::new(vec![records(&ids)]),
        });
        let entry = entry("a", source);
        let (ctx, mut rx) = context();

        let mode = CycleMode::CatchUp {
            limit: 5,
            mark_rest_seen: true,
        };
        let report = run_cycle(&entry, &ctx, mode).await.unwrap();
        assert_eq!((report.queued, report.marked_seen), (5, 3));

        let batch = rx.try_recv().unwrap();
        let titles: Vec<&str> = batch.items.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, vec!["Title 0", "Title 1", "Title 2", "Title 3", "Title 4"]);
        assert_eq!(ctx.dedup.len(), 3);
    }

    #[tokio::test]
    async fn test_catch_up_without_marking_leaves_rest_for_next_poll() {
        let source = Arc::new(ListSource {
            records: Mutex::new(vec![records(&["a", "b", "c"]), records(&["a", "b", "c"])]),
        });
        let entry = entry("s", source);
        let (ctx, mut rx) = context();

        let mode = CycleMode::CatchUp {
            limit: 1,
            mark_rest_seen: false,
        };
        run_cycle(&entry, &ctx, mode).await.unwrap();
        let first = rx.try_recv().unwrap();
        assert_eq!(first.items.len(), 1);

        let report = run_cycle(&entry, &ctx, CycleMode::Steady).await.unwrap();
        assert_eq!(report.queued, 2);
    }

    #[tokio::test]
    async fn test_max_items_truncates() {
        let ids: Vec<String> = (0..20).map(|i| i.to_string()).collect();
        let ids: Vec<&str> = ids.iter().map(String::as_str).collect();
        let source = Arc::new(ListSource {
            records: Mutex::new(vec![records(&ids)]),
        });
        let entry = entry("a", source);
        let (ctx, _rx) = context();

        let report = run_cycle(&entry, &ctx, CycleMode::Steady).await.unwrap();
        assert_eq!(report.records, 20);
        assert_eq!(report.queued, 15);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_source_failure() {
        let entry = entry("hang", Arc::new(HangingSource));
        let (ctx, _rx) = context();

        let err = run_cycle(&entry, &ctx, CycleMode::Steady).await.unwrap_err();
        assert!(matches!(err, AppError::Timeout { .. }));
        assert_eq!(entry.state().failures, 1);
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let entry = entry("panic", Arc::new(PanickingSource));
        let (ctx, _rx) = context();

        let err = run_cycle(&entry, &ctx, CycleMode::Steady).await.unwrap_err();
        assert!(err.to_string().contains("panicked"));
        assert_eq!(entry.state().failures, 1);
    }

    #[tokio::test]
    async fn test_closed_queue_releases_claims() {
        let source = Arc::new(ListSource {
            records: Mutex::new(vec![records(&["x"])]),
        });
        let entry = entry("a", source);
        let (ctx, rx) = context();
        drop(rx);

        assert!(run_cycle(&entry, &ctx, CycleMode::Steady).await.is_err());
        assert_eq!(ctx.dedup.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_keeps_catch_up_until_first_success() {
        let ids: Vec<String> = (0..8).map(|i| i.to_string()).collect();
        let ids: Vec<&str> = ids.iter().map(String::as_str).collect();
        let source = Arc::new(FlakySource {
            polls: Mutex::new(0),
            records: records(&ids),
        });
        let entry = Arc::new(entry("a", source));
        let (ctx, mut rx) = context();
        let ctx = Arc::new(ctx);

        let mode = CycleMode::CatchUp {
            limit: 2,
            mark_rest_seen: true,
        };
        let task = tokio::spawn(source_loop(Arc::clone(&entry), Arc::clone(&ctx), Some(mode)));

        // first poll fails at t=0, the second succeeds at t=60
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(entry.state().failures, 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        let batch = rx.try_recv().unwrap();
        assert_eq!(batch.items.len(), 2);
        assert_eq!(ctx.dedup.len(), 6);
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_first_poll_is_immediate() {
        let source = Arc::new(ListSource {
            records: Mutex::new(vec![records(&["x"])]),
        });
        let entry = Arc::new(entry("a", source));
        let (ctx, mut rx) = context();
        let mode = CycleMode::CatchUp {
            limit: 5,
            mark_rest_seen: true,
        };
        let task = tokio::spawn(source_loop(entry, Arc::new(ctx), Some(mode)));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(rx.try_recv().unwrap().items.len(), 1);
        task.abort();
    }
}
