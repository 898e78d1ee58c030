//! Scripted collaborators for relay tests.
//!
//! Every collaborator records what it saw against the tokio clock so tests
//! can run under `start_paused` and reason about simulated time.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use torrent_relay::error::{AppError, Result};
use torrent_relay::models::{Attachment, Config, RawRecord, SourceConfig, SourceKind};
use torrent_relay::pipeline::{DedupStore, Orchestrator, SourceEntry, SourceRegistry};
use torrent_relay::services::{FileFetcher, SendOutcome, Sink, Source};

pub const TARGET: &str = "@relay_test";

/// A record with a magnet download link derived from `id`.
pub fn record(id: &str, title: &str, size: &str) -> RawRecord {
    RawRecord::new(title, format!("magnet:?xt=urn:btih:{id}")).with_size(size)
}

/// Source returning one scripted list per poll; the last list repeats.
pub struct ScriptedSource {
    id: String,
    polls: Mutex<Vec<Vec<RawRecord>>>,
    count: AtomicUsize,
}

impl ScriptedSource {
    pub fn new(id: &str, polls: Vec<Vec<RawRecord>>) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            polls: Mutex::new(polls),
            count: AtomicUsize::new(0),
        })
    }

    pub fn polls(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Source for ScriptedSource {
    fn id(&self) -> &str {
        &self.id
    }

    async fn poll(&self) -> Result<Vec<RawRecord>> {
        self.count.fetch_add(1, Ordering::SeqCst);
        let mut polls = self.polls.lock().unwrap();
        if polls.len() > 1 {
            Ok(polls.remove(0))
        } else {
            Ok(polls.first().cloned().unwrap_or_default())
        }
    }
}

/// Source yielding one fresh record per poll.
pub struct CountingSource {
    id: String,
    count: AtomicUsize,
}

impl CountingSource {
    pub fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            count: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Source for CountingSource {
    fn id(&self) -> &str {
        &self.id
    }

    async fn poll(&self) -> Result<Vec<RawRecord>> {
        let n = self.count.fetch_add(1, Ordering::SeqCst);
        Ok(vec![record(
            &format!("{}-{n}", self.id),
            &format!("{} release {n}", self.id),
            "700 MiB",
        )])
    }
}

/// Source whose poll always fails, either immediately or by hanging.
pub struct BrokenSource {
    id: String,
    hang: bool,
}

impl BrokenSource {
    pub fn failing(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            hang: false,
        })
    }

    pub fn hanging(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            hang: true,
        })
    }
}

#[async_trait]
impl Source for BrokenSource {
    fn id(&self) -> &str {
        &self.id
    }

    async fn poll(&self) -> Result<Vec<RawRecord>> {
        if self.hang {
            futures::future::pending::<()>().await;
        }
        Err(AppError::poll(&self.id, "connection refused"))
    }
}

/// Source whose first poll fails; later polls return `records`.
pub struct FlakySource {
    id: String,
    records: Vec<RawRecord>,
    count: AtomicUsize,
}

impl FlakySource {
    pub fn new(id: &str, records: Vec<RawRecord>) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            records,
            count: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Source for FlakySource {
    fn id(&self) -> &str {
        &self.id
    }

    async fn poll(&self) -> Result<Vec<RawRecord>> {
        if self.count.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(AppError::poll(&self.id, "connection reset"));
        }
        Ok(self.records.clone())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    Text(String),
    File { filename: String, caption: String },
}

impl Sent {
    /// The title line of the rendered message.
    pub fn title(&self) -> Option<String> {
        let body = match self {
            Sent::Text(text) => text,
            Sent::File { caption, .. } => caption,
        };
        body.lines()
            .find_map(|line| line.strip_prefix("🎬 "))
            .map(str::to_string)
    }
}

/// Sink that records every attempt and replays scripted outcomes first.
#[derive(Default)]
pub struct RecordingSink {
    script: Mutex<Vec<SendOutcome>>,
    attempts: Mutex<Vec<(Instant, String, Sent, SendOutcome)>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn scripted(outcomes: Vec<SendOutcome>) -> Arc<Self> {
        let sink = Self::default();
        *sink.script.lock().unwrap() = outcomes;
        Arc::new(sink)
    }

    fn answer(&self, target: &str, sent: Sent) -> SendOutcome {
        let outcome = {
            let mut script = self.script.lock().unwrap();
            if script.is_empty() {
                SendOutcome::Sent
            } else {
                script.remove(0)
            }
        };
        self.attempts.lock().unwrap().push((
            Instant::now(),
            target.to_string(),
            sent,
            outcome.clone(),
        ));
        outcome
    }

    pub fn attempts(&self) -> Vec<(Instant, String, Sent, SendOutcome)> {
        self.attempts.lock().unwrap().clone()
    }

    /// Titles of accepted messages, in order.
    pub fn delivered_titles(&self) -> Vec<String> {
        self.attempts()
            .into_iter()
            .filter(|(_, _, _, outcome)| *outcome == SendOutcome::Sent)
            .filter_map(|(_, _, sent, _)| sent.title())
            .collect()
    }

    pub fn count_title(&self, title: &str) -> usize {
        self.delivered_titles().iter().filter(|t| *t == title).count()
    }
}

#[async_trait]
impl Sink for RecordingSink {
    async fn send_text(&self, target: &str, text: &str) -> SendOutcome {
        self.answer(target, Sent::Text(text.to_string()))
    }

    async fn send_file(&self, target: &str, file: &Attachment, caption: &str) -> SendOutcome {
        self.answer(
            target,
            Sent::File {
                filename: file.filename.clone(),
                caption: caption.to_string(),
            },
        )
    }
}

/// File fetcher that either serves a fixed blob or fails.
pub struct StubFetcher {
    pub ok: bool,
}

#[async_trait]
impl FileFetcher for StubFetcher {
    async fn fetch(&self, url: &str) -> Result<Attachment> {
        if self.ok {
            Ok(Attachment {
                filename: "release.torrent".to_string(),
                bytes: b"d8:announce0:e".to_vec(),
            })
        } else {
            Err(AppError::timeout(format!("fetching {url}"), 15))
        }
    }
}

pub fn source_config(id: &str, interval_secs: u64) -> SourceConfig {
    SourceConfig {
        id: id.to_string(),
        kind: SourceKind::Rss,
        url: format!("https://{id}.example/rss"),
        interval_secs,
        tag: None,
        target: None,
        selectors: None,
    }
}

/// Default configuration with catch-up off and the test chat as target.
pub fn config() -> Config {
    let mut config = Config::default();
    config.catch_up.enabled = false;
    config.sink.chat_id = TARGET.to_string();
    config.sink.token = "test-token".to_string();
    config.storage.seen_file = None;
    config.sources.clear();
    config
}

pub fn orchestrator(
    config: &Config,
    sources: Vec<(u64, Arc<dyn Source>)>,
    sink: Arc<dyn Sink>,
    fetcher: Arc<dyn FileFetcher>,
    dedup: Arc<DedupStore>,
) -> Orchestrator {
    let entries = sources
        .into_iter()
        .map(|(interval, source)| SourceEntry::new(source_config(source.id(), interval), source))
        .collect();
    Orchestrator::new(config, SourceRegistry::new(entries), sink, fetcher, dedup)
}

/// Run the orchestrator for `secs` of simulated time.
pub async fn run_for(orchestrator: Orchestrator, secs: u64) {
    orchestrator
        .run(tokio::time::sleep(Duration::from_secs(secs)))
        .await
        .unwrap();
}
