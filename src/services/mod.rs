//! Collaborators at the edges of the relay.
//!
//! This module contains:
//! - Source adapters (`RssFeedSource`, `HtmlPageSource`) behind [`Source`]
//! - The Telegram Bot API sink (`TelegramSink`) behind [`Sink`]
//! - Attachment downloads (`HttpFileFetcher`) behind [`FileFetcher`]
//!
//! The polling and delivery loops only see the traits, so adapters can be
//! swapped without touching them.

mod feeds;
mod files;
mod pages;
mod telegram;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Attachment, RawRecord, SourceConfig, SourceKind};

pub use feeds::{FeedFlavor, RssFeedSource};
pub use files::HttpFileFetcher;
pub use pages::HtmlPageSource;
pub use telegram::TelegramSink;

/// An upstream feed or page.
#[async_trait]
pub trait Source: Send + Sync {
    /// Stable identifier of this source.
    fn id(&self) -> &str;

    /// Fetch the current list of records.
    ///
    /// "Nothing new" is an empty list, never an error.
    async fn poll(&self) -> Result<Vec<RawRecord>>;
}

/// Result of one send attempt. Rate limits are flow control, not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    /// The sink asked us to wait this long before sending again
    RateLimited(Duration),
    /// The sink rejected the request or was unreachable
    Failed(String),
}

/// The downstream chat.
#[async_trait]
pub trait Sink: Send + Sync {
    async fn send_text(&self, target: &str, text: &str) -> SendOutcome;

    async fn send_file(&self, target: &str, file: &Attachment, caption: &str) -> SendOutcome;
}

/// Downloads files that are delivered as attachments.
#[async_trait]
pub trait FileFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Attachment>;
}

/// Build the adapter described by a source configuration.
pub fn build_source(config: &SourceConfig, client: &reqwest::Client) -> Result<Arc<dyn Source>> {
    let source: Arc<dyn Source> = match config.kind {
        SourceKind::Nyaa => Arc::new(RssFeedSource::new(config, FeedFlavor::Nyaa, client.clone())),
        SourceKind::Yts => Arc::new(RssFeedSource::new(config, FeedFlavor::Yts, client.clone())),
        SourceKind::Rss => {
            Arc::new(RssFeedSource::new(config, FeedFlavor::Generic, client.clone()))
        }
        SourceKind::Html => Arc::new(HtmlPageSource::new(config, client.clone())?),
    };
    Ok(source)
}
