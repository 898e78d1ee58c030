// src/services/feeds.rs

//! RSS feed adapters.
//!
//! One adapter covers every RSS source; the [`FeedFlavor`] decides which
//! elements carry the download link, size and info hash.

use async_trait::async_trait;
use reqwest::Client;
use rss::{Channel, Item as RssItem};

use crate::error::{AppError, Result};
use crate::models::{RawRecord, SourceConfig};
use crate::services::Source;

/// Feed dialects with known element layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedFlavor {
    /// `<link>` is the .torrent, `<guid>` the view page, `nyaa:*` extensions
    Nyaa,
    /// `<enclosure>` is the .torrent, size lives in the HTML description
    Yts,
    /// Enclosure if present, otherwise `<link>`
    Generic,
}

/// Source backed by an RSS 2.0 document.
pub struct RssFeedSource {
    id: String,
    url: String,
    flavor: FeedFlavor,
    client: Client,
}

impl RssFeedSource {
    pub fn new(config: &SourceConfig, flavor: FeedFlavor, client: Client) -> Self {
        Self {
            id: config.id.clone(),
            url: config.url.clone(),
            flavor,
            client,
        }
    }

    /// Extract records from an already-parsed channel, in document order.
    pub fn parse_channel(channel: &Channel, flavor: FeedFlavor) -> Vec<RawRecord> {
        channel
            .items()
            .iter()
            .map(|item| match flavor {
                FeedFlavor::Nyaa => Self::nyaa_record(item),
                FeedFlavor::Yts => Self::yts_record(item),
                FeedFlavor::Generic => Self::generic_record(item),
            })
            .collect()
    }

    fn nyaa_record(item: &RssItem) -> RawRecord {
        RawRecord {
            title: title_of(item),
            page_link: item.guid().map(|g| g.value().to_string()),
            download_link: item.link().map(str::to_string),
            info_hash: extension_value(item, "nyaa", "infoHash"),
            size_text: extension_value(item, "nyaa", "size"),
            ..RawRecord::default()
        }
    }

    fn yts_record(item: &RssItem) -> RawRecord {
        RawRecord {
            title: title_of(item),
            page_link: item.link().map(str::to_string),
            download_link: item.enclosure().map(|e| e.url().to_string()),
            size_text: item.description().map(size_section),
            ..RawRecord::default()
        }
    }

    fn generic_record(item: &RssItem) -> RawRecord {
        let enclosure = item.enclosure().map(|e| e.url().to_string());
        let link = item.link().map(str::to_string);
        RawRecord {
            title: title_of(item),
            page_link: if enclosure.is_some() {
                link.clone()
            } else {
                item.guid()
                    .filter(|g| g.is_permalink())
                    .map(|g| g.value().to_string())
            },
            download_link: enclosure.or(link),
            size_text: item.description().map(size_section),
            ..RawRecord::default()
        }
    }
}

#[async_trait]
impl Source for RssFeedSource {
    fn id(&self) -> &str {
        &self.id
    }

    async fn poll(&self) -> Result<Vec<RawRecord>> {
        let response = self.client.get(&self.url).send().await?.error_for_status()?;
        let body = response.bytes().await?;
        let channel = Channel::read_from(&body[..])
            .map_err(|e| AppError::poll(&self.id, format!("invalid feed: {e}")))?;

        let records = Self::parse_channel(&channel, self.flavor);
        log::debug!("[{}] Parsed {} feed entries", self.id, records.len());
        Ok(records)
    }
}

fn title_of(item: &RssItem) -> String {
    item.title().unwrap_or_default().to_string()
}

fn extension_value(item: &RssItem, prefix: &str, name: &str) -> Option<String> {
    item.extensions()
        .get(prefix)?
        .get(name)?
        .first()?
        .value()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Text following a `Size:` label, or the whole description.
fn size_section(description: &str) -> String {
    match description.find("Size:") {
        Some(idx) => description[idx..].to_string(),
        None => description.to_string(),
    }
}
