// src/services/pages.rs

//! HTML listing adapter.
//!
//! Scrapes a torrent index page using configured CSS selectors, one record
//! per matched row.

use async_trait::async_trait;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::error::{AppError, Result};
use crate::models::{PageSelectors, RawRecord, SourceConfig};
use crate::services::Source;
use crate::utils::resolve_url;

/// Selectors compiled once at startup.
struct CompiledSelectors {
    row: Selector,
    title: Selector,
    page_link: Option<Selector>,
    download: Option<Selector>,
    size: Option<Selector>,
    link_attr: String,
}

impl CompiledSelectors {
    fn compile(selectors: &PageSelectors) -> Result<Self> {
        let optional = |s: &Option<String>| s.as_deref().map(parse_selector).transpose();
        Ok(Self {
            row: parse_selector(&selectors.row)?,
            title: parse_selector(&selectors.title)?,
            page_link: optional(&selectors.page_link)?,
            download: optional(&selectors.download)?,
            size: optional(&selectors.size)?,
            link_attr: selectors.link_attr.clone(),
        })
    }
}

/// Source backed by an HTML listing page.
pub struct HtmlPageSource {
    id: String,
    url: String,
    selectors: CompiledSelectors,
    client: Client,
}

impl HtmlPageSource {
    pub fn new(config: &SourceConfig, client: Client) -> Result<Self> {
        let selectors = config.selectors.as_ref().ok_or_else(|| {
            AppError::config(format!("source '{}' has no selectors", config.id))
        })?;

        Ok(Self {
            id: config.id.clone(),
            url: config.url.clone(),
            selectors: CompiledSelectors::compile(selectors)?,
            client,
        })
    }

    /// Extract records from page HTML, resolving links against `base_url`.
    fn parse_page(&self, html: &str, base_url: &Url) -> Vec<RawRecord> {
        let document = Html::parse_document(html);
        document
            .select(&self.selectors.row)
            .filter_map(|row| self.parse_row(&row, base_url))
            .collect()
    }

    fn parse_row(&self, row: &ElementRef, base_url: &Url) -> Option<RawRecord> {
        let sel = &self.selectors;
        let title_elem = row.select(&sel.title).next()?;
        let title = element_text(&title_elem);
        if title.is_empty() {
            return None;
        }

        let page_elem = sel
            .page_link
            .as_ref()
            .and_then(|s| row.select(s).next())
            .unwrap_or(title_elem);
        let page_link = page_elem
            .value()
            .attr(&sel.link_attr)
            .map(|href| resolve_url(base_url, href));

        let mut downloads: Vec<String> = sel
            .download
            .as_ref()
            .map(|s| {
                row.select(s)
                    .filter_map(|e| e.value().attr(&sel.link_attr))
                    .map(|href| resolve_url(base_url, href))
                    .collect()
            })
            .unwrap_or_default();
        let download_link = (!downloads.is_empty()).then(|| downloads.remove(0));

        let size_text = sel
            .size
            .as_ref()
            .and_then(|s| row.select(s).next())
            .map(|e| element_text(&e));

        Some(RawRecord {
            title,
            page_link,
            download_link,
            size_text,
            sub_links: downloads,
            ..RawRecord::default()
        })
    }
}

#[async_trait]
impl Source for HtmlPageSource {
    fn id(&self) -> &str {
        &self.id
    }

    async fn poll(&self) -> Result<Vec<RawRecord>> {
        let base_url = Url::parse(&self.url)?;
        let html = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let records = self.parse_page(&html, &base_url);
        log::debug!("[{}] Parsed {} page rows", self.id, records.len());
        Ok(records)
    }
}

fn element_text(element: &ElementRef) -> String {
    element
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn parse_selector(s: &str) -> Result<Selector> {
    Selector::parse(s).map_err(|e| AppError::selector(s, format!("{e:?}")))
}
