// src/services/files.rs

//! Attachment downloads.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use url::Url;

use crate::error::Result;
use crate::models::Attachment;
use crate::services::FileFetcher;
use crate::utils::host_of;

const FALLBACK_FILENAME: &str = "download.torrent";

/// Downloads attachment files over HTTP with their own deadline.
pub struct HttpFileFetcher {
    client: Client,
    timeout: Duration,
}

impl HttpFileFetcher {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl FileFetcher for HttpFileFetcher {
    async fn fetch(&self, url: &str) -> Result<Attachment> {
        log::debug!(
            "Fetching attachment from {}",
            host_of(url).unwrap_or_else(|| "?".to_string())
        );
        let bytes = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        Ok(Attachment {
            filename: filename_from_url(url),
            bytes: bytes.to_vec(),
        })
    }
}

/// Last non-empty path segment of the URL.
pub fn filename_from_url(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
                .map(str::to_string)
        })
        .unwrap_or_else(|| FALLBACK_FILENAME.to_string())
}
