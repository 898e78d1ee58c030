// src/utils/http.rs

//! HTTP client utilities.

use crate::error::Result;
use crate::models::CrawlerConfig;

/// Create the shared asynchronous HTTP client.
///
/// The client-wide timeout is the longer of the two configured deadlines;
/// poll and file requests apply their own tighter limits on top.
pub fn create_async_client(config: &CrawlerConfig) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(&config.user_agent)
        .timeout(config.timeout().max(config.file_timeout()))
        .build()?;
    Ok(client)
}
