//! Application configuration structures.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Environment variable overriding `sink.token`.
pub const ENV_BOT_TOKEN: &str = "TORRENT_RELAY_BOT_TOKEN";
/// Environment variable overriding `sink.chat_id`.
pub const ENV_CHAT_ID: &str = "TORRENT_RELAY_CHAT_ID";
/// Environment variable overriding `sink.owner_chat_id`.
pub const ENV_OWNER_ID: &str = "TORRENT_RELAY_OWNER_ID";

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP and polling behavior settings
    #[serde(default)]
    pub crawler: CrawlerConfig,

    /// Outbound pacing, splitting and retry settings
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Startup catch-up pass
    #[serde(default)]
    pub catch_up: CatchUpConfig,

    /// Skip rules applied before dedup
    #[serde(default)]
    pub filter: FilterConfig,

    /// Downstream chat settings
    #[serde(default)]
    pub sink: SinkConfig,

    /// Liveness endpoint
    #[serde(default)]
    pub health: HealthConfig,

    /// Optional persistence of delivered keys
    #[serde(default)]
    pub storage: StorageConfig,

    /// Polled feeds and pages
    #[serde(default = "defaults::sources")]
    pub sources: Vec<SourceConfig>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Overlay credentials from the environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(token) = lookup(ENV_BOT_TOKEN).filter(|v| !v.trim().is_empty()) {
            self.sink.token = token;
        }
        if let Some(chat) = lookup(ENV_CHAT_ID).filter(|v| !v.trim().is_empty()) {
            self.sink.chat_id = chat;
        }
        if let Some(owner) = lookup(ENV_OWNER_ID).filter(|v| !v.trim().is_empty()) {
            self.sink.owner_chat_id = Some(owner);
        }
    }

    /// Validate configuration values for basic sanity.
    ///
    /// Credentials are checked separately by [`Config::validate_credentials`]
    /// so the file can be validated before secrets are injected.
    pub fn validate(&self) -> Result<()> {
        if self.crawler.user_agent.trim().is_empty() {
            return Err(AppError::validation("crawler.user_agent is empty"));
        }
        if self.crawler.timeout_secs == 0 {
            return Err(AppError::validation("crawler.timeout_secs must be > 0"));
        }
        if self.crawler.file_timeout_secs == 0 {
            return Err(AppError::validation(
                "crawler.file_timeout_secs must be > 0",
            ));
        }
        if self.crawler.max_items == 0 {
            return Err(AppError::validation("crawler.max_items must be > 0"));
        }
        if self.delivery.max_message_len == 0 || self.delivery.max_caption_len == 0 {
            return Err(AppError::validation(
                "delivery message and caption limits must be > 0",
            ));
        }
        if self.catch_up.enabled && self.catch_up.limit == 0 {
            return Err(AppError::validation("catch_up.limit must be > 0"));
        }
        if let Some(max) = self.filter.max_size_gb {
            if max.is_nan() || max <= 0.0 {
                return Err(AppError::validation("filter.max_size_gb must be > 0"));
            }
        }
        if self.sources.is_empty() {
            return Err(AppError::validation("No sources defined"));
        }

        let mut ids = HashSet::new();
        for source in &self.sources {
            source.validate()?;
            if !ids.insert(source.id.as_str()) {
                return Err(AppError::validation(format!(
                    "Duplicate source id '{}'",
                    source.id
                )));
            }
        }
        Ok(())
    }

    /// Ensure the sink credentials are present.
    pub fn validate_credentials(&self) -> Result<()> {
        if self.sink.token.trim().is_empty() {
            return Err(AppError::config(format!(
                "sink.token is empty (set it in the config file or {ENV_BOT_TOKEN})"
            )));
        }
        if self.sink.chat_id.trim().is_empty() {
            return Err(AppError::config(format!(
                "sink.chat_id is empty (set it in the config file or {ENV_CHAT_ID})"
            )));
        }
        Ok(())
    }

    /// Look up a source by id.
    pub fn source(&self, id: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.id == id)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            crawler: CrawlerConfig::default(),
            delivery: DeliveryConfig::default(),
            catch_up: CatchUpConfig::default(),
            filter: FilterConfig::default(),
            sink: SinkConfig::default(),
            health: HealthConfig::default(),
            storage: StorageConfig::default(),
            sources: defaults::sources(),
        }
    }
}

/// HTTP client and polling behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerConfig {
    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Longer timeout for downloading file attachments
    #[serde(default = "defaults::file_timeout")]
    pub file_timeout_secs: u64,

    /// Records kept from the head of each poll
    #[serde(default = "defaults::max_items")]
    pub max_items: usize,
}

impl CrawlerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn file_timeout(&self) -> Duration {
        Duration::from_secs(self.file_timeout_secs)
    }
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
            file_timeout_secs: defaults::file_timeout(),
            max_items: defaults::max_items(),
        }
    }
}

/// Outbound delivery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Delay after every message sent to the sink, in milliseconds
    #[serde(default = "defaults::pacing")]
    pub pacing_ms: u64,

    /// Longest text message the sink accepts, in UTF-16 code units
    #[serde(default = "defaults::max_message_len")]
    pub max_message_len: usize,

    /// Longest file caption the sink accepts, in UTF-16 code units
    #[serde(default = "defaults::max_caption_len")]
    pub max_caption_len: usize,

    /// Rate-limit waits tolerated for a single message before giving up
    #[serde(default = "defaults::max_rate_limit_waits")]
    pub max_rate_limit_waits: u32,

    /// Upload direct file links as attachments instead of posting the link
    #[serde(default = "defaults::enabled")]
    pub attach_files: bool,

    /// Trailer appended after the hashtag line
    #[serde(default)]
    pub footer: Option<String>,
}

impl DeliveryConfig {
    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            pacing_ms: defaults::pacing(),
            max_message_len: defaults::max_message_len(),
            max_caption_len: defaults::max_caption_len(),
            max_rate_limit_waits: defaults::max_rate_limit_waits(),
            attach_files: true,
            footer: None,
        }
    }
}

/// Startup catch-up pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatchUpConfig {
    #[serde(default = "defaults::enabled")]
    pub enabled: bool,

    /// Items delivered per source during catch-up
    #[serde(default = "defaults::catch_up_limit")]
    pub limit: usize,

    /// Record the rest of the first poll as seen without posting it
    #[serde(default = "defaults::enabled")]
    pub mark_rest_seen: bool,
}

impl Default for CatchUpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            limit: defaults::catch_up_limit(),
            mark_rest_seen: true,
        }
    }
}

/// Item skip rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Case-sensitive title substrings that cause an item to be skipped
    #[serde(default = "defaults::skip_keywords")]
    pub skip_keywords: Vec<String>,

    /// Items larger than this are skipped; `None` disables the rule
    #[serde(default = "defaults::max_size_gb")]
    pub max_size_gb: Option<f64>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            skip_keywords: defaults::skip_keywords(),
            max_size_gb: defaults::max_size_gb(),
        }
    }
}

/// Telegram Bot API sink settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    #[serde(default = "defaults::api_base")]
    pub api_base: String,

    #[serde(default)]
    pub token: String,

    /// Default destination chat or channel
    #[serde(default)]
    pub chat_id: String,

    /// Receives the startup announcement
    #[serde(default)]
    pub owner_chat_id: Option<String>,

    #[serde(default)]
    pub link_preview: bool,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            api_base: defaults::api_base(),
            token: String::new(),
            chat_id: String::new(),
            owner_chat_id: None,
            link_preview: false,
        }
    }
}

/// Liveness endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "defaults::enabled")]
    pub enabled: bool,

    #[serde(default = "defaults::health_bind")]
    pub bind: String,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: defaults::health_bind(),
        }
    }
}

/// Delivered-key persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// JSON file holding delivered keys; in-memory only when unset
    #[serde(default)]
    pub seen_file: Option<PathBuf>,

    #[serde(default = "defaults::save_interval")]
    pub save_interval_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            seen_file: None,
            save_interval_secs: defaults::save_interval(),
        }
    }
}

/// How a source's upstream document is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Nyaa RSS with `nyaa:` extension elements
    Nyaa,
    /// YTS RSS with torrent enclosures
    Yts,
    /// Any RSS 2.0 feed
    Rss,
    /// HTML listing scraped with CSS selectors
    Html,
}

/// CSS selectors for an HTML listing page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageSelectors {
    /// One match per release row
    pub row: String,

    /// Release title, relative to the row
    pub title: String,

    /// Detail page anchor; defaults to the title element
    #[serde(default)]
    pub page_link: Option<String>,

    /// Magnet or .torrent anchor
    #[serde(default)]
    pub download: Option<String>,

    /// Size cell
    #[serde(default)]
    pub size: Option<String>,

    /// Attribute holding link targets
    #[serde(default = "defaults::link_attr")]
    pub link_attr: String,
}

/// One configured upstream feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Stable identifier
    pub id: String,

    pub kind: SourceKind,

    pub url: String,

    /// Seconds between polls
    #[serde(default = "defaults::interval")]
    pub interval_secs: u64,

    /// Hashtag used when annotating messages; defaults to `id`
    #[serde(default)]
    pub tag: Option<String>,

    /// Destination override; defaults to `sink.chat_id`
    #[serde(default)]
    pub target: Option<String>,

    /// Required when `kind = "html"`
    #[serde(default)]
    pub selectors: Option<PageSelectors>,
}

impl SourceConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn tag(&self) -> &str {
        self.tag.as_deref().unwrap_or(&self.id)
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(AppError::validation("source id is empty"));
        }
        if self.interval_secs == 0 {
            return Err(AppError::validation(format!(
                "source '{}': interval_secs must be > 0",
                self.id
            )));
        }
        url::Url::parse(&self.url).map_err(|e| {
            AppError::validation(format!("source '{}': invalid url: {e}", self.id))
        })?;
        if self.kind == SourceKind::Html && self.selectors.is_none() {
            return Err(AppError::validation(format!(
                "source '{}': html sources need [sources.selectors]",
                self.id
            )));
        }
        Ok(())
    }
}

mod defaults {
    use super::{SourceConfig, SourceKind};

    pub fn user_agent() -> String {
        concat!("torrent-relay/", env!("CARGO_PKG_VERSION")).to_string()
    }
    pub fn timeout() -> u64 {
        10
    }
    pub fn file_timeout() -> u64 {
        15
    }
    pub fn max_items() -> usize {
        15
    }
    pub fn pacing() -> u64 {
        3000
    }
    pub fn max_message_len() -> usize {
        4096
    }
    pub fn max_caption_len() -> usize {
        1024
    }
    pub fn max_rate_limit_waits() -> u32 {
        10
    }
    pub fn enabled() -> bool {
        true
    }
    pub fn catch_up_limit() -> usize {
        5
    }
    pub fn skip_keywords() -> Vec<String> {
        vec!["2160p".to_string(), "4K".to_string()]
    }
    pub fn max_size_gb() -> Option<f64> {
        Some(3.5)
    }
    pub fn api_base() -> String {
        "https://api.telegram.org".to_string()
    }
    pub fn health_bind() -> String {
        "0.0.0.0:8000".to_string()
    }
    pub fn save_interval() -> u64 {
        300
    }
    pub fn link_attr() -> String {
        "href".to_string()
    }
    pub fn interval() -> u64 {
        600
    }

    pub fn sources() -> Vec<SourceConfig> {
        vec![
            SourceConfig {
                id: "nyaasi".to_string(),
                kind: SourceKind::Nyaa,
                url: "https://nyaa.si/?page=rss".to_string(),
                interval_secs: 600,
                tag: None,
                target: None,
                selectors: None,
            },
            SourceConfig {
                id: "yts".to_string(),
                kind: SourceKind::Yts,
                url: "https://yts.mx/rss/0/all/all/0".to_string(),
                interval_secs: 1800,
                tag: None,
                target: None,
                selectors: None,
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sources.len(), 2);
        assert_eq!(config.delivery.pacing(), Duration::from_secs(3));
    }

    #[test]
    fn test_parse_partial_toml() {
        let toml_str = r#"
            [delivery]
            pacing_ms = 500

            [[sources]]
            id = "tracker"
            kind = "html"
            url = "https://tracker.example/latest"
            interval_secs = 120

            [sources.selectors]
            row = "table.torrents tr"
            title = "td.name a"
            download = "a[href^='magnet:']"
            size = "td.size"
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();

        assert_eq!(config.delivery.pacing_ms, 500);
        assert_eq!(config.delivery.max_message_len, 4096);
        assert_eq!(config.crawler.timeout_secs, 10);
        assert_eq!(config.sources.len(), 1);

        let source = &config.sources[0];
        assert_eq!(source.kind, SourceKind::Html);
        assert_eq!(source.tag(), "tracker");
        assert_eq!(source.selectors.as_ref().unwrap().link_attr, "href");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_sources_uses_defaults() {
        let config: Config = toml::from_str("[crawler]\nmax_items = 3\n").unwrap();
        assert_eq!(config.crawler.max_items, 3);
        assert_eq!(config.sources[0].id, "nyaasi");
    }

    #[test]
    fn test_html_without_selectors_is_invalid() {
        let mut config = Config::default();
        config.sources[0].kind = SourceKind::Html;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let mut config = Config::default();
        config.sources[1].id = "nyaasi".to_string();
        assert!(matches!(config.validate(), Err(AppError::Validation(_))));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut config = Config::default();
        config.sources[0].interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_credentials_required() {
        let mut config = Config::default();
        assert!(config.validate_credentials().is_err());

        config.apply_overrides(|key| match key {
            ENV_BOT_TOKEN => Some("123:abc".to_string()),
            ENV_CHAT_ID => Some("-100200".to_string()),
            _ => None,
        });
        assert!(config.validate_credentials().is_ok());
        assert_eq!(config.sink.chat_id, "-100200");
        assert!(config.sink.owner_chat_id.is_none());
    }

    #[test]
    fn test_blank_override_ignored() {
        let mut config = Config::default();
        config.sink.token = "keep".to_string();
        config.apply_overrides(|_| Some("  ".to_string()));
        assert_eq!(config.sink.token, "keep");
    }
}
