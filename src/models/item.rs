//! Raw source records and normalized items.

use serde::{Deserialize, Serialize};

/// Size label used whenever the upstream size text cannot be parsed.
pub const UNKNOWN_SIZE: &str = "Unknown";

/// File-archive extensions that are uploaded as attachments.
const ATTACHMENT_EXTENSIONS: [&str; 4] = [".torrent", ".zip", ".rar", ".7z"];

/// In-memory file delivered as a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// One record as a source adapter extracted it, before normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRecord {
    pub title: String,

    /// Detail page of the release
    pub page_link: Option<String>,

    /// Direct `.torrent` URL or magnet URI
    pub download_link: Option<String>,

    /// BitTorrent info hash when the source publishes it
    pub info_hash: Option<String>,

    /// Free-form size text (may contain surrounding markup)
    pub size_text: Option<String>,

    /// Additional links (alternate qualities, mirrors)
    pub sub_links: Vec<String>,

    /// File already fetched by the adapter
    pub blob: Option<Attachment>,
}

impl RawRecord {
    /// Record with just a title and a download link.
    pub fn new(title: impl Into<String>, download_link: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            download_link: Some(download_link.into()),
            ..Self::default()
        }
    }

    pub fn with_size(mut self, size_text: impl Into<String>) -> Self {
        self.size_text = Some(size_text.into());
        self
    }

    pub fn with_page_link(mut self, page_link: impl Into<String>) -> Self {
        self.page_link = Some(page_link.into());
        self
    }
}

/// What the sink receives for an item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// URL or magnet URI posted as text
    Link(String),
    /// Direct file URL downloaded and uploaded as a document
    File { url: String },
    /// File already in memory; `link` is the text fallback
    Blob {
        attachment: Attachment,
        link: Option<String>,
    },
}

impl Payload {
    /// Classify a link: archive URLs become files when attachments are on.
    pub fn from_link(link: &str, attach_files: bool) -> Self {
        if attach_files && is_attachment_url(link) {
            Payload::File {
                url: link.to_string(),
            }
        } else {
            Payload::Link(link.to_string())
        }
    }

    /// The link used in text messages, if any.
    pub fn link(&self) -> Option<&str> {
        match self {
            Payload::Link(link) => Some(link),
            Payload::File { url } => Some(url),
            Payload::Blob { link, .. } => link.as_deref(),
        }
    }
}

/// Whether the URL path ends in a file-archive extension.
pub fn is_attachment_url(link: &str) -> bool {
    let path = match url::Url::parse(link) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => parsed.path().to_lowercase(),
        _ => return false,
    };
    ATTACHMENT_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

/// Normalized candidate ready for dedup and delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    /// Stable dedup key derived from links or hashes, never from display text
    /// unless nothing else is available
    pub identity_key: String,
    pub title: String,
    /// Either `"{n:.2} GB"` or [`UNKNOWN_SIZE`]
    pub size_label: String,
    /// Parsed size in gigabytes, used by the size filter
    pub size_gb: Option<f64>,
    pub payload: Payload,
    pub page_link: Option<String>,
    pub sub_links: Vec<String>,
    /// Id of the producing source
    pub source_tag: String,
}

/// Last observed outcome of a source poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PollStatus {
    Never,
    Succeeded {
        at: chrono::DateTime<chrono::Utc>,
        records: usize,
        new_items: usize,
    },
    Failed {
        at: chrono::DateTime<chrono::Utc>,
        error: String,
    },
}
