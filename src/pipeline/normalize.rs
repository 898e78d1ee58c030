//! Item normalization.
//!
//! Turns a [`RawRecord`] into an [`Item`] with a stable identity key and a
//! standardized size label. Pure over its inputs.

use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};
use url::Url;

use crate::models::{Item, Payload, RawRecord, UNKNOWN_SIZE};

static SIZE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*(TiB|GiB|MiB|KiB|TB|GB|MB|KB)\b").expect("size pattern")
});

/// Normalize one raw record produced by `source_id`.
pub fn normalize(raw: RawRecord, source_id: &str) -> Item {
    let title = clean_title(&raw.title);
    let identity_key = identity_key(&raw, &title, source_id);
    let size_gb = raw.size_text.as_deref().and_then(parse_size_gb);
    let size_label = size_label(size_gb);

    let payload = match (raw.blob, raw.download_link.as_deref(), raw.page_link.as_deref()) {
        (Some(attachment), link, page) => Payload::Blob {
            attachment,
            link: link.or(page).map(str::to_string),
        },
        (None, Some(link), _) => Payload::from_link(link, true),
        (None, None, Some(page)) => Payload::Link(page.to_string()),
        (None, None, None) => Payload::Link(String::new()),
    };

    Item {
        identity_key,
        title,
        size_label,
        size_gb,
        payload,
        page_link: raw.page_link,
        sub_links: raw.sub_links,
        source_tag: source_id.to_string(),
    }
}

/// Derive the dedup key, most specific field first.
fn identity_key(raw: &RawRecord, title: &str, source_id: &str) -> String {
    if let Some(hash) = raw.info_hash.as_deref().map(str::trim).filter(|h| !h.is_empty()) {
        return format!("btih:{}", hash.to_lowercase());
    }

    if let Some(link) = raw.download_link.as_deref().map(str::trim).filter(|l| !l.is_empty()) {
        if let Some(hash) = magnet_info_hash(link) {
            return format!("btih:{hash}");
        }
        return canonical_link(link);
    }

    if let Some(blob) = &raw.blob {
        return format!("sha256:{}", hex::encode(Sha256::digest(&blob.bytes)));
    }

    if let Some(page) = raw.page_link.as_deref().map(str::trim).filter(|l| !l.is_empty()) {
        return canonical_link(page);
    }

    log::warn!(
        "[{}] No stable link for '{}'; falling back to a title hash",
        source_id,
        title
    );
    let digest = Sha256::digest(format!("{source_id}\n{title}").as_bytes());
    format!("title:{}", hex::encode(digest))
}

/// Extract the `urn:btih:` hash from a magnet URI.
fn magnet_info_hash(link: &str) -> Option<String> {
    if !link.starts_with("magnet:") {
        return None;
    }
    let parsed = Url::parse(link).ok()?;
    parsed
        .query_pairs()
        .filter(|(key, _)| key == "xt")
        .find_map(|(_, value)| {
            let value = value.to_lowercase();
            value
                .strip_prefix("urn:btih:")
                .filter(|hash| !hash.is_empty())
                .map(str::to_string)
        })
}

/// Canonical form of an http(s) link; other strings are returned trimmed.
fn canonical_link(link: &str) -> String {
    match Url::parse(link) {
        Ok(mut parsed) if matches!(parsed.scheme(), "http" | "https") => {
            parsed.set_fragment(None);
            parsed.to_string()
        }
        _ => link.to_string(),
    }
}

fn clean_title(raw: &str) -> String {
    let title = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if title.is_empty() {
        "(untitled)".to_string()
    } else {
        title
    }
}

/// Parse the first `<number> <unit>` pair in `text` into gigabytes.
///
/// Units use a 1024 factor regardless of the `i` infix.
pub fn parse_size_gb(text: &str) -> Option<f64> {
    let caps = SIZE_RE.captures(text)?;
    let value: f64 = caps.get(1)?.as_str().parse().ok()?;
    let unit = caps.get(2)?.as_str().to_ascii_uppercase();

    let gb = match unit.chars().next()? {
        'T' => value * 1024.0,
        'G' => value,
        'M' => value / 1024.0,
        'K' => value / (1024.0 * 1024.0),
        _ => return None,
    };
    gb.is_finite().then_some(gb)
}

/// Render a parsed size; `None` renders as [`UNKNOWN_SIZE`].
pub fn size_label(size_gb: Option<f64>) -> String {
    match size_gb {
        Some(gb) => format!("{gb:.2} GB"),
        None => UNKNOWN_SIZE.to_string(),
    }
}
