//! Message rendering and splitting.

use crate::models::Item;

/// Render the text message for an item.
///
/// Layout: link, blank line, title, size, sub-links, blank line, hashtag.
pub fn render_text(item: &Item, hashtag: &str, footer: Option<&str>) -> String {
    let mut out = String::new();
    if let Some(link) = item.payload.link().filter(|l| !l.is_empty()) {
        out.push_str(link);
        out.push_str("\n\n");
    }
    out.push_str(&render_body(item, hashtag, footer));
    out
}

/// Render a caption (no leading link) capped at `max_units` UTF-16 units.
pub fn render_caption(item: &Item, hashtag: &str, footer: Option<&str>, max_units: usize) -> String {
    truncate_units(&render_body(item, hashtag, footer), max_units)
}

fn render_body(item: &Item, hashtag: &str, footer: Option<&str>) -> String {
    let mut lines = vec![
        format!("🎬 {}", item.title),
        format!("📦 {}", item.size_label),
    ];
    lines.extend(item.sub_links.iter().map(|link| format!("🔗 {link}")));
    lines.push(String::new());

    let mut tag_line = format!("#{}", hashtag_of(hashtag));
    if let Some(footer) = footer.filter(|f| !f.is_empty()) {
        tag_line.push(' ');
        tag_line.push_str(footer);
    }
    lines.push(tag_line);
    lines.join("\n")
}

/// Hashtags only accept word characters.
fn hashtag_of(tag: &str) -> String {
    tag.chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// Byte index where the longest prefix of `text` fitting in `max_units`
/// UTF-16 code units ends.
fn prefix_end(text: &str, max_units: usize) -> usize {
    let mut units = 0;
    for (idx, c) in text.char_indices() {
        units += c.len_utf16();
        if units > max_units {
            return idx;
        }
    }
    text.len()
}

fn truncate_units(text: &str, max_units: usize) -> String {
    text[..prefix_end(text, max_units)].to_string()
}

/// Split `text` into consecutive chunks of at most `max_units` UTF-16 code
/// units, never inside a character.
///
/// The split is purely positional (no word boundaries); concatenating the
/// chunks yields `text` exactly. A single character wider than the limit
/// becomes its own chunk.
pub fn split_message(text: &str, max_units: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        let mut end = prefix_end(rest, max_units);
        if end == 0 {
            end = rest.chars().next().map_or(rest.len(), char::len_utf8);
        }
        let (head, tail) = rest.split_at(end);
        chunks.push(head.to_string());
        rest = tail;
    }
    if chunks.is_empty() {
        chunks.push(String::new());
    }
    chunks
}
