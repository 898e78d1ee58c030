//! Skip rules applied to normalized items before dedup.

use crate::models::{FilterConfig, Item};

/// Why an item was dropped.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    Keyword(String),
    TooLarge { size_gb: f64, max_gb: f64 },
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::Keyword(keyword) => write!(f, "title contains '{keyword}'"),
            SkipReason::TooLarge { size_gb, max_gb } => {
                write!(f, "{size_gb:.2} GB exceeds {max_gb} GB")
            }
        }
    }
}

/// Filter built from [`FilterConfig`].
#[derive(Debug, Clone)]
pub struct ItemFilter {
    skip_keywords: Vec<String>,
    max_size_gb: Option<f64>,
}

impl ItemFilter {
    pub fn new(config: &FilterConfig) -> Self {
        Self {
            skip_keywords: config
                .skip_keywords
                .iter()
                .filter(|k| !k.is_empty())
                .cloned()
                .collect(),
            max_size_gb: config.max_size_gb,
        }
    }

    /// Returns the reason the item should be skipped, if any.
    ///
    /// Items with an unknown size never fail the size rule.
    pub fn check(&self, item: &Item) -> Option<SkipReason> {
        if let Some(keyword) = self
            .skip_keywords
            .iter()
            .find(|k| item.title.contains(k.as_str()))
        {
            return Some(SkipReason::Keyword(keyword.clone()));
        }

        match (item.size_gb, self.max_size_gb) {
            (Some(size_gb), Some(max_gb)) if size_gb > max_gb => {
                Some(SkipReason::TooLarge { size_gb, max_gb })
            }
            _ => None,
        }
    }

    /// Keep the items that pass, logging every skip.
    pub fn apply(&self, items: Vec<Item>) -> Vec<Item> {
        items
            .into_iter()
            .filter(|item| match self.check(item) {
                Some(reason) => {
                    log::info!("[{}] Skipping '{}': {}", item.source_tag, item.title, reason);
                    false
                }
                None => true,
            })
            .collect()
    }
}

impl Default for ItemFilter {
    fn default() -> Self {
        Self::new(&FilterConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RawRecord;
    use crate::pipeline::normalize;

    fn item(title: &str, size: &str) -> Item {
        normalize(
            RawRecord::new(title, format!("https://x.example/{title}")).with_size(size),
            "test",
        )
    }

    #[test]
    fn test_skips_4k() {
        let filter = ItemFilter::default();
        assert_eq!(
            filter.check(&item("Movie.2020.2160p.WEB", "1 GB")),
            Some(SkipReason::Keyword("2160p".to_string()))
        );
        assert!(filter.check(&item("Movie 4K HDR", "1 GB")).is_some());
    }

    #[test]
    fn test_skips_large() {
        let filter = ItemFilter::default();
        assert!(matches!(
            filter.check(&item("Movie.1080p", "4.2 GiB")),
            Some(SkipReason::TooLarge { .. })
        ));
        assert!(filter.check(&item("Movie.1080p", "3.5 GB")).is_none());
    }

    #[test]
    fn test_unknown_size_passes() {
        let filter = ItemFilter::default();
        assert!(filter.check(&item("Show.S01E01", "Unknown")).is_none());
    }

    #[test]
    fn test_apply_keeps_order() {
        let filter = ItemFilter::default();
        let kept = filter.apply(vec![
            item("A.720p", "1 GB"),
            item("B.2160p", "1 GB"),
            item("C.1080p", "2 GB"),
        ]);
        let titles: Vec<_> = kept.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, vec!["A.720p", "C.1080p"]);
    }

    #[test]
    fn test_disabled_rules() {
        let filter = ItemFilter::new(&FilterConfig {
            skip_keywords: vec![],
            max_size_gb: None,
        });
        assert!(filter.check(&item("Movie.2160p", "80 GB")).is_none());
    }
}
