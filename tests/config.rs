//! The shipped configuration file stays loadable and valid.

use std::path::PathBuf;

use torrent_relay::models::{Config, SourceKind};

fn shipped_config() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("storage/config.toml")
}

#[test]
fn test_shipped_config_is_valid() {
    let config = Config::load(shipped_config()).unwrap();
    config.validate().unwrap();

    assert_eq!(config.sources.len(), 2);
    assert_eq!(config.source("nyaasi").unwrap().kind, SourceKind::Nyaa);
    assert_eq!(config.source("yts").unwrap().interval_secs, 1800);
    assert_eq!(config.catch_up.limit, 5);
    assert_eq!(config.filter.max_size_gb, Some(3.5));
}

#[test]
fn test_shipped_config_has_no_credentials() {
    let config = Config::load(shipped_config()).unwrap();
    assert!(config.validate_credentials().is_err());
}
