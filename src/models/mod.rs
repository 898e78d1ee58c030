// src/models/mod.rs

//! Domain models for the relay.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod config;
mod item;

// Re-export all public types
pub use config::{
    CatchUpConfig, Config, CrawlerConfig, DeliveryConfig, FilterConfig, HealthConfig,
    PageSelectors, SinkConfig, SourceConfig, SourceKind, StorageConfig, ENV_BOT_TOKEN,
    ENV_CHAT_ID, ENV_OWNER_ID,
};
pub use item::{
    is_attachment_url, Attachment, Item, Payload, PollStatus, RawRecord, UNKNOWN_SIZE,
};
