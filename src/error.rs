// src/error.rs

//! Unified error handling for the relay.
//!
//! Sink rate limits are not represented here: they travel as
//! [`SendOutcome::RateLimited`](crate::services::SendOutcome) values.

use std::fmt;

use thiserror::Error;

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// RSS/Atom document could not be parsed
    #[error("Feed parse error: {0}")]
    Rss(#[from] rss::Error),

    /// CSS selector parsing failed
    #[error("Invalid selector '{selector}': {message}")]
    Selector { selector: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// A single source failed for one poll cycle
    #[error("Source error for {source_id}: {message}")]
    Source { source_id: String, message: String },

    /// The sink rejected a request or could not be reached
    #[error("Sink error: {0}")]
    Sink(String),

    /// A network call exceeded its deadline
    #[error("Timed out after {secs}s: {context}")]
    Timeout { context: String, secs: u64 },
}

impl AppError {
    /// Create a selector parsing error.
    pub fn selector(selector: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Selector {
            selector: selector.into(),
            message: message.to_string(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a source error with context.
    pub fn poll(source_id: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Source {
            source_id: source_id.into(),
            message: message.to_string(),
        }
    }

    /// Create a sink error.
    pub fn sink(message: impl fmt::Display) -> Self {
        Self::Sink(message.to_string())
    }

    /// Create a timeout error.
    pub fn timeout(context: impl Into<String>, secs: u64) -> Self {
        Self::Timeout {
            context: context.into(),
            secs,
        }
    }
}
