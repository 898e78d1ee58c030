// src/lib.rs

//! Torrent Relay Library
//!
//! Polls torrent feeds and listing pages, deduplicates what they publish and
//! relays new items to a chat through a paced, rate-limit aware sender.

pub mod error;
#[cfg(feature = "health")]
pub mod health;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod utils;
