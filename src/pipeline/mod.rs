//! Relay pipeline.
//!
//! - `normalize` / `filter`: raw records to deliverable items
//! - `dedup`: delivered and in-flight identity keys
//! - `registry` / `scheduler`: per-source poll loops
//! - `delivery` / `render`: the single paced sender
//! - `orchestrator`: wires everything into a running relay

pub mod dedup;
pub mod delivery;
pub mod filter;
pub mod normalize;
pub mod orchestrator;
pub mod registry;
pub mod render;
pub mod scheduler;

pub use dedup::DedupStore;
pub use delivery::{Batch, Delivery, DeliveryCounts, DeliveryPipeline, DeliveryStats, Route};
pub use filter::{ItemFilter, SkipReason};
pub use normalize::{normalize, parse_size_gb, size_label};
pub use orchestrator::{Orchestrator, RelayStatus, SourceStatus, StatusHandle};
pub use registry::{SourceEntry, SourcePhase, SourceRegistry, SourceState};
pub use render::{render_caption, render_text, split_message};
pub use scheduler::{CycleMode, CycleReport, PollContext, run_cycle, source_loop};
