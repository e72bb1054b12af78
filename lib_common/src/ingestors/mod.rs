//! # Data Ingestors Module
//!
//! Clients for upstream data sources. Each submodule handles connecting to,
//! receiving from and managing the lifecycle of one source.
//!
//! ## Contained Modules:
//! - **`tree_of_alpha`**: The reconnecting WebSocket client for the Tree of
//!   Alpha news feed.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// The WebSocket client for the Tree of Alpha news stream.
pub mod tree_of_alpha;

// --- Public API Re-exports ---
pub use tree_of_alpha::{FeedStats, ItemHandler, LinkState, UpstreamConfig, UpstreamLink};
