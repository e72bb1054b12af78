//! # News Module
//!
//! The leaf of the relay: the canonical [`NewsItem`] schema and the pure
//! [`normalize`] function that maps raw upstream payloads onto it.
//!
//! - **`model`**: `NewsItem`, `Category` and the welcome message content.
//! - **`normalizer`**: categorization, contract-address and ticker extraction.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// The canonical, schema-stable news record.
pub mod model;
/// Raw payload to `NewsItem` projection.
pub mod normalizer;

// --- Public API Re-exports ---
pub use model::{Category, NewsItem, WelcomeMessage};
pub use normalizer::{categorize, extract_contracts, extract_tokens, is_news, normalize, RawFeedMessage};
