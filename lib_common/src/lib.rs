//! # lib_common
//!
//! The engine behind `server_news`: one upstream subscription to the Tree of
//! Alpha news feed, normalized into a stable schema and fanned out to every
//! connected subscriber.
//!
//! Modules are gated by folder:
//! - `news` (feature `news`): the `NewsItem` model and the normalizer.
//! - `core`, `ingestors` (feature `relay`): subscriber registry, upstream
//!   link and the relay service.

#![forbid(unsafe_code)]

#[cfg(feature = "news")]
pub mod news;

#[cfg(feature = "relay")]
pub mod core;
#[cfg(feature = "relay")]
pub mod ingestors;

// Re-export the types the server binary works with
#[cfg(feature = "news")]
pub use crate::news::{Category, NewsItem, WelcomeMessage};

#[cfg(feature = "relay")]
pub use crate::core::{RelayConfig, RelayError, RelayService, RelayStatus};
#[cfg(feature = "relay")]
pub use crate::ingestors::UpstreamConfig;
