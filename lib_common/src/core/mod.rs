//! # Core Engine Module
//!
//! The connection-lifecycle and broadcast engine of the news relay.
//!
//! ## Core Components:
//!
//! - **`registry`**: The set of connected subscribers and the serialize-once
//!   fan-out with per-subscriber error isolation.
//!
//! - **`relay`**: The root service. It owns the upstream link and the
//!   registry, routes every normalized item from one to the other and
//!   reports status to the health surface.
//!
//! - **`error`**: The engine's error type.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Error type shared by the engine components.
pub mod error;
/// Subscriber membership and fan-out.
pub mod registry;
/// The service wiring upstream to subscribers.
pub mod relay;

// --- Public API Re-exports ---
pub use error::RelayError;
pub use registry::{BroadcastReport, ChannelSink, Outbound, Subscriber, SubscriberRegistry, SubscriberSink};
pub use relay::{RelayConfig, RelayService, RelayStatus};
