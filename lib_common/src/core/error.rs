use thiserror::Error;

/// Failures surfaced by the relay engine. None of them is fatal: each is
/// logged where it occurs and the engine carries on.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The upstream URL or request headers could not be built.
    #[error("Invalid upstream endpoint: {0}")]
    InvalidEndpoint(String),

    /// The WebSocket request or handshake failed.
    #[error("Upstream handshake failed: {0}")]
    Handshake(#[from] tokio_tungstenite::tungstenite::Error),

    /// A news item could not be rendered to JSON.
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The subscriber's push channel has no receiver any more.
    #[error("Subscriber channel is closed")]
    ChannelClosed,

    /// The registry was closed for shutdown and admits no new subscribers.
    #[error("Subscriber registry is closed")]
    RegistryClosed,
}
