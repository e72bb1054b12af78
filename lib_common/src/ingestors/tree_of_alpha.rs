//! # Tree of Alpha Ingestor
//!
//! Owns the single outbound WebSocket to the Tree of Alpha news feed.
//! Location: lib_common/src/ingestors/tree_of_alpha.rs
//!
//! The link cycles `Disconnected -> Connecting -> Connected -> Disconnected`
//! until [`UpstreamLink::stop`] is called. Every close, error or failed
//! connect attempt is followed by exactly one reconnect after a fixed delay.
//! The pending reconnect is a `select!` against a `CancellationToken`, so
//! stopping the link cancels it deterministically.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, USER_AGENT};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::core::error::RelayError;
use crate::news::model::NewsItem;
use crate::news::normalizer::{is_news, normalize, RawFeedMessage};

/// Number of body characters echoed in the per-message log line.
const PREVIEW_CHARS: usize = 60;

/// Configuration for the Tree of Alpha stream.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Feed endpoint without credentials.
    pub url: String,
    /// Optional API key, appended as the `api-key` query parameter.
    pub api_key: Option<String>,
    /// Value of the identifying `User-Agent` header.
    pub user_agent: String,
    /// Fixed wait between a close and the next connect attempt.
    pub reconnect_delay: Duration,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: "wss://news.treeofalpha.com/ws".to_string(),
            api_key: None,
            user_agent: "AlfaDAO-News-Aggregator/1.0".to_string(),
            reconnect_delay: Duration::from_secs(5),
        }
    }
}

impl UpstreamConfig {
    /// Whether an access credential is configured. Without one the feed is
    /// used in free-tier mode.
    pub fn has_credential(&self) -> bool {
        self.api_key.as_deref().is_some_and(|key| !key.is_empty())
    }

    /// The URL actually dialled, including the credential when present.
    pub fn endpoint(&self) -> Result<Url, RelayError> {
        let mut url =
            Url::parse(&self.url).map_err(|e| RelayError::InvalidEndpoint(format!("{}: {}", self.url, e)))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(RelayError::InvalidEndpoint(format!(
                "unsupported scheme '{}' in {}",
                url.scheme(),
                self.url
            )));
        }
        if let Some(key) = self.api_key.as_deref().filter(|key| !key.is_empty()) {
            url.query_pairs_mut().append_pair("api-key", key);
        }
        Ok(url)
    }

    fn request(&self) -> Result<Request, RelayError> {
        let mut request = self.endpoint()?.as_str().into_client_request()?;
        let agent = HeaderValue::from_str(&self.user_agent)
            .map_err(|e| RelayError::InvalidEndpoint(format!("bad User-Agent header: {}", e)))?;
        request.headers_mut().insert(USER_AGENT, agent);
        Ok(request)
    }
}

/// Connection state of the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Idle, or waiting out the reconnect delay.
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Open and reading.
    Connected,
    /// Terminal: `stop()` was called.
    Stopped,
}

/// Counters read by the status surface. Always copied out as one snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedStats {
    /// News messages relayed since start.
    pub messages: u64,
    /// When the last news message arrived.
    pub last_message_at: Option<Instant>,
}

/// Callback receiving each normalized item, in upstream order.
pub type ItemHandler = Arc<dyn Fn(NewsItem) + Send + Sync>;

struct LinkInner {
    config: UpstreamConfig,
    handler: ItemHandler,
    state: Mutex<LinkState>,
    stats: Mutex<FeedStats>,
    attempts: AtomicU64,
}

/// # Upstream Link
///
/// Process-lifetime owner of the feed connection. Cheap accessors expose the
/// state and counters; the connection itself lives in a spawned task.
pub struct UpstreamLink {
    inner: Arc<LinkInner>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl UpstreamLink {
    /// Creates an idle link. Nothing is dialled until [`start`](Self::start).
    pub fn new(config: UpstreamConfig, handler: ItemHandler) -> Self {
        Self {
            inner: Arc::new(LinkInner {
                config,
                handler,
                state: Mutex::new(LinkState::Disconnected),
                stats: Mutex::new(FeedStats::default()),
                attempts: AtomicU64::new(0),
            }),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    /// # Start
    ///
    /// Spawns the connection task. A no-op while the task is already running
    /// or after the link has been stopped. Must be called inside a Tokio runtime.
    pub fn start(&self) {
        if self.cancel.is_cancelled() {
            log::warn!("Upstream link was stopped; ignoring start request.");
            return;
        }

        let mut task = self.task.lock().expect("Link task lock poisoned");
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            log::debug!("Upstream link already running.");
            return;
        }

        let inner = Arc::clone(&self.inner);
        let cancel = self.cancel.clone();
        *task = Some(tokio::spawn(async move { inner.run(cancel).await }));
    }

    /// # Stop
    ///
    /// Closes the active connection, cancels any pending reconnect and waits
    /// for the connection task to finish. Once this returns no further
    /// connect attempt can happen. Safe to call repeatedly.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self.task.lock().expect("Link task lock poisoned").take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                log::error!("Upstream task ended abnormally: {}", e);
            }
        }
        self.inner.set_state(LinkState::Stopped);
    }

    /// Current connection state.
    pub fn state(&self) -> LinkState {
        self.inner.state()
    }

    /// Consistent snapshot of the message counter and last-message time.
    pub fn stats(&self) -> FeedStats {
        *self.inner.stats.lock().expect("Link stats lock poisoned")
    }

    /// Connection attempts made so far, including the first.
    pub fn attempts(&self) -> u64 {
        self.inner.attempts.load(Ordering::Relaxed)
    }
}

impl LinkInner {
    fn state(&self) -> LinkState {
        *self.state.lock().expect("Link state lock poisoned")
    }

    fn set_state(&self, state: LinkState) {
        *self.state.lock().expect("Link state lock poisoned") = state;
    }

    /// Connect / read / reconnect loop. Exits only on cancellation.
    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let delay = self.config.reconnect_delay;

        loop {
            self.connect_and_read(&cancel).await;
            if cancel.is_cancelled() {
                break;
            }

            self.set_state(LinkState::Disconnected);
            log::info!(
                "Tree of Alpha connection closed, reconnecting in {}ms...",
                delay.as_millis()
            );

            // Cancellation wins over an expiring delay.
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    log::info!("Pending upstream reconnect cancelled.");
                    break;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.set_state(LinkState::Stopped);
        log::info!("Upstream link stopped.");
    }

    /// One connection lifetime: dial, then read until close, error or cancel.
    async fn connect_and_read(&self, cancel: &CancellationToken) {
        if cancel.is_cancelled() {
            return;
        }
        self.set_state(LinkState::Connecting);
        let attempt = self.attempts.fetch_add(1, Ordering::Relaxed) + 1;
        log::info!("Connecting to Tree of Alpha (attempt {})...", attempt);

        let request = match self.config.request() {
            Ok(request) => request,
            Err(e) => {
                log::error!("Failed to connect: {}", e);
                return;
            }
        };

        let connected = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            result = connect_async(request) => result,
        };

        let ws_stream = match connected {
            Ok((ws_stream, _response)) => ws_stream,
            Err(e) => {
                log::error!("Failed to connect: {}", e);
                return;
            }
        };

        self.set_state(LinkState::Connected);
        log::info!("Connected to Tree of Alpha");
        if !self.config.has_credential() {
            log::warn!("No API key - using free tier (may have delays)");
        }

        // Receive-only: the write half is kept for the closing handshake.
        let (mut write, mut read) = ws_stream.split();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    log::info!("Closing upstream connection...");
                    let _ = write.close().await;
                    return;
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => self.handle_payload(text.as_str()),
                        Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                            Ok(text) => self.handle_payload(text),
                            Err(e) => log::warn!("Dropping non UTF-8 binary frame ({} bytes): {}", data.len(), e),
                        },
                        Some(Ok(Message::Close(frame))) => {
                            log::debug!("Upstream sent close frame: {:?}", frame);
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            log::error!("Tree of Alpha error: {}", e);
                            return;
                        }
                        None => return,
                    }
                }
            }
        }
    }

    /// Parses one inbound payload and relays it when it is news. Malformed
    /// payloads are logged and dropped; the connection stays up.
    fn handle_payload(&self, text: &str) {
        let raw: RawFeedMessage = match serde_json::from_str(text) {
            Ok(raw) => raw,
            Err(e) => {
                log::error!("Error processing message: {}", e);
                log::error!("Raw message: {}", text);
                return;
            }
        };

        if !is_news(&raw) {
            log::trace!("Ignoring non-news payload: {}", text);
            return;
        }

        let item = normalize(&raw);
        let count = {
            let mut stats = self.stats.lock().expect("Link stats lock poisoned");
            stats.messages += 1;
            stats.last_message_at = Some(Instant::now());
            stats.messages
        };

        let preview = item.preview(PREVIEW_CHARS);
        (self.handler)(item);
        log::info!("[{}] {}...", count, preview);
    }
}
