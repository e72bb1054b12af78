//! # Relay Service
//!
//! The root coordinator. Wires the upstream link's item callback into the
//! subscriber registry's broadcast and exposes the lifecycle (`start`,
//! `stop`) and `status` operations to the server binary.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::core::registry::SubscriberRegistry;
use crate::ingestors::tree_of_alpha::{ItemHandler, LinkState, UpstreamConfig, UpstreamLink};
use crate::news::model::WelcomeMessage;

/// Everything the engine needs from the outside world.
#[derive(Debug, Clone, Default)]
pub struct RelayConfig {
    /// How to reach the news feed.
    pub upstream: UpstreamConfig,
    /// Content of the item sent to each new subscriber.
    pub welcome: WelcomeMessage,
}

/// Point-in-time health figures for the status surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayStatus {
    /// Connected subscribers.
    pub clients: usize,
    /// News messages relayed since start.
    pub messages: u64,
    /// Time since the last upstream news message; `None` means never.
    pub last_message_age: Option<Duration>,
    /// Time since the service was created.
    pub uptime: Duration,
}

impl RelayStatus {
    /// `"<n>s ago"` or `"never"`.
    pub fn last_message_label(&self) -> String {
        match self.last_message_age {
            Some(age) => format!("{}s ago", age.as_secs()),
            None => "never".to_string(),
        }
    }
}

impl fmt::Display for RelayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} clients | {} messages | Last: {} | Uptime: {}s",
            self.clients,
            self.messages,
            self.last_message_label(),
            self.uptime.as_secs()
        )
    }
}

/// # Relay Service
///
/// Owns the upstream link and the subscriber registry for the life of the
/// process.
pub struct RelayService {
    registry: Arc<SubscriberRegistry>,
    link: UpstreamLink,
    started_at: Instant,
    stopped: AtomicBool,
}

impl RelayService {
    /// Builds the engine. No connection is opened until [`start`](Self::start).
    pub fn new(config: RelayConfig) -> Self {
        let registry = Arc::new(SubscriberRegistry::new(config.welcome));

        let fanout = Arc::clone(&registry);
        let handler: ItemHandler = Arc::new(move |item| {
            let report = fanout.broadcast(&item);
            log::debug!(
                "Broadcast {} [{}]: delivered={} failed={} skipped={}",
                item.id,
                item.category,
                report.delivered,
                report.failed,
                report.skipped
            );
        });

        Self {
            registry,
            link: UpstreamLink::new(config.upstream, handler),
            started_at: Instant::now(),
            stopped: AtomicBool::new(false),
        }
    }

    /// Begins upstream connection attempts.
    pub fn start(&self) {
        log::info!("Relay starting upstream link.");
        self.link.start();
    }

    /// # Stop
    ///
    /// Stops the upstream link (cancelling any pending reconnect) and closes
    /// every subscriber channel. Idempotent: later calls find nothing left
    /// to release.
    pub async fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            log::info!("Relay shutting down...");
        }
        self.link.stop().await;
        self.registry.close_all();
    }

    /// Current health figures.
    pub fn status(&self) -> RelayStatus {
        let stats = self.link.stats();
        RelayStatus {
            clients: self.registry.len(),
            messages: stats.messages,
            last_message_age: stats.last_message_at.map(|at| at.elapsed()),
            uptime: self.started_at.elapsed(),
        }
    }

    /// The registry socket handlers add and remove subscribers through.
    pub fn registry(&self) -> &Arc<SubscriberRegistry> {
        &self.registry
    }

    /// Current upstream connection state.
    pub fn link_state(&self) -> LinkState {
        self.link.state()
    }

    /// Whether [`stop`](Self::stop) has been called.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}
