//! # Subscriber Registry
//!
//! Owns the set of connected downstream subscribers and fans each news item
//! out to all of them.
//!
//! ## Core Design Principles:
//!
//! 1.  **Serialize Once**: A broadcast renders the item to JSON a single time
//!     and hands every subscriber an `Arc` of the same string.
//!
//! 2.  **Snapshot Iteration**: Membership is cloned under the lock and the
//!     lock is released before any send. Adds and removes that race with a
//!     broadcast land entirely before or entirely after that pass.
//!
//! 3.  **Error Isolation**: A failed send is logged and counted, and delivery
//!     continues with the next subscriber. Broadcast never removes anyone;
//!     removal belongs to the task that owns the socket.
//!
//! 4.  **Welcome First**: The welcome item is queued while the membership
//!     lock is held, so it precedes every broadcast item the subscriber sees.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use crate::core::error::RelayError;
use crate::news::model::{NewsItem, WelcomeMessage};

static NEXT_SUBSCRIBER_ID: AtomicU64 = AtomicU64::new(1);

/// Work queued for a subscriber's socket writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// A serialized news item.
    Frame(Arc<str>),
    /// Close the socket.
    Close,
}

/// # Subscriber Sink
///
/// The write side of a subscriber's push channel. Sends must not block:
/// implementations queue the frame and return.
pub trait SubscriberSink: Send + Sync {
    /// Whether the channel can still accept frames.
    fn is_open(&self) -> bool;
    /// Queues one serialized frame.
    fn send(&self, frame: Arc<str>) -> Result<(), RelayError>;
    /// Asks the channel owner to close the connection.
    fn close(&self);
}

/// Sink backed by an unbounded MPSC channel drained by the socket writer task.
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<Outbound>,
}

impl ChannelSink {
    /// Creates the sink and returns the receiver for the writer task.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl SubscriberSink for ChannelSink {
    fn is_open(&self) -> bool {
        !self.sender.is_closed()
    }

    fn send(&self, frame: Arc<str>) -> Result<(), RelayError> {
        self.sender
            .send(Outbound::Frame(frame))
            .map_err(|_| RelayError::ChannelClosed)
    }

    fn close(&self) {
        let _ = self.sender.send(Outbound::Close);
    }
}

/// A live downstream connection: an id, a remote-address label for logs and
/// the sink frames are pushed into.
pub struct Subscriber {
    id: u64,
    label: String,
    sink: Box<dyn SubscriberSink>,
}

impl Subscriber {
    /// Wraps a sink with a fresh process-unique id.
    pub fn new(label: impl Into<String>, sink: impl SubscriberSink + 'static) -> Self {
        Self {
            id: NEXT_SUBSCRIBER_ID.fetch_add(1, Ordering::Relaxed),
            label: label.into(),
            sink: Box::new(sink),
        }
    }

    /// Convenience constructor for a [`ChannelSink`]-backed subscriber.
    pub fn channel(label: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (sink, receiver) = ChannelSink::new();
        (Self::new(label, sink), receiver)
    }
}

/// Outcome of one broadcast pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Subscribers the frame was queued for.
    pub delivered: usize,
    /// Subscribers whose send failed.
    pub failed: usize,
    /// Subscribers skipped because their channel was already closed.
    pub skipped: usize,
}

/// # Subscriber Registry
///
/// Thread-safe membership plus fan-out. Shared behind an `Arc` between the
/// upstream link callback and the per-connection socket tasks.
pub struct SubscriberRegistry {
    members: Mutex<Members>,
    welcome: WelcomeMessage,
}

#[derive(Default)]
struct Members {
    subscribers: Vec<Arc<Subscriber>>,
    /// Set by `close_all`; no subscriber is admitted afterwards.
    closed: bool,
}

fn encode(item: &NewsItem) -> Result<Arc<str>, RelayError> {
    Ok(Arc::from(item.to_json()?))
}

impl SubscriberRegistry {
    /// Empty registry greeting every new subscriber with `welcome`.
    pub fn new(welcome: WelcomeMessage) -> Self {
        Self {
            members: Mutex::new(Members::default()),
            welcome,
        }
    }

    /// # Add Subscriber
    ///
    /// Registers a newly accepted subscriber and queues the welcome item for
    /// it. Returns the id to pass to [`remove`](Self::remove).
    ///
    /// Once [`close_all`](Self::close_all) has run the subscriber is refused:
    /// its sink is closed right away and `RegistryClosed` is returned.
    pub fn add(&self, subscriber: Subscriber) -> Result<u64, RelayError> {
        let welcome = encode(&NewsItem::welcome(&self.welcome));
        let id = subscriber.id;
        let label = subscriber.label.clone();

        let total = {
            let mut members = self.members.lock().expect("Registry lock poisoned");
            if members.closed {
                subscriber.sink.close();
                log::debug!("Refused client {}: relay is shutting down", label);
                return Err(RelayError::RegistryClosed);
            }
            match welcome {
                Ok(frame) => {
                    if let Err(e) = subscriber.sink.send(frame) {
                        log::warn!("Failed to send welcome to {}: {}", label, e);
                    }
                }
                Err(e) => log::error!("Failed to serialize welcome message: {}", e),
            }
            members.subscribers.push(Arc::new(subscriber));
            members.subscribers.len()
        };

        log::info!("Client connected from {} (Total: {})", label, total);
        Ok(id)
    }

    /// Deregisters a subscriber. Returns `false` if it was already gone.
    pub fn remove(&self, id: u64) -> bool {
        let (removed, remaining) = {
            let mut members = self.members.lock().expect("Registry lock poisoned");
            let before = members.subscribers.len();
            members.subscribers.retain(|s| s.id != id);
            (before != members.subscribers.len(), members.subscribers.len())
        };

        if removed {
            log::info!("Client disconnected (Remaining: {})", remaining);
        }
        removed
    }

    /// # Broadcast
    ///
    /// Serializes `item` once and queues it for every registered subscriber
    /// whose channel is open, isolating per-subscriber failures.
    pub fn broadcast(&self, item: &NewsItem) -> BroadcastReport {
        let frame = match encode(item) {
            Ok(frame) => frame,
            Err(e) => {
                log::error!("Failed to serialize news item {}: {}", item.id, e);
                return BroadcastReport::default();
            }
        };

        let snapshot: Vec<Arc<Subscriber>> = self
            .members
            .lock()
            .expect("Registry lock poisoned")
            .subscribers
            .clone();

        let mut report = BroadcastReport::default();
        for subscriber in &snapshot {
            if !subscriber.sink.is_open() {
                report.skipped += 1;
                continue;
            }
            match subscriber.sink.send(Arc::clone(&frame)) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    log::error!("Error sending to client {}: {}", subscriber.label, e);
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Current number of registered subscribers.
    pub fn len(&self) -> usize {
        self.members.lock().expect("Registry lock poisoned").subscribers.len()
    }

    /// Whether no subscriber is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Closes every subscriber channel and empties the set. Later `add`
    /// calls are refused.
    pub fn close_all(&self) -> usize {
        let drained = {
            let mut members = self.members.lock().expect("Registry lock poisoned");
            members.closed = true;
            std::mem::take(&mut members.subscribers)
        };
        for subscriber in &drained {
            subscriber.sink.close();
        }
        if !drained.is_empty() {
            log::info!("Closed {} subscriber connection(s).", drained.len());
        }
        drained.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::news::model::Category;
    use std::sync::atomic::AtomicUsize;

    struct FailingSink {
        attempts: Arc<AtomicUsize>,
    }

    impl SubscriberSink for FailingSink {
        fn is_open(&self) -> bool {
            true
        }

        fn send(&self, _frame: Arc<str>) -> Result<(), RelayError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(RelayError::ChannelClosed)
        }

        fn close(&self) {}
    }

    fn item(id: &str) -> NewsItem {
        NewsItem {
            id: id.to_string(),
            source: "tree_of_alpha".to_string(),
            title: None,
            body: format!("body {}", id),
            url: None,
            timestamp: "2024-01-01T00:00:00.000Z".to_string(),
            category: Category::General,
            contracts: vec![],
            tokens: vec![],
        }
    }

    fn frame_id(outbound: Outbound) -> String {
        match outbound {
            Outbound::Frame(text) => {
                let value: serde_json::Value = serde_json::from_str(&text).unwrap();
                value["id"].as_str().unwrap().to_string()
            }
            Outbound::Close => "<close>".to_string(),
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<String> {
        let mut ids = Vec::new();
        while let Ok(outbound) = rx.try_recv() {
            ids.push(frame_id(outbound));
        }
        ids
    }

    #[test]
    fn test_add_sends_welcome_immediately() {
        let registry = SubscriberRegistry::new(WelcomeMessage::default());
        let (subscriber, mut rx) = Subscriber::channel("127.0.0.1:1000");
        registry.add(subscriber).unwrap();

        assert_eq!(registry.len(), 1);
        assert_eq!(drain(&mut rx), vec!["welcome"]);
    }

    #[test]
    fn test_broadcast_isolates_failing_subscriber() {
        let registry = SubscriberRegistry::new(WelcomeMessage::default());
        let attempts = Arc::new(AtomicUsize::new(0));

        let (a, mut rx_a) = Subscriber::channel("a");
        registry.add(a).unwrap();
        registry.add(Subscriber::new("bad", FailingSink { attempts: attempts.clone() })).unwrap();
        let (c, mut rx_c) = Subscriber::channel("c");
        registry.add(c).unwrap();

        let report = registry.broadcast(&item("n1"));

        assert_eq!(report, BroadcastReport { delivered: 2, failed: 1, skipped: 0 });
        // welcome + the broadcast attempt
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(drain(&mut rx_a), vec!["welcome", "n1"]);
        assert_eq!(drain(&mut rx_c), vec!["welcome", "n1"]);
        // a failed send does not deregister
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_late_subscriber_gets_no_backlog() {
        let registry = SubscriberRegistry::new(WelcomeMessage::default());
        let (early, mut rx_early) = Subscriber::channel("early");
        registry.add(early).unwrap();

        registry.broadcast(&item("before"));
        let (late, mut rx_late) = Subscriber::channel("late");
        registry.add(late).unwrap();
        registry.broadcast(&item("after"));

        assert_eq!(drain(&mut rx_early), vec!["welcome", "before", "after"]);
        assert_eq!(drain(&mut rx_late), vec!["welcome", "after"]);
    }

    #[test]
    fn test_closed_channel_is_skipped() {
        let registry = SubscriberRegistry::new(WelcomeMessage::default());
        let (gone, rx_gone) = Subscriber::channel("gone");
        registry.add(gone).unwrap();
        drop(rx_gone);

        let report = registry.broadcast(&item("n1"));
        assert_eq!(report, BroadcastReport { delivered: 0, failed: 0, skipped: 1 });
    }

    #[test]
    fn test_remove_is_idempotent() {
        let registry = SubscriberRegistry::new(WelcomeMessage::default());
        let (subscriber, _rx) = Subscriber::channel("x");
        let id = registry.add(subscriber).unwrap();

        assert!(registry.remove(id));
        assert!(!registry.remove(id));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_close_all_signals_and_clears() {
        let registry = SubscriberRegistry::new(WelcomeMessage::default());
        let (a, mut rx_a) = Subscriber::channel("a");
        let (b, mut rx_b) = Subscriber::channel("b");
        registry.add(a).unwrap();
        registry.add(b).unwrap();

        assert_eq!(registry.close_all(), 2);
        assert!(registry.is_empty());
        assert_eq!(drain(&mut rx_a), vec!["welcome", "<close>"]);
        assert_eq!(drain(&mut rx_b), vec!["welcome", "<close>"]);
        assert_eq!(registry.close_all(), 0);
    }

    #[test]
    fn test_add_after_close_all_is_refused() {
        let registry = SubscriberRegistry::new(WelcomeMessage::default());
        registry.close_all();

        let (late, mut rx_late) = Subscriber::channel("late");
        assert!(matches!(registry.add(late), Err(RelayError::RegistryClosed)));
        assert!(registry.is_empty());
        // no welcome, only the close request
        assert_eq!(drain(&mut rx_late), vec!["<close>"]);
    }

    #[test]
    fn test_encode_produces_item_json() {
        let frame = encode(&item("n7")).unwrap();
        assert_eq!(frame_id(Outbound::Frame(frame)), "n7");
    }

    #[test]
    fn test_concurrent_membership_changes_during_broadcast() {
        let registry = Arc::new(SubscriberRegistry::new(WelcomeMessage::default()));
        let (steady, mut rx_steady) = Subscriber::channel("steady");
        registry.add(steady).unwrap();

        let churn: Vec<_> = (0..8)
            .map(|t| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        let (subscriber, _rx) = Subscriber::channel(format!("churn-{}-{}", t, i));
                        let id = registry.add(subscriber).unwrap();
                        registry.remove(id);
                    }
                })
            })
            .collect();

        for i in 0..100 {
            registry.broadcast(&item(&format!("n{}", i)));
        }
        for handle in churn {
            handle.join().unwrap();
        }

        let received = drain(&mut rx_steady);
        let expected: Vec<String> = std::iter::once("welcome".to_string())
            .chain((0..100).map(|i| format!("n{}", i)))
            .collect();
        assert_eq!(received, expected);
        assert_eq!(registry.len(), 1);
    }
}
