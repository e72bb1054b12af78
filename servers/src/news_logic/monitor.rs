use lib_common::{RelayService, RelayStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};

/// Logs the relay's status line every `every` until shutdown.
pub async fn run(relay: Arc<RelayService>, every: Duration, shutdown: broadcast::Receiver<()>) {
    run_with(relay, every, shutdown, |status| log::info!("Stats: {}", status)).await;
}

/// Same loop with a pluggable reporter. The first report comes one full
/// interval after start.
pub async fn run_with(
    relay: Arc<RelayService>,
    every: Duration,
    mut shutdown: broadcast::Receiver<()>,
    mut report: impl FnMut(RelayStatus),
) {
    let mut check_interval = interval(every);
    check_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    check_interval.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                log::info!("Stats monitor received shutdown signal.");
                break;
            }
            _ = check_interval.tick() => report(relay.status()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lib_common::RelayConfig;

    #[tokio::test]
    async fn test_reports_periodically_until_shutdown() {
        let relay = Arc::new(RelayService::new(RelayConfig::default()));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let (report_tx, mut report_rx) = tokio::sync::mpsc::unbounded_channel();

        let monitor = tokio::spawn(run_with(
            relay,
            Duration::from_millis(40),
            shutdown_rx,
            move |status| {
                let _ = report_tx.send(status);
            },
        ));

        let first = tokio::time::timeout(Duration::from_secs(2), report_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.clients, 0);
        assert_eq!(first.last_message_label(), "never");

        shutdown_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(2), monitor)
            .await
            .unwrap()
            .unwrap();
    }
}
