use anyhow::{Context, Result};
use lib_common::RelayService;
use std::sync::Arc;
use tokio::signal;

mod news_logic;
use news_logic::{config, downstream, logger, monitor};

#[tokio::main]
async fn main() -> Result<()> {
    // Explicitly install the default crypto provider for rustls
    let _ = rustls::crypto::ring::default_provider().install_default();

    // A missing .env is fine; the environment may be set by the process manager.
    let _ = dotenvy::dotenv();

    let settings = config::load_config()?.resolve()?;
    let log_path = logger::setup_logging(&settings.log_dir, settings.log_level)?;

    let scheme = if settings.tls.is_some() { "wss" } else { "ws" };
    let http_scheme = if settings.tls.is_some() { "https" } else { "http" };
    log::info!("AlfaDAO News Server starting.");
    log::info!("WebSocket: {}://localhost:{}/ws", scheme, settings.port);
    log::info!("Health:    {}://localhost:{}/health", http_scheme, settings.port);
    log::info!("Logging to {}", log_path.display());
    if let Some(path) = &settings.config_file {
        log::info!("Configuration loaded from {}", path.display());
    }
    log::info!(
        "Upstream: {} ({})",
        settings.relay.upstream.url,
        if settings.relay.upstream.has_credential() { "API key" } else { "free tier" }
    );

    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);

    let relay = Arc::new(RelayService::new(settings.relay.clone()));
    relay.start();

    let monitor_handle = tokio::spawn(monitor::run(
        Arc::clone(&relay),
        settings.stats_interval,
        shutdown_tx.subscribe(),
    ));

    let mut server_handle = tokio::spawn(downstream::run(
        settings.port,
        settings.tls.clone(),
        Arc::clone(&relay),
        shutdown_tx.subscribe(),
    ));

    let early_exit = tokio::select! {
        _ = shutdown_signal() => None,
        result = &mut server_handle => Some(result),
    };

    // Stop accepting first, then close whoever is still connected.
    let _ = shutdown_tx.send(());
    relay.stop().await;

    let server_result = match early_exit {
        Some(result) => result,
        None => server_handle.await,
    };
    if let Err(e) = monitor_handle.await {
        log::error!("Stats monitor ended abnormally: {}", e);
    }

    server_result.context("Downstream server task panicked")??;
    log::info!("Shutdown complete.");
    Ok(())
}

/// Resolves on the first Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
        log::info!("Ctrl-C received, initiating shutdown.");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term_signal) => {
                term_signal.recv().await;
                log::info!("SIGTERM received, initiating shutdown.");
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    // On non-unix platforms only Ctrl-C applies.
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
