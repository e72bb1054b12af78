use crate::news_logic::config::TlsPaths;
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use axum_server::tls_rustls::RustlsConfig;
use futures_util::{SinkExt, StreamExt};
use lib_common::core::{Outbound, Subscriber};
use lib_common::RelayService;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};

/// Grace period for in-flight TLS connections on shutdown.
const TLS_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct ServerState {
    pub relay: Arc<RelayService>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub clients: usize,
    /// Seconds since start.
    pub uptime: u64,
    pub messages: u64,
    /// Seconds since the last upstream news item, `null` if none yet.
    pub last_message: Option<u64>,
}

/// `/ws` for subscribers, `/health` for health checks; everything else is 404.
pub fn router(state: ServerState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .with_state(state)
}

/// Binds the subscriber-facing server on `0.0.0.0:port` and serves until
/// `shutdown` fires. Serves over rustls when `tls` is given.
pub async fn run(
    port: u16,
    tls: Option<TlsPaths>,
    relay: Arc<RelayService>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let app = router(ServerState { relay });
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    match tls {
        Some(paths) => {
            let tls_config = RustlsConfig::from_pem_file(&paths.cert_path, &paths.key_path)
                .await
                .with_context(|| {
                    format!(
                        "Failed to load TLS configuration from {} and {}",
                        paths.cert_path.display(),
                        paths.key_path.display()
                    )
                })?;

            let handle = axum_server::Handle::new();
            let shutdown_handle = handle.clone();
            tokio::spawn(async move {
                shutdown.recv().await.ok();
                log::info!("Downstream server shutting down.");
                shutdown_handle.graceful_shutdown(Some(TLS_SHUTDOWN_GRACE));
            });

            log::info!("Downstream server listening on {} (TLS)", addr);
            axum_server::bind_rustls(addr, tls_config)
                .handle(handle)
                .serve(app.into_make_service_with_connect_info::<SocketAddr>())
                .await
                .context("TLS server failed")?;
        }
        None => {
            let listener = TcpListener::bind(addr)
                .await
                .with_context(|| format!("Failed to bind {}", addr))?;
            log::info!("Downstream server listening on {}", addr);
            serve(listener, app, shutdown).await?;
        }
    }
    Ok(())
}

/// Plain-TCP serving loop with graceful shutdown.
pub async fn serve(listener: TcpListener, app: Router, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move {
            shutdown.recv().await.ok();
            log::info!("Downstream server shutting down.");
        })
        .await
        .context("Server failed")
}

async fn health_handler(State(state): State<ServerState>) -> Json<HealthResponse> {
    let status = state.relay.status();
    Json(HealthResponse {
        status: "ok",
        clients: status.clients,
        uptime: status.uptime.as_secs(),
        messages: status.messages,
        last_message: status.last_message_age.map(|age| age.as_secs()),
    })
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<ServerState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, addr))
}

/// One subscriber session: registered for its whole lifetime, fed from its
/// outbound channel, removed when either side goes away.
async fn handle_socket(socket: WebSocket, state: ServerState, addr: SocketAddr) {
    let registry = Arc::clone(state.relay.registry());
    let (subscriber, mut outbound_rx) = Subscriber::channel(addr.to_string());
    // Refused during shutdown; the queued Close still goes out below.
    let id = match registry.add(subscriber) {
        Ok(id) => Some(id),
        Err(e) => {
            log::info!("Rejecting client {}: {}", addr, e);
            None
        }
    };

    let (mut sender, mut receiver) = socket.split();

    let mut send_task = tokio::spawn(async move {
        while let Some(outbound) = outbound_rx.recv().await {
            let (message, closing) = match outbound {
                Outbound::Frame(text) => (Message::Text((&*text).into()), false),
                Outbound::Close => (Message::Close(None), true),
            };
            if sender.send(message).await.is_err() || closing {
                break;
            }
        }
    });

    // Inbound frames carry nothing for us; only watch for the end of the session.
    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    log::warn!("WebSocket error from {}: {}", addr, e);
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    if let Some(id) = id {
        registry.remove(id);
    }
}
