use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use lib_common::core::{Outbound, Subscriber};
use lib_common::ingestors::{LinkState, UpstreamConfig};
use lib_common::{Category, NewsItem, RelayConfig, RelayService, WelcomeMessage};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message;

const CONTRACT: &str = "0xABCDEF0123456789ABCDEF0123456789ABCDEF01";

/// Fake feed: sends a scripted batch of frames, then holds the connection
/// open until the client goes away. Reports the User-Agent it saw.
async fn spawn_feed(frames: Vec<String>) -> (String, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (agent_tx, agent_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let agent_tx = agent_tx.clone();
        let callback = move |req: &tokio_tungstenite::tungstenite::handshake::server::Request,
                             resp: tokio_tungstenite::tungstenite::handshake::server::Response| {
            let agent = req
                .headers()
                .get("user-agent")
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();
            let _ = agent_tx.send(agent);
            Ok(resp)
        };
        let mut ws = tokio_tungstenite::accept_hdr_async(stream, callback).await.unwrap();
        for frame in frames {
            ws.send(Message::Text(frame.into())).await.unwrap();
        }
        while let Some(Ok(_)) = ws.next().await {}
    });

    (format!("ws://{}", addr), agent_rx)
}

async fn next_item(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> NewsItem {
    let outbound = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for a frame")
        .expect("subscriber channel closed");
    match outbound {
        Outbound::Frame(text) => serde_json::from_str(&text).unwrap(),
        Outbound::Close => panic!("unexpected close"),
    }
}

#[tokio::test]
async fn test_upstream_news_reaches_subscribers_in_order() {
    let frames = vec![
        "{this is not json".to_string(),
        r#"{"type":"heartbeat"}"#.to_string(),
        serde_json::json!({
            "type": "news",
            "text": format!("Exchange X listing $FOO, contract {}", CONTRACT),
            "id": "n-1"
        })
        .to_string(),
        r#"{"title":"Bridge exploit drains funds","id":"n-2","user":"watcher"}"#.to_string(),
        r#"{"text":"Mainnet launch next week","id":"n-3"}"#.to_string(),
    ];
    let (url, mut agents) = spawn_feed(frames).await;

    let relay = RelayService::new(RelayConfig {
        upstream: UpstreamConfig {
            url,
            reconnect_delay: Duration::from_millis(200),
            ..Default::default()
        },
        welcome: WelcomeMessage {
            title: "Hi".to_string(),
            body: "Welcome aboard".to_string(),
        },
    });

    let (subscriber, mut rx) = Subscriber::channel("127.0.0.1:40000");
    relay.registry().add(subscriber).unwrap();
    relay.start();

    let welcome = next_item(&mut rx).await;
    assert_eq!(welcome.id, "welcome");
    assert_eq!(welcome.title.as_deref(), Some("Hi"));
    assert_eq!(welcome.body, "Welcome aboard");

    let first = next_item(&mut rx).await;
    assert_eq!(first.id, "n-1");
    assert_eq!(first.category, Category::Listing);
    assert_eq!(first.tokens, vec!["FOO".to_string()]);
    assert_eq!(first.contracts, vec![CONTRACT.to_string()]);

    // no `text`, but `type` is absent too: title alone does not make it news
    let second = next_item(&mut rx).await;
    assert_eq!(second.id, "n-3");
    assert_eq!(second.category, Category::Launch);

    assert_eq!(agents.recv().await.as_deref(), Some("AlfaDAO-News-Aggregator/1.0"));
    assert_eq!(relay.link_state(), LinkState::Connected);

    let status = relay.status();
    assert_eq!(status.messages, 2);
    assert_eq!(status.clients, 1);
    assert!(status.last_message_age.is_some());

    relay.stop().await;
    assert_eq!(rx.recv().await, Some(Outbound::Close));
    assert_eq!(relay.link_state(), LinkState::Stopped);
    assert_eq!(relay.status().clients, 0);
}
