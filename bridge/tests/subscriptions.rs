use bridge::broadcast::Broadcaster;
use bridge::ingest::IngestState;
use bridge::registry::{Payload, SubscriberRegistry};
use bridge::rest::{self, AppState};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

const WAIT: Duration = Duration::from_secs(5);

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Server {
    addr: SocketAddr,
    registry: Arc<SubscriberRegistry>,
    _state: watch::Sender<IngestState>,
}

async fn serve() -> Server {
    let registry = SubscriberRegistry::new();
    let (state_tx, state_rx) = watch::channel(IngestState::Running);
    let log_path = std::env::temp_dir().join("telemetry.csv");
    let app = rest::create_router(AppState::new(registry.clone(), log_path, state_rx, 8));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Server {
        addr,
        registry,
        _state: state_tx,
    }
}

async fn connect(addr: SocketAddr) -> Client {
    let (client, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();
    client
}

async fn wait_for_len(registry: &SubscriberRegistry, expected: usize) {
    timeout(WAIT, async {
        while registry.len() != expected {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("registry stuck at {}, expected {}", registry.len(), expected));
}

/// Next text frame, skipping control frames.
async fn next_text(client: &mut Client) -> String {
    loop {
        let msg = timeout(WAIT, client.next()).await.unwrap().unwrap().unwrap();
        match msg {
            Message::Text(text) => return text.to_string(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {:?}", other),
        }
    }
}

fn payload(text: &str) -> Payload {
    Arc::from(text)
}

#[tokio::test]
async fn test_closed_client_is_removed_and_the_other_still_receives() {
    let server = serve().await;
    let broadcaster = Broadcaster::new(server.registry.clone());

    let mut staying = connect(server.addr).await;
    let mut leaving = connect(server.addr).await;
    wait_for_len(&server.registry, 2).await;

    leaving.close(None).await.unwrap();
    wait_for_len(&server.registry, 1).await;

    let report = broadcaster.broadcast(payload(r#"{"device_id":"s1","temp_c":20}"#));
    assert_eq!(report.attempted, 1);
    assert_eq!(report.delivered, 1);

    let text = next_text(&mut staying).await;
    let pushed: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(pushed["device_id"], "s1");

    // The closed client never sees the record.
    let rest = timeout(Duration::from_millis(200), leaving.next()).await;
    if let Ok(Some(Ok(msg))) = rest {
        assert!(!msg.is_text(), "closed client received {:?}", msg);
    }
    assert_eq!(server.registry.len(), 1);
}

#[tokio::test]
async fn test_inbound_frames_are_ignored() {
    let server = serve().await;
    let broadcaster = Broadcaster::new(server.registry.clone());

    let mut client = connect(server.addr).await;
    wait_for_len(&server.registry, 1).await;

    client.send(Message::Text("hello".into())).await.unwrap();
    client.send(Message::Ping(vec![1, 2, 3].into())).await.unwrap();
    sleep(Duration::from_millis(50)).await;
    assert_eq!(server.registry.len(), 1);

    broadcaster.broadcast(payload("first"));
    broadcaster.broadcast(payload("second"));
    assert_eq!(next_text(&mut client).await, "first");
    assert_eq!(next_text(&mut client).await, "second");
}

#[tokio::test]
async fn test_dropped_connection_is_removed() {
    let server = serve().await;

    let client = connect(server.addr).await;
    wait_for_len(&server.registry, 1).await;

    // No close frame: the server only sees the stream end.
    drop(client);
    wait_for_len(&server.registry, 0).await;

    let report = Broadcaster::new(server.registry.clone()).broadcast(payload("late"));
    assert_eq!(report.attempted, 0);
}
