//! Live subscription endpoint.
//!
//! Each connection registers one [`Subscriber`]. A writer task drains the
//! subscriber's queue into the socket; the connection task itself only
//! listens, so inbound frames act as keep-alives and a receive error or
//! close frame ends the subscription.

use crate::registry::{Payload, Subscriber, SubscriberRegistry};
use crate::rest::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.registry, state.subscriber_buffer))
}

async fn handle_socket(socket: WebSocket, registry: Arc<SubscriberRegistry>, buffer: usize) {
    let (subscriber, rx) = Subscriber::channel(buffer);
    let id = subscriber.id();
    let (ws_tx, ws_rx) = socket.split();

    let total = registry.add(subscriber);
    info!("[{}] Subscriber connected. Total: {}", id, total);

    let writer = tokio::spawn(forward(ws_tx, rx, id.to_string()));
    listen(ws_rx, &id.to_string()).await;

    writer.abort();
    registry.remove(id);
    info!("[{}] Subscriber disconnected. Total: {}", id, registry.len());
}

/// Writes queued payloads until the queue closes or a send fails. Exiting
/// drops the receiver, which the broadcaster then sees as a closed subscriber.
async fn forward(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Payload>,
    tag: String,
) {
    while let Some(payload) = rx.recv().await {
        if let Err(e) = ws_tx.send(Message::Text(payload.to_string())).await {
            debug!("[{}] Send failed, closing: {}", tag, e);
            break;
        }
    }
}

/// Reads and discards inbound frames until the peer goes away.
async fn listen(mut ws_rx: SplitStream<WebSocket>, tag: &str) {
    while let Some(msg) = ws_rx.next().await {
        match msg {
            Ok(Message::Close(_)) => {
                debug!("[{}] Client closed connection", tag);
                break;
            }
            Ok(_) => {}
            Err(e) => {
                debug!("[{}] Receive failed: {}", tag, e);
                break;
            }
        }
    }
}
