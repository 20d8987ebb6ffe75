//! WebSocket gateway for realtime clients

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::api::server::AppState;
use crate::websocket::subscriptions::ClientRegistry;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let registry = state.registry.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, registry))
}

async fn handle_socket(socket: WebSocket, registry: ClientRegistry) {
    let (mut sender, mut receiver) = socket.split();

    // Acks and events share one queue so a client sees them in order.
    let (outbound, mut queue) = mpsc::unbounded_channel::<String>();
    let client_id = registry.connect(outbound.clone()).await;

    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = queue.recv().await {
            if sender.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
    });

    let requests = registry.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    let ack = requests.handle_request(client_id, &text).await;
                    match serde_json::to_string(&ack) {
                        Ok(frame) => {
                            if outbound.send(frame).is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!(error = %e, "failed to encode ack"),
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    registry.disconnect(client_id).await;
    debug!(client = %client_id, "realtime socket closed");
}
