//! Binds the transport-agnostic request channel (`tm_core::channel`) to an axum WebSocket.
//! One socket = one client; the client id namespaces `request_id` per §4.8.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tm_core::channel::{ClientFrame, FrameSink, RequestChannel, ServerFrame};
use tokio::sync::mpsc;

#[derive(Default)]
pub struct WsSenders {
    senders: Mutex<HashMap<String, mpsc::UnboundedSender<ServerFrame>>>,
}

#[async_trait::async_trait]
impl FrameSink for WsSenders {
    async fn send(&self, client_id: &str, frame: ServerFrame) {
        let sender = self.senders.lock().get(client_id).cloned();
        if let Some(sender) = sender {
            let _ = sender.send(frame);
        }
    }
}

pub struct AppState {
    pub channel: RequestChannel,
    pub senders: Arc<WsSenders>,
}

pub async fn upgrade(ws: WebSocketUpgrade, State(app): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, app))
}

async fn handle_socket(socket: WebSocket, app: Arc<AppState>) {
    let client_id = uuid::Uuid::new_v4().to_string();
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerFrame>();
    app.senders.senders.lock().insert(client_id.clone(), tx);

    let forward = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let body = match serde_json::to_string(&frame) {
                Ok(body) => body,
                Err(err) => {
                    tracing::error!(error = %err, "failed to serialize server frame");
                    continue;
                }
            };
            if ws_tx.send(Message::Text(body.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(message)) = ws_rx.next().await {
        let Message::Text(text) = message else {
            continue;
        };
        match serde_json::from_str::<ClientFrame>(&text) {
            Ok(frame) => app.channel.handle(&client_id, frame).await,
            Err(err) => tracing::warn!(error = %err, client = %client_id, "dropping malformed client frame"),
        }
    }

    app.channel.disconnect(&client_id);
    app.senders.senders.lock().remove(&client_id);
    forward.abort();
}
