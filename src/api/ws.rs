//! WebSocket live channel.
//!
//! Each connection registers a [`ChannelSubscriber`] with the hub. A send
//! task drains its queue into the socket while the receive loop answers
//! client text with an `echo` frame. A subscriber that falls behind is
//! dropped by the hub and its socket closes.

use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;

use super::AppState;
use crate::hub::ChannelSubscriber;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    let (subscriber, mut hub_rx) = ChannelSubscriber::new(state.subscriber_queue);
    let Some(id) = state.controller.connect(Arc::new(subscriber)) else {
        tracing::debug!("live subscriber refused the greeting");
        return;
    };
    tracing::debug!(%id, "live subscriber connected");

    // Replies to the client share the socket with hub traffic.
    let (reply_tx, mut reply_rx) = mpsc::channel::<String>(16);

    let send_task = tokio::spawn(async move {
        loop {
            let text = tokio::select! {
                payload = hub_rx.recv() => {
                    let Some(payload) = payload else { break };
                    match std::str::from_utf8(&payload) {
                        Ok(text) => text.to_owned(),
                        Err(_) => continue,
                    }
                }
                Some(reply) = reply_rx.recv() => reply,
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = sender.close().await;
    });

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                let echo = json!({ "type": "echo", "data": text.as_str() }).to_string();
                if reply_tx.send(echo).await.is_err() {
                    break;
                }
            }
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    state.controller.disconnect(id);
    send_task.abort();
    tracing::debug!(%id, "live subscriber disconnected");
}
