use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use sqlpilot_core::events::ProgressEvent;

use crate::server::AppState;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Upgrade to a WebSocket that streams every progress event as JSON text.
pub async fn events_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    let rx = state.orchestrator.subscribe();
    ws.on_upgrade(move |socket| forward_events(socket, rx))
}

async fn forward_events(socket: WebSocket, mut rx: broadcast::Receiver<ProgressEvent>) {
    info!("progress listener connected");
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut ping = tokio::time::interval(HEARTBEAT_INTERVAL);
    ping.tick().await;

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Ok(event) => {
                    let Some(text) = event_text(&event) else { continue };
                    if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "progress listener lagged, events dropped");
                }
                Err(RecvError::Closed) => break,
            },
            _ = ping.tick() => {
                if ws_tx.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
            incoming = ws_rx.next() => match incoming {
                Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    debug!("progress listener disconnected");
}

pub fn event_text(event: &ProgressEvent) -> Option<String> {
    serde_json::to_string(event).ok()
}
