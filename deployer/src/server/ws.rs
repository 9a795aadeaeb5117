//! WebSocket stream of an attempt's frames

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::Response,
};
use relay_models::RelayFrame;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::server::handlers::ApiError;
use crate::server::registry::DeploymentEntry;
use crate::server::state::ServerState;

/// Upgrade to a WebSocket that replays the attempt's history, then follows
/// it live until the final frame
pub async fn logs_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ServerState>>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let entry = state
        .registry
        .get(id)
        .await
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, format!("no attempt {}", id)))?;
    Ok(ws.on_upgrade(move |socket| stream_frames(socket, entry)))
}

async fn send(socket: &mut WebSocket, frame: &RelayFrame) -> bool {
    let text = match serde_json::to_string(frame) {
        Ok(text) => text,
        Err(e) => {
            warn!("Failed to encode frame: {}", e);
            return true;
        }
    };
    socket.send(Message::Text(text.into())).await.is_ok()
}

async fn stream_frames(mut socket: WebSocket, entry: Arc<DeploymentEntry>) {
    let (history, mut rx) = entry.bus().subscribe();
    debug!(
        "Log subscriber attached to {} with {} buffered frames",
        entry.id(),
        history.len()
    );

    for frame in &history {
        if !send(&mut socket, frame).await {
            return;
        }
        if frame.is_finished() {
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    }

    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Ok(frame) => {
                    if !send(&mut socket, &frame).await {
                        return;
                    }
                    if frame.is_finished() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    let notice = RelayFrame::log(format!("WARN: {} frames dropped", skipped));
                    if !send(&mut socket, &notice).await {
                        return;
                    }
                }
                Err(RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                _ => {}
            },
        }
    }

    let _ = socket.send(Message::Close(None)).await;
}
