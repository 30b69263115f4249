use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::middleware::auth::user_from_access_token;
use crate::models::notification::ServerPush;
use crate::AppState;

#[derive(Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// Browsers cannot set headers on a WebSocket handshake, so the access
/// token travels in the query string.
pub async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(q): Query<WsQuery>,
) -> AppResult<Response> {
    let token = q
        .token
        .ok_or_else(|| AppError::Unauthorized("No token provided".into()))?;
    let user = user_from_access_token(&token, &state.config.jwt.secret)?;

    tracing::info!(user_id = %user.id, "websocket upgrade requested");
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, user.id)))
}

fn encode(frame: &ServerPush) -> Option<Message> {
    match serde_json::to_string(frame) {
        Ok(text) => Some(Message::Text(text)),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode push frame");
            None
        }
    }
}

async fn handle_socket(socket: WebSocket, state: AppState, user_id: Uuid) {
    let mut rx = state.hub.subscribe(user_id).await;
    let (mut sink, mut stream) = socket.split();

    let unread: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM notifications WHERE user_id = $1 AND is_read = false",
    )
    .bind(user_id)
    .fetch_one(&state.db)
    .await
    .unwrap_or(0);

    if let Some(msg) = encode(&ServerPush::Connected { unread }) {
        if sink.send(msg).await.is_err() {
            state.hub.prune(user_id).await;
            return;
        }
    }
    tracing::info!(%user_id, unread, "websocket connected");

    loop {
        tokio::select! {
            pushed = rx.recv() => {
                let Some(frame) = pushed else { break };
                let Some(msg) = encode(&frame) else { continue };
                if let Err(e) = sink.send(msg).await {
                    tracing::debug!(%user_id, error = %e, "websocket send failed");
                    break;
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Ping(payload))) => {
                        if sink.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(%user_id, error = %e, "websocket receive failed");
                        break;
                    }
                    // server-push only; client text is ignored
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    drop(rx);
    state.hub.prune(user_id).await;
    tracing::info!(%user_id, "websocket disconnected");
}
