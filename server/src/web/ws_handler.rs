use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum_extra::extract::CookieJar;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::engine::events::encode;
use crate::engine::user_session::Actor;

use super::app_state::AppState;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    /// Fallback for clients that cannot send the cookie.
    pub token: Option<String>,
}

/// GET /ws: authenticate, then upgrade to a chat connection.
pub async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Query(params): Query<WsParams>,
) -> Response {
    let token = jar
        .get(&state.cookie_name)
        .map(|c| c.value().to_string())
        .or(params.token);
    let Some(token) = token else {
        return (StatusCode::UNAUTHORIZED, "Not authenticated").into_response();
    };

    let actor = match state.engine.authenticate(&token).await {
        Ok(actor) => actor,
        Err(e) => {
            warn!("websocket handshake rejected: {e}");
            return (StatusCode::UNAUTHORIZED, "Invalid or expired session").into_response();
        }
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, actor))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, actor: Actor) {
    let (session, mut outbound) = state.engine.connect(actor).await;
    let session_id = session.id;
    info!(%session_id, user_id = session.user_id, nick = %session.nickname, "websocket connected");
    drop(session);

    let (mut sink, mut stream) = socket.split();

    let mut send_task = tokio::spawn(async move {
        while let Some(event) = outbound.recv().await {
            let text = match encode(&event) {
                Ok(text) => text,
                Err(e) => {
                    error!("failed to encode event: {e}");
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let engine = state.engine.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Text(text)) => engine.handle(session_id, text.as_str()).await,
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!(%session_id, "websocket read error: {e}");
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    state.engine.disconnect(session_id).await;
    info!(%session_id, "websocket disconnected");
}
