//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::r#match::MatchInput;
use crate::game::MatchHandle;
use crate::http::middleware::{extract_bearer_token, verify_jwt};
use crate::util::rate_limit::PlayerRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Client token; an `Authorization: Bearer` header works too
    #[serde(default)]
    pub token: Option<String>,
    pub match_id: Uuid,
}

/// Authenticate, resolve the match, then upgrade
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    let token = query.token.as_deref().or_else(|| {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(extract_bearer_token)
    });
    let Some(token) = token else {
        return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
    };

    let claims = match verify_jwt(token, &state.config.jwt_secret) {
        Ok(claims) => claims,
        Err(e) => {
            warn!(error = %e, "WebSocket auth failed");
            return e.into_response();
        }
    };
    let user_id = claims.sub;

    let Some(handle) = state.match_registry.get(&query.match_id) else {
        debug!(user_id = %user_id, match_id = %query.match_id, "Unknown match");
        return (StatusCode::NOT_FOUND, "Match not found").into_response();
    };
    if !handle.is_listed(user_id) {
        warn!(user_id = %user_id, match_id = %handle.id, "User is not listed on match");
        return (StatusCode::FORBIDDEN, "Not a player of this match").into_response();
    }

    info!(user_id = %user_id, match_id = %handle.id, mode = ?handle.mode, "WebSocket upgrade for match player");
    ws.on_upgrade(move |socket| handle_socket(socket, user_id, handle))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, user_id: Uuid, handle: MatchHandle) {
    let (mut ws_sink, ws_stream) = socket.split();

    let welcome = ServerMsg::Welcome {
        user_id,
        server_time: unix_millis(),
    };
    if let Err(e) = send_msg(&mut ws_sink, &welcome).await {
        error!(user_id = %user_id, error = %e, "Failed to send welcome");
        return;
    }

    let conn_id = Uuid::new_v4();
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let join = MatchInput::Join {
        user_id,
        conn_id,
        tx: out_tx.clone(),
    };
    if handle.input_tx.send(join).await.is_err() {
        let _ = send_msg(
            &mut ws_sink,
            &ServerMsg::Error {
                code: "match_closed".to_string(),
                message: "Match is no longer running".to_string(),
            },
        )
        .await;
        return;
    }

    run_session(user_id, &handle, ws_sink, ws_stream, out_tx, out_rx).await;

    let _ = handle
        .input_tx
        .send(MatchInput::Leave { user_id, conn_id })
        .await;
    info!(user_id = %user_id, match_id = %handle.id, "WebSocket connection closed");
}

/// Pump the socket in both directions until either side closes
async fn run_session(
    user_id: Uuid,
    handle: &MatchHandle,
    mut ws_sink: futures::stream::SplitSink<WebSocket, Message>,
    mut ws_stream: futures::stream::SplitStream<WebSocket>,
    out_tx: mpsc::UnboundedSender<ServerMsg>,
    mut out_rx: mpsc::UnboundedReceiver<ServerMsg>,
) {
    let rate_limiter = PlayerRateLimiter::new();

    // Writer: match and local replies -> WebSocket
    let writer_handle = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            if let Err(e) = send_msg(&mut ws_sink, &msg).await {
                debug!(user_id = %user_id, error = %e, "WebSocket send failed");
                break;
            }
        }
    });

    // Reader: WebSocket -> match
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                let msg = match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!(user_id = %user_id, error = %e, "Failed to parse client message");
                        let _ = out_tx.send(ServerMsg::Error {
                            code: "bad_message".to_string(),
                            message: e.to_string(),
                        });
                        continue;
                    }
                };

                if let ClientMsg::Ping { t } = msg {
                    let _ = out_tx.send(ServerMsg::Pong { t });
                    continue;
                }

                if !rate_limiter.check_action() {
                    warn!(user_id = %user_id, "Rate limited action");
                    continue;
                }

                if handle
                    .input_tx
                    .send(MatchInput::Action { user_id, msg })
                    .await
                    .is_err()
                {
                    debug!(user_id = %user_id, "Match input channel closed");
                    break;
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(user_id = %user_id, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!(user_id = %user_id, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(user_id = %user_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    writer_handle.abort();
}

/// Send a message over WebSocket
async fn send_msg(
    sink: &mut futures::stream::SplitSink<WebSocket, Message>,
    msg: &ServerMsg,
) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}
