use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::Response,
};
use serde::Deserialize;

use crate::auth;
use crate::state::AppState;
use crate::ws::actor;

/// Query parameters for the WebSocket connection.
/// Auth is via `?token=` because browsers cannot set headers on WS upgrades.
#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    pub token: Option<String>,
}

/// Close code for a refused handshake: missing token, invalid/expired token,
/// or a token that resolves to a different user than the route claims.
const CLOSE_POLICY_VIOLATION: u16 = 1008;

/// GET /ws/{user_id}?token=...
///
/// WebSocket upgrade endpoint. The token must resolve to the same user the
/// route claims; on any auth failure the upgrade completes and the socket is
/// immediately closed with a policy-violation code, registering nothing.
/// On success the connection actor runs until the transport closes.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Query(params): Query<WsAuthQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let verified = match params.token {
        Some(token) => {
            let db = state.db.clone();
            let secret = state.jwt_secret.clone();
            tokio::task::spawn_blocking(move || auth::verify_socket_token(&db, &secret, &token))
                .await
                .ok()
                .flatten()
        }
        None => {
            tracing::warn!(user_id, "WebSocket connection without token");
            None
        }
    };

    match verified {
        Some(identity) if identity.id == user_id => {
            tracing::info!(
                user_id,
                name = %identity.name,
                "WebSocket connection authenticated"
            );
            ws.on_upgrade(move |socket| actor::run_connection(socket, state, identity))
        }
        Some(identity) => {
            tracing::warn!(
                claimed = user_id,
                resolved = identity.id,
                "WebSocket identity mismatch"
            );
            ws.on_upgrade(reject)
        }
        None => {
            tracing::warn!(user_id, "WebSocket auth failed");
            ws.on_upgrade(reject)
        }
    }
}

/// Close a just-upgraded socket with a policy-violation frame.
async fn reject(mut socket: WebSocket) {
    let close_frame = CloseFrame {
        code: CLOSE_POLICY_VIOLATION,
        reason: "Policy violation".into(),
    };
    let _ = socket.send(Message::Close(Some(close_frame))).await;
}
