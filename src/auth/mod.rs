pub mod jwt;
pub mod middleware;

use crate::db::{self, DbPool};

/// Resolved identity of a WebSocket client, captured at connect time.
#[derive(Debug, Clone)]
pub struct SocketIdentity {
    pub id: i64,
    /// Display name, embedded in typing events sent on this user's behalf.
    pub name: String,
}

/// Identity verifier for WebSocket handshakes: resolve a bearer token to a
/// live user, or `None`.
///
/// Never errors into the caller — a malformed, expired, or unknown token and
/// a deactivated account all yield `None`. Does blocking DB work, so call it
/// via `spawn_blocking`.
pub fn verify_socket_token(db: &DbPool, secret: &[u8], token: &str) -> Option<SocketIdentity> {
    let claims = jwt::validate_access_token(secret, token).ok()?;

    let conn = db.lock().ok()?;
    let user = db::user_by_email(&conn, &claims.sub)?;

    Some(SocketIdentity {
        id: user.id,
        name: user.display_name(),
    })
}
