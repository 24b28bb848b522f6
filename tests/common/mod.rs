//! Shared test harness: spins up the real router on a random port against a
//! temp-dir database, seeds users directly, and drives WebSocket clients.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;

use pulse_server::state::AppState;
use pulse_server::ws::registry::ConnectionRegistry;

pub type WsClient =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

pub struct TestServer {
    pub addr: SocketAddr,
    pub base_url: String,
    pub state: AppState,
}

/// Start the server on a random port. The returned state is the handle tests
/// use to seed rows and inspect the registry.
pub async fn start_test_server() -> TestServer {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();

    let db = pulse_server::db::init_db(&data_dir).expect("Failed to init DB");
    let jwt_secret = pulse_server::auth::jwt::load_or_generate_jwt_secret(&data_dir)
        .expect("Failed to generate JWT secret");

    let state = AppState {
        db,
        jwt_secret,
        registry: Arc::new(ConnectionRegistry::new()),
    };

    let app = pulse_server::routes::build_router(state.clone(), &[]);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
        let _keep = tmp_dir;
    });

    TestServer {
        addr,
        base_url: format!("http://{}", addr),
        state,
    }
}

/// Insert a user row and mint an access token for it.
pub fn seed_user(state: &AppState, email: &str, first: &str, last: &str) -> (i64, String) {
    seed_user_with_prefs(state, email, first, last, true)
}

/// Insert a user row with an explicit message-notification preference.
pub fn seed_user_with_prefs(
    state: &AppState,
    email: &str,
    first: &str,
    last: &str,
    message_notifications: bool,
) -> (i64, String) {
    let conn = state.db.lock().unwrap();
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO users (email, first_name, last_name, is_active, message_notifications, created_at)
         VALUES (?1, ?2, ?3, 1, ?4, ?5)",
        rusqlite::params![email, first, last, message_notifications, now],
    )
    .unwrap();
    let id = conn.last_insert_rowid();

    let token = pulse_server::auth::jwt::issue_access_token(&state.jwt_secret, email)
        .expect("Failed to issue token");

    (id, token)
}

/// Insert an unread message row and return its id.
pub fn seed_message(state: &AppState, sender_id: i64, recipient_id: i64, content: &str) -> i64 {
    let conn = state.db.lock().unwrap();
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO messages (sender_id, recipient_id, content, message_type, is_read, created_at, updated_at)
         VALUES (?1, ?2, ?3, 'text', 0, ?4, ?4)",
        rusqlite::params![sender_id, recipient_id, content, now],
    )
    .unwrap();
    conn.last_insert_rowid()
}

/// Whether a message row is marked read.
pub fn message_is_read(state: &AppState, message_id: i64) -> bool {
    let conn = state.db.lock().unwrap();
    conn.query_row(
        "SELECT is_read FROM messages WHERE id = ?1",
        rusqlite::params![message_id],
        |row| row.get(0),
    )
    .unwrap()
}

/// Number of notification rows addressed to a user.
pub fn notification_count(state: &AppState, recipient_id: i64) -> i64 {
    let conn = state.db.lock().unwrap();
    conn.query_row(
        "SELECT COUNT(*) FROM notifications WHERE recipient_id = ?1",
        rusqlite::params![recipient_id],
        |row| row.get(0),
    )
    .unwrap()
}

/// Open a WebSocket connection for `user_id` with the given token.
pub async fn connect_ws(addr: SocketAddr, user_id: i64, token: &str) -> WsClient {
    let url = format!("ws://{}/ws/{}?token={}", addr, user_id, token);
    let (ws, _) = tokio_tungstenite::connect_async(url)
        .await
        .expect("Failed to connect WebSocket");
    ws
}

/// Wait until the registry sees `expected` connections for `user_id`.
/// Connection registration happens in the server's actor task, so a client
/// that just finished the handshake may not be registered yet.
pub async fn wait_for_connections(state: &AppState, user_id: i64, expected: usize) {
    for _ in 0..100 {
        if state.registry.connection_count(user_id) == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "user {} never reached {} registered connections (have {})",
        user_id,
        expected,
        state.registry.connection_count(user_id)
    );
}

/// Read the next text frame and parse it as JSON, skipping protocol
/// ping/pong frames.
pub async fn next_json(ws: &mut WsClient) -> serde_json::Value {
    let text = next_text(ws).await;
    serde_json::from_str(&text).expect("frame is not valid JSON")
}

/// Read the next text frame, skipping protocol ping/pong frames.
pub async fn next_text(ws: &mut WsClient) -> String {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("websocket error");

        match msg {
            Message::Text(text) => return text.to_string(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {:?}", other),
        }
    }
}

/// Assert that no frame arrives within the window.
pub async fn expect_silence(ws: &mut WsClient, window: Duration) {
    let result = tokio::time::timeout(window, ws.next()).await;
    assert!(result.is_err(), "expected no frame, got {:?}", result);
}

/// Assert the server closes the connection with a policy-violation frame.
pub async fn expect_policy_violation_close(ws: &mut WsClient) {
    let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .expect("expected close within timeout")
        .expect("stream ended without close frame")
        .expect("websocket error");

    match msg {
        Message::Close(Some(frame)) => {
            assert_eq!(
                frame.code,
                CloseCode::from(1008),
                "expected close code 1008 (policy violation)"
            );
        }
        other => panic!("expected close frame, got {:?}", other),
    }
}
