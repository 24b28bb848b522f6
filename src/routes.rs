use axum::{
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    middleware, Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::auth::middleware::JwtSecret;
use crate::messages;
use crate::notify;
use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// Inject the JWT secret into request extensions so the Claims extractor can find it.
async fn inject_jwt_secret(
    axum::extract::State(state): axum::extract::State<AppState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> axum::response::Response {
    req.extensions_mut()
        .insert(JwtSecret(state.jwt_secret.clone()));
    next.run(req).await
}

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState, allowed_origins: &[String]) -> Router {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
        .allow_origin(AllowOrigin::list(origins));

    // Direct messages (JWT required — Claims extractor validates token)
    let message_routes = Router::new()
        .route("/api/messages", axum::routing::post(messages::send_message))
        .route(
            "/api/messages/conversation/{user_id}",
            axum::routing::get(messages::get_conversation),
        )
        .route(
            "/api/messages/conversations",
            axum::routing::get(messages::list_conversations),
        )
        .route(
            "/api/messages/{message_id}/read",
            axum::routing::put(messages::mark_message_read),
        );

    // Notifications (JWT required)
    let notification_routes = Router::new()
        .route(
            "/api/notifications",
            axum::routing::get(notify::list_notifications),
        )
        .route(
            "/api/notifications/unread-count",
            axum::routing::get(notify::unread_count),
        )
        .route(
            "/api/notifications/mark-all-read",
            axum::routing::put(notify::mark_all_read),
        )
        .route(
            "/api/notifications/{id}/read",
            axum::routing::put(notify::mark_notification_read),
        )
        .route(
            "/api/notifications/{id}",
            axum::routing::delete(notify::delete_notification),
        );

    // WebSocket endpoint (auth via query param, not JWT header)
    let ws_routes = Router::new().route(
        "/ws/{user_id}",
        axum::routing::get(ws_handler::ws_upgrade),
    );

    // Health check
    let health = Router::new().route("/health", axum::routing::get(health_check));

    Router::new()
        .merge(message_routes)
        .merge(notification_routes)
        .merge(ws_routes)
        .merge(health)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            inject_jwt_secret,
        ))
        .layer(cors)
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
