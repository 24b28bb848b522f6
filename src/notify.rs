//! Notification producers and retrieval endpoints.
//!
//! Every producer persists the notification row first, then pushes the
//! real-time event to the recipient's live connections. The push is
//! best-effort: if the recipient is offline the row is what their client
//! sees on the next fetch. Producers never notify a user about their own
//! action.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use rusqlite::Connection;
use serde::Serialize;
use serde_json::json;

use crate::auth::middleware::Claims;
use crate::db::{self, models::NotificationRow};
use crate::state::AppState;
use crate::ws::events::{EventUser, OutboundEvent};

type NotifyError = Box<dyn std::error::Error + Send + Sync>;

/// Message previews in notifications are cut at this many characters.
const PREVIEW_MAX_CHARS: usize = 50;

/// Insert a notification row and return it.
pub fn create_notification(
    conn: &Connection,
    recipient_id: i64,
    sender_id: Option<i64>,
    notification_type: &str,
    title: &str,
    message: &str,
    data: &serde_json::Value,
) -> rusqlite::Result<NotificationRow> {
    let created_at = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO notifications
             (recipient_id, sender_id, notification_type, title, message, data, is_read, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)",
        rusqlite::params![
            recipient_id,
            sender_id,
            notification_type,
            title,
            message,
            data.to_string(),
            created_at
        ],
    )?;

    Ok(NotificationRow {
        id: conn.last_insert_rowid(),
        recipient_id,
        sender_id,
        notification_type: notification_type.to_string(),
        title: title.to_string(),
        message: message.to_string(),
        data: Some(data.to_string()),
        is_read: false,
        created_at,
    })
}

/// Persist a notification, then push it to the recipient. The durable write
/// strictly precedes the best-effort push.
async fn persist_and_push(
    state: &AppState,
    recipient_id: i64,
    sender: Option<EventUser>,
    notification_type: &'static str,
    title: String,
    message: String,
    data: serde_json::Value,
) -> Result<i64, NotifyError> {
    let row = {
        let db = state.db.clone();
        let sender_id = sender.as_ref().map(|s| s.id);
        let title = title.clone();
        let message = message.clone();
        let data = data.clone();

        tokio::task::spawn_blocking(move || -> Result<NotificationRow, NotifyError> {
            let conn = db.lock().map_err(|e| format!("DB lock error: {}", e))?;
            Ok(create_notification(
                &conn,
                recipient_id,
                sender_id,
                notification_type,
                &title,
                &message,
                &data,
            )?)
        })
        .await??
    };

    state.registry.send(
        recipient_id,
        &OutboundEvent::Notification {
            id: row.id,
            notification_type: notification_type.to_string(),
            title,
            message,
            sender,
            data,
            created_at: row.created_at.clone(),
        },
    );

    Ok(row.id)
}

/// Someone reacted to a post.
pub async fn notify_reaction(
    state: &AppState,
    post_author_id: i64,
    reactor: &EventUser,
    post_id: i64,
) -> Result<(), NotifyError> {
    if post_author_id == reactor.id {
        // Don't notify yourself
        return Ok(());
    }

    persist_and_push(
        state,
        post_author_id,
        Some(reactor.clone()),
        "like",
        "New reaction!".to_string(),
        format!("{} reacted to your post", reactor.name),
        json!({"post_id": post_id, "action": "like"}),
    )
    .await
    .map(|_| ())
}

/// Someone commented on a post.
pub async fn notify_comment(
    state: &AppState,
    post_author_id: i64,
    commenter: &EventUser,
    post_id: i64,
    comment_id: i64,
) -> Result<(), NotifyError> {
    if post_author_id == commenter.id {
        return Ok(());
    }

    persist_and_push(
        state,
        post_author_id,
        Some(commenter.clone()),
        "comment",
        "New comment!".to_string(),
        format!("{} commented on your post", commenter.name),
        json!({"post_id": post_id, "comment_id": comment_id, "action": "comment"}),
    )
    .await
    .map(|_| ())
}

/// Someone shared a post.
pub async fn notify_share(
    state: &AppState,
    post_author_id: i64,
    sharer: &EventUser,
    post_id: i64,
) -> Result<(), NotifyError> {
    if post_author_id == sharer.id {
        return Ok(());
    }

    persist_and_push(
        state,
        post_author_id,
        Some(sharer.clone()),
        "share",
        "Post shared!".to_string(),
        format!("{} shared your post", sharer.name),
        json!({"post_id": post_id, "action": "share"}),
    )
    .await
    .map(|_| ())
}

/// Someone sent a friend request.
pub async fn notify_friend_request(
    state: &AppState,
    recipient_id: i64,
    requester: &EventUser,
) -> Result<(), NotifyError> {
    persist_and_push(
        state,
        recipient_id,
        Some(requester.clone()),
        "friend_request",
        "New friend request!".to_string(),
        format!("{} sent you a friend request", requester.name),
        json!({"action": "friend_request"}),
    )
    .await
    .map(|_| ())
}

/// A friend request was accepted.
pub async fn notify_friend_accept(
    state: &AppState,
    recipient_id: i64,
    accepter: &EventUser,
) -> Result<(), NotifyError> {
    persist_and_push(
        state,
        recipient_id,
        Some(accepter.clone()),
        "friend_accept",
        "Request accepted!".to_string(),
        format!("{} accepted your friend request", accepter.name),
        json!({"action": "friend_accept"}),
    )
    .await
    .map(|_| ())
}

/// Someone started following the recipient.
pub async fn notify_follow(
    state: &AppState,
    recipient_id: i64,
    follower: &EventUser,
) -> Result<(), NotifyError> {
    persist_and_push(
        state,
        recipient_id,
        Some(follower.clone()),
        "follow",
        "New follower!".to_string(),
        format!("{} started following you", follower.name),
        json!({"action": "follow"}),
    )
    .await
    .map(|_| ())
}

/// A new direct message arrived. Called by the message-send handler after
/// the message row is committed, and only when the recipient has message
/// notifications enabled.
pub async fn notify_message(
    state: &AppState,
    recipient_id: i64,
    sender: &EventUser,
    preview: &str,
    message_id: i64,
) -> Result<(), NotifyError> {
    persist_and_push(
        state,
        recipient_id,
        Some(sender.clone()),
        "message",
        "New message!".to_string(),
        format!("{}: {}", sender.name, truncate_preview(preview)),
        json!({"message_id": message_id, "action": "message"}),
    )
    .await
    .map(|_| ())
}

fn truncate_preview(preview: &str) -> String {
    if preview.chars().count() > PREVIEW_MAX_CHARS {
        let cut: String = preview.chars().take(PREVIEW_MAX_CHARS).collect();
        format!("{}...", cut)
    } else {
        preview.to_string()
    }
}

// --- REST endpoint handlers ---

#[derive(Debug, Serialize)]
pub struct NotificationResponse {
    pub id: i64,
    pub notification_type: String,
    pub title: String,
    pub message: String,
    pub data: Option<serde_json::Value>,
    pub is_read: bool,
    pub created_at: String,
    pub sender: Option<EventUser>,
}

#[derive(Debug, Serialize)]
pub struct UnreadCountResponse {
    pub count: i64,
}

/// GET /api/notifications — Latest 50 notifications for the caller. JWT auth required.
pub async fn list_notifications(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<Vec<NotificationResponse>>, StatusCode> {
    let db = state.db.clone();
    let email = claims.sub.clone();

    let notifications = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        let user = db::user_by_email(&conn, &email).ok_or(StatusCode::UNAUTHORIZED)?;

        let mut stmt = conn
            .prepare(
                "SELECT n.id, n.notification_type, n.title, n.message, n.data, n.is_read,
                        n.created_at, u.id, u.first_name || ' ' || u.last_name, u.avatar
                 FROM notifications n
                 LEFT JOIN users u ON u.id = n.sender_id
                 WHERE n.recipient_id = ?1
                 ORDER BY n.created_at DESC, n.id DESC
                 LIMIT 50",
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let rows: Vec<NotificationResponse> = stmt
            .query_map(rusqlite::params![user.id], |row| {
                let data: Option<String> = row.get(4)?;
                let sender_id: Option<i64> = row.get(7)?;

                Ok(NotificationResponse {
                    id: row.get(0)?,
                    notification_type: row.get(1)?,
                    title: row.get(2)?,
                    message: row.get(3)?,
                    data: data.and_then(|d| serde_json::from_str(&d).ok()),
                    is_read: row.get(5)?,
                    created_at: row.get(6)?,
                    sender: match sender_id {
                        Some(id) => Some(EventUser {
                            id,
                            name: row.get(8)?,
                            avatar: row.get(9)?,
                        }),
                        None => None,
                    },
                })
            })
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .filter_map(|r| r.ok())
            .collect();

        Ok::<_, StatusCode>(rows)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok(Json(notifications))
}

/// GET /api/notifications/unread-count — Number of unread notifications. JWT auth required.
pub async fn unread_count(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<UnreadCountResponse>, StatusCode> {
    let db = state.db.clone();
    let email = claims.sub.clone();

    let count = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        let user = db::user_by_email(&conn, &email).ok_or(StatusCode::UNAUTHORIZED)?;

        conn.query_row(
            "SELECT COUNT(*) FROM notifications WHERE recipient_id = ?1 AND is_read = 0",
            rusqlite::params![user.id],
            |row| row.get::<_, i64>(0),
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok(Json(UnreadCountResponse { count }))
}

/// PUT /api/notifications/{id}/read — Mark one notification as read.
/// 404 unless the notification exists and belongs to the caller.
pub async fn mark_notification_read(
    State(state): State<AppState>,
    claims: Claims,
    Path(notification_id): Path<i64>,
) -> Result<StatusCode, StatusCode> {
    let db = state.db.clone();
    let email = claims.sub.clone();

    tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        let user = db::user_by_email(&conn, &email).ok_or(StatusCode::UNAUTHORIZED)?;

        let updated = conn
            .execute(
                "UPDATE notifications SET is_read = 1 WHERE id = ?1 AND recipient_id = ?2",
                rusqlite::params![notification_id, user.id],
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        if updated == 0 {
            return Err(StatusCode::NOT_FOUND);
        }
        Ok(StatusCode::OK)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
}

/// PUT /api/notifications/mark-all-read — Mark every notification read. JWT auth required.
pub async fn mark_all_read(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<StatusCode, StatusCode> {
    let db = state.db.clone();
    let email = claims.sub.clone();

    tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        let user = db::user_by_email(&conn, &email).ok_or(StatusCode::UNAUTHORIZED)?;

        conn.execute(
            "UPDATE notifications SET is_read = 1 WHERE recipient_id = ?1",
            rusqlite::params![user.id],
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        Ok(StatusCode::OK)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
}

/// DELETE /api/notifications/{id} — Delete one notification.
/// 404 unless the notification exists and belongs to the caller.
pub async fn delete_notification(
    State(state): State<AppState>,
    claims: Claims,
    Path(notification_id): Path<i64>,
) -> Result<StatusCode, StatusCode> {
    let db = state.db.clone();
    let email = claims.sub.clone();

    tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        let user = db::user_by_email(&conn, &email).ok_or(StatusCode::UNAUTHORIZED)?;

        let deleted = conn
            .execute(
                "DELETE FROM notifications WHERE id = ?1 AND recipient_id = ?2",
                rusqlite::params![notification_id, user.id],
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        if deleted == 0 {
            return Err(StatusCode::NOT_FOUND);
        }
        Ok(StatusCode::NO_CONTENT)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_previews_pass_through() {
        assert_eq!(truncate_preview("hello"), "hello");
    }

    #[test]
    fn long_previews_are_cut_at_fifty_chars() {
        let long = "x".repeat(80);
        let preview = truncate_preview(&long);
        assert_eq!(preview, format!("{}...", "x".repeat(50)));
    }
}
