//! Direct messages: REST surface for sending and reading.
//!
//! Sending persists the row, then pushes the real-time events — a message
//! notification (when the recipient wants them) and the message itself.
//! The rows written here are what the WebSocket read-receipt path marks.

use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::auth::middleware::Claims;
use crate::db::{self, models::User};
use crate::notify;
use crate::state::AppState;
use crate::ws::events::{EventUser, OutboundEvent};

/// Default page size for conversation history.
const DEFAULT_LIMIT: u32 = 50;
/// Maximum page size for conversation history.
const MAX_LIMIT: u32 = 100;

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub recipient_id: i64,
    pub content: Option<String>,
    #[serde(default = "default_message_type")]
    pub message_type: String,
    pub media_url: Option<String>,
    pub media_metadata: Option<String>,
}

fn default_message_type() -> String {
    "text".to_string()
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub id: i64,
    pub sender: EventUser,
    pub recipient: EventUser,
    pub content: Option<String>,
    pub message_type: String,
    pub media_url: Option<String>,
    pub is_read: bool,
    pub created_at: String,
}

fn event_user(user: &User) -> EventUser {
    EventUser {
        id: user.id,
        name: user.display_name(),
        avatar: user.avatar.clone(),
    }
}

/// POST /api/messages — Send a direct message. JWT auth required.
///
/// Persists the message row, then (best-effort) pushes a notification to the
/// recipient if they have message notifications enabled, and the message
/// event itself regardless of that preference.
pub async fn send_message(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<MessageResponse>), StatusCode> {
    let db = state.db.clone();
    let email = claims.sub.clone();

    let (sender, recipient, message_id, created_at, body) = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let sender = db::user_by_email(&conn, &email).ok_or(StatusCode::UNAUTHORIZED)?;
        let recipient =
            db::user_by_id(&conn, body.recipient_id).ok_or(StatusCode::NOT_FOUND)?;

        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO messages
                 (sender_id, recipient_id, content, message_type, media_url, media_metadata,
                  is_read, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, ?7)",
            rusqlite::params![
                sender.id,
                recipient.id,
                body.content,
                body.message_type,
                body.media_url,
                body.media_metadata,
                now
            ],
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let message_id = conn.last_insert_rowid();

        Ok::<_, StatusCode>((sender, recipient, message_id, now, body))
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    let sender_ref = event_user(&sender);
    let recipient_ref = event_user(&recipient);

    // The durable row is committed; everything from here is best-effort.
    if recipient.message_notifications {
        let preview = body.content.clone().unwrap_or_default();
        if let Err(e) =
            notify::notify_message(&state, recipient.id, &sender_ref, &preview, message_id).await
        {
            tracing::warn!(error = %e, "failed to persist message notification");
        }
    }

    state.registry.send(
        recipient.id,
        &OutboundEvent::Message {
            id: message_id,
            sender: sender_ref.clone(),
            content: body.content.clone(),
            message_type: body.message_type.clone(),
            media_url: body.media_url.clone(),
            created_at: created_at.clone(),
            is_read: false,
        },
    );

    Ok((
        StatusCode::CREATED,
        Json(MessageResponse {
            id: message_id,
            sender: sender_ref,
            recipient: recipient_ref,
            content: body.content,
            message_type: body.message_type,
            media_url: body.media_url,
            is_read: false,
            created_at,
        }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct ConversationQuery {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct ConversationMessage {
    pub id: i64,
    pub sender: EventUser,
    pub content: Option<String>,
    pub message_type: String,
    pub media_url: Option<String>,
    pub is_read: bool,
    pub created_at: String,
    pub is_own: bool,
}

/// GET /api/messages/conversation/{user_id}?limit={n}&offset={n}
/// Two-party message history, oldest-first within the requested page.
/// JWT auth required.
pub async fn get_conversation(
    State(state): State<AppState>,
    claims: Claims,
    Path(peer_id): Path<i64>,
    Query(query): Query<ConversationQuery>,
) -> Result<Json<Vec<ConversationMessage>>, StatusCode> {
    let db = state.db.clone();
    let email = claims.sub.clone();
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
    let offset = query.offset.unwrap_or(0);

    let messages = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        let user = db::user_by_email(&conn, &email).ok_or(StatusCode::UNAUTHORIZED)?;

        let mut stmt = conn
            .prepare(
                "SELECT m.id, m.content, m.message_type, m.media_url, m.is_read, m.created_at,
                        m.sender_id, u.first_name || ' ' || u.last_name, u.avatar
                 FROM messages m
                 JOIN users u ON u.id = m.sender_id
                 WHERE (m.sender_id = ?1 AND m.recipient_id = ?2)
                    OR (m.sender_id = ?2 AND m.recipient_id = ?1)
                 ORDER BY m.created_at DESC, m.id DESC
                 LIMIT ?3 OFFSET ?4",
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let mut messages: Vec<ConversationMessage> = stmt
            .query_map(
                rusqlite::params![user.id, peer_id, limit as i64, offset as i64],
                |row| {
                    let sender_id: i64 = row.get(6)?;
                    Ok(ConversationMessage {
                        id: row.get(0)?,
                        sender: EventUser {
                            id: sender_id,
                            name: row.get(7)?,
                            avatar: row.get(8)?,
                        },
                        content: row.get(1)?,
                        message_type: row.get(2)?,
                        media_url: row.get(3)?,
                        is_read: row.get(4)?,
                        created_at: row.get(5)?,
                        is_own: sender_id == user.id,
                    })
                },
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .filter_map(|r| r.ok())
            .collect();

        // The query pages newest-first; clients render oldest-first.
        messages.reverse();

        Ok::<_, StatusCode>(messages)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok(Json(messages))
}

#[derive(Debug, Serialize)]
pub struct LastMessage {
    pub content: Option<String>,
    pub message_type: String,
    pub created_at: String,
    pub is_read: bool,
    pub is_own: bool,
}

#[derive(Debug, Serialize)]
pub struct ConversationSummary {
    pub user: EventUser,
    pub last_message: LastMessage,
    pub unread_count: i64,
}

/// GET /api/messages/conversations — One summary per peer the caller has
/// exchanged messages with: the peer, the latest message, and how many of
/// the peer's messages are unread. Most recent conversation first.
/// JWT auth required.
pub async fn list_conversations(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<Vec<ConversationSummary>>, StatusCode> {
    let db = state.db.clone();
    let email = claims.sub.clone();

    let summaries = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        let user = db::user_by_email(&conn, &email).ok_or(StatusCode::UNAUTHORIZED)?;

        struct Row {
            sender_id: i64,
            recipient_id: i64,
            content: Option<String>,
            message_type: String,
            is_read: bool,
            created_at: String,
        }

        let mut stmt = conn
            .prepare(
                "SELECT sender_id, recipient_id, content, message_type, is_read, created_at
                 FROM messages
                 WHERE sender_id = ?1 OR recipient_id = ?1
                 ORDER BY created_at DESC, id DESC",
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let rows: Vec<Row> = stmt
            .query_map(rusqlite::params![user.id], |row| {
                Ok(Row {
                    sender_id: row.get(0)?,
                    recipient_id: row.get(1)?,
                    content: row.get(2)?,
                    message_type: row.get(3)?,
                    is_read: row.get(4)?,
                    created_at: row.get(5)?,
                })
            })
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .filter_map(|r| r.ok())
            .collect();

        // Newest message per peer becomes the summary; unread counts
        // accumulate over the same scan.
        let mut order: Vec<i64> = Vec::new();
        let mut summaries: HashMap<i64, ConversationSummary> = HashMap::new();

        for row in rows {
            let peer_id = if row.sender_id == user.id {
                row.recipient_id
            } else {
                row.sender_id
            };

            if !summaries.contains_key(&peer_id) {
                let peer = match db::user_by_id(&conn, peer_id) {
                    Some(p) => p,
                    None => continue, // deactivated peer
                };
                order.push(peer_id);
                summaries.insert(
                    peer_id,
                    ConversationSummary {
                        user: event_user(&peer),
                        last_message: LastMessage {
                            content: row.content.clone(),
                            message_type: row.message_type.clone(),
                            created_at: row.created_at.clone(),
                            is_read: row.is_read,
                            is_own: row.sender_id == user.id,
                        },
                        unread_count: 0,
                    },
                );
            }

            if row.recipient_id == user.id && !row.is_read {
                if let Some(summary) = summaries.get_mut(&peer_id) {
                    summary.unread_count += 1;
                }
            }
        }

        let result: Vec<ConversationSummary> = order
            .into_iter()
            .filter_map(|peer_id| summaries.remove(&peer_id))
            .collect();

        Ok::<_, StatusCode>(result)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok(Json(summaries))
}

/// PUT /api/messages/{message_id}/read — Mark a received message as read.
/// 404 unless the message exists and is addressed to the caller. Unlike the
/// WebSocket control path, this does not emit a read receipt.
pub async fn mark_message_read(
    State(state): State<AppState>,
    claims: Claims,
    Path(message_id): Path<i64>,
) -> Result<StatusCode, StatusCode> {
    let db = state.db.clone();
    let email = claims.sub.clone();

    tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        let user = db::user_by_email(&conn, &email).ok_or(StatusCode::UNAUTHORIZED)?;

        let now = Utc::now().to_rfc3339();
        let updated = conn
            .execute(
                "UPDATE messages SET is_read = 1, updated_at = ?1
                 WHERE id = ?2 AND recipient_id = ?3",
                rusqlite::params![now, message_id, user.id],
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
