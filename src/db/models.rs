/// Database row types for all tables.
/// These correspond 1:1 to the SQLite schema defined in migrations.rs.

/// User record in the users table
#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub avatar: Option<String>,
    pub is_active: bool,
    pub message_notifications: bool,
    pub created_at: String,
}

impl User {
    /// Display name as embedded in event payloads.
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Direct message between two users
#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: i64,
    pub sender_id: i64,
    pub recipient_id: i64,
    pub content: Option<String>,
    pub message_type: String,
    pub media_url: Option<String>,
    pub media_metadata: Option<String>,
    pub is_read: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// Persisted notification; the durable counterpart of a real-time push
#[derive(Debug, Clone)]
pub struct NotificationRow {
    pub id: i64,
    pub recipient_id: i64,
    pub sender_id: Option<i64>,
    pub notification_type: String,
    pub title: String,
    pub message: String,
    pub data: Option<String>,
    pub is_read: bool,
    pub created_at: String,
}
