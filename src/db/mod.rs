pub mod migrations;
pub mod models;

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Type alias for the shared database connection.
/// rusqlite is synchronous — we wrap in Arc<Mutex> for thread safety
/// with tokio::task::spawn_blocking for DB operations.
pub type DbPool = Arc<Mutex<Connection>>;

/// Initialize the SQLite database: create data directory if needed,
/// open (or create) the database file, enable WAL mode, and run migrations.
pub fn init_db(data_dir: &str) -> Result<DbPool, Box<dyn std::error::Error>> {
    // Ensure data directory exists
    std::fs::create_dir_all(data_dir)?;

    let db_path = Path::new(data_dir).join("pulse.db");
    let mut conn = Connection::open(&db_path)?;

    // Enable WAL mode for better concurrent read performance
    conn.pragma_update(None, "journal_mode", "WAL")?;
    // Enable foreign key enforcement
    conn.pragma_update(None, "foreign_keys", "ON")?;

    // Run migrations
    let migrations = migrations::migrations();
    migrations.to_latest(&mut conn)?;

    tracing::info!("Database initialized at {}", db_path.display());

    Ok(Arc::new(Mutex::new(conn)))
}

/// Resolve an email to its user row. `None` for unknown or deactivated
/// accounts. This is the lookup behind both REST Claims resolution and the
/// WebSocket identity verifier.
pub fn user_by_email(conn: &Connection, email: &str) -> Option<models::User> {
    conn.query_row(
        "SELECT id, email, first_name, last_name, avatar, is_active, message_notifications, created_at
         FROM users WHERE email = ?1 AND is_active = 1",
        rusqlite::params![email],
        map_user_row,
    )
    .ok()
}

/// Resolve a user id to its row (active accounts only).
pub fn user_by_id(conn: &Connection, id: i64) -> Option<models::User> {
    conn.query_row(
        "SELECT id, email, first_name, last_name, avatar, is_active, message_notifications, created_at
         FROM users WHERE id = ?1 AND is_active = 1",
        rusqlite::params![id],
        map_user_row,
    )
    .ok()
}

fn map_user_row(row: &rusqlite::Row) -> rusqlite::Result<models::User> {
    Ok(models::User {
        id: row.get(0)?,
        email: row.get(1)?,
        first_name: row.get(2)?,
        last_name: row.get(3)?,
        avatar: row.get(4)?,
        is_active: row.get(5)?,
        message_notifications: row.get(6)?,
        created_at: row.get(7)?,
    })
}
