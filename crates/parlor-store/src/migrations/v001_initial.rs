//! v001 -- Initial schema creation.
//!
//! The `users` table may already exist when the auth layer shares the file;
//! the channel list column is then the only thing this store owns.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    username   TEXT PRIMARY KEY NOT NULL,
    channels   TEXT NOT NULL DEFAULT '["general"]',   -- JSON array, ordered
    created_at TEXT NOT NULL,                         -- RFC-3339
    updated_at TEXT NOT NULL
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
