//! Subscription records on the `users` table.

use chrono::Utc;
use parlor_shared::ChannelName;
use rusqlite::{params, OptionalExtension};

use crate::database::Database;
use crate::error::Result;

impl Database {
    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch only the stored subscription list. `None` when the user has no
    /// record at all.
    pub fn get_user_channels(&self, username: &str) -> Result<Option<Vec<ChannelName>>> {
        let stored: Option<String> = self
            .conn()
            .query_row(
                "SELECT channels FROM users WHERE username = ?1",
                params![username],
                |row| row.get(0),
            )
            .optional()?;

        stored
            .map(|json| decode_channels(username, &json))
            .transpose()
    }

    // ------------------------------------------------------------------
    // Write
    // ------------------------------------------------------------------

    /// Store the subscription list, creating the user row if needed.
    /// The list is written as given; callers normalize it first.
    pub fn set_user_channels(&self, username: &str, channels: &[ChannelName]) -> Result<()> {
        let json = serde_json::to_string(channels)?;
        let now = Utc::now().to_rfc3339();

        self.conn().execute(
            "INSERT INTO users (username, channels, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(username) DO UPDATE SET
                 channels = excluded.channels,
                 updated_at = excluded.updated_at",
            params![username, json, now],
        )?;

        tracing::debug!(user = %username, count = channels.len(), "stored channel list");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Decode the JSON channel column, skipping names that no longer validate.
fn decode_channels(username: &str, json: &str) -> Result<Vec<ChannelName>> {
    let raw: Vec<String> = serde_json::from_str(json)?;
    let mut channels = Vec::with_capacity(raw.len());
    for name in raw {
        match ChannelName::parse(&name) {
            Ok(channel) => channels.push(channel),
            Err(e) => {
                tracing::warn!(user = %username, channel = %name, error = %e, "skipping invalid stored channel");
            }
        }
    }
    Ok(channels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;

    fn timestamps(db: &Database, username: &str) -> (String, String) {
        db.conn()
            .query_row(
                "SELECT created_at, updated_at FROM users WHERE username = ?1",
                params![username],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap()
    }

    fn channels(names: &[&str]) -> Vec<ChannelName> {
        names.iter().map(|n| ChannelName::parse(n).unwrap()).collect()
    }

    #[test]
    fn test_missing_user_has_no_channels() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.get_user_channels("nobody").unwrap(), None);
    }

    #[test]
    fn test_set_then_get_preserves_order() {
        let db = Database::open_in_memory().unwrap();
        let list = channels(&["sports", "general", "news"]);

        db.set_user_channels("alice", &list).unwrap();

        assert_eq!(db.get_user_channels("alice").unwrap(), Some(list));
    }

    #[test]
    fn test_overwrite_keeps_created_at() {
        let db = Database::open_in_memory().unwrap();
        db.set_user_channels("bob", &channels(&["general"])).unwrap();
        let (created, updated) = timestamps(&db, "bob");

        db.set_user_channels("bob", &channels(&["general", "music"]))
            .unwrap();
        let (created_again, updated_again) = timestamps(&db, "bob");

        assert_eq!(created_again, created);
        assert!(updated_again >= updated);
        assert_eq!(
            db.get_user_channels("bob").unwrap(),
            Some(channels(&["general", "music"]))
        );
    }

    #[test]
    fn test_invalid_stored_entries_are_skipped() {
        let db = Database::open_in_memory().unwrap();
        db.conn()
            .execute(
                "INSERT INTO users (username, channels, created_at, updated_at)
                 VALUES ('carol', '[\"general\",\"../etc\",\"chess\"]', ?1, ?1)",
                params![Utc::now().to_rfc3339()],
            )
            .unwrap();

        assert_eq!(
            db.get_user_channels("carol").unwrap(),
            Some(channels(&["general", "chess"]))
        );
    }

    #[test]
    fn test_corrupt_json_is_an_error() {
        let db = Database::open_in_memory().unwrap();
        db.conn()
            .execute(
                "INSERT INTO users (username, channels, created_at, updated_at)
                 VALUES ('dave', 'not json', ?1, ?1)",
                params![Utc::now().to_rfc3339()],
            )
            .unwrap();

        assert!(matches!(
            db.get_user_channels("dave"),
            Err(StoreError::Json(_))
        ));
    }
}
