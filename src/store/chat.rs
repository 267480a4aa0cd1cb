use super::{Store, StoreError};
use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub id: i64,
    pub role: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Store {
    pub fn add_chat_message(&self, role: &str, content: &str) -> Result<i64, StoreError> {
        self.conn.execute(
            "INSERT INTO chat_messages (role, content, created_at) VALUES (?, ?, ?)",
            params![role, content, Utc::now()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// The first `limit` messages, oldest first.
    pub fn chat_messages(&self, limit: usize) -> Result<Vec<ChatMessage>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, role, content, created_at FROM chat_messages ORDER BY id ASC LIMIT ?",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(ChatMessage {
                id: row.get(0)?,
                role: row.get(1)?,
                content: row.get(2)?,
                created_at: row.get(3)?,
            })
        })?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Delete the whole transcript, returning how many messages were removed.
    pub fn clear_chat_messages(&self) -> Result<usize, StoreError> {
        Ok(self.conn.execute("DELETE FROM chat_messages", [])?)
    }
}
