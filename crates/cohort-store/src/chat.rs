use cohort_shared::constants::MAX_CHAT_MESSAGE_LEN;
use rusqlite::params;
use uuid::Uuid;

use crate::database::Database;
use crate::error::{not_found, Result, StoreError};
use crate::models::ChatMessage;
use crate::rows;

impl Database {
    /// Append a chat message from a room member and return it enriched with
    /// the sender's display name.
    pub fn save_chat_message(&self, room_id: Uuid, user_id: Uuid, text: &str) -> Result<ChatMessage> {
        let text = text.trim();
        if text.is_empty() {
            return Err(StoreError::Invalid("message is empty".into()));
        }
        if text.len() > MAX_CHAT_MESSAGE_LEN {
            return Err(StoreError::Invalid(format!(
                "message exceeds {MAX_CHAT_MESSAGE_LEN} bytes"
            )));
        }
        self.require_member(room_id, user_id, "only members can chat")?;

        let id = Uuid::new_v4();
        self.conn().execute(
            "INSERT INTO room_chat_messages (id, room_id, user_id, message, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id.to_string(), room_id.to_string(), user_id.to_string(), text, rows::now()],
        )?;

        self.conn()
            .query_row(
                "SELECT c.id, c.room_id, c.user_id, u.name, c.message, c.created_at
                 FROM room_chat_messages c
                 JOIN users u ON u.id = c.user_id
                 WHERE c.id = ?1",
                params![id.to_string()],
                row_to_chat,
            )
            .map_err(not_found("message"))
    }

    /// The `limit` most recent messages, oldest first.
    pub fn room_messages(&self, room_id: Uuid, limit: u32) -> Result<Vec<ChatMessage>> {
        let mut stmt = self.conn().prepare(
            "SELECT c.id, c.room_id, c.user_id, u.name, c.message, c.created_at
             FROM room_chat_messages c
             JOIN users u ON u.id = c.user_id
             WHERE c.room_id = ?1
             ORDER BY c.created_at DESC, c.rowid DESC
             LIMIT ?2",
        )?;

        let rows = stmt.query_map(params![room_id.to_string(), limit], row_to_chat)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        messages.reverse();
        Ok(messages)
    }
}

fn row_to_chat(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatMessage> {
    Ok(ChatMessage {
        id: rows::uuid_at(row, 0)?,
        room_id: rows::uuid_at(row, 1)?,
        user_id: rows::uuid_at(row, 2)?,
        user_name: row.get(3)?,
        message: row.get(4)?,
        created_at: rows::ts_at(row, 5)?,
    })
}
