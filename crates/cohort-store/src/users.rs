use rusqlite::params;
use uuid::Uuid;

use crate::database::Database;
use crate::error::{is_unique_violation, not_found, Result, StoreError};
use crate::models::User;
use crate::rows;

impl Database {
    /// Mirror a gate-resolved identity. The name is refreshed on every call;
    /// a missing email keeps the stored one.
    pub fn upsert_user(&self, id: Uuid, name: &str, email: Option<&str>) -> Result<User> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StoreError::Invalid("user name is empty".into()));
        }

        self.conn()
            .execute(
                "INSERT INTO users (id, name, email, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET
                     name  = excluded.name,
                     email = COALESCE(excluded.email, users.email)",
                params![id.to_string(), name, email, rows::now()],
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::Conflict("email already belongs to another user".into())
                } else {
                    StoreError::Sqlite(e)
                }
            })?;

        self.get_user(id)
    }

    pub fn get_user(&self, id: Uuid) -> Result<User> {
        self.conn()
            .query_row(
                "SELECT id, name, email, created_at FROM users WHERE id = ?1",
                params![id.to_string()],
                row_to_user,
            )
            .map_err(not_found("user"))
    }

    pub fn find_user_by_email(&self, email: &str) -> Result<User> {
        self.conn()
            .query_row(
                "SELECT id, name, email, created_at FROM users WHERE email = ?1",
                params![email.trim()],
                row_to_user,
            )
            .map_err(not_found("user"))
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: rows::uuid_at(row, 0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        created_at: rows::ts_at(row, 3)?,
    })
}
