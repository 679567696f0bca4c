//! The session state machine.
//!
//! A session only ever moves `scheduled -> active -> completed`. Each
//! transition is a single conditional `UPDATE` on the expected source
//! status, so two racing callers cannot both win the same step.

use chrono::{DateTime, Duration, Utc};
use cohort_shared::constants::DEFAULT_SESSION_MINUTES;
use cohort_shared::role;
use cohort_shared::types::SessionStatus;
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use crate::database::Database;
use crate::error::{not_found, Result, StoreError};
use crate::models::{
    NewSession, Session, SessionNote, SessionParticipant, SessionSummary, UpcomingSession,
};
use crate::rows;

const SESSION_COLUMNS: &str = "s.id, s.room_id, s.title, s.description, s.scheduled_at,
     s.duration_minutes, s.status, s.started_at, s.ended_at, s.created_by, s.created_at,
     (SELECT COUNT(*) FROM session_participants p WHERE p.session_id = s.id)";

impl Database {
    pub fn create_session(
        &self,
        room_id: Uuid,
        draft: &NewSession,
        creator_id: Uuid,
    ) -> Result<Session> {
        self.require_room(room_id)?;
        self.require_member(room_id, creator_id, "only members can schedule sessions")?;

        let title = draft.title.trim();
        if title.is_empty() {
            return Err(StoreError::Invalid("session title is empty".into()));
        }
        let duration = draft.duration_minutes.unwrap_or(DEFAULT_SESSION_MINUTES);
        if duration == 0 {
            return Err(StoreError::Invalid("duration_minutes must be positive".into()));
        }

        let id = Uuid::new_v4();
        self.conn().execute(
            "INSERT INTO study_sessions
                 (id, room_id, title, description, scheduled_at, duration_minutes, status,
                  created_by, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'scheduled', ?7, ?8)",
            params![
                id.to_string(),
                room_id.to_string(),
                title,
                draft.description,
                rows::ts(draft.scheduled_at),
                duration,
                creator_id.to_string(),
                rows::now(),
            ],
        )?;

        tracing::info!(session_id = %id, %room_id, "session scheduled");
        self.get_session(id)
    }

    pub fn get_session(&self, id: Uuid) -> Result<Session> {
        self.conn()
            .query_row(
                &format!("SELECT {SESSION_COLUMNS} FROM study_sessions s WHERE s.id = ?1"),
                params![id.to_string()],
                row_to_session,
            )
            .map_err(not_found("session"))
    }

    /// `scheduled -> active`. Fails with `Conflict` while another session of
    /// the same room is active.
    pub fn start_session(&self, id: Uuid, user_id: Uuid) -> Result<Session> {
        let session = self.authorize_session_control(id, user_id)?;
        if session.status.next() != Some(SessionStatus::Active) {
            return Err(StoreError::InvalidTransition {
                from: session.status,
                to: SessionStatus::Active,
            });
        }

        let changed = self.conn().execute(
            "UPDATE study_sessions SET status = 'active', started_at = ?2
             WHERE id = ?1 AND status = 'scheduled'
               AND NOT EXISTS (
                   SELECT 1 FROM study_sessions o
                   WHERE o.room_id = ?3 AND o.status = 'active'
               )",
            params![id.to_string(), rows::now(), session.room_id.to_string()],
        )?;

        if changed == 0 {
            let current = self.get_session(id)?;
            if current.status != SessionStatus::Scheduled {
                return Err(StoreError::InvalidTransition {
                    from: current.status,
                    to: SessionStatus::Active,
                });
            }
            return Err(StoreError::Conflict(
                "another session is already active in this room".into(),
            ));
        }

        tracing::info!(session_id = %id, room_id = %session.room_id, by = %user_id, "session started");
        self.get_session(id)
    }

    /// `active -> completed`.
    pub fn end_session(&self, id: Uuid, user_id: Uuid) -> Result<Session> {
        let session = self.authorize_session_control(id, user_id)?;

        let changed = self.conn().execute(
            "UPDATE study_sessions SET status = 'completed', ended_at = ?2
             WHERE id = ?1 AND status = 'active'",
            params![id.to_string(), rows::now()],
        )?;

        if changed == 0 {
            let current = self.get_session(id)?;
            return Err(StoreError::InvalidTransition {
                from: current.status,
                to: SessionStatus::Completed,
            });
        }

        tracing::info!(session_id = %id, room_id = %session.room_id, by = %user_id, "session ended");
        self.get_session(id)
    }

    /// Most recently started active session of the room.
    pub fn get_active_session(&self, room_id: Uuid) -> Result<Option<Session>> {
        let session = self
            .conn()
            .query_row(
                &format!(
                    "SELECT {SESSION_COLUMNS} FROM study_sessions s
                     WHERE s.room_id = ?1 AND s.status = 'active'
                     ORDER BY s.started_at DESC
                     LIMIT 1"
                ),
                params![room_id.to_string()],
                row_to_session,
            )
            .optional()?;
        Ok(session)
    }

    pub fn list_sessions(
        &self,
        room_id: Uuid,
        status: Option<SessionStatus>,
    ) -> Result<Vec<Session>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {SESSION_COLUMNS} FROM study_sessions s
             WHERE s.room_id = ?1 AND (?2 IS NULL OR s.status = ?2)
             ORDER BY s.scheduled_at DESC"
        ))?;
        let rows = stmt.query_map(
            params![room_id.to_string(), status.map(|s| s.as_str())],
            row_to_session,
        )?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }

    /// Scheduled sessions in any of the user's rooms starting within the
    /// next `hours_ahead` hours, soonest first.
    pub fn upcoming_sessions(&self, user_id: Uuid, hours_ahead: i64) -> Result<Vec<UpcomingSession>> {
        let now = Utc::now();
        let horizon = now + Duration::hours(hours_ahead);

        let mut stmt = self.conn().prepare(&format!(
            "SELECT {SESSION_COLUMNS}, r.name, r.topic
             FROM study_sessions s
             JOIN study_rooms r ON r.id = s.room_id
             JOIN room_members m ON m.room_id = s.room_id AND m.user_id = ?1
             WHERE s.status = 'scheduled'
               AND s.scheduled_at >= ?2 AND s.scheduled_at <= ?3
             ORDER BY s.scheduled_at ASC"
        ))?;
        let rows = stmt.query_map(
            params![user_id.to_string(), rows::ts(now), rows::ts(horizon)],
            |row| {
                Ok(UpcomingSession {
                    session: row_to_session(row)?,
                    room_name: row.get(12)?,
                    room_topic: row.get(13)?,
                })
            },
        )?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }

    /// Register `user_id` as a participant. Joining twice is a no-op that
    /// returns the original registration.
    pub fn join_session(&self, session_id: Uuid, user_id: Uuid) -> Result<SessionParticipant> {
        let session = self.get_session(session_id)?;
        self.require_member(session.room_id, user_id, "only room members can join sessions")?;

        self.conn().execute(
            "INSERT INTO session_participants (session_id, user_id, joined_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(session_id, user_id) DO NOTHING",
            params![session_id.to_string(), user_id.to_string(), rows::now()],
        )?;

        self.conn()
            .query_row(
                "SELECT p.session_id, p.user_id, u.name, p.joined_at
                 FROM session_participants p
                 JOIN users u ON u.id = p.user_id
                 WHERE p.session_id = ?1 AND p.user_id = ?2",
                params![session_id.to_string(), user_id.to_string()],
                row_to_participant,
            )
            .map_err(not_found("participant"))
    }

    pub fn participants(&self, session_id: Uuid) -> Result<Vec<SessionParticipant>> {
        let mut stmt = self.conn().prepare(
            "SELECT p.session_id, p.user_id, u.name, p.joined_at
             FROM session_participants p
             JOIN users u ON u.id = p.user_id
             WHERE p.session_id = ?1
             ORDER BY p.joined_at ASC, p.rowid ASC",
        )?;
        let rows = stmt.query_map(params![session_id.to_string()], row_to_participant)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }

    /// Post-session report. Chat is counted over `[started_at, ended_at]`,
    /// or up to now while the session is still running.
    pub fn summarize(&self, session_id: Uuid) -> Result<SessionSummary> {
        let session = self.get_session(session_id)?;
        let room = self.get_room(session.room_id)?;
        let participant_names = self
            .participants(session_id)?
            .into_iter()
            .map(|p| p.name)
            .collect::<Vec<_>>();

        let message_count = match session.started_at {
            Some(start) => {
                let until = session.ended_at.unwrap_or_else(Utc::now);
                let count: i64 = self.conn().query_row(
                    "SELECT COUNT(*) FROM room_chat_messages
                     WHERE room_id = ?1 AND created_at >= ?2 AND created_at <= ?3",
                    params![session.room_id.to_string(), rows::ts(start), rows::ts(until)],
                    |row| row.get(0),
                )?;
                count as u64
            }
            None => 0,
        };

        let duration_minutes = match (session.started_at, session.ended_at) {
            (Some(start), Some(end)) => Some(elapsed_minutes(start, end)),
            _ => None,
        };

        Ok(SessionSummary {
            room_name: room.name,
            participants: participant_names.len() as u32,
            participant_names,
            message_count,
            duration_minutes,
            session,
        })
    }

    /// Save the caller's private notes for a session (last write wins).
    pub fn save_notes(&self, session_id: Uuid, user_id: Uuid, text: &str) -> Result<SessionNote> {
        let session = self.get_session(session_id)?;
        self.require_member(session.room_id, user_id, "only room members can take session notes")?;

        self.conn().execute(
            "INSERT INTO session_notes (session_id, user_id, notes_text, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(session_id, user_id) DO UPDATE SET
                 notes_text = excluded.notes_text,
                 updated_at = excluded.updated_at",
            params![session_id.to_string(), user_id.to_string(), text, rows::now()],
        )?;

        self.conn()
            .query_row(
                "SELECT n.session_id, n.user_id, u.name, n.notes_text, n.updated_at
                 FROM session_notes n
                 JOIN users u ON u.id = n.user_id
                 WHERE n.session_id = ?1 AND n.user_id = ?2",
                params![session_id.to_string(), user_id.to_string()],
                row_to_note,
            )
            .map_err(not_found("notes"))
    }

    pub fn notes(&self, session_id: Uuid) -> Result<Vec<SessionNote>> {
        let mut stmt = self.conn().prepare(
            "SELECT n.session_id, n.user_id, u.name, n.notes_text, n.updated_at
             FROM session_notes n
             JOIN users u ON u.id = n.user_id
             WHERE n.session_id = ?1
             ORDER BY n.updated_at DESC",
        )?;
        let rows = stmt.query_map(params![session_id.to_string()], row_to_note)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }

    fn authorize_session_control(&self, id: Uuid, user_id: Uuid) -> Result<Session> {
        let session = self.get_session(id)?;
        let owner = self.room_owner(session.room_id)?;
        let role = self.get_role(session.room_id, user_id)?;
        role::check_session_control(session.created_by == user_id, owner == user_id, role)?;
        Ok(session)
    }
}

/// Whole minutes between two instants, rounded to the nearest minute.
fn elapsed_minutes(start: DateTime<Utc>, end: DateTime<Utc>) -> i64 {
    ((end - start).num_milliseconds() as f64 / 60_000.0).round() as i64
}

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        id: rows::uuid_at(row, 0)?,
        room_id: rows::uuid_at(row, 1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        scheduled_at: rows::ts_at(row, 4)?,
        duration_minutes: row.get(5)?,
        status: rows::enum_at(row, 6)?,
        started_at: rows::opt_ts_at(row, 7)?,
        ended_at: rows::opt_ts_at(row, 8)?,
        created_by: rows::uuid_at(row, 9)?,
        created_at: rows::ts_at(row, 10)?,
        participant_count: row.get(11)?,
    })
}

fn row_to_participant(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionParticipant> {
    Ok(SessionParticipant {
        session_id: rows::uuid_at(row, 0)?,
        user_id: rows::uuid_at(row, 1)?,
        name: row.get(2)?,
        joined_at: rows::ts_at(row, 3)?,
    })
}

fn row_to_note(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionNote> {
    Ok(SessionNote {
        session_id: rows::uuid_at(row, 0)?,
        user_id: rows::uuid_at(row, 1)?,
        user_name: row.get(2)?,
        notes_text: row.get(3)?,
        updated_at: rows::ts_at(row, 4)?,
    })
}
