//! Domain records shared by the store, the server and the wire protocol.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! straight to HTTP responses and socket events.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::role::Role;
use crate::types::{ContentType, EditKind, Privacy, SessionStatus};

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

/// A user as resolved by the authentication gate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Rooms and membership
// ---------------------------------------------------------------------------

/// A persistent study group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Room {
    pub id: Uuid,
    /// Short invite code; unique and never reissued.
    pub code: String,
    pub name: String,
    pub topic: Option<String>,
    pub description: Option<String>,
    pub privacy: Privacy,
    pub max_participants: u32,
    pub study_material_type: Option<String>,
    pub owner_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Parameters for creating a room.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewRoom {
    pub name: String,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub privacy: Privacy,
    #[serde(default)]
    pub max_participants: Option<u32>,
    #[serde(default)]
    pub study_material_type: Option<String>,
}

/// One row of a room's member list, joined with the user's profile.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Member {
    pub room_id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub role: Role,
    pub joined_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

/// A room with its owner and full member list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoomDetails {
    #[serde(flatten)]
    pub room: Room,
    pub owner_name: String,
    pub members: Vec<Member>,
}

/// A room as seen from one of its members' room list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoomSummary {
    #[serde(flatten)]
    pub room: Room,
    pub role: Role,
    pub joined_at: DateTime<Utc>,
    pub member_count: u32,
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

/// A scheduled or live study gathering inside a room.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub id: Uuid,
    pub room_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: u32,
    pub status: SessionStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub participant_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSession {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    #[serde(default)]
    pub duration_minutes: Option<u32>,
}

/// A scheduled session in one of the user's rooms.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpcomingSession {
    #[serde(flatten)]
    pub session: Session,
    pub room_name: String,
    pub room_topic: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionParticipant {
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub joined_at: DateTime<Utc>,
}

/// Post-session report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSummary {
    pub session: Session,
    pub room_name: String,
    pub participants: u32,
    pub participant_names: Vec<String>,
    /// Room chat messages between start and end (or now, while active).
    pub message_count: u64,
    /// Whole minutes between start and end; `None` until the session ends.
    pub duration_minutes: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionNote {
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub user_name: String,
    pub notes_text: String,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

/// A durable room chat entry, enriched with the sender's display name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: Uuid,
    pub room_id: Uuid,
    pub user_id: Uuid,
    pub user_name: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Shared content
// ---------------------------------------------------------------------------

/// An artifact published into a room. The payload never changes once shared.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SharedContent {
    pub id: Uuid,
    pub room_id: Uuid,
    pub content_type: ContentType,
    pub title: String,
    pub topic: Option<String>,
    pub grade_level: Option<String>,
    pub payload: serde_json::Value,
    pub shared_by: Uuid,
    pub shared_by_name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewContent {
    pub content_type: ContentType,
    pub title: String,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub grade_level: Option<String>,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Annotation {
    pub id: Uuid,
    pub content_id: Uuid,
    pub user_id: Uuid,
    pub user_name: String,
    pub text: String,
    pub position_start: u32,
    pub position_end: u32,
    pub created_at: DateTime<Utc>,
}

/// A positional edit to shared notes, as sent by an editing client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NoteEdit {
    pub edit_type: EditKind,
    pub position: u32,
    #[serde(default)]
    pub text: String,
}

/// A persisted row of the collaborative edit log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EditRecord {
    pub id: i64,
    pub content_id: Uuid,
    pub user_id: Uuid,
    #[serde(flatten)]
    pub edit: NoteEdit,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Progress and leaderboards
// ---------------------------------------------------------------------------

/// Per-user, per-skill, per-room mastery accumulator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressRecord {
    pub room_id: Uuid,
    pub skill_id: String,
    pub user_id: Uuid,
    /// Latest external estimate in [0, 1].
    pub mastery_score: f64,
    pub questions_answered: i64,
    pub correct_answers: i64,
    pub last_updated: DateTime<Utc>,
}

/// Room-wide aggregate for one skill.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SkillStats {
    pub skill_id: String,
    pub participant_count: i64,
    pub avg_mastery: f64,
    pub avg_mastery_percent: f64,
    pub total_questions: i64,
    pub total_correct: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserSkillAnalytics {
    pub skill_id: String,
    pub mastery_score: f64,
    pub questions_answered: i64,
    pub correct_answers: i64,
    /// Percentage correct; `None` before the first answer.
    pub accuracy: Option<f64>,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RoomAnalytics {
    pub total_participants: i64,
    pub skills_tracked: i64,
    pub total_questions: i64,
    pub total_correct: i64,
    pub avg_mastery_percent: f64,
    pub shared_content_count: i64,
    pub total_sessions: i64,
}

/// Best quiz result seen for a (content, user) pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LeaderboardEntry {
    pub content_id: Uuid,
    pub user_id: Uuid,
    pub user_name: String,
    pub score: u32,
    pub total_questions: u32,
    pub time_taken_seconds: u32,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Streak {
    pub current_streak: u32,
    pub last_study_date: Option<NaiveDate>,
}
