//! Socket wire protocol.
//!
//! Every frame is a JSON object `{"event": "<name>", "data": {...}}`.
//! [`ClientEvent`] is what a connection may send, [`ServerEvent`] is what the
//! server publishes onto room and session channels.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ErrorCode, ProtocolError};
use crate::models::{
    Annotation, ChatMessage, LeaderboardEntry, Member, NoteEdit, Session, SessionSummary,
    SharedContent,
};
use crate::role::Role;

/// Events accepted from a connection. The acting user is always the
/// connection's authenticated user, never a field of the payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    JoinRoom {
        room_id: Uuid,
    },
    LeaveRoom {
        room_id: Uuid,
    },
    ChatMessage {
        room_id: Uuid,
        message: String,
    },
    SyncFlashcard {
        room_id: Uuid,
        index: u32,
    },
    SyncQuiz {
        room_id: Uuid,
        index: u32,
    },
    NoteEdit {
        room_id: Uuid,
        content_id: Uuid,
        edit: NoteEdit,
    },
    AnnotationTyping {
        room_id: Uuid,
        content_id: Uuid,
        is_typing: bool,
    },
    TypingStart {
        room_id: Uuid,
        #[serde(default)]
        name: Option<String>,
    },
    TypingStop {
        room_id: Uuid,
    },
    SessionJoin {
        session_id: Uuid,
    },
    SessionLeave {
        session_id: Uuid,
    },
}

impl ClientEvent {
    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Event name, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::JoinRoom { .. } => "join_room",
            ClientEvent::LeaveRoom { .. } => "leave_room",
            ClientEvent::ChatMessage { .. } => "chat_message",
            ClientEvent::SyncFlashcard { .. } => "sync_flashcard",
            ClientEvent::SyncQuiz { .. } => "sync_quiz",
            ClientEvent::NoteEdit { .. } => "note_edit",
            ClientEvent::AnnotationTyping { .. } => "annotation_typing",
            ClientEvent::TypingStart { .. } => "typing_start",
            ClientEvent::TypingStop { .. } => "typing_stop",
            ClientEvent::SessionJoin { .. } => "session_join",
            ClientEvent::SessionLeave { .. } => "session_leave",
        }
    }
}

/// Events published to connections.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Members active inside the presence window.
    MembersUpdated {
        room_id: Uuid,
        members: Vec<Member>,
    },
    ChatMessage(ChatMessage),
    FlashcardSynced {
        room_id: Uuid,
        user_id: Uuid,
        index: u32,
    },
    QuizSynced {
        room_id: Uuid,
        user_id: Uuid,
        index: u32,
    },
    NoteEdited {
        room_id: Uuid,
        content_id: Uuid,
        user_id: Uuid,
        edit: NoteEdit,
    },
    AnnotationTyping {
        room_id: Uuid,
        content_id: Uuid,
        user_id: Uuid,
        is_typing: bool,
    },
    UserTyping {
        room_id: Uuid,
        user_id: Uuid,
        name: Option<String>,
    },
    UserStoppedTyping {
        room_id: Uuid,
        user_id: Uuid,
    },
    ParticipantJoined {
        session_id: Uuid,
        user_id: Uuid,
        name: String,
        joined_at: DateTime<Utc>,
    },
    ContentShared(SharedContent),
    AnnotationAdded {
        room_id: Uuid,
        annotation: Annotation,
    },
    SessionCreated(Session),
    SessionStarted(Session),
    SessionEnded {
        session: Session,
        summary: SessionSummary,
    },
    LeaderboardUpdated {
        content_id: Uuid,
        entries: Vec<LeaderboardEntry>,
    },
    MemberAdded {
        room_id: Uuid,
        user_id: Uuid,
        role: Role,
    },
    MemberLeft {
        room_id: Uuid,
        user_id: Uuid,
    },
    MemberRemoved {
        room_id: Uuid,
        user_id: Uuid,
        removed_by: Uuid,
    },
    MemberPromoted {
        room_id: Uuid,
        user_id: Uuid,
        role: Role,
    },
    RoomDeleted {
        room_id: Uuid,
    },
    PositionSynced {
        session_id: Uuid,
        user_id: Uuid,
        position: u32,
    },
    AnswerSubmitted {
        room_id: Uuid,
        user_id: Uuid,
        skill_id: String,
        correct: bool,
        mastery: f64,
    },
    /// Sent only to the connection whose request failed.
    Error {
        code: ErrorCode,
        message: String,
    },
}

impl ServerEvent {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerEvent::Error {
            code,
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}
