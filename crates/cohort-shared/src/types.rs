use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::{ROOM_CHANNEL_PREFIX, SESSION_CHANNEL_PREFIX};
use crate::error::ParseEnumError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Privacy {
    #[default]
    Public,
    Private,
}

impl Privacy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Privacy::Public => "public",
            Privacy::Private => "private",
        }
    }
}

impl FromStr for Privacy {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(Privacy::Public),
            "private" => Ok(Privacy::Private),
            other => Err(ParseEnumError::new("privacy", other)),
        }
    }
}

/// Session lifecycle. Transitions only ever move forward:
/// `Scheduled -> Active -> Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Scheduled,
    Active,
    Completed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Scheduled => "scheduled",
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
        }
    }

    /// The single state reachable from `self`, if any.
    pub fn next(&self) -> Option<SessionStatus> {
        match self {
            SessionStatus::Scheduled => Some(SessionStatus::Active),
            SessionStatus::Active => Some(SessionStatus::Completed),
            SessionStatus::Completed => None,
        }
    }
}

impl FromStr for SessionStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(SessionStatus::Scheduled),
            "active" => Ok(SessionStatus::Active),
            "completed" => Ok(SessionStatus::Completed),
            other => Err(ParseEnumError::new("session status", other)),
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of study artifact shared into a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Notes,
    Flashcards,
    Quiz,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Notes => "notes",
            ContentType::Flashcards => "flashcards",
            ContentType::Quiz => "quiz",
        }
    }
}

impl FromStr for ContentType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "notes" => Ok(ContentType::Notes),
            "flashcards" => Ok(ContentType::Flashcards),
            "quiz" => Ok(ContentType::Quiz),
            other => Err(ParseEnumError::new("content type", other)),
        }
    }
}

/// Positional edit applied to shared notes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditKind {
    Insert,
    Delete,
    Replace,
}

impl EditKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EditKind::Insert => "insert",
            EditKind::Delete => "delete",
            EditKind::Replace => "replace",
        }
    }
}

impl FromStr for EditKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "insert" => Ok(EditKind::Insert),
            "delete" => Ok(EditKind::Delete),
            "replace" => Ok(EditKind::Replace),
            other => Err(ParseEnumError::new("edit kind", other)),
        }
    }
}

/// Identifies one live transport connection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A broadcast group: every connection in a room, or in a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKey {
    Room(Uuid),
    Session(Uuid),
}

impl ChannelKey {
    /// Wire form, `room_<id>` / `session_<id>`.
    pub fn to_key(&self) -> String {
        match self {
            ChannelKey::Room(id) => format!("{ROOM_CHANNEL_PREFIX}{id}"),
            ChannelKey::Session(id) => format!("{SESSION_CHANNEL_PREFIX}{id}"),
        }
    }
}

impl std::fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_key_wire_form() {
        let id = Uuid::new_v4();
        let room = ChannelKey::Room(id);
        assert_eq!(room.to_key(), format!("room_{id}"));
        assert_eq!(ChannelKey::Session(id).to_string(), format!("session_{id}"));
        assert_ne!(room, ChannelKey::Session(id));
    }

    #[test]
    fn test_session_status_only_moves_forward() {
        assert_eq!(SessionStatus::Scheduled.next(), Some(SessionStatus::Active));
        assert_eq!(SessionStatus::Active.next(), Some(SessionStatus::Completed));
        assert_eq!(SessionStatus::Completed.next(), None);
    }
}
