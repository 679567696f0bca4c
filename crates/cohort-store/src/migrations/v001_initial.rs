//! v001 -- Initial schema creation.
//!
//! Users, rooms and their members, sessions with participants, and room
//! chat.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users (mirrored from the authentication gate)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id         TEXT PRIMARY KEY NOT NULL,     -- UUID v4
    name       TEXT NOT NULL,
    email      TEXT UNIQUE,
    created_at TEXT NOT NULL                  -- RFC-3339, microsecond precision
);

-- ----------------------------------------------------------------
-- Study rooms
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS study_rooms (
    id                  TEXT PRIMARY KEY NOT NULL,
    room_code           TEXT NOT NULL UNIQUE,          -- never reissued
    name                TEXT NOT NULL,
    topic               TEXT,
    description         TEXT,
    privacy             TEXT NOT NULL DEFAULT 'public'
                        CHECK (privacy IN ('public', 'private')),
    max_participants    INTEGER NOT NULL DEFAULT 50 CHECK (max_participants > 0),
    study_material_type TEXT,
    owner_id            TEXT NOT NULL,
    created_at          TEXT NOT NULL,

    FOREIGN KEY (owner_id) REFERENCES users(id)
);

CREATE TABLE IF NOT EXISTS room_members (
    room_id     TEXT NOT NULL,
    user_id     TEXT NOT NULL,
    role        TEXT NOT NULL DEFAULT 'member'
                CHECK (role IN ('owner', 'admin', 'member')),
    joined_at   TEXT NOT NULL,
    last_active TEXT NOT NULL,

    PRIMARY KEY (room_id, user_id),
    FOREIGN KEY (room_id) REFERENCES study_rooms(id) ON DELETE CASCADE,
    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_room_members_user ON room_members(user_id);
CREATE INDEX IF NOT EXISTS idx_room_members_active ON room_members(room_id, last_active);

-- ----------------------------------------------------------------
-- Sessions
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS study_sessions (
    id               TEXT PRIMARY KEY NOT NULL,
    room_id          TEXT NOT NULL,
    title            TEXT NOT NULL,
    description      TEXT,
    scheduled_at     TEXT NOT NULL,
    duration_minutes INTEGER NOT NULL DEFAULT 60,
    status           TEXT NOT NULL DEFAULT 'scheduled'
                     CHECK (status IN ('scheduled', 'active', 'completed')),
    started_at       TEXT,
    ended_at         TEXT,
    created_by       TEXT NOT NULL,
    created_at       TEXT NOT NULL,

    FOREIGN KEY (room_id) REFERENCES study_rooms(id) ON DELETE CASCADE,
    FOREIGN KEY (created_by) REFERENCES users(id)
);

CREATE INDEX IF NOT EXISTS idx_sessions_room_status ON study_sessions(room_id, status);

CREATE TABLE IF NOT EXISTS session_participants (
    session_id TEXT NOT NULL,
    user_id    TEXT NOT NULL,
    joined_at  TEXT NOT NULL,

    PRIMARY KEY (session_id, user_id),
    FOREIGN KEY (session_id) REFERENCES study_sessions(id) ON DELETE CASCADE,
    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Room chat
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS room_chat_messages (
    id         TEXT PRIMARY KEY NOT NULL,
    room_id    TEXT NOT NULL,
    user_id    TEXT NOT NULL,
    message    TEXT NOT NULL,
    created_at TEXT NOT NULL,

    FOREIGN KEY (room_id) REFERENCES study_rooms(id) ON DELETE CASCADE,
    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_chat_room_ts ON room_chat_messages(room_id, created_at);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
