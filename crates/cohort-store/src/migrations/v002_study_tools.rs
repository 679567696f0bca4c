use rusqlite::Connection;

const UP_SQL: &str = r#"
-- Shared study artifacts; content_data never changes after insert
CREATE TABLE IF NOT EXISTS room_content (
    id           TEXT PRIMARY KEY NOT NULL,
    room_id      TEXT NOT NULL,
    content_type TEXT NOT NULL CHECK (content_type IN ('notes', 'flashcards', 'quiz')),
    title        TEXT NOT NULL,
    topic        TEXT,
    grade_level  TEXT,
    content_data TEXT NOT NULL,             -- JSON
    shared_by    TEXT NOT NULL,
    created_at   TEXT NOT NULL,

    FOREIGN KEY (room_id) REFERENCES study_rooms(id) ON DELETE CASCADE,
    FOREIGN KEY (shared_by) REFERENCES users(id)
);

CREATE INDEX IF NOT EXISTS idx_room_content_room ON room_content(room_id, created_at);

CREATE TABLE IF NOT EXISTS room_annotations (
    id              TEXT PRIMARY KEY NOT NULL,
    room_content_id TEXT NOT NULL,
    user_id         TEXT NOT NULL,
    annotation_text TEXT NOT NULL,
    position_start  INTEGER NOT NULL,
    position_end    INTEGER NOT NULL,
    created_at      TEXT NOT NULL,

    CHECK (position_start <= position_end),
    FOREIGN KEY (room_content_id) REFERENCES room_content(id) ON DELETE CASCADE,
    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_annotations_content ON room_annotations(room_content_id, position_start);

-- Append-only collaborative edit log
CREATE TABLE IF NOT EXISTS note_edits (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    room_content_id TEXT NOT NULL,
    user_id         TEXT NOT NULL,
    edit_type       TEXT NOT NULL CHECK (edit_type IN ('insert', 'delete', 'replace')),
    position        INTEGER NOT NULL,
    edit_text       TEXT NOT NULL,
    created_at      TEXT NOT NULL,

    FOREIGN KEY (room_content_id) REFERENCES room_content(id) ON DELETE CASCADE,
    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS group_progress (
    room_id            TEXT NOT NULL,
    skill_id           TEXT NOT NULL,
    user_id            TEXT NOT NULL,
    mastery_score      REAL NOT NULL DEFAULT 0,
    questions_answered INTEGER NOT NULL DEFAULT 0,
    correct_answers    INTEGER NOT NULL DEFAULT 0,
    last_updated       TEXT NOT NULL,

    PRIMARY KEY (room_id, skill_id, user_id),
    FOREIGN KEY (room_id) REFERENCES study_rooms(id) ON DELETE CASCADE,
    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_group_progress_user ON group_progress(user_id, last_updated);

CREATE TABLE IF NOT EXISTS quiz_leaderboard (
    room_content_id    TEXT NOT NULL,
    user_id            TEXT NOT NULL,
    score              INTEGER NOT NULL,
    total_questions    INTEGER NOT NULL,
    time_taken_seconds INTEGER NOT NULL,
    completed_at       TEXT NOT NULL,

    PRIMARY KEY (room_content_id, user_id),
    FOREIGN KEY (room_content_id) REFERENCES room_content(id) ON DELETE CASCADE,
    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS session_notes (
    session_id TEXT NOT NULL,
    user_id    TEXT NOT NULL,
    notes_text TEXT NOT NULL,
    updated_at TEXT NOT NULL,

    PRIMARY KEY (session_id, user_id),
    FOREIGN KEY (session_id) REFERENCES study_sessions(id) ON DELETE CASCADE,
    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
