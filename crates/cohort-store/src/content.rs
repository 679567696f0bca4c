//! Shared content, positional annotations and the collaborative edit log.

use rusqlite::params;
use uuid::Uuid;

use crate::database::Database;
use crate::error::{not_found, Result, StoreError};
use crate::models::{Annotation, EditRecord, NewContent, NoteEdit, SharedContent};
use crate::rows;

const CONTENT_SELECT: &str = "SELECT c.id, c.room_id, c.content_type, c.title, c.topic, c.grade_level,
            c.content_data, c.shared_by, u.name, c.created_at
     FROM room_content c
     JOIN users u ON u.id = c.shared_by";

const ANNOTATION_SELECT: &str = "SELECT a.id, a.room_content_id, a.user_id, u.name, a.annotation_text,
            a.position_start, a.position_end, a.created_at
     FROM room_annotations a
     JOIN users u ON u.id = a.user_id";

impl Database {
    /// Publish an artifact into a room. The payload is stored as-is and is
    /// never modified afterwards.
    pub fn share_content(
        &self,
        room_id: Uuid,
        sharer_id: Uuid,
        draft: &NewContent,
    ) -> Result<SharedContent> {
        self.require_room(room_id)?;
        self.require_member(room_id, sharer_id, "only members can share content")?;

        let title = draft.title.trim();
        if title.is_empty() {
            return Err(StoreError::Invalid("content title is empty".into()));
        }
        let payload = serde_json::to_string(&draft.payload)?;

        let id = Uuid::new_v4();
        self.conn().execute(
            "INSERT INTO room_content
                 (id, room_id, content_type, title, topic, grade_level, content_data,
                  shared_by, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                id.to_string(),
                room_id.to_string(),
                draft.content_type.as_str(),
                title,
                draft.topic,
                draft.grade_level,
                payload,
                sharer_id.to_string(),
                rows::now(),
            ],
        )?;

        tracing::info!(content_id = %id, %room_id, kind = draft.content_type.as_str(), "content shared");
        self.get_content(id)
    }

    pub fn get_content(&self, id: Uuid) -> Result<SharedContent> {
        self.conn()
            .query_row(
                &format!("{CONTENT_SELECT} WHERE c.id = ?1"),
                params![id.to_string()],
                row_to_content,
            )
            .map_err(not_found("content"))
    }

    /// Newest first.
    pub fn list_content(&self, room_id: Uuid) -> Result<Vec<SharedContent>> {
        let mut stmt = self.conn().prepare(&format!(
            "{CONTENT_SELECT} WHERE c.room_id = ?1 ORDER BY c.created_at DESC"
        ))?;
        let rows = stmt.query_map(params![room_id.to_string()], row_to_content)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }

    pub fn annotate(
        &self,
        content_id: Uuid,
        user_id: Uuid,
        text: &str,
        start: u32,
        end: u32,
    ) -> Result<Annotation> {
        if start > end {
            return Err(StoreError::Invalid(format!(
                "annotation range {start}..{end} is reversed"
            )));
        }
        let text = text.trim();
        if text.is_empty() {
            return Err(StoreError::Invalid("annotation text is empty".into()));
        }
        let content = self.get_content(content_id)?;
        self.require_member(content.room_id, user_id, "only members can annotate")?;

        let id = Uuid::new_v4();
        self.conn().execute(
            "INSERT INTO room_annotations
                 (id, room_content_id, user_id, annotation_text, position_start, position_end,
                  created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id.to_string(),
                content_id.to_string(),
                user_id.to_string(),
                text,
                start,
                end,
                rows::now(),
            ],
        )?;

        self.conn()
            .query_row(
                &format!("{ANNOTATION_SELECT} WHERE a.id = ?1"),
                params![id.to_string()],
                row_to_annotation,
            )
            .map_err(not_found("annotation"))
    }

    /// Ordered by start offset.
    pub fn annotations(&self, content_id: Uuid) -> Result<Vec<Annotation>> {
        let mut stmt = self.conn().prepare(&format!(
            "{ANNOTATION_SELECT} WHERE a.room_content_id = ?1
             ORDER BY a.position_start ASC, a.created_at ASC"
        ))?;
        let rows = stmt.query_map(params![content_id.to_string()], row_to_annotation)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }

    /// Append one row to the edit log of a piece of content in `room_id`.
    pub fn record_edit(
        &self,
        room_id: Uuid,
        content_id: Uuid,
        user_id: Uuid,
        edit: &NoteEdit,
    ) -> Result<EditRecord> {
        let created_at = rows::now_utc();
        let inserted = self.conn().execute(
            "INSERT INTO note_edits
                 (room_content_id, user_id, edit_type, position, edit_text, created_at)
             SELECT c.id, ?3, ?4, ?5, ?6, ?7
             FROM room_content c
             WHERE c.id = ?1 AND c.room_id = ?2",
            params![
                content_id.to_string(),
                room_id.to_string(),
                user_id.to_string(),
                edit.edit_type.as_str(),
                edit.position,
                edit.text,
                rows::ts(created_at),
            ],
        )?;
        if inserted == 0 {
            return Err(StoreError::NotFound("content"));
        }

        Ok(EditRecord {
            id: self.conn().last_insert_rowid(),
            content_id,
            user_id,
            edit: edit.clone(),
            created_at,
        })
    }

    /// The edit log in application order.
    pub fn edits(&self, content_id: Uuid) -> Result<Vec<EditRecord>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, room_content_id, user_id, edit_type, position, edit_text, created_at
             FROM note_edits
             WHERE room_content_id = ?1
             ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![content_id.to_string()], |row| {
            Ok(EditRecord {
                id: row.get(0)?,
                content_id: rows::uuid_at(row, 1)?,
                user_id: rows::uuid_at(row, 2)?,
                edit: NoteEdit {
                    edit_type: rows::enum_at(row, 3)?,
                    position: row.get(4)?,
                    text: row.get(5)?,
                },
                created_at: rows::ts_at(row, 6)?,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }
}

fn row_to_content(row: &rusqlite::Row<'_>) -> rusqlite::Result<SharedContent> {
    Ok(SharedContent {
        id: rows::uuid_at(row, 0)?,
        room_id: rows::uuid_at(row, 1)?,
        content_type: rows::enum_at(row, 2)?,
        title: row.get(3)?,
        topic: row.get(4)?,
        grade_level: row.get(5)?,
        payload: rows::json_at(row, 6)?,
        shared_by: rows::uuid_at(row, 7)?,
        shared_by_name: row.get(8)?,
        created_at: rows::ts_at(row, 9)?,
    })
}

fn row_to_annotation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Annotation> {
    Ok(Annotation {
        id: rows::uuid_at(row, 0)?,
        content_id: rows::uuid_at(row, 1)?,
        user_id: rows::uuid_at(row, 2)?,
        user_name: row.get(3)?,
        text: row.get(4)?,
        position_start: row.get(5)?,
        position_end: row.get(6)?,
        created_at: rows::ts_at(row, 7)?,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::Room;
    use crate::testutil;
    use cohort_shared::types::{ContentType, EditKind};
    use cohort_shared::ErrorCode;
    use serde_json::json;

    pub(crate) fn share_quiz(db: &Database, room: &Room, by: Uuid) -> SharedContent {
        let draft = NewContent {
            content_type: ContentType::Quiz,
            title: "Alkenes".into(),
            topic: Some("chemistry".into()),
            grade_level: None,
            payload: json!({"questions": [{"q": "C2H4?", "a": "ethene"}]}),
        };
        db.share_content(room.id, by, &draft).unwrap()
    }

    #[test]
    fn shared_payload_round_trips() {
        let (_dir, mut db) = testutil::open();
        let owner = testutil::user(&db, "Owner");
        let room = testutil::room(&mut db, owner, 10);

        let content = share_quiz(&db, &room, owner);
        assert_eq!(content.shared_by_name, "Owner");
        assert_eq!(content.payload["questions"][0]["a"], "ethene");
        assert_eq!(db.list_content(room.id).unwrap().len(), 1);
    }

    #[test]
    fn annotations_are_ordered_by_start() {
        let (_dir, mut db) = testutil::open();
        let owner = testutil::user(&db, "Owner");
        let stranger = testutil::user(&db, "Stranger");
        let room = testutil::room(&mut db, owner, 10);
        let content = share_quiz(&db, &room, owner);

        db.annotate(content.id, owner, "later", 40, 50).unwrap();
        db.annotate(content.id, owner, "earlier", 3, 9).unwrap();
        db.annotate(content.id, owner, "point", 20, 20).unwrap();

        let starts: Vec<_> = db
            .annotations(content.id)
            .unwrap()
            .iter()
            .map(|a| a.position_start)
            .collect();
        assert_eq!(starts, vec![3, 20, 40]);

        assert!(matches!(
            db.annotate(content.id, owner, "reversed", 9, 3),
            Err(StoreError::Invalid(_))
        ));
        let err = db.annotate(content.id, stranger, "nope", 0, 1).unwrap_err();
        assert_eq!(err.code(), ErrorCode::PermissionDenied);
    }

    #[test]
    fn edit_log_appends_in_order() {
        let (_dir, mut db) = testutil::open();
        let owner = testutil::user(&db, "Owner");
        let room = testutil::room(&mut db, owner, 10);
        let content = share_quiz(&db, &room, owner);

        let insert = NoteEdit {
            edit_type: EditKind::Insert,
            position: 0,
            text: "Hello".into(),
        };
        let delete = NoteEdit {
            edit_type: EditKind::Delete,
            position: 2,
            text: String::new(),
        };
        let first = db.record_edit(room.id, content.id, owner, &insert).unwrap();
        let second = db.record_edit(room.id, content.id, owner, &delete).unwrap();
        assert!(second.id > first.id);

        let log = db.edits(content.id).unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].edit, insert);
        assert_eq!(log[1].edit, delete);

        // Content from another room is not addressable through this room.
        assert!(matches!(
            db.record_edit(Uuid::new_v4(), content.id, owner, &insert),
            Err(StoreError::NotFound("content"))
        ));
    }
}
