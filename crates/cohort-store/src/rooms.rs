use cohort_shared::code::generate_room_code;
use cohort_shared::constants::DEFAULT_MAX_PARTICIPANTS;
use cohort_shared::role;
use rusqlite::params;
use uuid::Uuid;

use crate::database::Database;
use crate::error::{is_unique_violation, not_found, Result, StoreError};
use crate::models::{NewRoom, Room, RoomDetails, RoomSummary};
use crate::rows;

pub(crate) const ROOM_COLUMNS: &str = "r.id, r.room_code, r.name, r.topic, r.description, r.privacy,
     r.max_participants, r.study_material_type, r.owner_id, r.created_at";

impl Database {
    /// Create a room owned by `owner_id` with a freshly sampled invite code.
    pub fn create_room(&mut self, draft: &NewRoom, owner_id: Uuid) -> Result<Room> {
        self.create_room_with(draft, owner_id, generate_room_code)
    }

    /// Like [`Database::create_room`], drawing codes from `next_code`.
    ///
    /// Codes are never checked before insertion; a collision surfaces as a
    /// unique-index violation and the insert is retried with the next code.
    pub fn create_room_with<F>(
        &mut self,
        draft: &NewRoom,
        owner_id: Uuid,
        mut next_code: F,
    ) -> Result<Room>
    where
        F: FnMut() -> String,
    {
        let name = draft.name.trim();
        if name.is_empty() {
            return Err(StoreError::Invalid("room name is empty".into()));
        }
        let max_participants = draft.max_participants.unwrap_or(DEFAULT_MAX_PARTICIPANTS);
        if max_participants == 0 {
            return Err(StoreError::Invalid("max_participants must be positive".into()));
        }

        let id = Uuid::new_v4();
        let created_at = rows::now_utc();
        let created = rows::ts(created_at);

        let tx = self.conn_mut().transaction()?;

        let code = loop {
            let code = next_code();
            let inserted = tx.execute(
                "INSERT INTO study_rooms
                     (id, room_code, name, topic, description, privacy, max_participants,
                      study_material_type, owner_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    id.to_string(),
                    code,
                    name,
                    draft.topic,
                    draft.description,
                    draft.privacy.as_str(),
                    max_participants,
                    draft.study_material_type,
                    owner_id.to_string(),
                    created,
                ],
            );
            match inserted {
                Ok(_) => break code,
                Err(e) if is_unique_violation(&e) => {
                    tracing::debug!(%code, "room code collision, resampling");
                }
                Err(e) => return Err(e.into()),
            }
        };

        tx.execute(
            "INSERT INTO room_members (room_id, user_id, role, joined_at, last_active)
             VALUES (?1, ?2, 'owner', ?3, ?3)
             ON CONFLICT(room_id, user_id) DO UPDATE SET role = 'owner'",
            params![id.to_string(), owner_id.to_string(), created],
        )?;

        tx.commit()?;

        tracing::info!(room_id = %id, %code, owner = %owner_id, "room created");

        Ok(Room {
            id,
            code,
            name: name.to_string(),
            topic: draft.topic.clone(),
            description: draft.description.clone(),
            privacy: draft.privacy,
            max_participants,
            study_material_type: draft.study_material_type.clone(),
            owner_id,
            created_at,
        })
    }

    pub fn get_room(&self, id: Uuid) -> Result<Room> {
        self.conn()
            .query_row(
                &format!("SELECT {ROOM_COLUMNS} FROM study_rooms r WHERE r.id = ?1"),
                params![id.to_string()],
                row_to_room,
            )
            .map_err(not_found("room"))
    }

    /// Look a room up by invite code (case-insensitive).
    pub fn get_room_by_code(&self, code: &str) -> Result<Room> {
        self.conn()
            .query_row(
                &format!("SELECT {ROOM_COLUMNS} FROM study_rooms r WHERE r.room_code = ?1"),
                params![code.trim().to_ascii_uppercase()],
                row_to_room,
            )
            .map_err(not_found("room"))
    }

    /// Room with its owner's name and the full member list.
    pub fn get_room_details(&self, id: Uuid) -> Result<RoomDetails> {
        let room = self.get_room(id)?;
        let owner_name = self.get_user(room.owner_id)?.name;
        let members = self.members(id)?;
        Ok(RoomDetails {
            room,
            owner_name,
            members,
        })
    }

    /// Every room `user_id` belongs to, most recently joined first.
    pub fn list_user_rooms(&self, user_id: Uuid) -> Result<Vec<RoomSummary>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {ROOM_COLUMNS}, m.role, m.joined_at,
                    (SELECT COUNT(*) FROM room_members c WHERE c.room_id = r.id)
             FROM study_rooms r
             JOIN room_members m ON m.room_id = r.id
             WHERE m.user_id = ?1
             ORDER BY m.joined_at DESC"
        ))?;
        let rows = stmt.query_map(params![user_id.to_string()], |row| {
            Ok(RoomSummary {
                room: row_to_room(row)?,
                role: rows::enum_at(row, 10)?,
                joined_at: rows::ts_at(row, 11)?,
                member_count: row.get(12)?,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }

    // ON DELETE CASCADE: members, sessions, chat, content and progress go with it
    pub fn delete_room(&self, room_id: Uuid, user_id: Uuid) -> Result<()> {
        self.require_room(room_id)?;
        let role = self
            .get_role(room_id, user_id)?
            .ok_or(role::Denied::InsufficientRole("only the owner can delete the room"))?;
        role::check_delete_room(role)?;

        self.conn().execute(
            "DELETE FROM study_rooms WHERE id = ?1",
            params![room_id.to_string()],
        )?;
        tracing::info!(%room_id, by = %user_id, "room deleted");
        Ok(())
    }

    pub(crate) fn require_room(&self, room_id: Uuid) -> Result<()> {
        self.conn()
            .query_row(
                "SELECT 1 FROM study_rooms WHERE id = ?1",
                params![room_id.to_string()],
                |_| Ok(()),
            )
            .map_err(not_found("room"))
    }

    /// Owner id of a room.
    pub(crate) fn room_owner(&self, room_id: Uuid) -> Result<Uuid> {
        self.conn()
            .query_row(
                "SELECT owner_id FROM study_rooms WHERE id = ?1",
                params![room_id.to_string()],
                |row| rows::uuid_at(row, 0),
            )
            .map_err(not_found("room"))
    }
}

/// Maps the first ten columns, in [`ROOM_COLUMNS`] order.
pub(crate) fn row_to_room(row: &rusqlite::Row<'_>) -> rusqlite::Result<Room> {
    Ok(Room {
        id: rows::uuid_at(row, 0)?,
        code: row.get(1)?,
        name: row.get(2)?,
        topic: row.get(3)?,
        description: row.get(4)?,
        privacy: rows::enum_at(row, 5)?,
        max_participants: row.get(6)?,
        study_material_type: row.get(7)?,
        owner_id: rows::uuid_at(row, 8)?,
        created_at: rows::ts_at(row, 9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;
    use cohort_shared::code::is_valid_room_code;
    use cohort_shared::role::Role;
    use cohort_shared::ErrorCode;

    #[test]
    fn create_room_makes_creator_owner() {
        let (_dir, mut db) = testutil::open();
        let owner = testutil::user(&db, "Owner");

        let room = testutil::room(&mut db, owner, 10);

        assert!(is_valid_room_code(&room.code));
        assert_eq!(db.get_role(room.id, owner).unwrap(), Some(Role::Owner));
        assert_eq!(db.get_room_by_code(&room.code.to_lowercase()).unwrap().id, room.id);

        let details = db.get_room_details(room.id).unwrap();
        assert_eq!(details.owner_name, "Owner");
        assert_eq!(details.members.len(), 1);
    }

    #[test]
    fn colliding_code_is_resampled() {
        let (_dir, mut db) = testutil::open();
        let owner = testutil::user(&db, "Owner");
        let draft = NewRoom {
            name: "First".into(),
            ..Default::default()
        };

        let first = db
            .create_room_with(&draft, owner, || "AAAAAAAA".to_string())
            .unwrap();
        assert_eq!(first.code, "AAAAAAAA");

        // The first draw collides with the existing room; the second wins.
        let mut draws = vec!["BBBBBBBB".to_string(), "AAAAAAAA".to_string()];
        let second = db
            .create_room_with(&draft, owner, || draws.pop().unwrap())
            .unwrap();
        assert_eq!(second.code, "BBBBBBBB");
        assert!(draws.is_empty());
    }

    #[test]
    fn many_rooms_have_distinct_codes() {
        let (_dir, mut db) = testutil::open();
        let owner = testutil::user(&db, "Owner");

        let mut codes = std::collections::HashSet::new();
        for _ in 0..50 {
            assert!(codes.insert(testutil::room(&mut db, owner, 5).code));
        }
    }

    #[test]
    fn rejects_empty_name_and_zero_capacity() {
        let (_dir, mut db) = testutil::open();
        let owner = testutil::user(&db, "Owner");

        let blank = NewRoom {
            name: "  ".into(),
            ..Default::default()
        };
        assert!(matches!(db.create_room(&blank, owner), Err(StoreError::Invalid(_))));

        let zero = NewRoom {
            name: "Zero".into(),
            max_participants: Some(0),
            ..Default::default()
        };
        assert!(matches!(db.create_room(&zero, owner), Err(StoreError::Invalid(_))));
    }

    #[test]
    fn list_user_rooms_reports_role_and_count() {
        let (_dir, mut db) = testutil::open();
        let owner = testutil::user(&db, "Owner");
        let member = testutil::user(&db, "Member");
        let room = testutil::room(&mut db, owner, 10);
        db.join_room(room.id, member, Role::Member).unwrap();

        let rooms = db.list_user_rooms(member).unwrap();
        assert_eq!(rooms.len(), 1);
        assert_eq!(rooms[0].role, Role::Member);
        assert_eq!(rooms[0].member_count, 2);
    }

    #[test]
    fn only_owner_deletes_and_delete_cascades() {
        let (_dir, mut db) = testutil::open();
        let owner = testutil::user(&db, "Owner");
        let admin = testutil::user(&db, "Admin");
        let room = testutil::room(&mut db, owner, 10);
        db.join_room(room.id, admin, Role::Admin).unwrap();

        let err = db.delete_room(room.id, admin).unwrap_err();
        assert_eq!(err.code(), ErrorCode::PermissionDenied);

        db.delete_room(room.id, owner).unwrap();
        assert!(matches!(db.get_room(room.id), Err(StoreError::NotFound("room"))));
        assert!(db.list_user_rooms(admin).unwrap().is_empty());
    }
}
