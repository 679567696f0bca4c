use tempfile::TempDir;
use uuid::Uuid;

use crate::database::Database;
use crate::models::{NewRoom, Room};

pub(crate) fn open() -> (TempDir, Database) {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open_at(&dir.path().join("cohort.db")).unwrap();
    (dir, db)
}

pub(crate) fn user(db: &Database, name: &str) -> Uuid {
    let id = Uuid::new_v4();
    let email = format!("{}@example.com", name.to_lowercase());
    db.upsert_user(id, name, Some(&email)).unwrap();
    id
}

pub(crate) fn room(db: &mut Database, owner: Uuid, max_participants: u32) -> Room {
    let draft = NewRoom {
        name: "Organic chemistry".into(),
        topic: Some("chemistry".into()),
        max_participants: Some(max_participants),
        ..Default::default()
    };
    db.create_room(&draft, owner).unwrap()
}
