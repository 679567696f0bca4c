//! Room membership: joining under the capacity bound, role lookups, the
//! owner/admin management operations and presence.

use chrono::{Duration, Utc};
use cohort_shared::role::{self, Denied, Role};
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use crate::database::Database;
use crate::error::{not_found, Result, StoreError};
use crate::models::Member;
use crate::rows;

const MEMBER_SELECT: &str = "SELECT m.room_id, m.user_id, u.name, u.email, m.role, m.joined_at, m.last_active
     FROM room_members m
     JOIN users u ON u.id = m.user_id";

impl Database {
    /// Add `user_id` to the room with `role`.
    ///
    /// Returns `true` when a membership row was created and `false` when the
    /// user was already a member (their last-active time is refreshed). The
    /// capacity check and the insert are one statement, so concurrent joins
    /// can never push the room past `max_participants`.
    ///
    /// Ownership is only granted by `create_room`; joining as owner is
    /// rejected.
    pub fn join_room(&self, room_id: Uuid, user_id: Uuid, role: Role) -> Result<bool> {
        if role == Role::Owner {
            return Err(StoreError::Invalid("a room has exactly one owner".into()));
        }
        let now = rows::now();

        if self.touch_presence(room_id, user_id)? {
            return Ok(false);
        }

        let inserted = self.conn().execute(
            "INSERT INTO room_members (room_id, user_id, role, joined_at, last_active)
             SELECT ?1, ?2, ?3, ?4, ?4
             FROM study_rooms r
             WHERE r.id = ?1
               AND (SELECT COUNT(*) FROM room_members c WHERE c.room_id = ?1) < r.max_participants
             ON CONFLICT(room_id, user_id) DO UPDATE SET last_active = excluded.last_active",
            params![room_id.to_string(), user_id.to_string(), role.as_str(), now],
        )?;

        if inserted > 0 {
            tracing::debug!(%room_id, %user_id, %role, "member joined");
            return Ok(true);
        }

        self.require_room(room_id)?;
        // A concurrent join for the same user may have landed in between.
        if self.is_member(room_id, user_id)? {
            return Ok(false);
        }
        Err(StoreError::Full)
    }

    pub fn is_member(&self, room_id: Uuid, user_id: Uuid) -> Result<bool> {
        Ok(self.get_role(room_id, user_id)?.is_some())
    }

    pub fn get_role(&self, room_id: Uuid, user_id: Uuid) -> Result<Option<Role>> {
        let role = self
            .conn()
            .query_row(
                "SELECT role FROM room_members WHERE room_id = ?1 AND user_id = ?2",
                params![room_id.to_string(), user_id.to_string()],
                |row| rows::enum_at::<Role>(row, 0),
            )
            .optional()?;
        Ok(role)
    }

    pub fn get_member(&self, room_id: Uuid, user_id: Uuid) -> Result<Member> {
        self.conn()
            .query_row(
                &format!("{MEMBER_SELECT} WHERE m.room_id = ?1 AND m.user_id = ?2"),
                params![room_id.to_string(), user_id.to_string()],
                row_to_member,
            )
            .map_err(not_found("member"))
    }

    /// All members, in join order.
    pub fn members(&self, room_id: Uuid) -> Result<Vec<Member>> {
        let mut stmt = self.conn().prepare(&format!(
            "{MEMBER_SELECT} WHERE m.room_id = ?1 ORDER BY m.joined_at ASC, m.rowid ASC"
        ))?;
        let rows = stmt.query_map(params![room_id.to_string()], row_to_member)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }

    /// Add the user registered under `email`. Returns the invitee's id.
    pub fn invite(&self, room_id: Uuid, inviter_id: Uuid, email: &str) -> Result<Uuid> {
        self.require_room(room_id)?;
        let inviter = self.role_or_denied(room_id, inviter_id, "only members can invite")?;
        role::check_invite(inviter)?;

        let invitee = self.find_user_by_email(email)?;
        if self.is_member(room_id, invitee.id)? {
            return Err(StoreError::AlreadyMember);
        }
        self.join_room(room_id, invitee.id, Role::Member)?;

        tracing::info!(%room_id, inviter = %inviter_id, invitee = %invitee.id, "member invited");
        Ok(invitee.id)
    }

    pub fn remove_member(&self, room_id: Uuid, remover_id: Uuid, target_id: Uuid) -> Result<()> {
        self.require_room(room_id)?;
        let remover = self.role_or_denied(room_id, remover_id, "only members can remove members")?;
        let target = self
            .get_role(room_id, target_id)?
            .ok_or(StoreError::NotFound("member"))?;
        role::check_remove(remover, target)?;

        self.delete_membership(room_id, target_id)?;
        tracing::info!(%room_id, removed = %target_id, by = %remover_id, "member removed");
        Ok(())
    }

    /// Raise a plain member to admin. Returns `false` when the target was
    /// already an admin and nothing changed.
    pub fn promote(&self, room_id: Uuid, promoter_id: Uuid, target_id: Uuid) -> Result<bool> {
        self.require_room(room_id)?;
        let promoter = self.role_or_denied(room_id, promoter_id, "only the owner can promote")?;
        let target = self
            .get_role(room_id, target_id)?
            .ok_or(StoreError::NotFound("member"))?;
        role::check_promote(promoter, target)?;

        let changed = self.conn().execute(
            "UPDATE room_members SET role = 'admin'
             WHERE room_id = ?1 AND user_id = ?2 AND role = 'member'",
            params![room_id.to_string(), target_id.to_string()],
        )? > 0;
        if changed {
            tracing::info!(%room_id, promoted = %target_id, "member promoted to admin");
        }
        Ok(changed)
    }

    pub fn leave_room(&self, room_id: Uuid, user_id: Uuid) -> Result<()> {
        let role = self
            .get_role(room_id, user_id)?
            .ok_or(StoreError::NotFound("membership"))?;
        role::check_leave(role)?;

        self.delete_membership(room_id, user_id)?;
        tracing::debug!(%room_id, %user_id, "member left");
        Ok(())
    }

    /// Refresh the member's last-active time. Returns `false` for
    /// non-members.
    pub fn touch_presence(&self, room_id: Uuid, user_id: Uuid) -> Result<bool> {
        let touched = self.conn().execute(
            "UPDATE room_members SET last_active = ?3 WHERE room_id = ?1 AND user_id = ?2",
            params![room_id.to_string(), user_id.to_string(), rows::now()],
        )?;
        Ok(touched > 0)
    }

    /// Members whose last activity falls inside the trailing `window`,
    /// most recently active first.
    pub fn active_members(&self, room_id: Uuid, window: Duration) -> Result<Vec<Member>> {
        let cutoff = rows::ts(Utc::now() - window);
        let mut stmt = self.conn().prepare(&format!(
            "{MEMBER_SELECT} WHERE m.room_id = ?1 AND m.last_active >= ?2
             ORDER BY m.last_active DESC"
        ))?;
        let rows = stmt.query_map(params![room_id.to_string(), cutoff], row_to_member)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }

    /// Role of a member of an existing room. `NotFound` for an unknown room,
    /// `Denied` for an outsider.
    pub fn member_role(&self, room_id: Uuid, user_id: Uuid) -> Result<Role> {
        self.require_room(room_id)?;
        self.role_or_denied(room_id, user_id, "not a member of this room")
    }

    /// Caller's role, or `Denied` when they are not in the room.
    pub(crate) fn role_or_denied(
        &self,
        room_id: Uuid,
        user_id: Uuid,
        reason: &'static str,
    ) -> Result<Role> {
        self.get_role(room_id, user_id)?
            .ok_or(StoreError::Denied(Denied::InsufficientRole(reason)))
    }

    pub(crate) fn require_member(
        &self,
        room_id: Uuid,
        user_id: Uuid,
        reason: &'static str,
    ) -> Result<()> {
        self.role_or_denied(room_id, user_id, reason).map(|_| ())
    }

    fn delete_membership(&self, room_id: Uuid, user_id: Uuid) -> Result<()> {
        self.conn().execute(
            "DELETE FROM room_members WHERE room_id = ?1 AND user_id = ?2 AND role != 'owner'",
            params![room_id.to_string(), user_id.to_string()],
        )?;
        Ok(())
    }
}

pub(crate) fn row_to_member(row: &rusqlite::Row<'_>) -> rusqlite::Result<Member> {
    Ok(Member {
        room_id: rows::uuid_at(row, 0)?,
        user_id: rows::uuid_at(row, 1)?,
        name: row.get(2)?,
        email: row.get(3)?,
        role: rows::enum_at(row, 4)?,
        joined_at: rows::ts_at(row, 5)?,
        last_active: rows::ts_at(row, 6)?,
    })
}
