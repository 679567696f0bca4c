//! Room roles and the permission rules attached to them.
//!
//! Every mutating room or session operation has exactly one check function
//! here; the store calls it after looking up the roles involved, so the rules
//! live in one place instead of being re-derived at each call site.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{ErrorCode, ParseEnumError};

/// A member's standing inside a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Owner,
    Admin,
    Member,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Admin => "admin",
            Role::Member => "member",
        }
    }

    /// Owners and admins manage the member list.
    pub fn is_manager(&self) -> bool {
        matches!(self, Role::Owner | Role::Admin)
    }
}

impl FromStr for Role {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "owner" => Ok(Role::Owner),
            "admin" => Ok(Role::Admin),
            "member" => Ok(Role::Member),
            other => Err(ParseEnumError::new("role", other)),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a permission check refused an operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Denied {
    #[error("Insufficient role: {0}")]
    InsufficientRole(&'static str),

    #[error("The room owner cannot be removed")]
    CannotRemoveOwner,

    #[error("The owner cannot leave the room; delete it instead")]
    OwnerMustDelete,
}

impl Denied {
    pub fn code(&self) -> ErrorCode {
        match self {
            Denied::InsufficientRole(_) => ErrorCode::PermissionDenied,
            Denied::CannotRemoveOwner => ErrorCode::CannotRemoveOwner,
            Denied::OwnerMustDelete => ErrorCode::OwnerMustDelete,
        }
    }
}

pub fn check_invite(inviter: Role) -> Result<(), Denied> {
    if inviter.is_manager() {
        Ok(())
    } else {
        Err(Denied::InsufficientRole("only owners and admins can invite"))
    }
}

/// Owners remove anyone but themselves; admins remove plain members only.
pub fn check_remove(remover: Role, target: Role) -> Result<(), Denied> {
    if !remover.is_manager() {
        return Err(Denied::InsufficientRole("only owners and admins can remove members"));
    }
    match (remover, target) {
        (_, Role::Owner) => Err(Denied::CannotRemoveOwner),
        (Role::Admin, Role::Admin) => Err(Denied::InsufficientRole("admins cannot remove other admins")),
        _ => Ok(()),
    }
}

pub fn check_promote(promoter: Role, target: Role) -> Result<(), Denied> {
    if promoter != Role::Owner {
        return Err(Denied::InsufficientRole("only the owner can promote"));
    }
    if target == Role::Owner {
        return Err(Denied::InsufficientRole("the owner role cannot be changed"));
    }
    Ok(())
}

pub fn check_leave(role: Role) -> Result<(), Denied> {
    if role == Role::Owner {
        Err(Denied::OwnerMustDelete)
    } else {
        Ok(())
    }
}

pub fn check_delete_room(role: Role) -> Result<(), Denied> {
    if role == Role::Owner {
        Ok(())
    } else {
        Err(Denied::InsufficientRole("only the owner can delete the room"))
    }
}

/// Starting or ending a session: its creator, the room owner, or any
/// owner/admin member.
pub fn check_session_control(
    is_creator: bool,
    is_room_owner: bool,
    role: Option<Role>,
) -> Result<(), Denied> {
    if is_creator || is_room_owner || role.is_some_and(|r| r.is_manager()) {
        Ok(())
    } else {
        Err(Denied::InsufficientRole("only the creator, owner or admins control sessions"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trips_through_str() {
        for role in [Role::Owner, Role::Admin, Role::Member] {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert!("moderator".parse::<Role>().is_err());
    }

    #[test]
    fn test_remove_matrix() {
        assert_eq!(check_remove(Role::Owner, Role::Owner), Err(Denied::CannotRemoveOwner));
        assert_eq!(check_remove(Role::Admin, Role::Owner), Err(Denied::CannotRemoveOwner));
        assert!(check_remove(Role::Owner, Role::Admin).is_ok());
        assert!(check_remove(Role::Owner, Role::Member).is_ok());
        assert!(check_remove(Role::Admin, Role::Member).is_ok());
        assert_eq!(
            check_remove(Role::Admin, Role::Admin).unwrap_err().code(),
            ErrorCode::PermissionDenied
        );
        assert!(check_remove(Role::Member, Role::Member).is_err());
    }

    #[test]
    fn test_owner_cannot_leave() {
        assert_eq!(check_leave(Role::Owner), Err(Denied::OwnerMustDelete));
        assert!(check_leave(Role::Admin).is_ok());
        assert!(check_leave(Role::Member).is_ok());
    }

    #[test]
    fn test_only_owner_promotes_and_deletes() {
        assert!(check_promote(Role::Owner, Role::Member).is_ok());
        assert!(check_promote(Role::Admin, Role::Member).is_err());
        assert!(check_promote(Role::Owner, Role::Owner).is_err());
        assert!(check_delete_room(Role::Owner).is_ok());
        assert!(check_delete_room(Role::Admin).is_err());
    }

    #[test]
    fn test_session_control() {
        assert!(check_session_control(true, false, Some(Role::Member)).is_ok());
        assert!(check_session_control(false, true, None).is_ok());
        assert!(check_session_control(false, false, Some(Role::Admin)).is_ok());
        assert!(check_session_control(false, false, Some(Role::Member)).is_err());
        assert!(check_session_control(false, false, None).is_err());
    }
}
