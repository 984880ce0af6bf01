use bitflags::bitflags;

use super::error::{Denial, RoomError};
use super::events::UserId;
use super::room::RoomState;

bitflags! {
    /// What a role may do inside one room.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RoomPermissions: u32 {
        // ── Moderation ──
        const MUTE_MEMBERS     = 1 << 0;
        const KICK_MEMBERS     = 1 << 1;
        const BAN_MEMBERS      = 1 << 2;

        // ── Ownership ──
        const MANAGE_ADMINS    = 1 << 8;
        const MANAGE_SETTINGS  = 1 << 9;
        const DELETE_ROOM      = 1 << 10;
    }
}

pub const DEFAULT_ADMIN: RoomPermissions = RoomPermissions::MUTE_MEMBERS
    .union(RoomPermissions::KICK_MEMBERS)
    .union(RoomPermissions::BAN_MEMBERS);

pub const DEFAULT_OWNER: RoomPermissions = RoomPermissions::all();

/// A user's standing in a room, always computed for the acting user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RoomRole {
    Outsider,
    Member,
    Admin,
    Owner,
}

impl RoomRole {
    /// Banned users have no standing, whatever lists they still appear in.
    pub fn of(room: &RoomState, user_id: UserId) -> Self {
        if room.is_owner(user_id) {
            Self::Owner
        } else if room.is_banned(user_id) {
            Self::Outsider
        } else if room.is_admin(user_id) {
            Self::Admin
        } else if room.is_member(user_id) {
            Self::Member
        } else {
            Self::Outsider
        }
    }

    pub fn permissions(&self) -> RoomPermissions {
        match self {
            Self::Owner => DEFAULT_OWNER,
            Self::Admin => DEFAULT_ADMIN,
            Self::Member | Self::Outsider => RoomPermissions::empty(),
        }
    }
}

/// Refuse unless `user_id` holds every permission in `needed`.
pub fn require(room: &RoomState, user_id: UserId, needed: RoomPermissions) -> Result<(), RoomError> {
    if RoomRole::of(room, user_id).permissions().contains(needed) {
        return Ok(());
    }
    let denial = if DEFAULT_ADMIN.contains(needed) {
        Denial::NotModerator
    } else {
        Denial::NotOwner
    };
    Err(RoomError::Forbidden(denial))
}
