use thiserror::Error;

use super::collaborators::RepositoryError;

/// Why an actor was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Denial {
    #[error("you are banned from this room")]
    Banned,
    #[error("only the owner or an admin can do that")]
    NotModerator,
    #[error("only the room owner can do that")]
    NotOwner,
    #[error("you are not a member of this room")]
    NotMember,
    #[error("you are muted in this room")]
    Muted,
}

#[derive(Debug, Error)]
pub enum RoomError {
    #[error("no such room: {0}")]
    NotFound(String),
    #[error("room {0} already exists, please pick another name")]
    DuplicateName(String),
    #[error("{0}")]
    Forbidden(Denial),
    #[error("wrong password")]
    WrongPassword,
    #[error("{0} is the room owner")]
    OwnerImmune(String),
    #[error("{0} is already muted")]
    AlreadyMuted(String),
    #[error("couldn't reach {0}, not connected")]
    StaleTarget(String),
    #[error("{0}")]
    Invalid(String),
    #[error("rate limit exceeded, please slow down")]
    RateLimited,
    #[error("storage error: {0}")]
    Persistence(String),
}

impl RoomError {
    /// Status code carried by `error_message`: 1 for a taken name, 2 for a ban, 0 otherwise.
    pub fn status_code(&self) -> u8 {
        match self {
            Self::DuplicateName(_) => 1,
            Self::Forbidden(Denial::Banned) => 2,
            _ => 0,
        }
    }

    /// Map a failed durable-id allocation for `room`.
    pub fn from_allocation(room: &str, err: RepositoryError) -> Self {
        match err {
            RepositoryError::Conflict => Self::DuplicateName(room.to_string()),
            other => Self::Persistence(other.to_string()),
        }
    }
}

impl From<RepositoryError> for RoomError {
    fn from(err: RepositoryError) -> Self {
        Self::Persistence(err.to_string())
    }
}
