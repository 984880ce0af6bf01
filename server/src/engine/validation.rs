/// Maximum message content length (bytes).
pub const MAX_MESSAGE_LENGTH: usize = 2000;

/// Maximum room name length.
pub const MAX_ROOM_NAME_LENGTH: usize = 50;

/// Maximum nickname length.
pub const MAX_NICKNAME_LENGTH: usize = 32;

/// Maximum room password length.
pub const MAX_PASSWORD_LENGTH: usize = 128;

/// Prefix reserved for implicit two-party rooms.
pub const DIRECT_ROOM_PREFIX: char = '@';

/// Validate a nickname. Must be 1-32 chars, alphanumeric + underscore/hyphen.
pub fn validate_nickname(nick: &str) -> Result<(), String> {
    if nick.is_empty() {
        return Err("Nickname cannot be empty".into());
    }
    if nick.len() > MAX_NICKNAME_LENGTH {
        return Err(format!(
            "Nickname too long (max {} characters)",
            MAX_NICKNAME_LENGTH
        ));
    }
    if !nick
        .chars()
        .all(|c| c.is_alphanumeric() || c == '_' || c == '-')
    {
        return Err("Nickname can only contain letters, numbers, underscores, and hyphens".into());
    }
    Ok(())
}

/// Validate a user-chosen room name. 1-50 chars, no control characters,
/// no surrounding whitespace, and not in the direct-room namespace.
pub fn validate_room_name(name: &str) -> Result<(), String> {
    if name.trim().is_empty() {
        return Err("Room name cannot be empty".into());
    }
    if name.len() > MAX_ROOM_NAME_LENGTH {
        return Err(format!(
            "Room name too long (max {} characters)",
            MAX_ROOM_NAME_LENGTH
        ));
    }
    if name.trim() != name {
        return Err("Room name cannot start or end with whitespace".into());
    }
    if name.chars().any(char::is_control) {
        return Err("Room name cannot contain control characters".into());
    }
    if name.starts_with(DIRECT_ROOM_PREFIX) {
        return Err(format!(
            "Room names starting with {DIRECT_ROOM_PREFIX} are reserved"
        ));
    }
    Ok(())
}

/// Validate message content. Must be non-empty and under the length limit.
pub fn validate_message(content: &str) -> Result<(), String> {
    if content.trim().is_empty() {
        return Err("Message cannot be empty".into());
    }
    if content.len() > MAX_MESSAGE_LENGTH {
        return Err(format!(
            "Message too long (max {} characters)",
            MAX_MESSAGE_LENGTH
        ));
    }
    Ok(())
}

/// Validate a new room password.
pub fn validate_password(password: &str) -> Result<(), String> {
    if password.is_empty() {
        return Err("Password cannot be empty".into());
    }
    if password.len() > MAX_PASSWORD_LENGTH {
        return Err(format!(
            "Password too long (max {} characters)",
            MAX_PASSWORD_LENGTH
        ));
    }
    Ok(())
}
