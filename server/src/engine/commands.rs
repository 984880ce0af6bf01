use serde::Deserialize;

use super::error::RoomError;
use super::events::{MessageKind, UserId};
use super::room::RoomStatus;
use super::validation;

/// A moderation target, addressed either by id or by nickname.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum TargetIdentifier {
    Id(UserId),
    Nickname(String),
}

/// Inbound command from a connection, `{"event": <name>, "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ClientCommand {
    CreateRoom {
        name: String,
        status: RoomStatus,
        #[serde(default)]
        password_protected: bool,
        #[serde(default)]
        password: Option<String>,
    },
    JoinRoom {
        name: String,
        #[serde(default)]
        password: Option<String>,
    },
    LeaveRoom {
        name: String,
    },
    DeleteRoom {
        name: String,
    },
    Message {
        room: String,
        text: String,
        #[serde(default, rename = "type")]
        kind: MessageKind,
    },
    Mute {
        room: String,
        target: TargetIdentifier,
    },
    Unmute {
        room: String,
        target: TargetIdentifier,
    },
    Ban {
        room: String,
        target: TargetIdentifier,
    },
    Unban {
        room: String,
        target: TargetIdentifier,
    },
    Kick {
        room: String,
        target: TargetIdentifier,
    },
    AddAdmin {
        room: String,
        target_id: UserId,
    },
    RemoveAdmin {
        room: String,
        target_id: UserId,
    },
    ChangeRoomSettings {
        room: String,
        #[serde(default)]
        status: Option<RoomStatus>,
        #[serde(default)]
        old_password: Option<String>,
        /// `Some("")` removes the password.
        #[serde(default)]
        new_password: Option<String>,
        #[serde(default)]
        admins: Option<Vec<UserId>>,
    },
    /// Open (or reuse) the private two-party room with another user.
    OpenDirect {
        target_id: UserId,
    },
    Block {
        target_id: UserId,
    },
    Unblock {
        target_id: UserId,
    },
    /// Ask for a fresh visible-room snapshot.
    Refresh,
}

impl ClientCommand {
    /// Parse and validate a raw text frame.
    pub fn parse(text: &str) -> Result<Self, RoomError> {
        let command: Self = serde_json::from_str(text)
            .map_err(|e| RoomError::Invalid(format!("Malformed command: {e}")))?;
        command.validate()?;
        Ok(command)
    }

    /// Shape checks that need no room state.
    pub fn validate(&self) -> Result<(), RoomError> {
        match self {
            Self::CreateRoom {
                name,
                password_protected,
                password,
                ..
            } => {
                validation::validate_room_name(name).map_err(RoomError::Invalid)?;
                match (password_protected, password.as_deref()) {
                    (true, Some(pw)) => validation::validate_password(pw).map_err(RoomError::Invalid),
                    (true, None) => Err(RoomError::Invalid(
                        "A password-protected room needs a password".into(),
                    )),
                    (false, _) => Ok(()),
                }
            }
            Self::Message { text, kind, .. } => {
                if *kind == MessageKind::System {
                    return Err(RoomError::Invalid("Clients cannot send system messages".into()));
                }
                validation::validate_message(text).map_err(RoomError::Invalid)
            }
            Self::Mute { target, .. }
            | Self::Unmute { target, .. }
            | Self::Ban { target, .. }
            | Self::Unban { target, .. }
            | Self::Kick { target, .. } => match target {
                TargetIdentifier::Nickname(nick) => {
                    validation::validate_nickname(nick).map_err(RoomError::Invalid)
                }
                TargetIdentifier::Id(_) => Ok(()),
            },
            Self::ChangeRoomSettings {
                new_password: Some(pw),
                ..
            } if !pw.is_empty() => validation::validate_password(pw).map_err(RoomError::Invalid),
            _ => Ok(()),
        }
    }

    /// Room the command addresses, used to label error replies.
    pub fn room(&self) -> Option<&str> {
        match self {
            Self::CreateRoom { name, .. }
            | Self::JoinRoom { name, .. }
            | Self::LeaveRoom { name }
            | Self::DeleteRoom { name } => Some(name),
            Self::Message { room, .. }
            | Self::Mute { room, .. }
            | Self::Unmute { room, .. }
            | Self::Ban { room, .. }
            | Self::Unban { room, .. }
            | Self::Kick { room, .. }
            | Self::AddAdmin { room, .. }
            | Self::RemoveAdmin { room, .. }
            | Self::ChangeRoomSettings { room, .. } => Some(room),
            Self::OpenDirect { .. } | Self::Block { .. } | Self::Unblock { .. } | Self::Refresh => {
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_create_room() {
        let cmd = ClientCommand::parse(
            r#"{"event":"createRoom","data":{"name":"Test","status":"protected","passwordProtected":true,"password":"pw1"}}"#,
        )
        .unwrap();
        assert_eq!(
            cmd,
            ClientCommand::CreateRoom {
                name: "Test".into(),
                status: RoomStatus::Protected,
                password_protected: true,
                password: Some("pw1".into()),
            }
        );
    }

    #[test]
    fn test_parse_message_type_field() {
        let cmd = ClientCommand::parse(
            r#"{"event":"message","data":{"room":"Global","text":"hi","type":"game"}}"#,
        )
        .unwrap();
        match cmd {
            ClientCommand::Message { kind, .. } => assert_eq!(kind, MessageKind::Game),
            other => panic!("Expected Message, got {:?}", other),
        }

        let cmd =
            ClientCommand::parse(r#"{"event":"message","data":{"room":"Global","text":"hi"}}"#)
                .unwrap();
        assert!(matches!(
            cmd,
            ClientCommand::Message {
                kind: MessageKind::Chat,
                ..
            }
        ));
    }

    #[test]
    fn test_target_by_id_or_nickname() {
        let cmd =
            ClientCommand::parse(r#"{"event":"ban","data":{"room":"Global","target":42}}"#).unwrap();
        assert!(matches!(
            cmd,
            ClientCommand::Ban {
                target: TargetIdentifier::Id(42),
                ..
            }
        ));

        let cmd =
            ClientCommand::parse(r#"{"event":"kick","data":{"room":"Global","target":"bob"}}"#)
                .unwrap();
        assert!(matches!(
            cmd,
            ClientCommand::Kick {
                target: TargetIdentifier::Nickname(ref n),
                ..
            } if n == "bob"
        ));
    }

    #[test]
    fn test_unit_command() {
        assert_eq!(
            ClientCommand::parse(r#"{"event":"refresh"}"#).unwrap(),
            ClientCommand::Refresh
        );
    }

    #[test]
    fn test_unknown_event_rejected() {
        let err = ClientCommand::parse(r#"{"event":"selfDestruct","data":{}}"#).unwrap_err();
        assert!(matches!(err, RoomError::Invalid(_)));
    }

    #[test]
    fn test_missing_field_rejected() {
        assert!(ClientCommand::parse(r#"{"event":"joinRoom","data":{}}"#).is_err());
    }

    #[test]
    fn test_protected_room_requires_password() {
        let err = ClientCommand::parse(
            r#"{"event":"createRoom","data":{"name":"Test","status":"protected","passwordProtected":true}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, RoomError::Invalid(_)));
    }

    #[test]
    fn test_system_messages_rejected() {
        let err = ClientCommand::parse(
            r#"{"event":"message","data":{"room":"Global","text":"hi","type":"system"}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, RoomError::Invalid(_)));
    }

    #[test]
    fn test_reserved_room_name_rejected() {
        let err = ClientCommand::parse(
            r#"{"event":"createRoom","data":{"name":"@1-2","status":"public"}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, RoomError::Invalid(_)));
    }

    #[test]
    fn test_settings_with_empty_password_clears() {
        let cmd = ClientCommand::parse(
            r#"{"event":"changeRoomSettings","data":{"room":"Test","oldPassword":"pw1","newPassword":""}}"#,
        )
        .unwrap();
        assert_eq!(cmd.room(), Some("Test"));
    }
}
