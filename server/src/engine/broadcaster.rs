use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use super::clock::Clock;
use super::events::{
    ChatEvent, MessageKind, RoomMessage, RoomSnapshot, SYSTEM_NICKNAME, SYSTEM_OWNER_ID,
    SYSTEM_USER_ID, SessionId, UserId,
};
use super::registry::ConnectionRegistry;
use super::room_store::RoomGuard;
use super::user_session::Actor;

/// Ordered append-and-fan-out for room traffic.
///
/// Every method takes the room's guard, so two messages for the same room can never
/// interleave: the log append, the durable write and the fan-out all happen while the
/// room is held, and per-connection queues preserve that order.
pub struct MessageBroadcaster {
    registry: Arc<ConnectionRegistry>,
    clock: Arc<dyn Clock>,
}

impl MessageBroadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>, clock: Arc<dyn Clock>) -> Self {
        Self { registry, clock }
    }

    /// Append a message to the room log and deliver it to every subscribed connection
    /// except those belonging to `skip`.
    pub fn append(
        &self,
        room: &mut RoomGuard,
        sender: &Actor,
        text: String,
        kind: MessageKind,
        skip: &HashSet<UserId>,
    ) -> RoomMessage {
        let message = RoomMessage {
            id: Uuid::new_v4(),
            room_id: room.room_id(),
            room_name: room.name.clone(),
            sender_id: sender.user_id,
            sender_name: sender.nickname.clone(),
            message: text,
            kind,
            created: self.clock.now(),
        };
        room.log(message.clone());
        debug!(room = %room.name, sender = sender.user_id, kind = kind.as_str(), "message appended");
        self.fan_out(room, &ChatEvent::Message(message.clone()), skip);
        message
    }

    /// Server-authored notice to the whole room.
    pub fn system(&self, room: &mut RoomGuard, text: impl Into<String>) -> RoomMessage {
        let system = Actor::new(SYSTEM_USER_ID, SYSTEM_NICKNAME);
        self.append(room, &system, text.into(), MessageKind::System, &HashSet::new())
    }

    /// Deliver an event to every connection subscribed to the room.
    pub fn fan_out(&self, room: &RoomGuard, event: &ChatEvent, skip: &HashSet<UserId>) {
        for session_id in room.subscribers.iter() {
            let Some(session) = self.registry.get(*session_id) else {
                // Disconnected mid-operation; cleanup will drop the subscription.
                continue;
            };
            if skip.contains(&session.user_id) {
                continue;
            }
            if !session.send(event.clone()) {
                warn!(room = %room.name, %session_id, "dropping room event for slow or closed session");
            }
        }
    }

    /// Member nicknames in join order. The system owner of seeded rooms is left out.
    pub fn member_names(&self, room: &RoomGuard) -> Vec<String> {
        room.members
            .iter()
            .filter(|id| **id != SYSTEM_OWNER_ID)
            .map(|id| self.registry.nickname_of(*id))
            .collect()
    }

    pub fn user_list(&self, room: &RoomGuard) {
        let event = ChatEvent::UserList {
            room: room.name.clone(),
            users: self.member_names(room),
        };
        self.fan_out(room, &event, &HashSet::new());
    }

    /// Publish the room's new state and push it to its subscribers.
    pub fn room_updated(&self, room: &RoomGuard) -> Option<RoomSnapshot> {
        let snapshot = room.publish(self.clock.now())?;
        self.fan_out(
            room,
            &ChatEvent::RoomUpdated {
                room: snapshot.clone(),
            },
            &HashSet::new(),
        );
        Some(snapshot)
    }

    /// Send the retained log to one connection.
    pub fn history(&self, room: &RoomGuard, session_id: SessionId) {
        let event = ChatEvent::History {
            room: room.name.clone(),
            messages: room.messages.iter().cloned().collect(),
        };
        self.registry.send_to(session_id, event);
    }

    pub fn to_user(&self, user_id: UserId, event: &ChatEvent) {
        self.registry.send_to_user(user_id, event);
    }

    pub fn to_all(&self, event: &ChatEvent) {
        self.registry.send_to_all(event);
    }

    pub fn room_deleted(&self, name: &str) {
        self.to_all(&ChatEvent::RoomDeleted {
            name: name.to_string(),
        });
    }

    pub fn public_room_updated(&self, snapshot: RoomSnapshot) {
        self.to_all(&ChatEvent::PublicRoomUpdated { room: snapshot });
    }
}
