use std::sync::Arc;

use tracing::{info, warn};

use super::broadcaster::MessageBroadcaster;
use super::error::{Denial, RoomError};
use super::events::{ChatEvent, SessionId, UserId};
use super::registry::ConnectionRegistry;
use super::room::{PasswordHandle, RoomStatus};
use super::room_store::{RoomChange, RoomGuard, RoomStore};
use super::user_session::Actor;
use super::validation::DIRECT_ROOM_PREFIX;
use crate::auth::password;

/// Name of the private room shared by two users, independent of who opens it.
pub fn direct_room_name(a: UserId, b: UserId) -> String {
    let (low, high) = if a <= b { (a, b) } else { (b, a) };
    format!("{DIRECT_ROOM_PREFIX}{low}-{high}")
}

/// Hash a room password on the blocking pool.
pub(super) async fn hash_password(plain: String) -> Result<PasswordHandle, RoomError> {
    tokio::task::spawn_blocking(move || password::hash_room_password(&plain))
        .await
        .map_err(|e| RoomError::Invalid(format!("Password hashing failed: {e}")))?
        .map(PasswordHandle::new)
        .map_err(|e| RoomError::Invalid(format!("Password hashing failed: {e}")))
}

/// Verify a supplied room password on the blocking pool.
pub(super) async fn check_password(handle: PasswordHandle, supplied: String) -> bool {
    tokio::task::spawn_blocking(move || password::verify_room_password(&supplied, handle.as_str()))
        .await
        .unwrap_or(false)
}

/// Join and leave semantics: password and ban gating, subscription of a user's
/// connections, ownership hand-over when the owner walks out.
pub struct MembershipManager {
    store: Arc<RoomStore>,
    registry: Arc<ConnectionRegistry>,
    broadcaster: Arc<MessageBroadcaster>,
}

impl MembershipManager {
    pub fn new(
        store: Arc<RoomStore>,
        registry: Arc<ConnectionRegistry>,
        broadcaster: Arc<MessageBroadcaster>,
    ) -> Self {
        Self {
            store,
            registry,
            broadcaster,
        }
    }

    pub async fn create_room(
        &self,
        actor: &Actor,
        name: &str,
        status: RoomStatus,
        password: Option<String>,
    ) -> Result<RoomChange, RoomError> {
        let handle = match password {
            Some(plain) if !plain.is_empty() => Some(hash_password(plain).await?),
            _ => None,
        };
        let mut room = self
            .store
            .create(name, actor.user_id, status, handle)
            .await?;

        self.subscribe(&mut room, actor.user_id);
        self.broadcaster
            .system(&mut room, format!("{} created the room", actor.nickname));
        self.broadcaster.user_list(&room);
        let snapshot = self.broadcaster.room_updated(&room);
        room.persist();

        Ok(if status.is_discoverable() {
            RoomChange::everyone(name, snapshot)
        } else {
            RoomChange::users(name, snapshot, vec![actor.user_id])
        })
    }

    /// Join a room, or just subscribe the caller's connections when already a member.
    pub async fn join(
        &self,
        actor: &Actor,
        name: &str,
        supplied_password: Option<&str>,
    ) -> Result<RoomChange, RoomError> {
        let mut room = self.store.lock(name).await?;
        let user_id = actor.user_id;

        if room.is_banned(user_id) {
            return Err(RoomError::Forbidden(Denial::Banned));
        }

        let newly_joined = !room.is_member(user_id);
        if newly_joined {
            // Direct rooms are only entered through an invitation.
            if name.starts_with(DIRECT_ROOM_PREFIX) {
                return Err(RoomError::Forbidden(Denial::NotMember));
            }
            if let Some(handle) = room.password.clone() {
                let supplied = supplied_password.unwrap_or_default().to_string();
                if !check_password(handle, supplied).await {
                    warn!(room = %name, user_id, "wrong room password");
                    return Err(RoomError::WrongPassword);
                }
            }
            room.add_member(user_id);
        }

        let subscribed = self.subscribe(&mut room, user_id);
        if !newly_joined {
            // A new tab of an existing member only needs the current member list.
            let event = ChatEvent::UserList {
                room: room.name.clone(),
                users: self.broadcaster.member_names(&room),
            };
            for session_id in subscribed {
                self.registry.send_to(session_id, event.clone());
            }
            return Ok(RoomChange::unchanged(name));
        }

        self.broadcaster
            .system(&mut room, format!("{} has joined the room", actor.nickname));
        self.broadcaster.user_list(&room);
        let snapshot = self.broadcaster.room_updated(&room);
        room.persist();

        info!(room = %name, user_id, "user joined room");
        Ok(RoomChange::users(name, snapshot, vec![user_id]))
    }

    /// Leave a room, handing ownership on or deleting the room when it empties.
    pub async fn leave(&self, actor: &Actor, name: &str) -> Result<RoomChange, RoomError> {
        let mut room = self.store.lock(name).await?;
        let user_id = actor.user_id;

        self.unsubscribe(&mut room, user_id);
        if !room.is_member(user_id) {
            return Err(RoomError::Forbidden(Denial::NotMember));
        }

        room.remove_member(user_id);
        self.broadcaster
            .system(&mut room, format!("{} has left the room", actor.nickname));
        info!(room = %name, user_id, "user left room");

        let mut affected = vec![user_id];
        if room.is_owner(user_id) {
            match room.successor(user_id) {
                Some(next) => {
                    room.transfer_ownership(next);
                    let next_name = self.registry.nickname_of(next);
                    self.broadcaster
                        .system(&mut room, format!("{next_name} is now the room owner"));
                    info!(room = %name, from = user_id, to = next, "ownership transferred");
                    affected.push(next);
                }
                None => {
                    self.store.delete(&mut room);
                    self.broadcaster.room_deleted(name);
                    return Ok(RoomChange::deleted(name));
                }
            }
        }

        self.broadcaster.user_list(&room);
        let snapshot = self.broadcaster.room_updated(&room);
        room.persist();
        Ok(RoomChange::users(name, snapshot, affected))
    }

    /// Open the private two-party room with `target`, creating it on first use.
    pub async fn open_direct(&self, actor: &Actor, target: &Actor) -> Result<RoomChange, RoomError> {
        if actor.user_id == target.user_id {
            return Err(RoomError::Invalid(
                "You cannot open a direct room with yourself".into(),
            ));
        }
        let name = direct_room_name(actor.user_id, target.user_id);
        let parties = vec![actor.user_id, target.user_id];

        let mut room = match self
            .store
            .create(&name, actor.user_id, RoomStatus::Private, None)
            .await
        {
            Ok(mut room) => {
                room.add_member(target.user_id);
                self.subscribe(&mut room, actor.user_id);
                self.subscribe(&mut room, target.user_id);
                self.broadcaster.system(
                    &mut room,
                    format!(
                        "{} opened a direct chat with {}",
                        actor.nickname, target.nickname
                    ),
                );
                self.broadcaster.user_list(&room);
                let snapshot = self.broadcaster.room_updated(&room);
                room.persist();
                info!(room = %name, "direct room opened");
                return Ok(RoomChange::users(&name, snapshot, parties));
            }
            // Already exists (or someone else just created it): reuse it.
            Err(RoomError::DuplicateName(_)) => self.store.lock(&name).await?,
            Err(e) => return Err(e),
        };

        if room.is_banned(actor.user_id) {
            return Err(RoomError::Forbidden(Denial::Banned));
        }
        let mut rejoined = Vec::new();
        for party in [actor, target] {
            if !room.is_banned(party.user_id) && room.add_member(party.user_id) {
                rejoined.push(party.nickname.clone());
            }
            self.subscribe(&mut room, party.user_id);
        }
        if rejoined.is_empty() {
            return Ok(RoomChange::unchanged(&name));
        }
        for nickname in rejoined {
            self.broadcaster
                .system(&mut room, format!("{nickname} has joined the room"));
        }
        self.broadcaster.user_list(&room);
        let snapshot = self.broadcaster.room_updated(&room);
        room.persist();
        Ok(RoomChange::users(&name, snapshot, parties))
    }

    /// Forget a closed connection in every room it was subscribed to.
    pub async fn drop_connection(&self, session_id: SessionId) {
        for slot in self.store.slots() {
            slot.lock().await.subscribers.remove(&session_id);
        }
    }

    /// Subscribe every live connection of `user_id`. Newly subscribed connections
    /// get the room's retained log. Returns those connections.
    pub(super) fn subscribe(&self, room: &mut RoomGuard, user_id: UserId) -> Vec<SessionId> {
        let mut added = Vec::new();
        for session in self.registry.connections_for(user_id) {
            if room.subscribers.insert(session.id) {
                session.set_last_room(&room.name);
                self.broadcaster.history(room, session.id);
                added.push(session.id);
            }
        }
        added
    }

    pub(super) fn unsubscribe(&self, room: &mut RoomGuard, user_id: UserId) -> usize {
        let mut removed = 0;
        for session in self.registry.connections_for(user_id) {
            if room.subscribers.remove(&session.id) {
                removed += 1;
            }
        }
        removed
    }
}
