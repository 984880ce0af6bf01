use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use super::broadcaster::MessageBroadcaster;
use super::events::{ChatEvent, RoomSnapshot, UserId};
use super::membership::MembershipManager;
use super::registry::ConnectionRegistry;
use super::room::RoomStatus;
use super::room_store::{RoomChange, RoomStore, SyncScope};
use super::user_session::Actor;

/// Pushes each user's visible-room set and the online list.
///
/// Reads only the lock-free room summaries, so it may run at any time without
/// waiting on a room. Callers run it after they have released their room guard.
pub struct PresenceSynchronizer {
    store: Arc<RoomStore>,
    registry: Arc<ConnectionRegistry>,
    broadcaster: Arc<MessageBroadcaster>,
    membership: Arc<MembershipManager>,
    auto_join_public: bool,
}

impl PresenceSynchronizer {
    pub fn new(
        store: Arc<RoomStore>,
        registry: Arc<ConnectionRegistry>,
        broadcaster: Arc<MessageBroadcaster>,
        membership: Arc<MembershipManager>,
        auto_join_public: bool,
    ) -> Self {
        Self {
            store,
            registry,
            broadcaster,
            membership,
            auto_join_public,
        }
    }

    /// Rooms `user_id` may see: everything discoverable plus private rooms they belong to.
    pub fn visible_rooms(&self, user_id: UserId) -> BTreeMap<String, RoomSnapshot> {
        self.store
            .summaries()
            .into_iter()
            .filter(|room| room.is_visible_to(user_id))
            .map(|room| (room.name.clone(), room))
            .collect()
    }

    /// Discoverable rooms only, as listed to anyone.
    pub fn discoverable_rooms(&self) -> Vec<RoomSnapshot> {
        let mut rooms: Vec<RoomSnapshot> = self
            .store
            .summaries()
            .into_iter()
            .filter(|room| room.status.is_discoverable())
            .collect();
        rooms.sort_by(|a, b| a.name.cmp(&b.name));
        rooms
    }

    /// Push the full visible-room set and the online list to every connection of a user.
    pub fn sync_user(&self, user_id: UserId) {
        if !self.registry.is_online(user_id) {
            return;
        }
        let rooms = self.visible_rooms(user_id);
        debug!(user_id, rooms = rooms.len(), "syncing room snapshot");
        self.broadcaster
            .to_user(user_id, &ChatEvent::RoomSnapshotSet { rooms });
        self.broadcaster.to_user(
            user_id,
            &ChatEvent::OnlineUsersChanged {
                users: self.registry.online_users(),
            },
        );
    }

    pub fn sync_everyone(&self) {
        for user_id in self.registry.online_user_ids() {
            self.sync_user(user_id);
        }
    }

    pub fn broadcast_online(&self) {
        self.broadcaster.to_all(&ChatEvent::OnlineUsersChanged {
            users: self.registry.online_users(),
        });
    }

    /// Propagate a finished room mutation.
    pub fn apply(&self, change: &RoomChange) {
        match change.scope {
            SyncScope::Nobody => return,
            SyncScope::Users => {
                for user_id in &change.affected {
                    self.sync_user(*user_id);
                }
            }
            SyncScope::Everyone => self.sync_everyone(),
        }
        if let Some(snapshot) = &change.snapshot
            && snapshot.status.is_discoverable()
        {
            self.broadcaster.public_room_updated(snapshot.clone());
        }
    }

    /// Subscribe a fresh connection to the user's rooms, auto-join public rooms when
    /// enabled, then push the user's view.
    pub async fn on_connect(&self, actor: &Actor) {
        for slot in self.store.slots() {
            let Some(room) = slot.summary() else {
                continue;
            };
            let is_member = room.members.contains(&actor.user_id);
            let auto_join = self.auto_join_public
                && room.status == RoomStatus::Public
                && !room.password_protected
                && !room.banned.contains(&actor.user_id);
            if !is_member && !auto_join {
                continue;
            }
            match self.membership.join(actor, &room.name, None).await {
                Ok(change) => self.apply(&change),
                Err(e) => debug!(room = %room.name, user_id = actor.user_id, "auto-join skipped: {e}"),
            }
        }
        self.sync_user(actor.user_id);
    }
}
