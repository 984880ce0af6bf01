use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use super::events::{ChatEvent, OnlineUser, SYSTEM_NICKNAME, SYSTEM_OWNER_ID, SessionId, UserId};
use super::user_session::{Actor, UserSession};

/// Outcome of removing a connection.
#[derive(Debug)]
pub struct Departure {
    pub session: Arc<UserSession>,
    /// True when this was the user's last live connection.
    pub went_offline: bool,
}

/// Live connections per user and global presence.
pub struct ConnectionRegistry {
    /// All currently connected sessions, keyed by session ID.
    sessions: DashMap<SessionId, Arc<UserSession>>,
    /// Index: user id -> live session IDs. A user is online while this has an entry.
    by_user: DashMap<UserId, HashSet<SessionId>>,
    /// Last known nickname per user, kept after disconnect for member lists.
    nicknames: DashMap<UserId, String>,
    outbound_queue: usize,
}

impl ConnectionRegistry {
    pub fn new(outbound_queue: usize) -> Self {
        let nicknames = DashMap::new();
        nicknames.insert(SYSTEM_OWNER_ID, SYSTEM_NICKNAME.to_string());
        Self {
            sessions: DashMap::new(),
            by_user: DashMap::new(),
            nicknames,
            outbound_queue,
        }
    }

    /// Add a connection for `actor`. Returns the new session, its event receiver,
    /// and whether the user just came online.
    pub fn register(
        &self,
        actor: &Actor,
    ) -> (Arc<UserSession>, mpsc::Receiver<ChatEvent>, bool) {
        let session_id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.outbound_queue.max(1));
        let session = Arc::new(UserSession::new(
            session_id,
            actor.user_id,
            actor.nickname.clone(),
            tx,
        ));

        self.sessions.insert(session_id, session.clone());
        self.remember(actor.user_id, &actor.nickname);

        let came_online = {
            let mut live = self.by_user.entry(actor.user_id).or_default();
            live.insert(session_id);
            live.len() == 1
        };

        info!(%session_id, user_id = actor.user_id, nickname = %actor.nickname, "session registered");
        (session, rx, came_online)
    }

    /// Remove a connection. Safe to call twice; the second call returns None.
    pub fn unregister(&self, session_id: SessionId) -> Option<Departure> {
        let (_, session) = self.sessions.remove(&session_id)?;

        let went_offline = match self.by_user.get_mut(&session.user_id) {
            Some(mut live) => {
                live.remove(&session_id);
                live.is_empty()
            }
            None => true,
        };
        if went_offline {
            self.by_user
                .remove_if(&session.user_id, |_, live| live.is_empty());
        }

        info!(%session_id, user_id = session.user_id, went_offline, "session unregistered");
        Some(Departure {
            session,
            went_offline,
        })
    }

    pub fn get(&self, session_id: SessionId) -> Option<Arc<UserSession>> {
        self.sessions.get(&session_id).map(|s| s.clone())
    }

    /// Every live connection of a user (zero or more, for multi-tab fan-out).
    pub fn connections_for(&self, user_id: UserId) -> Vec<Arc<UserSession>> {
        let Some(live) = self.by_user.get(&user_id) else {
            return Vec::new();
        };
        let ids: Vec<SessionId> = live.iter().copied().collect();
        drop(live);
        ids.into_iter().filter_map(|sid| self.get(sid)).collect()
    }

    pub fn is_online(&self, user_id: UserId) -> bool {
        self.by_user.contains_key(&user_id)
    }

    /// Online users sorted by id.
    pub fn online_users(&self) -> Vec<OnlineUser> {
        let mut users: Vec<OnlineUser> = self
            .by_user
            .iter()
            .map(|entry| OnlineUser {
                user_id: *entry.key(),
                nickname: self.nickname_of(*entry.key()),
            })
            .collect();
        users.sort_by_key(|u| u.user_id);
        users
    }

    pub fn online_user_ids(&self) -> Vec<UserId> {
        self.by_user.iter().map(|entry| *entry.key()).collect()
    }

    pub fn remember(&self, user_id: UserId, nickname: &str) {
        self.nicknames.insert(user_id, nickname.to_string());
    }

    /// Last known nickname, or the numeric id when the user was never seen.
    pub fn nickname_of(&self, user_id: UserId) -> String {
        self.known_nickname(user_id)
            .unwrap_or_else(|| user_id.to_string())
    }

    pub fn known_nickname(&self, user_id: UserId) -> Option<String> {
        self.nicknames.get(&user_id).map(|n| n.clone())
    }

    pub fn find_by_nickname(&self, nickname: &str) -> Option<UserId> {
        self.nicknames
            .iter()
            .find(|entry| entry.value() == nickname)
            .map(|entry| *entry.key())
    }

    /// Send an event to one session. Vanished sessions are skipped.
    pub fn send_to(&self, session_id: SessionId, event: ChatEvent) -> bool {
        let Some(session) = self.get(session_id) else {
            return false;
        };
        if !session.send(event) {
            warn!(%session_id, "failed to send event to session (queue full or closed)");
            return false;
        }
        true
    }

    /// Send an event to every connection of a user.
    pub fn send_to_user(&self, user_id: UserId, event: &ChatEvent) {
        for session in self.connections_for(user_id) {
            if !session.send(event.clone()) {
                warn!(session_id = %session.id, user_id, "failed to send event to session");
            }
        }
    }

    /// Send an event to every live connection.
    pub fn send_to_all(&self, event: &ChatEvent) {
        for session in self.sessions.iter() {
            if !session.send(event.clone()) {
                warn!(session_id = %session.id, "failed to send event to session");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor(id: UserId, nick: &str) -> Actor {
        Actor::new(id, nick)
    }

    #[tokio::test]
    async fn test_first_connection_brings_user_online() {
        let registry = ConnectionRegistry::new(8);
        let (s1, _rx1, online1) = registry.register(&actor(1, "alice"));
        let (s2, _rx2, online2) = registry.register(&actor(1, "alice"));
        assert!(online1);
        assert!(!online2);
        assert_eq!(registry.connections_for(1).len(), 2);

        let dep = registry.unregister(s1.id).unwrap();
        assert!(!dep.went_offline);
        assert!(registry.is_online(1));

        let dep = registry.unregister(s2.id).unwrap();
        assert!(dep.went_offline);
        assert!(!registry.is_online(1));
        assert!(registry.connections_for(1).is_empty());
    }

    #[tokio::test]
    async fn test_unregister_twice_is_harmless() {
        let registry = ConnectionRegistry::new(8);
        let (s, _rx, _) = registry.register(&actor(1, "alice"));
        assert!(registry.unregister(s.id).is_some());
        assert!(registry.unregister(s.id).is_none());
    }

    #[tokio::test]
    async fn test_online_users_sorted() {
        let registry = ConnectionRegistry::new(8);
        let _a = registry.register(&actor(2, "bob"));
        let _b = registry.register(&actor(1, "alice"));
        let users = registry.online_users();
        let names: Vec<&str> = users.iter().map(|u| u.nickname.as_str()).collect();
        assert_eq!(names, ["alice", "bob"]);
    }

    #[tokio::test]
    async fn test_nickname_survives_disconnect() {
        let registry = ConnectionRegistry::new(8);
        let (s, _rx, _) = registry.register(&actor(7, "carol"));
        registry.unregister(s.id);
        assert_eq!(registry.nickname_of(7), "carol");
        assert_eq!(registry.find_by_nickname("carol"), Some(7));
        assert_eq!(registry.nickname_of(8), "8");
    }

    #[tokio::test]
    async fn test_send_to_user_reaches_every_tab() {
        let registry = ConnectionRegistry::new(8);
        let (_s1, mut rx1, _) = registry.register(&actor(1, "alice"));
        let (_s2, mut rx2, _) = registry.register(&actor(1, "alice"));
        registry.send_to_user(
            1,
            &ChatEvent::RoomDeleted {
                name: "Test".into(),
            },
        );
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_full_queue_drops_instead_of_blocking() {
        let registry = ConnectionRegistry::new(1);
        let (s, _rx, _) = registry.register(&actor(1, "alice"));
        let event = ChatEvent::RoomDeleted {
            name: "Test".into(),
        };
        assert!(registry.send_to(s.id, event.clone()));
        assert!(!registry.send_to(s.id, event));
    }
}
