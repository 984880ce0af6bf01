//! In-memory collaborators for engine tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use async_trait::async_trait;

use super::collaborators::{
    IdentityVerifier, RelationshipFilter, RepositoryError, RoomDraft, RoomRecord, RoomRepository,
    UserDirectory,
};
use super::events::{RoomId, RoomMessage, UserId};

#[derive(Default)]
struct Tables {
    users: HashMap<UserId, String>,
    online: HashSet<UserId>,
    rooms: HashMap<RoomId, RoomRecord>,
    messages: Vec<RoomMessage>,
    /// (blocker, blocked)
    blocks: HashSet<(UserId, UserId)>,
}

/// Every collaborator backed by hash maps. Tokens are `token-<user id>`.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    next_id: AtomicI64,
    fail_deletes: AtomicBool,
}

impl MemoryStore {
    pub fn with_users(users: &[(UserId, &str)]) -> Self {
        let store = Self::default();
        {
            let mut tables = store.tables.lock().unwrap();
            for (id, nick) in users {
                tables.users.insert(*id, nick.to_string());
            }
        }
        store
    }

    /// Make every later `delete_room` call fail.
    pub fn fail_deletes(&self) {
        self.fail_deletes.store(true, Ordering::SeqCst);
    }

    pub fn token(user_id: UserId) -> String {
        format!("token-{user_id}")
    }

    pub fn has_room(&self, id: RoomId) -> bool {
        self.tables.lock().unwrap().rooms.contains_key(&id)
    }

    pub fn room(&self, id: RoomId) -> Option<RoomRecord> {
        self.tables.lock().unwrap().rooms.get(&id).cloned()
    }

    pub fn messages(&self, room_id: RoomId) -> Vec<RoomMessage> {
        self.tables
            .lock()
            .unwrap()
            .messages
            .iter()
            .filter(|m| m.room_id == room_id)
            .cloned()
            .collect()
    }

    pub fn is_online(&self, user_id: UserId) -> bool {
        self.tables.lock().unwrap().online.contains(&user_id)
    }
}

#[async_trait]
impl IdentityVerifier for MemoryStore {
    async fn verify(&self, token: &str) -> Result<UserId, RepositoryError> {
        token
            .strip_prefix("token-")
            .and_then(|id| id.parse().ok())
            .ok_or_else(|| RepositoryError::Unauthorized("bad token".into()))
    }
}

#[async_trait]
impl UserDirectory for MemoryStore {
    async fn nickname(&self, user_id: UserId) -> Result<Option<String>, RepositoryError> {
        Ok(self.tables.lock().unwrap().users.get(&user_id).cloned())
    }

    async fn find_by_nickname(&self, nickname: &str) -> Result<Option<UserId>, RepositoryError> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .users
            .iter()
            .find(|(_, n)| n.as_str() == nickname)
            .map(|(id, _)| *id))
    }

    async fn set_online(&self, user_id: UserId, online: bool) -> Result<(), RepositoryError> {
        let mut tables = self.tables.lock().unwrap();
        if online {
            tables.online.insert(user_id);
        } else {
            tables.online.remove(&user_id);
        }
        Ok(())
    }
}

#[async_trait]
impl RoomRepository for MemoryStore {
    async fn allocate_room(&self, draft: &RoomDraft) -> Result<RoomId, RepositoryError> {
        let mut tables = self.tables.lock().unwrap();
        if tables.rooms.values().any(|r| r.name == draft.name) {
            return Err(RepositoryError::Conflict);
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        tables.rooms.insert(
            id,
            RoomRecord {
                id,
                name: draft.name.clone(),
                owner: draft.owner,
                admins: vec![draft.owner],
                banned: vec![],
                muted: vec![],
                members: vec![draft.owner],
                status: draft.status,
                password_hash: draft.password_hash.clone(),
            },
        );
        Ok(id)
    }

    async fn save_room(&self, record: &RoomRecord) -> Result<(), RepositoryError> {
        let mut tables = self.tables.lock().unwrap();
        if let Some(existing) = tables.rooms.get_mut(&record.id) {
            *existing = record.clone();
        }
        Ok(())
    }

    async fn delete_room(&self, room_id: RoomId) -> Result<(), RepositoryError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable("delete refused".into()));
        }
        let mut tables = self.tables.lock().unwrap();
        tables.rooms.remove(&room_id);
        tables.messages.retain(|m| m.room_id != room_id);
        Ok(())
    }

    async fn delete_room_by_name(&self, name: &str) -> Result<(), RepositoryError> {
        let mut tables = self.tables.lock().unwrap();
        let stale: Vec<RoomId> = tables
            .rooms
            .values()
            .filter(|r| r.name == name)
            .map(|r| r.id)
            .collect();
        tables.rooms.retain(|id, _| !stale.contains(id));
        tables.messages.retain(|m| !stale.contains(&m.room_id));
        Ok(())
    }

    async fn append_message(&self, message: &RoomMessage) -> Result<(), RepositoryError> {
        self.tables.lock().unwrap().messages.push(message.clone());
        Ok(())
    }

    async fn load_rooms(&self) -> Result<Vec<RoomRecord>, RepositoryError> {
        let mut rooms: Vec<RoomRecord> =
            self.tables.lock().unwrap().rooms.values().cloned().collect();
        rooms.sort_by_key(|r| r.id);
        Ok(rooms)
    }

    async fn load_messages(
        &self,
        room_id: RoomId,
        limit: usize,
    ) -> Result<Vec<RoomMessage>, RepositoryError> {
        let all = self.messages(room_id);
        let skip = all.len().saturating_sub(limit);
        Ok(all.into_iter().skip(skip).collect())
    }
}

#[async_trait]
impl RelationshipFilter for MemoryStore {
    async fn blocked_by(&self, sender: UserId) -> Result<HashSet<UserId>, RepositoryError> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .blocks
            .iter()
            .filter(|(_, blocked)| *blocked == sender)
            .map(|(blocker, _)| *blocker)
            .collect())
    }

    async fn block(&self, sender: UserId, target: UserId) -> Result<(), RepositoryError> {
        self.tables.lock().unwrap().blocks.insert((sender, target));
        Ok(())
    }

    async fn unblock(&self, sender: UserId, target: UserId) -> Result<(), RepositoryError> {
        self.tables.lock().unwrap().blocks.remove(&(sender, target));
        Ok(())
    }
}

/// Repository whose id allocation always fails.
pub struct FailingRepository;

#[async_trait]
impl RoomRepository for FailingRepository {
    async fn allocate_room(&self, _draft: &RoomDraft) -> Result<RoomId, RepositoryError> {
        Err(RepositoryError::Unavailable("allocation refused".into()))
    }

    async fn save_room(&self, _record: &RoomRecord) -> Result<(), RepositoryError> {
        Err(RepositoryError::Unavailable("read only".into()))
    }

    async fn delete_room(&self, _room_id: RoomId) -> Result<(), RepositoryError> {
        Err(RepositoryError::Unavailable("read only".into()))
    }

    async fn delete_room_by_name(&self, _name: &str) -> Result<(), RepositoryError> {
        Err(RepositoryError::Unavailable("read only".into()))
    }

    async fn append_message(&self, _message: &RoomMessage) -> Result<(), RepositoryError> {
        Err(RepositoryError::Unavailable("read only".into()))
    }

    async fn load_rooms(&self) -> Result<Vec<RoomRecord>, RepositoryError> {
        Ok(vec![])
    }

    async fn load_messages(
        &self,
        _room_id: RoomId,
        _limit: usize,
    ) -> Result<Vec<RoomMessage>, RepositoryError> {
        Ok(vec![])
    }
}
