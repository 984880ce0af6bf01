use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use super::collaborators::RoomRecord;
use super::events::{MuteInfo, RoomId, RoomMessage, RoomSnapshot, SessionId, UserId};

/// Who can discover a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    Public,
    Private,
    Protected,
}

impl RoomStatus {
    /// Public and protected rooms are listed to everyone; private rooms only to members.
    pub fn is_discoverable(&self) -> bool {
        matches!(self, Self::Public | Self::Protected)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
            Self::Protected => "protected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "public" => Some(Self::Public),
            "private" => Some(Self::Private),
            "protected" => Some(Self::Protected),
            _ => None,
        }
    }
}

/// Durable id of a room. `Pending` until the repository has allocated one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurableId {
    Pending,
    Allocated(RoomId),
}

impl DurableId {
    pub fn get(&self) -> Option<RoomId> {
        match self {
            Self::Pending => None,
            Self::Allocated(id) => Some(*id),
        }
    }
}

/// Opaque password verifier (an argon2 PHC string). Never sent to clients.
#[derive(Clone, PartialEq, Eq)]
pub struct PasswordHandle(String);

impl PasswordHandle {
    pub fn new(phc: String) -> Self {
        Self(phc)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for PasswordHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PasswordHandle(..)")
    }
}

/// In-memory state for a single room. Guarded by the room's lock in [`super::room_store`].
#[derive(Debug)]
pub struct RoomState {
    pub id: DurableId,
    pub name: String,
    pub owner: UserId,
    /// Insertion order decides ownership succession.
    pub admins: IndexSet<UserId>,
    pub banned: IndexSet<UserId>,
    /// Mute expiry per user. Expired entries are evicted on read.
    pub muted: HashMap<UserId, DateTime<Utc>>,
    /// Users that are part of the room, in join order.
    pub members: IndexSet<UserId>,
    pub status: RoomStatus,
    pub password: Option<PasswordHandle>,
    /// Most recent messages, oldest first.
    pub messages: VecDeque<RoomMessage>,
    /// Connections receiving this room's traffic.
    pub subscribers: HashSet<SessionId>,
    pub created_at: DateTime<Utc>,
    history_limit: usize,
    deleted: bool,
}

impl RoomState {
    pub fn new(
        name: String,
        owner: UserId,
        status: RoomStatus,
        password: Option<PasswordHandle>,
        history_limit: usize,
    ) -> Self {
        Self {
            id: DurableId::Pending,
            name,
            owner,
            admins: IndexSet::from([owner]),
            banned: IndexSet::new(),
            muted: HashMap::new(),
            members: IndexSet::from([owner]),
            status,
            password,
            messages: VecDeque::new(),
            subscribers: HashSet::new(),
            created_at: Utc::now(),
            history_limit,
            deleted: false,
        }
    }

    /// Rebuild a room from its stored record.
    pub fn restore(record: RoomRecord, history: Vec<RoomMessage>, history_limit: usize) -> Self {
        let mut state = Self {
            id: DurableId::Allocated(record.id),
            name: record.name,
            owner: record.owner,
            admins: record.admins.into_iter().collect(),
            banned: record.banned.into_iter().collect(),
            muted: record.muted.into_iter().collect(),
            members: record.members.into_iter().collect(),
            status: record.status,
            password: record.password_hash.map(PasswordHandle::new),
            messages: VecDeque::new(),
            subscribers: HashSet::new(),
            created_at: Utc::now(),
            history_limit,
            deleted: false,
        };
        // The owner is always a member, even if the stored row says otherwise.
        state.members.insert(state.owner);
        for message in history {
            state.push_message(message);
        }
        state
    }

    // ── Authorization predicates (always over the acting user) ──────

    pub fn is_owner(&self, user_id: UserId) -> bool {
        self.owner == user_id
    }

    pub fn is_admin(&self, user_id: UserId) -> bool {
        self.admins.contains(&user_id)
    }

    pub fn can_moderate(&self, user_id: UserId) -> bool {
        self.is_owner(user_id) || self.is_admin(user_id)
    }

    pub fn is_member(&self, user_id: UserId) -> bool {
        self.members.contains(&user_id)
    }

    pub fn is_banned(&self, user_id: UserId) -> bool {
        self.banned.contains(&user_id)
    }

    pub fn is_password_protected(&self) -> bool {
        self.password.is_some()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub(super) fn mark_deleted(&mut self) {
        self.deleted = true;
    }

    // ── Mutes ───────────────────────────────────────────────────────

    /// Whether `user_id` is muted at `now`. An expired entry is removed on the way.
    pub fn is_muted(&mut self, user_id: UserId, now: DateTime<Utc>) -> bool {
        match self.muted.get(&user_id) {
            Some(until) if now < *until => true,
            Some(_) => {
                self.muted.remove(&user_id);
                false
            }
            None => false,
        }
    }

    /// Mute until `now + duration`. Returns false if already muted.
    pub fn mute(&mut self, user_id: UserId, now: DateTime<Utc>, duration: Duration) -> bool {
        if self.is_muted(user_id, now) {
            return false;
        }
        let duration = chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX);
        let until = now.checked_add_signed(duration).unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.muted.insert(user_id, until);
        true
    }

    pub fn unmute(&mut self, user_id: UserId) -> bool {
        self.muted.remove(&user_id).is_some()
    }

    // ── Membership ──────────────────────────────────────────────────

    /// Returns true if the user was not a member before.
    pub fn add_member(&mut self, user_id: UserId) -> bool {
        self.members.insert(user_id)
    }

    /// Remove from members and admins, keeping the order of everyone else.
    pub fn remove_member(&mut self, user_id: UserId) -> bool {
        self.admins.shift_remove(&user_id);
        self.members.shift_remove(&user_id)
    }

    /// Ban and evict. Admin entries are left alone.
    pub fn ban(&mut self, user_id: UserId) {
        self.banned.insert(user_id);
        self.members.shift_remove(&user_id);
    }

    pub fn unban(&mut self, user_id: UserId) -> bool {
        self.banned.shift_remove(&user_id)
    }

    /// Who inherits the room when `departing` (the owner) leaves: the first admin
    /// still in the room, else the first member, else nobody.
    pub fn successor(&self, departing: UserId) -> Option<UserId> {
        self.admins
            .iter()
            .find(|id| **id != departing && self.members.contains(*id))
            .or_else(|| self.members.iter().find(|id| **id != departing))
            .copied()
    }

    /// Hand the room to `next`, who also becomes an admin.
    pub fn transfer_ownership(&mut self, next: UserId) {
        self.owner = next;
        self.admins.insert(next);
        self.members.insert(next);
    }

    // ── Log ─────────────────────────────────────────────────────────

    pub fn push_message(&mut self, message: RoomMessage) {
        self.messages.push_back(message);
        while self.messages.len() > self.history_limit {
            self.messages.pop_front();
        }
    }

    // ── Views ───────────────────────────────────────────────────────

    /// Client-facing view, or None while the durable id is pending.
    pub fn snapshot(&self, now: DateTime<Utc>) -> Option<RoomSnapshot> {
        let id = self.id.get()?;
        let mut muted: Vec<MuteInfo> = self
            .muted
            .iter()
            .filter(|(_, until)| now < **until)
            .map(|(user_id, until)| MuteInfo {
                user_id: *user_id,
                until: *until,
            })
            .collect();
        muted.sort_by_key(|m| m.user_id);

        Some(RoomSnapshot {
            id,
            name: self.name.clone(),
            owner: self.owner,
            admins: self.admins.iter().copied().collect(),
            banned: self.banned.iter().copied().collect(),
            muted,
            members: self.members.iter().copied().collect(),
            status: self.status,
            password_protected: self.is_password_protected(),
        })
    }

    /// Durable record, or None while the durable id is pending.
    pub fn record(&self) -> Option<RoomRecord> {
        Some(RoomRecord {
            id: self.id.get()?,
            name: self.name.clone(),
            owner: self.owner,
            admins: self.admins.iter().copied().collect(),
            banned: self.banned.iter().copied().collect(),
            muted: self.muted.iter().map(|(u, t)| (*u, *t)).collect(),
            members: self.members.iter().copied().collect(),
            status: self.status,
            password_hash: self.password.as_ref().map(|p| p.as_str().to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room(owner: UserId) -> RoomState {
        let mut state = RoomState::new("Test".into(), owner, RoomStatus::Public, None, 3);
        state.id = DurableId::Allocated(1);
        state
    }

    #[test]
    fn test_new_room_owner_is_member_and_admin() {
        let state = room(1);
        assert!(state.is_member(1));
        assert!(state.is_owner(1));
        assert!(state.is_admin(1));
        assert!(state.can_moderate(1));
        assert!(!state.can_moderate(2));
    }

    #[test]
    fn test_successor_prefers_first_admin() {
        let mut state = room(1);
        state.add_member(2);
        state.add_member(3);
        state.admins.insert(2);
        state.admins.insert(3);
        state.remove_member(1);
        assert_eq!(state.successor(1), Some(2));
    }

    #[test]
    fn test_successor_skips_admins_who_left() {
        let mut state = room(1);
        state.add_member(3);
        state.admins.insert(2); // stale, never joined
        state.remove_member(1);
        assert_eq!(state.successor(1), Some(3));
    }

    #[test]
    fn test_successor_falls_back_to_first_member() {
        let mut state = room(1);
        state.add_member(5);
        state.add_member(4);
        state.remove_member(1);
        assert_eq!(state.successor(1), Some(5));
    }

    #[test]
    fn test_no_successor_when_alone() {
        let mut state = room(1);
        state.remove_member(1);
        assert_eq!(state.successor(1), None);
        assert!(state.members.is_empty());
    }

    #[test]
    fn test_mute_expires_lazily() {
        let mut state = room(1);
        let now = Utc::now();
        assert!(state.mute(2, now, Duration::from_secs(60)));
        assert!(state.is_muted(2, now + chrono::Duration::seconds(59)));
        assert!(!state.mute(2, now, Duration::from_secs(60)));

        // Still present until someone reads it.
        assert!(state.muted.contains_key(&2));
        assert!(!state.is_muted(2, now + chrono::Duration::seconds(60)));
        assert!(!state.muted.contains_key(&2));
    }

    #[test]
    fn test_expired_mute_can_be_renewed() {
        let mut state = room(1);
        let now = Utc::now();
        state.mute(2, now, Duration::from_secs(60));
        assert!(state.mute(2, now + chrono::Duration::seconds(61), Duration::from_secs(60)));
    }

    #[test]
    fn test_ban_evicts_member_but_keeps_admin_entry() {
        let mut state = room(1);
        state.add_member(2);
        state.admins.insert(2);
        state.ban(2);
        assert!(state.is_banned(2));
        assert!(!state.is_member(2));
        assert!(state.is_admin(2));
        assert!(state.unban(2));
        assert!(!state.is_banned(2));
        assert!(!state.unban(2));
    }

    #[test]
    fn test_history_is_capped() {
        let mut state = room(1);
        for i in 0..5 {
            state.push_message(RoomMessage {
                id: uuid::Uuid::new_v4(),
                room_id: 1,
                room_name: "Test".into(),
                sender_id: 1,
                sender_name: "user1".into(),
                message: format!("m{i}"),
                kind: super::super::events::MessageKind::Chat,
                created: Utc::now(),
            });
        }
        let texts: Vec<&str> = state.messages.iter().map(|m| m.message.as_str()).collect();
        assert_eq!(texts, ["m2", "m3", "m4"]);
    }

    #[test]
    fn test_pending_room_has_no_snapshot_or_record() {
        let state = RoomState::new("Test".into(), 1, RoomStatus::Public, None, 10);
        assert!(state.snapshot(Utc::now()).is_none());
        assert!(state.record().is_none());
    }

    #[test]
    fn test_snapshot_hides_expired_mutes() {
        let mut state = room(1);
        let now = Utc::now();
        state.mute(2, now - chrono::Duration::seconds(120), Duration::from_secs(60));
        state.mute(3, now, Duration::from_secs(60));
        let snapshot = state.snapshot(now).unwrap();
        let muted: Vec<UserId> = snapshot.muted.iter().map(|m| m.user_id).collect();
        assert_eq!(muted, [3]);
    }

    #[test]
    fn test_restore_keeps_owner_in_members() {
        let record = RoomRecord {
            id: 9,
            name: "Old".into(),
            owner: 4,
            admins: vec![4, 5],
            banned: vec![6],
            muted: vec![],
            members: vec![5],
            status: RoomStatus::Private,
            password_hash: None,
        };
        let state = RoomState::restore(record, vec![], 10);
        assert_eq!(state.id, DurableId::Allocated(9));
        assert!(state.is_member(4));
        assert_eq!(state.admins.iter().copied().collect::<Vec<_>>(), [4, 5]);
    }

    #[test]
    fn test_password_handle_debug_is_redacted() {
        let handle = PasswordHandle::new("$argon2id$secret".into());
        assert_eq!(format!("{handle:?}"), "PasswordHandle(..)");
    }
}
