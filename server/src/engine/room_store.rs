use std::ops::{Deref, DerefMut};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{Mutex, OwnedMutexGuard, mpsc, watch};
use tracing::{error, info, warn};

use super::collaborators::{RepositoryError, RoomDraft, RoomRecord, RoomRepository};
use super::error::RoomError;
use super::events::{RoomId, RoomMessage, RoomSnapshot, UserId};
use super::room::{DurableId, PasswordHandle, RoomState, RoomStatus};

/// A write to durable storage, queued per room.
#[derive(Debug)]
pub enum PersistJob {
    SaveRoom(RoomRecord),
    AppendMessage(RoomMessage),
    /// `done` flips to true once the delete has been attempted.
    DeleteRoom {
        id: RoomId,
        done: watch::Sender<bool>,
    },
}

impl PersistJob {
    fn label(&self) -> &'static str {
        match self {
            Self::SaveRoom(_) => "save_room",
            Self::AppendMessage(_) => "append_message",
            Self::DeleteRoom { .. } => "delete_room",
        }
    }
}

/// Who needs a fresh visible-room snapshot after a room mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncScope {
    Nobody,
    Users,
    Everyone,
}

/// Result of a room mutation, handed to presence once the room lock is released.
#[derive(Debug, Clone)]
pub struct RoomChange {
    pub room: String,
    /// New view of the room; None when it was deleted or nothing changed.
    pub snapshot: Option<RoomSnapshot>,
    pub affected: Vec<UserId>,
    pub scope: SyncScope,
    pub deleted: bool,
}

impl RoomChange {
    pub fn unchanged(room: &str) -> Self {
        Self {
            room: room.to_string(),
            snapshot: None,
            affected: Vec::new(),
            scope: SyncScope::Nobody,
            deleted: false,
        }
    }

    pub fn users(room: &str, snapshot: Option<RoomSnapshot>, affected: Vec<UserId>) -> Self {
        Self {
            room: room.to_string(),
            snapshot,
            affected,
            scope: SyncScope::Users,
            deleted: false,
        }
    }

    pub fn everyone(room: &str, snapshot: Option<RoomSnapshot>) -> Self {
        Self {
            room: room.to_string(),
            snapshot,
            affected: Vec::new(),
            scope: SyncScope::Everyone,
            deleted: false,
        }
    }

    pub fn deleted(room: &str) -> Self {
        Self {
            deleted: true,
            ..Self::everyone(room, None)
        }
    }
}

/// One entry of the room table.
pub struct RoomSlot {
    name: String,
    state: Arc<Mutex<RoomState>>,
    /// Last published view, readable without taking the room lock.
    summary: RwLock<Option<RoomSnapshot>>,
    writer: mpsc::UnboundedSender<PersistJob>,
}

impl RoomSlot {
    fn new(state: RoomState, repo: Arc<dyn RoomRepository>) -> Arc<Self> {
        let name = state.name.clone();
        let (writer, jobs) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(name.clone(), repo, jobs));
        Arc::new(Self {
            name,
            state: Arc::new(Mutex::new(state)),
            summary: RwLock::new(None),
            writer,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn summary(&self) -> Option<RoomSnapshot> {
        self.summary
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Wait for exclusive access. Callers must check `is_deleted` themselves.
    pub async fn lock(self: &Arc<Self>) -> RoomGuard {
        let state = self.state.clone().lock_owned().await;
        RoomGuard {
            slot: self.clone(),
            state,
        }
    }
}

/// Drain one room's persistence queue in order. Failures are logged and dropped.
async fn run_writer(
    room: String,
    repo: Arc<dyn RoomRepository>,
    mut jobs: mpsc::UnboundedReceiver<PersistJob>,
) {
    while let Some(job) = jobs.recv().await {
        let result = match &job {
            PersistJob::SaveRoom(record) => repo.save_room(record).await,
            PersistJob::AppendMessage(message) => repo.append_message(message).await,
            PersistJob::DeleteRoom { id, .. } => repo.delete_room(*id).await,
        };
        if let Err(e) = result {
            error!(%room, job = job.label(), "failed to persist room: {e}");
        }
        if let PersistJob::DeleteRoom { done, .. } = &job {
            done.send_replace(true);
        }
    }
}

/// Exclusive access to a room's state. Every mutation of a room happens through one.
pub struct RoomGuard {
    slot: Arc<RoomSlot>,
    state: OwnedMutexGuard<RoomState>,
}

impl RoomGuard {
    /// Durable id. Guards handed out by [`RoomStore`] always have one.
    pub fn room_id(&self) -> RoomId {
        self.state.id.get().unwrap_or_default()
    }

    /// Refresh the lock-free summary and return it.
    pub fn publish(&self, now: DateTime<Utc>) -> Option<RoomSnapshot> {
        let snapshot = self.state.snapshot(now);
        *self
            .slot
            .summary
            .write()
            .unwrap_or_else(|e| e.into_inner()) = snapshot.clone();
        snapshot
    }

    /// Queue a save of the full room record.
    pub fn persist(&self) {
        if let Some(record) = self.state.record() {
            self.queue(PersistJob::SaveRoom(record));
        }
    }

    /// Append to the in-memory log and queue the durable copy.
    pub fn log(&mut self, message: RoomMessage) {
        self.state.push_message(message.clone());
        self.queue(PersistJob::AppendMessage(message));
    }

    fn queue(&self, job: PersistJob) {
        if self.slot.writer.send(job).is_err() {
            warn!(room = %self.slot.name, "room writer has stopped, dropping persistence job");
        }
    }
}

impl Deref for RoomGuard {
    type Target = RoomState;

    fn deref(&self) -> &RoomState {
        &self.state
    }
}

impl DerefMut for RoomGuard {
    fn deref_mut(&mut self) -> &mut RoomState {
        &mut self.state
    }
}

/// The canonical room table, keyed by room name.
pub struct RoomStore {
    rooms: DashMap<String, Arc<RoomSlot>>,
    /// Names whose durable delete is still queued on the old room's writer.
    pending_deletes: DashMap<String, watch::Receiver<bool>>,
    repo: Arc<dyn RoomRepository>,
    history_limit: usize,
}

impl RoomStore {
    pub fn new(repo: Arc<dyn RoomRepository>, history_limit: usize) -> Self {
        Self {
            rooms: DashMap::new(),
            pending_deletes: DashMap::new(),
            repo,
            history_limit,
        }
    }

    /// Reserve `name`, allocate its durable id and return the locked room.
    ///
    /// The name is taken atomically, so of two concurrent creates exactly one wins.
    /// Until allocation finishes the room is invisible: `get` reports it missing and
    /// `lock` waits behind the creator. A failed allocation releases the name.
    ///
    /// A name freed by `delete` is reusable at once: allocation waits for the old
    /// room's durable delete, and a stored row left behind by a failed delete is
    /// dropped, since only the in-memory table decides whether a name is taken.
    pub async fn create(
        &self,
        name: &str,
        owner: UserId,
        status: RoomStatus,
        password: Option<PasswordHandle>,
    ) -> Result<RoomGuard, RoomError> {
        let draft = RoomDraft {
            name: name.to_string(),
            owner,
            status,
            password_hash: password.as_ref().map(|p| p.as_str().to_string()),
        };
        let state = RoomState::new(
            name.to_string(),
            owner,
            status,
            password,
            self.history_limit,
        );
        let slot = RoomSlot::new(state, self.repo.clone());
        // Nobody else can see the slot yet, so this never waits.
        let mut guard = slot.lock().await;

        match self.rooms.entry(name.to_string()) {
            Entry::Occupied(_) => return Err(RoomError::DuplicateName(name.to_string())),
            Entry::Vacant(vacant) => {
                vacant.insert(slot.clone());
            }
        }

        self.await_pending_delete(name).await;

        match self.allocate(&draft).await {
            Ok(id) => {
                guard.id = DurableId::Allocated(id);
                info!(room = %name, room_id = id, owner, "room created");
                Ok(guard)
            }
            Err(e) => {
                guard.mark_deleted();
                self.rooms
                    .remove_if(name, |_, current| Arc::ptr_eq(current, &slot));
                warn!(room = %name, "room id allocation failed: {e}");
                Err(RoomError::from_allocation(name, e))
            }
        }
    }

    async fn await_pending_delete(&self, name: &str) {
        let Some(mut pending) = self.pending_deletes.get(name).map(|r| r.value().clone()) else {
            return;
        };
        // A dropped sender means the writer is gone; nothing more will happen.
        let _ = pending.wait_for(|done| *done).await;
        self.pending_deletes
            .remove_if(name, |_, current| current.same_channel(&pending));
    }

    /// Allocate a durable id. The caller holds the in-memory name, so a stored row
    /// with the same name is stale and gets dropped before one retry.
    async fn allocate(&self, draft: &RoomDraft) -> Result<RoomId, RepositoryError> {
        match self.repo.allocate_room(draft).await {
            Err(RepositoryError::Conflict) => {
                warn!(room = %draft.name, "dropping stale stored room before allocation");
                self.repo.delete_room_by_name(&draft.name).await?;
                self.repo.allocate_room(draft).await
            }
            other => other,
        }
    }

    /// Current view of a room, without waiting for its lock.
    pub fn get(&self, name: &str) -> Result<RoomSnapshot, RoomError> {
        self.rooms
            .get(name)
            .and_then(|slot| slot.summary())
            .ok_or_else(|| RoomError::NotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_ok()
    }

    /// Exclusive access to a live room.
    pub async fn lock(&self, name: &str) -> Result<RoomGuard, RoomError> {
        let slot = self
            .rooms
            .get(name)
            .map(|s| s.clone())
            .ok_or_else(|| RoomError::NotFound(name.to_string()))?;
        let guard = slot.lock().await;
        if guard.is_deleted() || guard.id.get().is_none() {
            return Err(RoomError::NotFound(name.to_string()));
        }
        Ok(guard)
    }

    /// Remove a locked room from the table and queue its durable deletion.
    pub fn delete(&self, guard: &mut RoomGuard) {
        guard.mark_deleted();
        let slot = guard.slot.clone();
        self.rooms
            .remove_if(slot.name(), |_, current| Arc::ptr_eq(current, &slot));
        *slot.summary.write().unwrap_or_else(|e| e.into_inner()) = None;
        if let Some(id) = guard.id.get() {
            self.pending_deletes.retain(|_, pending| !*pending.borrow());
            let (done, pending) = watch::channel(false);
            self.pending_deletes.insert(slot.name().to_string(), pending);
            guard.queue(PersistJob::DeleteRoom { id, done });
        }
        info!(room = %slot.name(), "room deleted");
    }

    /// Put a stored room back into the table. Returns false if the name is taken.
    pub async fn restore(&self, record: RoomRecord, history: Vec<RoomMessage>) -> bool {
        let name = record.name.clone();
        let state = RoomState::restore(record, history, self.history_limit);
        let slot = RoomSlot::new(state, self.repo.clone());

        match self.rooms.entry(name.clone()) {
            Entry::Occupied(_) => {
                warn!(room = %name, "skipping stored room with a duplicate name");
                return false;
            }
            Entry::Vacant(vacant) => {
                vacant.insert(slot.clone());
            }
        }
        slot.lock().await.publish(Utc::now());
        true
    }

    /// Published views of every live room.
    pub fn summaries(&self) -> Vec<RoomSnapshot> {
        self.slots().iter().filter_map(|s| s.summary()).collect()
    }

    /// Every slot in the table, copied out so no map guard is held.
    pub fn slots(&self) -> Vec<Arc<RoomSlot>> {
        self.rooms.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{FailingRepository, MemoryStore};
    use std::time::Duration;

    fn store() -> (Arc<MemoryStore>, RoomStore) {
        let memory = Arc::new(MemoryStore::default());
        let rooms = RoomStore::new(memory.clone(), 50);
        (memory, rooms)
    }

    #[tokio::test]
    async fn test_create_allocates_id_before_visibility() {
        let (_, rooms) = store();
        let guard = rooms
            .create("Test", 1, RoomStatus::Public, None)
            .await
            .unwrap();
        // Not published yet
        assert!(matches!(rooms.get("Test"), Err(RoomError::NotFound(_))));
        let snapshot = guard.publish(Utc::now()).unwrap();
        assert!(snapshot.id > 0);
        drop(guard);
        assert_eq!(rooms.get("Test").unwrap().id, snapshot.id);
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let (_, rooms) = store();
        let _guard = rooms
            .create("Test", 1, RoomStatus::Public, None)
            .await
            .unwrap();
        let err = rooms
            .create("Test", 2, RoomStatus::Public, None)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, RoomError::DuplicateName(_)));
        assert_eq!(rooms.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_allocation_releases_name() {
        let rooms = RoomStore::new(Arc::new(FailingRepository), 50);
        let err = rooms
            .create("Test", 1, RoomStatus::Public, None)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, RoomError::Persistence(_)));
        assert!(rooms.is_empty());
        assert!(matches!(rooms.lock("Test").await, Err(RoomError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_lock_after_delete_is_not_found() {
        let (memory, rooms) = store();
        let mut guard = rooms
            .create("Test", 1, RoomStatus::Public, None)
            .await
            .unwrap();
        let id = guard.room_id();
        rooms.delete(&mut guard);
        drop(guard);
        assert!(matches!(rooms.lock("Test").await, Err(RoomError::NotFound(_))));
        assert!(rooms.get("Test").is_err());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!memory.has_room(id));
    }

    #[tokio::test]
    async fn test_deleted_name_can_be_recreated_at_once() {
        let (memory, rooms) = store();
        let mut guard = rooms
            .create("Test", 1, RoomStatus::Public, None)
            .await
            .unwrap();
        let old_id = guard.room_id();
        rooms.delete(&mut guard);
        drop(guard);

        let guard = rooms
            .create("Test", 2, RoomStatus::Public, None)
            .await
            .unwrap();
        assert_ne!(guard.room_id(), old_id);
        assert!(!memory.has_room(old_id));
        assert!(memory.has_room(guard.room_id()));
    }

    #[tokio::test]
    async fn test_failed_durable_delete_does_not_block_name() {
        let (memory, rooms) = store();
        let mut guard = rooms
            .create("Test", 1, RoomStatus::Public, None)
            .await
            .unwrap();
        let old_id = guard.room_id();
        memory.fail_deletes();
        rooms.delete(&mut guard);
        drop(guard);

        let guard = rooms
            .create("Test", 2, RoomStatus::Public, None)
            .await
            .unwrap();
        assert_eq!(guard.owner, 2);
        assert!(!memory.has_room(old_id));
        assert_eq!(memory.room(guard.room_id()).unwrap().owner, 2);
    }

    #[tokio::test]
    async fn test_persist_jobs_reach_repository_in_order() {
        let (memory, rooms) = store();
        let mut guard = rooms
            .create("Test", 1, RoomStatus::Public, None)
            .await
            .unwrap();
        guard.add_member(2);
        guard.persist();
        let id = guard.room_id();
        drop(guard);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let record = memory.room(id).unwrap();
        assert_eq!(record.members, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_restore_publishes_summary() {
        let (_, rooms) = store();
        let record = RoomRecord {
            id: 42,
            name: "Global".into(),
            owner: 0,
            admins: vec![0],
            banned: vec![],
            muted: vec![],
            members: vec![0],
            status: RoomStatus::Public,
            password_hash: None,
        };
        assert!(rooms.restore(record.clone(), vec![]).await);
        assert!(!rooms.restore(record, vec![]).await);
        assert_eq!(rooms.get("Global").unwrap().id, 42);
        assert_eq!(rooms.summaries().len(), 1);
    }
}
