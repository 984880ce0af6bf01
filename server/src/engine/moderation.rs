use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexSet;
use tracing::{info, warn};

use super::broadcaster::MessageBroadcaster;
use super::clock::Clock;
use super::error::RoomError;
use super::events::UserId;
use super::membership::{MembershipManager, check_password, hash_password};
use super::permissions::{RoomPermissions, require};
use super::registry::ConnectionRegistry;
use super::room::RoomStatus;
use super::room_store::{RoomChange, RoomGuard, RoomStore};
use super::user_session::Actor;

/// Requested changes to a room's settings. `None` leaves a field alone.
#[derive(Debug, Clone, Default)]
pub struct SettingsChange {
    pub status: Option<RoomStatus>,
    pub old_password: Option<String>,
    /// `Some("")` removes the password.
    pub new_password: Option<String>,
    pub admins: Option<Vec<UserId>>,
}

/// Role checks and the mutations only moderators or owners may perform.
pub struct ModerationEngine {
    store: Arc<RoomStore>,
    registry: Arc<ConnectionRegistry>,
    broadcaster: Arc<MessageBroadcaster>,
    membership: Arc<MembershipManager>,
    clock: Arc<dyn Clock>,
    mute_duration: Duration,
}

impl ModerationEngine {
    pub fn new(
        store: Arc<RoomStore>,
        registry: Arc<ConnectionRegistry>,
        broadcaster: Arc<MessageBroadcaster>,
        membership: Arc<MembershipManager>,
        clock: Arc<dyn Clock>,
        mute_duration: Duration,
    ) -> Self {
        Self {
            store,
            registry,
            broadcaster,
            membership,
            clock,
            mute_duration,
        }
    }

    pub async fn mute(
        &self,
        actor: &Actor,
        target: &Actor,
        name: &str,
    ) -> Result<RoomChange, RoomError> {
        let mut room = self.store.lock(name).await?;
        require(&room, actor.user_id, RoomPermissions::MUTE_MEMBERS)?;

        if !room.mute(target.user_id, self.clock.now(), self.mute_duration) {
            return Err(RoomError::AlreadyMuted(target.nickname.clone()));
        }
        self.broadcaster.system(
            &mut room,
            format!(
                "{} has been muted by {} for {} seconds",
                target.nickname,
                actor.nickname,
                self.mute_duration.as_secs()
            ),
        );
        info!(room = %name, actor = actor.user_id, target = target.user_id, "user muted");
        Ok(self.finish(&room, vec![target.user_id]))
    }

    pub async fn unmute(
        &self,
        actor: &Actor,
        target: &Actor,
        name: &str,
    ) -> Result<RoomChange, RoomError> {
        let mut room = self.store.lock(name).await?;
        require(&room, actor.user_id, RoomPermissions::MUTE_MEMBERS)?;

        let now = self.clock.now();
        let was_muted = room.is_muted(target.user_id, now);
        room.unmute(target.user_id);
        if !was_muted {
            return Ok(RoomChange::unchanged(name));
        }
        self.broadcaster.system(
            &mut room,
            format!("{} has been unmuted by {}", target.nickname, actor.nickname),
        );
        info!(room = %name, actor = actor.user_id, target = target.user_id, "user unmuted");
        Ok(self.finish(&room, vec![target.user_id]))
    }

    /// Ban and evict. A ban against the owner is refused and announced to the room.
    pub async fn ban(
        &self,
        actor: &Actor,
        target: &Actor,
        name: &str,
    ) -> Result<RoomChange, RoomError> {
        let mut room = self.store.lock(name).await?;
        require(&room, actor.user_id, RoomPermissions::BAN_MEMBERS)?;

        if room.is_owner(target.user_id) {
            self.broadcaster.system(
                &mut room,
                format!(
                    "{} tried to ban the room owner {}",
                    actor.nickname, target.nickname
                ),
            );
            warn!(room = %name, actor = actor.user_id, "ban against room owner refused");
            return Err(RoomError::OwnerImmune(target.nickname.clone()));
        }

        room.ban(target.user_id);
        self.broadcaster.system(
            &mut room,
            format!("{} has been banned by {}", target.nickname, actor.nickname),
        );
        self.membership.unsubscribe(&mut room, target.user_id);
        self.broadcaster.user_list(&room);
        info!(room = %name, actor = actor.user_id, target = target.user_id, "user banned");
        Ok(self.finish(&room, vec![target.user_id]))
    }

    pub async fn unban(
        &self,
        actor: &Actor,
        target: &Actor,
        name: &str,
    ) -> Result<RoomChange, RoomError> {
        let mut room = self.store.lock(name).await?;
        require(&room, actor.user_id, RoomPermissions::BAN_MEMBERS)?;

        if !room.unban(target.user_id) {
            return Ok(RoomChange::unchanged(name));
        }
        self.broadcaster.system(
            &mut room,
            format!("{} has been unbanned by {}", target.nickname, actor.nickname),
        );
        info!(room = %name, actor = actor.user_id, target = target.user_id, "user unbanned");
        Ok(self.finish(&room, vec![target.user_id]))
    }

    /// Remove the target from the room without banning them. Fails with
    /// `StaleTarget` when the target has no live connection; the room hears about it either way.
    pub async fn kick(
        &self,
        actor: &Actor,
        target: &Actor,
        name: &str,
    ) -> Result<RoomChange, RoomError> {
        let mut room = self.store.lock(name).await?;
        require(&room, actor.user_id, RoomPermissions::KICK_MEMBERS)?;

        if room.is_owner(target.user_id) {
            return Err(RoomError::OwnerImmune(target.nickname.clone()));
        }
        if !self.registry.is_online(target.user_id) {
            self.broadcaster.system(
                &mut room,
                format!("couldn't kick {}, not connected.", target.nickname),
            );
            return Err(RoomError::StaleTarget(target.nickname.clone()));
        }

        self.broadcaster.system(
            &mut room,
            format!("{} has been kicked by {}", target.nickname, actor.nickname),
        );
        self.membership.unsubscribe(&mut room, target.user_id);
        room.remove_member(target.user_id);
        self.broadcaster.user_list(&room);
        info!(room = %name, actor = actor.user_id, target = target.user_id, "user kicked");
        Ok(self.finish(&room, vec![target.user_id]))
    }

    pub async fn add_admin(
        &self,
        actor: &Actor,
        target: &Actor,
        name: &str,
    ) -> Result<RoomChange, RoomError> {
        let mut room = self.store.lock(name).await?;
        require(&room, actor.user_id, RoomPermissions::MANAGE_ADMINS)?;

        if !room.admins.insert(target.user_id) {
            self.broadcaster
                .system(&mut room, format!("{} is already an admin", target.nickname));
            return Ok(RoomChange::unchanged(name));
        }
        self.broadcaster
            .system(&mut room, format!("{} is now an admin", target.nickname));
        info!(room = %name, target = target.user_id, "admin added");
        Ok(self.finish(&room, vec![target.user_id]))
    }

    pub async fn remove_admin(
        &self,
        actor: &Actor,
        target: &Actor,
        name: &str,
    ) -> Result<RoomChange, RoomError> {
        let mut room = self.store.lock(name).await?;
        require(&room, actor.user_id, RoomPermissions::MANAGE_ADMINS)?;

        if room.is_owner(target.user_id) {
            return Err(RoomError::OwnerImmune(target.nickname.clone()));
        }
        if !room.admins.shift_remove(&target.user_id) {
            self.broadcaster
                .system(&mut room, format!("{} is not an admin", target.nickname));
            return Ok(RoomChange::unchanged(name));
        }
        self.broadcaster
            .system(&mut room, format!("{} is no longer an admin", target.nickname));
        info!(room = %name, target = target.user_id, "admin removed");
        Ok(self.finish(&room, vec![target.user_id]))
    }

    /// Owner-initiated deletion.
    pub async fn delete_room(&self, actor: &Actor, name: &str) -> Result<RoomChange, RoomError> {
        let mut room = self.store.lock(name).await?;
        require(&room, actor.user_id, RoomPermissions::DELETE_ROOM)?;

        self.store.delete(&mut room);
        self.broadcaster.room_deleted(name);
        Ok(RoomChange::deleted(name))
    }

    pub async fn change_settings(
        &self,
        actor: &Actor,
        name: &str,
        change: SettingsChange,
    ) -> Result<RoomChange, RoomError> {
        let mut room = self.store.lock(name).await?;
        require(&room, actor.user_id, RoomPermissions::MANAGE_SETTINGS)?;

        if let Some(new_password) = change.new_password {
            if let Some(current) = room.password.clone() {
                let old = change.old_password.unwrap_or_default();
                if !check_password(current, old).await {
                    return Err(RoomError::WrongPassword);
                }
            }
            room.password = if new_password.is_empty() {
                None
            } else {
                Some(hash_password(new_password).await?)
            };
        }

        if let Some(status) = change.status {
            room.status = status;
        }

        if let Some(admins) = change.admins {
            let owner = room.owner;
            let mut next: IndexSet<UserId> = IndexSet::from([owner]);
            next.extend(admins);
            room.admins = next;
        }

        self.broadcaster.system(
            &mut room,
            format!("{} changed the room settings", actor.nickname),
        );
        info!(room = %name, actor = actor.user_id, status = room.status.as_str(), "room settings changed");

        let snapshot = self.broadcaster.room_updated(&room);
        room.persist();
        Ok(RoomChange::everyone(name, snapshot))
    }

    /// Publish and persist after a successful mutation.
    fn finish(&self, room: &RoomGuard, affected: Vec<UserId>) -> RoomChange {
        let snapshot = self.broadcaster.room_updated(room);
        room.persist();
        RoomChange::users(&room.name, snapshot, affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::clock::ManualClock;
    use crate::engine::error::Denial;
    use crate::engine::events::ChatEvent;
    use crate::engine::testing::MemoryStore;
    use chrono::Utc;
    use tokio::sync::mpsc;

    struct Fixture {
        store: Arc<RoomStore>,
        registry: Arc<ConnectionRegistry>,
        membership: Arc<MembershipManager>,
        moderation: ModerationEngine,
        clock: Arc<ManualClock>,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let registry = Arc::new(ConnectionRegistry::new(256));
        let store = Arc::new(RoomStore::new(Arc::new(MemoryStore::default()), 50));
        let broadcaster = Arc::new(MessageBroadcaster::new(registry.clone(), clock.clone()));
        let membership = Arc::new(MembershipManager::new(
            store.clone(),
            registry.clone(),
            broadcaster.clone(),
        ));
        let moderation = ModerationEngine::new(
            store.clone(),
            registry.clone(),
            broadcaster,
            membership.clone(),
            clock.clone(),
            Duration::from_secs(60),
        );
        Fixture {
            store,
            registry,
            membership,
            moderation,
            clock,
        }
    }

    fn owner() -> Actor {
        Actor::new(1, "user1")
    }

    fn guest() -> Actor {
        Actor::new(2, "user2")
    }

    async fn room_with_guest(f: &Fixture) {
        f.membership
            .create_room(&owner(), "Test", RoomStatus::Public, None)
            .await
            .unwrap();
        f.membership.join(&guest(), "Test", None).await.unwrap();
    }

    fn system_texts(rx: &mut mpsc::Receiver<ChatEvent>) -> Vec<String> {
        let mut texts = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let ChatEvent::Message(m) = event {
                texts.push(m.message);
            }
        }
        texts
    }

    #[tokio::test]
    async fn test_member_cannot_moderate() {
        let f = fixture();
        room_with_guest(&f).await;
        let err = f
            .moderation
            .mute(&guest(), &owner(), "Test")
            .await
            .unwrap_err();
        assert!(matches!(err, RoomError::Forbidden(Denial::NotModerator)));
    }

    #[tokio::test]
    async fn test_mute_twice_is_already_muted_until_expiry() {
        let f = fixture();
        room_with_guest(&f).await;
        f.moderation.mute(&owner(), &guest(), "Test").await.unwrap();
        let err = f
            .moderation
            .mute(&owner(), &guest(), "Test")
            .await
            .unwrap_err();
        assert!(matches!(err, RoomError::AlreadyMuted(_)));

        f.clock.advance(chrono::Duration::seconds(61));
        assert!(f.moderation.mute(&owner(), &guest(), "Test").await.is_ok());
    }

    #[tokio::test]
    async fn test_unmute() {
        let f = fixture();
        room_with_guest(&f).await;
        f.moderation.mute(&owner(), &guest(), "Test").await.unwrap();
        f.moderation.unmute(&owner(), &guest(), "Test").await.unwrap();
        assert!(f.store.get("Test").unwrap().muted.is_empty());
    }

    #[tokio::test]
    async fn test_ban_evicts_and_unban_restores_access() {
        let f = fixture();
        let (_s, _rx, _) = f.registry.register(&guest());
        room_with_guest(&f).await;

        f.moderation.ban(&owner(), &guest(), "Test").await.unwrap();
        {
            let room = f.store.lock("Test").await.unwrap();
            assert!(room.is_banned(2));
            assert!(!room.is_member(2));
            assert!(room.subscribers.is_empty());
        }

        f.moderation.unban(&owner(), &guest(), "Test").await.unwrap();
        assert!(f.store.get("Test").unwrap().banned.is_empty());
        assert!(f.membership.join(&guest(), "Test", None).await.is_ok());
    }

    #[tokio::test]
    async fn test_ban_against_owner_is_announced() {
        let f = fixture();
        let (_s, mut rx, _) = f.registry.register(&owner());
        room_with_guest(&f).await;
        f.moderation
            .add_admin(&owner(), &guest(), "Test")
            .await
            .unwrap();
        system_texts(&mut rx);

        let err = f
            .moderation
            .ban(&guest(), &owner(), "Test")
            .await
            .unwrap_err();
        assert!(matches!(err, RoomError::OwnerImmune(_)));
        let texts = system_texts(&mut rx);
        assert_eq!(texts, ["user2 tried to ban the room owner user1"]);
        assert!(f.store.get("Test").unwrap().banned.is_empty());
    }

    #[tokio::test]
    async fn test_kick_offline_target_is_stale() {
        let f = fixture();
        let (_s, mut rx, _) = f.registry.register(&owner());
        room_with_guest(&f).await;
        system_texts(&mut rx);

        let err = f
            .moderation
            .kick(&owner(), &guest(), "Test")
            .await
            .unwrap_err();
        assert!(matches!(err, RoomError::StaleTarget(_)));
        assert_eq!(system_texts(&mut rx), ["couldn't kick user2, not connected."]);
        assert!(f.store.get("Test").unwrap().members.contains(&2));
    }

    #[tokio::test]
    async fn test_kick_removes_without_banning() {
        let f = fixture();
        let (_s, _rx, _) = f.registry.register(&guest());
        room_with_guest(&f).await;

        f.moderation.kick(&owner(), &guest(), "Test").await.unwrap();
        let room = f.store.get("Test").unwrap();
        assert!(!room.members.contains(&2));
        assert!(room.banned.is_empty());
        assert!(f.membership.join(&guest(), "Test", None).await.is_ok());
    }

    #[tokio::test]
    async fn test_admin_management_is_owner_only() {
        let f = fixture();
        room_with_guest(&f).await;
        let err = f
            .moderation
            .add_admin(&guest(), &guest(), "Test")
            .await
            .unwrap_err();
        assert!(matches!(err, RoomError::Forbidden(Denial::NotOwner)));

        f.moderation.add_admin(&owner(), &guest(), "Test").await.unwrap();
        let again = f.moderation.add_admin(&owner(), &guest(), "Test").await.unwrap();
        assert!(again.snapshot.is_none());
        assert_eq!(f.store.get("Test").unwrap().admins, vec![1, 2]);

        f.moderation
            .remove_admin(&owner(), &guest(), "Test")
            .await
            .unwrap();
        assert_eq!(f.store.get("Test").unwrap().admins, vec![1]);
    }

    #[tokio::test]
    async fn test_delete_room_owner_only() {
        let f = fixture();
        room_with_guest(&f).await;
        assert!(f.moderation.delete_room(&guest(), "Test").await.is_err());
        let change = f.moderation.delete_room(&owner(), "Test").await.unwrap();
        assert!(change.deleted);
        assert!(f.store.get("Test").is_err());
    }

    #[tokio::test]
    async fn test_change_password_requires_old_one() {
        let f = fixture();
        f.membership
            .create_room(&owner(), "Test", RoomStatus::Protected, Some("pw1".into()))
            .await
            .unwrap();

        let err = f
            .moderation
            .change_settings(
                &owner(),
                "Test",
                SettingsChange {
                    old_password: Some("nope".into()),
                    new_password: Some("pw2".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RoomError::WrongPassword));

        let change = f
            .moderation
            .change_settings(
                &owner(),
                "Test",
                SettingsChange {
                    status: Some(RoomStatus::Public),
                    old_password: Some("pw1".into()),
                    new_password: Some(String::new()),
                    admins: Some(vec![2]),
                },
            )
            .await
            .unwrap();
        let room = change.snapshot.unwrap();
        assert_eq!(room.status, RoomStatus::Public);
        assert!(!room.password_protected);
        assert_eq!(room.admins, vec![1, 2]);
    }
}
