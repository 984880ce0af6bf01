use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use super::broadcaster::MessageBroadcaster;
use super::clock::Clock;
use super::collaborators::{
    IdentityVerifier, RelationshipFilter, RepositoryError, RoomRepository, UserDirectory,
};
use super::commands::{ClientCommand, TargetIdentifier};
use super::error::{Denial, RoomError};
use super::events::{
    ChatEvent, MessageKind, OnlineUser, RoomMessage, RoomSnapshot, SYSTEM_OWNER_ID, SessionId,
    UserId,
};
use super::membership::MembershipManager;
use super::moderation::{ModerationEngine, SettingsChange};
use super::presence::PresenceSynchronizer;
use super::rate_limiter::RateLimiter;
use super::registry::ConnectionRegistry;
use super::room_store::RoomStore;
use super::user_session::{Actor, UserSession};
use crate::config::RoomSettings;

/// External systems the engine talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub identity: Arc<dyn IdentityVerifier>,
    pub directory: Arc<dyn UserDirectory>,
    pub rooms: Arc<dyn RoomRepository>,
    pub relationships: Arc<dyn RelationshipFilter>,
}

impl Collaborators {
    /// All four roles served by one backing store.
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: IdentityVerifier + UserDirectory + RoomRepository + RelationshipFilter + 'static,
    {
        Self {
            identity: store.clone(),
            directory: store.clone(),
            rooms: store.clone(),
            relationships: store,
        }
    }
}

/// The central hub that owns all live room state. Transport adapters hand it
/// verified actors and raw command frames; everything else happens in here.
pub struct ChatEngine {
    registry: Arc<ConnectionRegistry>,
    store: Arc<RoomStore>,
    broadcaster: Arc<MessageBroadcaster>,
    membership: Arc<MembershipManager>,
    moderation: ModerationEngine,
    presence: PresenceSynchronizer,
    collaborators: Collaborators,
    /// Per-user flood limit on chat messages.
    message_limiter: RateLimiter<UserId>,
    clock: Arc<dyn Clock>,
    settings: RoomSettings,
}

impl ChatEngine {
    pub fn new(collaborators: Collaborators, settings: RoomSettings, clock: Arc<dyn Clock>) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(settings.outbound_queue));
        let store = Arc::new(RoomStore::new(
            collaborators.rooms.clone(),
            settings.history_limit,
        ));
        let broadcaster = Arc::new(MessageBroadcaster::new(registry.clone(), clock.clone()));
        let membership = Arc::new(MembershipManager::new(
            store.clone(),
            registry.clone(),
            broadcaster.clone(),
        ));
        let moderation = ModerationEngine::new(
            store.clone(),
            registry.clone(),
            broadcaster.clone(),
            membership.clone(),
            clock.clone(),
            settings.mute_duration,
        );
        let presence = PresenceSynchronizer::new(
            store.clone(),
            registry.clone(),
            broadcaster.clone(),
            membership.clone(),
            settings.auto_join_public,
        );

        Self {
            registry,
            store,
            broadcaster,
            membership,
            moderation,
            presence,
            collaborators,
            message_limiter: RateLimiter::new(
                settings.message_burst,
                settings.message_refill_seconds,
            ),
            clock,
            settings,
        }
    }

    // ── Startup loading ─────────────────────────────────────────────

    /// Load stored rooms (with their recent history) into memory, or create the
    /// seed rooms when the store has none. Returns how many rooms are live.
    pub async fn load_rooms_from_db(&self) -> Result<usize, RoomError> {
        let records = self.collaborators.rooms.load_rooms().await?;

        if records.is_empty() {
            self.seed_rooms().await;
            return Ok(self.store.len());
        }

        for record in records {
            for user_id in record.members.iter().chain(record.admins.iter()) {
                if *user_id == SYSTEM_OWNER_ID || self.registry.known_nickname(*user_id).is_some() {
                    continue;
                }
                match self.collaborators.directory.nickname(*user_id).await {
                    Ok(Some(nickname)) => self.registry.remember(*user_id, &nickname),
                    Ok(None) => {}
                    Err(e) => warn!(user_id, "failed to look up nickname: {e}"),
                }
            }

            let history = match self
                .collaborators
                .rooms
                .load_messages(record.id, self.settings.history_limit)
                .await
            {
                Ok(history) => history,
                Err(e) => {
                    warn!(room = %record.name, "failed to load room history: {e}");
                    Vec::new()
                }
            };
            self.store.restore(record, history).await;
        }

        info!(count = self.store.len(), "loaded rooms from database");
        Ok(self.store.len())
    }

    async fn seed_rooms(&self) {
        for seed in &self.settings.seed_rooms {
            match self
                .store
                .create(&seed.name, SYSTEM_OWNER_ID, seed.status, None)
                .await
            {
                Ok(room) => {
                    room.publish(self.clock.now());
                    room.persist();
                    info!(room = %seed.name, status = seed.status.as_str(), "seeded room");
                }
                Err(e) => error!(room = %seed.name, "failed to seed room: {e}"),
            }
        }
    }

    // ── Session management ──────────────────────────────────────────

    /// Resolve a transport token to a verified actor.
    pub async fn authenticate(&self, token: &str) -> Result<Actor, RepositoryError> {
        let user_id = self.collaborators.identity.verify(token).await?;
        let nickname = self
            .collaborators
            .directory
            .nickname(user_id)
            .await?
            .ok_or_else(|| RepositoryError::Unauthorized(format!("unknown user {user_id}")))?;
        Ok(Actor::new(user_id, nickname))
    }

    /// Register a verified connection, subscribe it to the user's rooms and push
    /// the user's view. Returns the session and its event receiver.
    pub async fn connect(&self, actor: Actor) -> (Arc<UserSession>, mpsc::Receiver<ChatEvent>) {
        let (session, rx, came_online) = self.registry.register(&actor);

        if came_online {
            self.set_online(actor.user_id, true);
            self.presence.broadcast_online();
        }
        self.presence.on_connect(&actor).await;

        (session, rx)
    }

    /// Tear down a connection. Safe to call for a session that is already gone.
    pub async fn disconnect(&self, session_id: SessionId) {
        let Some(departure) = self.registry.unregister(session_id) else {
            return;
        };
        self.membership.drop_connection(session_id).await;

        if departure.went_offline {
            let user_id = departure.session.user_id;
            self.set_online(user_id, false);
            self.presence.broadcast_online();
        }
    }

    fn set_online(&self, user_id: UserId, online: bool) {
        let directory = self.collaborators.directory.clone();
        tokio::spawn(async move {
            if let Err(e) = directory.set_online(user_id, online).await {
                error!(user_id, online, "failed to persist online status: {e}");
            }
        });
    }

    // ── Command dispatch ────────────────────────────────────────────

    /// Handle one raw inbound frame. Failures are reported to this connection only,
    /// tagged with the command's room or, failing that, the last room it was active in.
    pub async fn handle(&self, session_id: SessionId, text: &str) {
        let command = match ClientCommand::parse(text) {
            Ok(command) => command,
            Err(e) => {
                self.reply_error(session_id, &e, self.last_room(session_id));
                return;
            }
        };
        let room = command
            .room()
            .map(str::to_string)
            .or_else(|| self.last_room(session_id));
        if let Err(e) = self.execute(session_id, command).await {
            warn!(%session_id, room = room.as_deref().unwrap_or(""), "command rejected: {e}");
            self.reply_error(session_id, &e, room);
        }
    }

    /// Run a validated command on behalf of a connection.
    pub async fn execute(&self, session_id: SessionId, command: ClientCommand) -> Result<(), RoomError> {
        let session = self
            .registry
            .get(session_id)
            .ok_or_else(|| RoomError::Invalid("Session not found".into()))?;
        let actor = session.actor();

        let change = match command {
            ClientCommand::CreateRoom {
                name,
                status,
                password_protected,
                password,
            } => {
                let password = password.filter(|_| password_protected);
                self.membership
                    .create_room(&actor, &name, status, password)
                    .await?
            }
            ClientCommand::JoinRoom { name, password } => {
                self.membership
                    .join(&actor, &name, password.as_deref())
                    .await?
            }
            ClientCommand::LeaveRoom { name } => self.membership.leave(&actor, &name).await?,
            ClientCommand::DeleteRoom { name } => {
                self.moderation.delete_room(&actor, &name).await?
            }
            ClientCommand::Message { room, text, kind } => {
                self.send_message(&session, &room, text, kind).await?;
                return Ok(());
            }
            ClientCommand::Mute { room, target } => {
                let target = self.resolve(&target).await?;
                self.moderation.mute(&actor, &target, &room).await?
            }
            ClientCommand::Unmute { room, target } => {
                let target = self.resolve(&target).await?;
                self.moderation.unmute(&actor, &target, &room).await?
            }
            ClientCommand::Ban { room, target } => {
                let target = self.resolve(&target).await?;
                self.moderation.ban(&actor, &target, &room).await?
            }
            ClientCommand::Unban { room, target } => {
                let target = self.resolve(&target).await?;
                self.moderation.unban(&actor, &target, &room).await?
            }
            ClientCommand::Kick { room, target } => {
                let target = self.resolve(&target).await?;
                self.moderation.kick(&actor, &target, &room).await?
            }
            ClientCommand::AddAdmin { room, target_id } => {
                let target = self.resolve(&TargetIdentifier::Id(target_id)).await?;
                self.moderation.add_admin(&actor, &target, &room).await?
            }
            ClientCommand::RemoveAdmin { room, target_id } => {
                let target = self.resolve(&TargetIdentifier::Id(target_id)).await?;
                self.moderation.remove_admin(&actor, &target, &room).await?
            }
            ClientCommand::ChangeRoomSettings {
                room,
                status,
                old_password,
                new_password,
                admins,
            } => {
                let change = SettingsChange {
                    status,
                    old_password,
                    new_password,
                    admins,
                };
                self.moderation
                    .change_settings(&actor, &room, change)
                    .await?
            }
            ClientCommand::OpenDirect { target_id } => {
                let target = self.resolve(&TargetIdentifier::Id(target_id)).await?;
                self.membership.open_direct(&actor, &target).await?
            }
            ClientCommand::Block { target_id } => {
                self.collaborators
                    .relationships
                    .block(actor.user_id, target_id)
                    .await?;
                info!(user_id = actor.user_id, target_id, "user blocked");
                return Ok(());
            }
            ClientCommand::Unblock { target_id } => {
                self.collaborators
                    .relationships
                    .unblock(actor.user_id, target_id)
                    .await?;
                info!(user_id = actor.user_id, target_id, "user unblocked");
                return Ok(());
            }
            ClientCommand::Refresh => {
                self.presence.sync_user(actor.user_id);
                return Ok(());
            }
        };

        // Room guards are released by now.
        self.presence.apply(&change);
        Ok(())
    }

    /// Post a chat or game message.
    ///
    /// Checks run in a fixed order: the room exists, the sender is a member, is not
    /// banned, is not muted, and is within the flood limit. Recipients who block the
    /// sender are skipped.
    pub async fn send_message(
        &self,
        session: &UserSession,
        room_name: &str,
        text: String,
        kind: MessageKind,
    ) -> Result<RoomMessage, RoomError> {
        let user_id = session.user_id;
        let blocked_by = match self.collaborators.relationships.blocked_by(user_id).await {
            Ok(blockers) => blockers,
            Err(e) => {
                warn!(user_id, "block list unavailable, delivering to everyone: {e}");
                HashSet::new()
            }
        };

        let mut room = self.store.lock(room_name).await?;
        if !room.is_member(user_id) {
            let denial = if room.is_banned(user_id) {
                Denial::Banned
            } else {
                Denial::NotMember
            };
            return Err(RoomError::Forbidden(denial));
        }
        if room.is_banned(user_id) {
            return Err(RoomError::Forbidden(Denial::Banned));
        }
        if room.is_muted(user_id, self.clock.now()) {
            return Err(RoomError::Forbidden(Denial::Muted));
        }
        if !self.message_limiter.check(&user_id) {
            return Err(RoomError::RateLimited);
        }

        let message = self
            .broadcaster
            .append(&mut room, &session.actor(), text, kind, &blocked_by);
        session.set_last_room(room_name);
        Ok(message)
    }

    /// Turn a moderation target into an actor with a known nickname.
    async fn resolve(&self, target: &TargetIdentifier) -> Result<Actor, RoomError> {
        match target {
            TargetIdentifier::Id(user_id) => {
                let nickname = match self.registry.known_nickname(*user_id) {
                    Some(nickname) => nickname,
                    None => self
                        .collaborators
                        .directory
                        .nickname(*user_id)
                        .await?
                        .ok_or_else(|| RoomError::Invalid(format!("No such user: {user_id}")))?,
                };
                self.registry.remember(*user_id, &nickname);
                Ok(Actor::new(*user_id, nickname))
            }
            TargetIdentifier::Nickname(nickname) => {
                let user_id = match self.registry.find_by_nickname(nickname) {
                    Some(user_id) => user_id,
                    None => self
                        .collaborators
                        .directory
                        .find_by_nickname(nickname)
                        .await?
                        .ok_or_else(|| RoomError::Invalid(format!("No such user: {nickname}")))?,
                };
                Ok(Actor::new(user_id, nickname.clone()))
            }
        }
    }

    fn last_room(&self, session_id: SessionId) -> Option<String> {
        self.registry.get(session_id).and_then(|s| s.last_room())
    }

    fn reply_error(&self, session_id: SessionId, err: &RoomError, room: Option<String>) {
        self.registry.send_to(
            session_id,
            ChatEvent::ErrorMessage {
                msg: err.to_string(),
                status_code: err.status_code(),
                room,
            },
        );
    }

    // ── Queries ─────────────────────────────────────────────────────

    pub fn get_room(&self, name: &str) -> Result<RoomSnapshot, RoomError> {
        self.store.get(name)
    }

    pub fn discoverable_rooms(&self) -> Vec<RoomSnapshot> {
        self.presence.discoverable_rooms()
    }

    pub fn online_users(&self) -> Vec<OnlineUser> {
        self.registry.online_users()
    }

    /// Drop flood-limit buckets nobody has touched for a while.
    pub fn cleanup_rate_limits(&self, idle: Duration) {
        self.message_limiter.cleanup(idle);
    }
}
