pub mod broadcaster;
pub mod chat_engine;
pub mod clock;
pub mod collaborators;
pub mod commands;
pub mod error;
pub mod events;
pub mod membership;
pub mod moderation;
pub mod permissions;
pub mod presence;
pub mod rate_limiter;
pub mod registry;
pub mod room;
pub mod room_store;
pub mod user_session;
pub mod validation;

#[cfg(test)]
pub(crate) mod testing;
