pub mod blocks;
pub mod messages;
pub mod rooms;
pub mod users;
