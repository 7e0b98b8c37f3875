// src/storage/mod.rs
//! Persistence and notification collaborators of the tick engine

pub mod persistence;
pub mod pubsub;

pub use persistence::{LocalPersistence, MemoryPersistence, Persistence};
pub use pubsub::{LocalPubsub, Subscription};

/// Blob keys
pub mod keys {
    use crate::game::object::UserId;
    use crate::game::position::RoomName;

    pub const GAME_TIME: &str = "game/time";
    pub const GAME_ROOMS: &str = "game/rooms";

    pub fn room(name: RoomName) -> String {
        format!("room/{}", name)
    }

    pub fn user_code(user: &UserId) -> String {
        format!("user/{}/code", user)
    }

    pub fn user_memory(user: &UserId) -> String {
        format!("user/{}/memory", user)
    }
}
