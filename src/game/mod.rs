// src/game/mod.rs
//! Room world state
//!
//! - `object`: game objects, their kinds and shared binary fields
//! - `room`: room state, aggregates and the per-tick find cache
//! - `find`: find category keys and handler helpers
//! - `position`, `store`, `constants`: value types and game constants
//! - `path`: in-room pathfinding primitive

pub mod constants;
pub mod find;
pub mod object;
pub mod path;
pub mod position;
pub mod room;
pub mod store;

pub use find::FindCategory;
pub use object::{GameObject, Kind, ObjectId, ObjectKind, UserId};
pub use position::{Direction, RoomName, RoomPosition};
pub use room::{Room, RoomSnapshot};
pub use store::{ResourceType, Store};
