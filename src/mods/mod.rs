// src/mods/mod.rs
//! Built-in game mods
//!
//! Each mod registers the kinds it owns (layout plus encode/decode), their
//! intent and tick handlers, and the find categories it answers.
//!
//! - `creep`: creeps and the move/harvest/transfer/attack/upgrade/build intents
//! - `spawn`: spawns, extensions and creep spawning
//! - `source`: energy sources and regeneration
//! - `resource`: dropped resources and decay
//! - `structures`: controllers, roads, containers and construction sites

pub mod creep;
pub mod resource;
pub mod source;
pub mod spawn;
pub mod structures;

use crate::game::object::GameObject;
use crate::processor::registry::{Registry, RegistryBuilder};
use crate::schema::SchemaError;

/// Registry with every built-in mod
pub fn registry() -> Registry {
    let mut builder = RegistryBuilder::new();
    register_all(&mut builder);
    builder.build()
}

pub fn register_all(builder: &mut RegistryBuilder) {
    creep::register(builder);
    spawn::register(builder);
    source::register(builder);
    resource::register(builder);
    structures::register(builder);
}

pub(crate) fn wrong_kind(expected: &'static str, object: &GameObject) -> SchemaError {
    SchemaError::TypeMismatch {
        expected,
        found: object.kind().name(),
    }
}
