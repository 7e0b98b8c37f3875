// src/engine/mod.rs
//! World lifecycle and the tick loop

pub mod orchestrator;
pub mod world;

pub use orchestrator::{TickOrchestrator, TickReport};
pub use world::{load_script, World, STARTER_SCRIPT};
