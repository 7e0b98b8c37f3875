// src/lib.rs
//! Rampart Tick Engine Library
//!
//! Runs the authoritative simulation of a multiplayer programming game:
//! every tick, each player's Lua code runs in its own sandbox against a
//! read-only snapshot of the rooms it can see and emits intents, which are
//! then validated and applied room by room.
//!
//! # Architecture
//!
//! - **schema**: binary object model (formats, codec, byte-backed views)
//! - **game**: positions, stores, objects, rooms and find
//! - **processor**: intent registry and per-room processing
//! - **mods**: built-in kinds, intents, tick handlers and find categories
//! - **sandbox**: Lua sandboxes, host bindings and the sandbox pool
//! - **storage**: blob persistence and pub/sub
//! - **engine**: world loading and the tick orchestrator
//! - **observability**: tracing and metrics
//! - **utils**: configuration and errors

pub mod engine;
pub mod game;
pub mod mods;
pub mod observability;
pub mod processor;
pub mod sandbox;
pub mod schema;
pub mod storage;
pub mod utils;

// Re-export commonly used types
pub use engine::{TickOrchestrator, TickReport, World};
pub use processor::{Intent, IntentOutcome, Registry, ResultCode};
pub use sandbox::{SandboxFault, SandboxLimits, SandboxPool};
pub use utils::config::EngineConfig;
pub use utils::errors::{EngineError, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const GIT_HASH: &str = env!("GIT_HASH");

/// Engine build information
pub struct BuildInfo {
    pub version: &'static str,
    pub git_hash: &'static str,
    pub build_timestamp: &'static str,
    pub rustc_version: &'static str,
}

impl BuildInfo {
    pub fn current() -> Self {
        Self {
            version: VERSION,
            git_hash: GIT_HASH,
            build_timestamp: env!("BUILD_TIMESTAMP"),
            rustc_version: env!("RUSTC_VERSION"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_build_info() {
        let info = BuildInfo::current();
        assert!(!info.version.is_empty());
        assert!(!info.git_hash.is_empty());
    }
}
