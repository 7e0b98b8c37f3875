// src/sandbox/mod.rs
//! Isolated execution of user code
//!
//! Each user gets a private Lua 5.4 state with:
//! - a hard heap ceiling (`set_memory_limit`)
//! - a wall-clock budget checked from an instruction-count hook
//! - a restricted standard library and no host access beyond read-only
//!   room handles, pathfinding and console capture
//!
//! The only things that leave a sandbox are intent batches, the serialized
//! `Memory` blob and console output.

pub mod bindings;
pub mod limits;
pub mod pool;
#[allow(clippy::module_inception)]
pub mod sandbox;

pub use limits::SandboxLimits;
pub use pool::{PoolStats, SandboxPool, UserRun};
pub use sandbox::{Sandbox, TickInput, TickOutput};

use thiserror::Error;

/// Why a user's sandbox produced no intents this tick
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SandboxFault {
    /// Heap ceiling breached; the sandbox is recreated before its next run
    #[error("memory limit exceeded")]
    MemoryLimit,

    /// Tick budget exhausted
    #[error("tick budget exhausted")]
    Timeout,

    /// User code raised an error
    #[error("script error: {0}")]
    Script(String),

    /// The sandbox could not be provisioned
    #[error("sandbox setup failed: {0}")]
    Setup(String),
}

impl SandboxFault {
    /// Label used for the fault counter
    pub fn label(&self) -> &'static str {
        match self {
            SandboxFault::MemoryLimit => "memory",
            SandboxFault::Timeout => "timeout",
            SandboxFault::Script(_) => "script",
            SandboxFault::Setup(_) => "setup",
        }
    }
}
