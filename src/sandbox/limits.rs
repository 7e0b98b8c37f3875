// src/sandbox/limits.rs
//! Per-user sandbox limits
//!
//! - Memory ceiling for the Lua heap (MB)
//! - Wall-clock budget for one tick (ms), enforced by an instruction hook
//! - Intent and `Memory` size caps applied to what comes back out

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Limits applied to one user's sandbox
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxLimits {
    /// Lua heap ceiling in megabytes
    pub memory_limit_mb: u64,

    /// Wall-clock budget for `create` and for each `run`, in milliseconds
    pub tick_budget_ms: u64,

    /// The budget hook fires every this many VM instructions
    pub instruction_interval: u32,

    /// Intents kept per tick; later ones are dropped
    pub max_intents_per_tick: usize,

    /// Largest serialized `Memory` accepted, in bytes
    pub memory_blob_limit: usize,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            memory_limit_mb: 64,
            tick_budget_ms: 100,
            instruction_interval: 1_000,
            max_intents_per_tick: 1_000,
            memory_blob_limit: 2 * 1024 * 1024,
        }
    }
}

impl SandboxLimits {
    /// Tight limits for untrusted code under load
    pub fn strict() -> Self {
        Self {
            memory_limit_mb: 16,
            tick_budget_ms: 50,
            instruction_interval: 500,
            max_intents_per_tick: 200,
            memory_blob_limit: 256 * 1024,
        }
    }

    /// Generous limits for local development
    pub fn relaxed() -> Self {
        Self {
            memory_limit_mb: 256,
            tick_budget_ms: 1_000,
            instruction_interval: 10_000,
            max_intents_per_tick: 10_000,
            memory_blob_limit: 16 * 1024 * 1024,
        }
    }

    pub fn memory_limit_bytes(&self) -> usize {
        (self.memory_limit_mb as usize).saturating_mul(1024 * 1024)
    }

    pub fn tick_budget(&self) -> Duration {
        Duration::from_millis(self.tick_budget_ms)
    }

    /// Validate limits
    pub fn validate(&self) -> Result<(), String> {
        if self.memory_limit_mb == 0 {
            return Err("Memory limit cannot be 0".to_string());
        }
        if self.memory_limit_mb > 4096 {
            return Err("Memory limit cannot exceed 4GB".to_string());
        }

        if self.tick_budget_ms == 0 {
            return Err("Tick budget cannot be 0".to_string());
        }
        if self.tick_budget_ms > 60_000 {
            return Err("Tick budget cannot exceed 60s".to_string());
        }

        if self.instruction_interval == 0 {
            return Err("Instruction interval cannot be 0".to_string());
        }

        if self.max_intents_per_tick == 0 {
            return Err("Intent cap cannot be 0".to_string());
        }
        if self.memory_blob_limit == 0 {
            return Err("Memory blob limit cannot be 0".to_string());
        }

        Ok(())
    }
}
