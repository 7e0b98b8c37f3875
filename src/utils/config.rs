// src/utils/config.rs
//! Engine configuration
//!
//! Loaded in layers with the `config` crate:
//!
//! 1. Built-in defaults (the `Default` impls below)
//! 2. `config/engine.{toml,yaml,json}` if present
//! 3. Environment variables prefixed with `RAMPART`, nested with `__`
//!    (e.g. `RAMPART_RUNTIME__POOL_SIZE=8`)

use crate::sandbox::SandboxLimits;
use crate::utils::errors::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Full engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub runtime: RuntimeConfig,
    pub storage: StorageSettings,
    pub world: WorldConfig,
    pub logging: LoggingConfig,
}

/// Sandbox runtime settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Number of sandboxes allowed to run at the same time
    pub pool_size: usize,

    /// Hard memory ceiling per user, in megabytes
    pub memory_limit_mb: u64,

    /// Wall-clock budget for one user's tick, in milliseconds
    pub tick_budget_ms: u64,

    /// How often (in VM instructions) the budget hook fires
    pub instruction_interval: u32,

    /// Intents kept per user per tick; the rest are dropped
    pub max_intents_per_tick: usize,

    /// Upper bound on the serialized `Memory` blob, in bytes
    pub memory_blob_limit: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            pool_size: 8,
            memory_limit_mb: 64,
            tick_budget_ms: 100,
            instruction_interval: 1_000,
            max_intents_per_tick: 1_000,
            memory_blob_limit: 2 * 1024 * 1024,
        }
    }
}

impl RuntimeConfig {
    /// Sandbox limits derived from this configuration
    pub fn sandbox_limits(&self) -> SandboxLimits {
        SandboxLimits {
            memory_limit_mb: self.memory_limit_mb,
            tick_budget_ms: self.tick_budget_ms,
            instruction_interval: self.instruction_interval,
            max_intents_per_tick: self.max_intents_per_tick,
            memory_blob_limit: self.memory_blob_limit,
        }
    }
}

/// Where persistent blobs live
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub data_dir: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
        }
    }
}

/// World and tick loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// Delay between ticks
    pub tick_interval_ms: u64,

    /// Stop after this many ticks (0 = run until interrupted)
    pub max_ticks: u64,

    /// Directory holding `<user>.lua` scripts
    pub scripts_dir: PathBuf,

    /// Users that get a starting room when the world is seeded
    pub seed_users: Vec<String>,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1_000,
            max_ticks: 0,
            scripts_dir: PathBuf::from("./scripts"),
            seed_users: vec!["alice".to_string(), "bob".to_string()],
        }
    }
}

/// Logging output
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is not set
    pub filter: String,

    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
        }
    }
}

impl EngineConfig {
    /// Load configuration from defaults, optional file and environment
    pub fn load() -> Result<Self> {
        Self::load_from("config/engine")
    }

    /// Load configuration using a specific file stem
    pub fn load_from(file_stem: &str) -> Result<Self> {
        let config: EngineConfig = config::Config::builder()
            .add_source(config::File::with_name(file_stem).required(false))
            .add_source(
                config::Environment::with_prefix("RAMPART")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("world.seed_users")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the loaded configuration
    pub fn validate(&self) -> Result<()> {
        if self.runtime.pool_size == 0 {
            return Err(EngineError::ConfigError(
                "runtime.pool_size must be at least 1".to_string(),
            ));
        }
        self.runtime
            .sandbox_limits()
            .validate()
            .map_err(EngineError::ConfigError)?;
        if self.world.tick_interval_ms == 0 {
            return Err(EngineError::ConfigError(
                "world.tick_interval_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.runtime.pool_size, 8);
        assert_eq!(config.runtime.memory_limit_mb, 64);
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[runtime]\npool_size = 3\n\n[world]\nmax_ticks = 10").unwrap();

        let stem = dir.path().join("engine");
        let config = EngineConfig::load_from(stem.to_str().unwrap()).unwrap();
        assert_eq!(config.runtime.pool_size, 3);
        assert_eq!(config.world.max_ticks, 10);
        // Untouched sections keep defaults
        assert_eq!(config.runtime.tick_budget_ms, 100);
    }

    #[test]
    fn test_zero_pool_rejected() {
        let mut config = EngineConfig::default();
        config.runtime.pool_size = 0;
        assert!(config.validate().is_err());
    }
}
