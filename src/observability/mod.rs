// src/observability/mod.rs
//! Logging and metrics bootstrap
//!
//! - **Tracing**: `tracing-subscriber` registry with an `EnvFilter` and either
//!   a human-readable or a JSON formatting layer
//! - **Metrics**: Prometheus recorder behind the `metrics` facade

use crate::utils::config::LoggingConfig;
use anyhow::{Context, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Metric names recorded by the engine
pub mod names {
    pub const TICK_DURATION_SECONDS: &str = "rampart_tick_duration_seconds";
    pub const SANDBOX_RUN_SECONDS: &str = "rampart_sandbox_run_seconds";
    pub const SANDBOX_FAULTS_TOTAL: &str = "rampart_sandbox_faults_total";
    pub const INTENTS_APPLIED_TOTAL: &str = "rampart_intents_applied_total";
    pub const INTENTS_REJECTED_TOTAL: &str = "rampart_intents_rejected_total";
    pub const ROOMS_PROCESSED_TOTAL: &str = "rampart_rooms_processed_total";
    pub const ROOMS_HALTED: &str = "rampart_rooms_halted";
}

/// Initialize tracing with default logging settings
pub fn init_tracing() -> Result<()> {
    init_tracing_with(&LoggingConfig::default())
}

/// Initialize tracing; `RUST_LOG` takes precedence over the configured filter
pub fn init_tracing_with(config: &LoggingConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .context("invalid log filter")?;

    if config.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .context("tracing already initialized")?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .try_init()
            .context("tracing already initialized")?;
    }

    Ok(())
}

/// Install the Prometheus recorder and return a handle for rendering
pub fn init_metrics() -> Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install metrics recorder")
}
