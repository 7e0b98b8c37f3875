// src/main.rs
//! Rampart Tick Engine
//!
//! Loads (or seeds) the world, loads every user's script and runs ticks
//! until interrupted.

use anyhow::{Context, Result};
use rampart_engine::engine::{load_script, TickOrchestrator, World};
use rampart_engine::game::object::UserId;
use rampart_engine::observability::{init_metrics, init_tracing_with};
use rampart_engine::processor::registry;
use rampart_engine::sandbox::SandboxPool;
use rampart_engine::storage::{keys, LocalPersistence, LocalPubsub, Persistence};
use rampart_engine::utils::config::EngineConfig;
use rampart_engine::BuildInfo;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = EngineConfig::load()?;

    // Initialize observability (tracing, metrics, logging)
    init_tracing_with(&config.logging)?;
    let _metrics = init_metrics()?;

    let build = BuildInfo::current();
    info!(
        "Starting Rampart tick engine v{} ({}, {})",
        build.version, build.git_hash, build.rustc_version
    );
    info!("Configuration loaded: {:?}", config);

    let registry = registry::global();
    let persistence = Arc::new(
        LocalPersistence::open(&config.storage.data_dir)
            .await
            .context("failed to open data directory")?,
    );

    let world = match World::load(persistence.as_ref()).await? {
        Some(world) => world,
        None => {
            let users: Vec<UserId> = config.world.seed_users.iter().map(UserId::new).collect();
            let world = World::seed(registry, &users)?;
            world.store(persistence.as_ref()).await?;
            persistence.save().await?;
            world
        }
    };

    let pool = Arc::new(SandboxPool::new(config.runtime.pool_size, config.runtime.sandbox_limits()));
    let pubsub = LocalPubsub::new("engine");
    let mut orchestrator = TickOrchestrator::new(registry, persistence.clone(), pubsub.clone(), pool, world);

    // Everyone owning something in the world, plus the configured seed users
    let mut users: BTreeSet<UserId> = config.world.seed_users.iter().map(UserId::new).collect();
    for name in orchestrator.room_names() {
        match orchestrator.room(name) {
            Ok(Some(room)) => users.extend(room.aggregates().owners.iter().cloned()),
            Ok(None) => {}
            Err(e) => warn!(room = %name, "room state unreadable at startup: {}", e),
        }
    }
    for user in users {
        let code = match load_script(&config.world.scripts_dir, &user).await {
            Ok(code) => code,
            Err(e) => {
                warn!(%user, "{}; falling back to the saved code", e);
                match persistence.get(&keys::user_code(&user)).await? {
                    Some(code) => String::from_utf8_lossy(&code).into_owned(),
                    None => continue,
                }
            }
        };
        orchestrator.register_user(user, code).await?;
    }

    let _ticks = pubsub.subscribe("tick", |time| tracing::trace!(time, "tick published"));

    // Graceful shutdown handler
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received shutdown signal, finishing the current tick...");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                warn!("Failed to listen for CTRL+C: {}", e);
                // Dropping the sender would stop the loop
                std::future::pending::<()>().await;
                drop(shutdown_tx);
            }
        }
    });

    let ticks = orchestrator
        .run(
            Duration::from_millis(config.world.tick_interval_ms),
            config.world.max_ticks,
            shutdown_rx,
        )
        .await?;

    info!("Engine stopped after {} ticks at time {}", ticks, orchestrator.time());
    Ok(())
}
