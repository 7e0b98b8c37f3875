// src/engine/orchestrator.rs
//! Tick orchestrator
//!
//! One tick runs in strict phases:
//!
//! 1. **Snapshot**: every live room's bytes become a shared `RoomSnapshot`
//! 2. **Sandbox**: all users run against the snapshots they can see
//! 3. **Route**: intents are grouped per room, users in id order, each user's
//!    intents in emission order
//! 4. **Process**: rooms run concurrently, one blocking task per room; rooms
//!    with nothing to do only get their clock advanced
//! 5. **Departures**: objects that left a room are inserted into their
//!    destination after every room finished
//! 6. **Commit**: state is persisted, then `tick` and `room/<name>` are
//!    published
//!
//! A room whose state fails to decode or encode is halted and left out of
//! every later tick until it is reloaded.
//!
//! All of a tick's room changes are staged and only replace the committed
//! state once `save` succeeded, so time, rooms and storage move together.

use crate::engine::world::{room_list, World};
use crate::game::object::{ObjectId, UserId};
use crate::game::position::RoomName;
use crate::game::room::{Room, RoomSnapshot};
use crate::observability::names;
use crate::mods::spawn;
use crate::processor::{
    process_room, Departure, Intent, IntentOutcome, Registry, ResultCode, RoomOutcome, WorldInfo,
};
use crate::sandbox::{SandboxFault, SandboxPool};
use crate::schema::{SchemaError, Value, ViewMut};
use crate::storage::{keys, LocalPubsub, Persistence};
use crate::utils::errors::Result;
use bytes::Bytes;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
struct RoomEntry {
    bytes: Bytes,
    active: bool,
    wake_at: Option<u32>,
    halted: bool,
}

impl RoomEntry {
    fn new(bytes: Bytes) -> Self {
        // Everything gets one full pass after (re)loading
        Self {
            bytes,
            active: true,
            wake_at: None,
            halted: false,
        }
    }

    fn is_due(&self, time: u32) -> bool {
        self.active || self.wake_at.is_some_and(|wake| wake <= time)
    }
}

/// Summary of one committed tick
#[derive(Debug, Default)]
pub struct TickReport {
    pub time: u32,
    pub rooms_processed: usize,
    pub rooms_idle: usize,
    pub intents_applied: usize,
    pub intents_rejected: usize,
    /// Intents naming an object no live room holds
    pub intents_unrouted: usize,
    pub departures: usize,
    pub faults: Vec<(UserId, SandboxFault)>,
    /// Rooms halted during this tick
    pub halted: Vec<RoomName>,
    pub duration: Duration,
}

pub struct TickOrchestrator<P: Persistence> {
    registry: &'static Registry,
    persistence: Arc<P>,
    pubsub: LocalPubsub,
    pool: Arc<SandboxPool>,
    time: u32,
    rooms: BTreeMap<RoomName, RoomEntry>,
    feedback: HashMap<UserId, Vec<IntentOutcome>>,
}

impl<P: Persistence> TickOrchestrator<P> {
    pub fn new(
        registry: &'static Registry,
        persistence: Arc<P>,
        pubsub: LocalPubsub,
        pool: Arc<SandboxPool>,
        world: World,
    ) -> Self {
        info!(time = world.time, rooms = world.rooms.len(), "orchestrator ready");
        Self {
            registry,
            persistence,
            pubsub,
            pool,
            time: world.time,
            rooms: world.rooms.into_iter().map(|(name, bytes)| (name, RoomEntry::new(bytes))).collect(),
            feedback: HashMap::new(),
        }
    }

    /// Last committed tick
    pub fn time(&self) -> u32 {
        self.time
    }

    pub fn pool(&self) -> &SandboxPool {
        &self.pool
    }

    pub fn room_names(&self) -> Vec<RoomName> {
        self.rooms.keys().copied().collect()
    }

    pub fn room_bytes(&self, name: RoomName) -> Option<Bytes> {
        self.rooms.get(&name).map(|entry| entry.bytes.clone())
    }

    /// Decoded copy of a room's committed state
    pub fn room(&self, name: RoomName) -> Result<Option<Room>> {
        match self.rooms.get(&name) {
            Some(entry) => Ok(Some(Room::decode(self.registry, &entry.bytes)?)),
            None => Ok(None),
        }
    }

    pub fn halted_rooms(&self) -> Vec<RoomName> {
        self.rooms
            .iter()
            .filter(|(_, entry)| entry.halted)
            .map(|(name, _)| *name)
            .collect()
    }

    /// Replace a room's state and clear its halt
    pub fn reload_room(&mut self, name: RoomName, bytes: Bytes) {
        info!(room = %name, "room reloaded");
        self.rooms.insert(name, RoomEntry::new(bytes));
        self.record_halted();
    }

    /// Results the user will see next tick
    pub fn feedback(&self, user: &UserId) -> &[IntentOutcome] {
        self.feedback.get(user).map(Vec::as_slice).unwrap_or_default()
    }

    /// Persist `code` for `user` and (re)load their sandbox with the last
    /// saved `Memory`
    pub async fn register_user(&self, user: UserId, code: String) -> Result<()> {
        self.persistence
            .set(&keys::user_code(&user), Bytes::from(code.clone()))
            .await?;
        let memory = match self.persistence.get(&keys::user_memory(&user)).await? {
            Some(raw) => Some(String::from_utf8_lossy(&raw).into_owned()),
            None => None,
        };
        self.pool.load_user(user, code, memory);
        Ok(())
    }

    fn record_halted(&self) {
        let halted = self.rooms.values().filter(|entry| entry.halted).count();
        metrics::gauge!(names::ROOMS_HALTED).set(halted as f64);
    }

    /// Run one full tick and commit it. Nothing in the orchestrator changes
    /// unless the commit succeeds; a failed tick can be retried as is.
    pub async fn tick(&mut self) -> Result<TickReport> {
        let started = Instant::now();
        let time = self.time + 1;
        let registry = self.registry;
        let mut report = TickReport {
            time,
            ..Default::default()
        };
        let mut rooms = self.rooms.clone();

        // Snapshot
        let mut snapshots = Vec::new();
        let mut broken = Vec::new();
        for (name, entry) in rooms.iter().filter(|(_, entry)| !entry.halted) {
            match RoomSnapshot::new(registry, entry.bytes.clone()) {
                Ok(snapshot) => snapshots.push(Arc::new(snapshot)),
                Err(err) => broken.push((*name, err)),
            }
        }
        for (name, err) in broken {
            halt(&mut rooms, name, &err, &mut report);
        }

        // Sandbox
        let runs = self.pool.run_tick(time, &snapshots, &self.feedback).await;

        // Route
        let mut world = WorldInfo::default();
        let mut locations: HashMap<ObjectId, RoomName> = HashMap::new();
        for snapshot in &snapshots {
            world.add_creep_names(&snapshot.room);
            locations.extend(snapshot.room.objects().map(|object| (object.id, snapshot.name())));
        }
        drop(snapshots);

        let mut batches: BTreeMap<RoomName, Vec<(UserId, Intent)>> = BTreeMap::new();
        let mut feedback: HashMap<UserId, Vec<IntentOutcome>> = HashMap::new();
        let mut memories = Vec::new();
        for run in runs {
            match run.result {
                Ok(output) => {
                    for intent in output.intents {
                        match locations.get(&intent.object) {
                            Some(room) => batches.entry(*room).or_default().push((run.user.clone(), intent)),
                            None => {
                                report.intents_unrouted += 1;
                                feedback.entry(run.user.clone()).or_default().push(IntentOutcome {
                                    object: intent.object,
                                    verb: intent.verb,
                                    code: ResultCode::InvalidTarget,
                                });
                            }
                        }
                    }
                    memories.push((run.user, output.memory));
                }
                Err(fault) => report.faults.push((run.user, fault)),
            }
        }

        // Process
        world.rooms = rooms
            .iter()
            .filter(|(_, entry)| !entry.halted)
            .map(|(name, _)| *name)
            .collect();
        for (name, intents) in &batches {
            spawn::claim_names(&mut world, *name, intents);
        }
        let world = Arc::new(world);
        let mut tasks = Vec::new();
        let mut idle = Vec::new();
        for (name, entry) in rooms.iter().filter(|(_, entry)| !entry.halted) {
            let intents = batches.remove(name).unwrap_or_default();
            if intents.is_empty() && !entry.is_due(time) {
                idle.push(*name);
                continue;
            }
            let bytes = entry.bytes.clone();
            let world = world.clone();
            let name = *name;
            tasks.push(async move {
                let handle = tokio::task::spawn_blocking(move || -> std::result::Result<(Bytes, RoomOutcome), SchemaError> {
                    let mut room = Room::decode(registry, &bytes)?;
                    let outcome = process_room(registry, &mut room, time, &intents, &world);
                    Ok((room.encode(registry)?, outcome))
                });
                (name, handle.await)
            });
        }
        let processed = futures::future::join_all(tasks).await;

        let mut changed = BTreeSet::new();
        let mut departures: Vec<Departure> = Vec::new();
        for (name, joined) in processed {
            match joined {
                Ok(Ok((bytes, outcome))) => {
                    if let Some(entry) = rooms.get_mut(&name) {
                        entry.bytes = bytes;
                        entry.active = outcome.active;
                        entry.wake_at = outcome.wake_at;
                    }
                    report.rooms_processed += 1;
                    report.intents_applied += outcome.applied;
                    report.intents_rejected += outcome.rejected;
                    for (user, result) in outcome.results {
                        feedback.entry(user).or_default().push(result);
                    }
                    departures.extend(outcome.departures);
                    changed.insert(name);
                }
                Ok(Err(err)) => halt(&mut rooms, name, &err, &mut report),
                Err(join) => halt(&mut rooms, name, &join, &mut report),
            }
        }

        for name in idle {
            let stamped = match rooms.get(&name) {
                Some(entry) => stamp_time(registry, &entry.bytes, time),
                None => continue,
            };
            match stamped {
                Ok(bytes) => {
                    if let Some(entry) = rooms.get_mut(&name) {
                        entry.bytes = bytes;
                    }
                    report.rooms_idle += 1;
                }
                Err(err) => halt(&mut rooms, name, &err, &mut report),
            }
        }

        // Departures
        report.departures = departures.len();
        let mut arrivals: BTreeMap<RoomName, Vec<Departure>> = BTreeMap::new();
        for departure in departures {
            arrivals.entry(departure.to.room).or_default().push(departure);
        }
        for (name, incoming) in arrivals {
            let bytes = match rooms.get(&name) {
                Some(entry) if !entry.halted => entry.bytes.clone(),
                _ => {
                    warn!(room = %name, lost = incoming.len(), "destination unavailable, objects lost");
                    continue;
                }
            };
            let arrived = Room::decode(registry, &bytes).and_then(|mut room| {
                for departure in incoming {
                    debug!(room = %name, object = %departure.object.id, "object arrived");
                    room.insert(departure.object);
                }
                room.encode(registry)
            });
            match arrived {
                Ok(bytes) => {
                    if let Some(entry) = rooms.get_mut(&name) {
                        entry.bytes = bytes;
                        entry.active = true;
                    }
                    changed.insert(name);
                }
                Err(err) => halt(&mut rooms, name, &err, &mut report),
            }
        }

        // Commit
        for (name, entry) in rooms.iter().filter(|(_, entry)| !entry.halted) {
            self.persistence.set(&keys::room(*name), entry.bytes.clone()).await?;
        }
        for (user, memory) in memories {
            self.persistence.set(&keys::user_memory(&user), Bytes::from(memory)).await?;
        }
        self.persistence.set(keys::GAME_TIME, Bytes::from(time.to_string())).await?;
        self.persistence.set(keys::GAME_ROOMS, room_list(rooms.keys())?).await?;
        if let Err(err) = self.persistence.save().await {
            error!(time, error = %err, "commit failed, tick discarded");
            return Err(err);
        }

        self.rooms = rooms;
        self.time = time;
        self.feedback = feedback;

        for name in &changed {
            self.pubsub.publish(&format!("room/{}", name), &time.to_string());
        }
        self.pubsub.publish("tick", &time.to_string());

        report.duration = started.elapsed();
        metrics::histogram!(names::TICK_DURATION_SECONDS).record(report.duration.as_secs_f64());
        metrics::counter!(names::INTENTS_APPLIED_TOTAL).increment(report.intents_applied as u64);
        metrics::counter!(names::INTENTS_REJECTED_TOTAL).increment(
            (report.intents_rejected + report.intents_unrouted) as u64,
        );
        metrics::counter!(names::ROOMS_PROCESSED_TOTAL).increment(report.rooms_processed as u64);
        self.record_halted();

        debug!(
            time,
            processed = report.rooms_processed,
            idle = report.rooms_idle,
            applied = report.intents_applied,
            rejected = report.intents_rejected,
            faults = report.faults.len(),
            elapsed_ms = report.duration.as_millis() as u64,
            "tick committed"
        );
        Ok(report)
    }

    /// Tick every `interval` until `shutdown` turns true, its sender is
    /// dropped, or `max_ticks` ticks ran (0 = unbounded). Returns the number
    /// of ticks run.
    pub async fn run(&mut self, interval: Duration, max_ticks: u64, mut shutdown: watch::Receiver<bool>) -> Result<u64> {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ticks = 0;

        loop {
            if *shutdown.borrow() || (max_ticks > 0 && ticks >= max_ticks) {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }

            let report = self.tick().await?;
            ticks += 1;
            if !report.faults.is_empty() || !report.halted.is_empty() {
                info!(
                    time = report.time,
                    faults = report.faults.len(),
                    halted = report.halted.len(),
                    "tick finished with problems"
                );
            }
        }

        info!(ticks, time = self.time, "tick loop stopped");
        Ok(ticks)
    }
}

fn halt(
    rooms: &mut BTreeMap<RoomName, RoomEntry>,
    name: RoomName,
    reason: &dyn std::fmt::Display,
    report: &mut TickReport,
) {
    if let Some(entry) = rooms.get_mut(&name) {
        entry.halted = true;
    }
    error!(room = %name, %reason, "room halted");
    report.halted.push(name);
}

/// Advance the room clock in place without decoding the objects
fn stamp_time(registry: &Registry, bytes: &Bytes, time: u32) -> std::result::Result<Bytes, SchemaError> {
    let mut buffer = bytes.to_vec();
    ViewMut::new(&mut buffer, 0, registry.room_format().clone())
        .field_mut("time")?
        .set(&Value::from(time))?;
    Ok(Bytes::from(buffer))
}
