// src/sandbox/pool.rs
//! Sandbox pool
//!
//! Keeps one sandbox per user and runs a tick's worth of them concurrently
//! on blocking worker threads.
//!
//! # Architecture
//!
//! ```text
//! SandboxPool
//! ├─ Slots: user -> { code, Memory, sandbox?, last fault }
//! └─ Semaphore: at most `pool_size` sandboxes executing at once
//! ```
//!
//! A sandbox that breached its memory ceiling is dropped and recreated from
//! the user's code and last good `Memory` before its next run.
//!
//! A worker checks the sandbox out of its slot for the length of a run, so
//! the slot lock is only ever held briefly. When a run outlives the outer
//! timeout (a call the budget hook cannot interrupt), the worker keeps its
//! permit until it returns and the user reports `Timeout` on every tick in
//! between without waiting on anything.

use crate::game::object::UserId;
use crate::game::room::RoomSnapshot;
use crate::observability::names;
use crate::processor::IntentOutcome;
use crate::sandbox::{Sandbox, SandboxFault, SandboxLimits, TickInput, TickOutput};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

struct UserSlot {
    code: Arc<str>,
    memory: Option<String>,
    sandbox: Option<Sandbox>,
    last_error: Option<String>,
    /// A worker owns the sandbox right now
    busy: bool,
}

/// Everything a worker needs, taken out of a slot for one run
struct Checkout {
    sandbox: Option<Sandbox>,
    code: Arc<str>,
    memory: Option<String>,
    last_error: Option<String>,
}

impl UserSlot {
    fn checkout(&mut self) -> Option<Checkout> {
        if self.busy {
            return None;
        }
        self.busy = true;
        Some(Checkout {
            sandbox: self.sandbox.take(),
            code: self.code.clone(),
            memory: self.memory.clone(),
            last_error: self.last_error.take(),
        })
    }

    fn checkin(&mut self, sandbox: Option<Sandbox>, result: &Result<TickOutput, SandboxFault>) {
        self.busy = false;
        self.sandbox = sandbox;
        match result {
            Ok(output) => self.memory = Some(output.memory.clone()),
            Err(fault) => {
                if *fault == SandboxFault::MemoryLimit {
                    if let Some(sandbox) = self.sandbox.take() {
                        sandbox.destroy();
                    }
                }
                self.last_error = Some(fault.to_string());
            }
        }
    }
}

/// One user's sandbox result for a tick
#[derive(Debug)]
pub struct UserRun {
    pub user: UserId,
    pub result: Result<TickOutput, SandboxFault>,
    pub elapsed: Duration,
}

/// Pool statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub users: usize,
    pub live_sandboxes: usize,
    /// Sandboxes a worker is executing right now
    pub busy: usize,
    pub pool_size: usize,
    pub available_permits: usize,
}

pub struct SandboxPool {
    limits: SandboxLimits,
    pool_size: usize,
    semaphore: Arc<Semaphore>,
    slots: DashMap<UserId, Arc<Mutex<UserSlot>>>,
}

impl SandboxPool {
    pub fn new(pool_size: usize, limits: SandboxLimits) -> Self {
        let pool_size = pool_size.max(1);
        info!("Initializing sandbox pool with {} workers", pool_size);
        Self {
            limits,
            pool_size,
            semaphore: Arc::new(Semaphore::new(pool_size)),
            slots: DashMap::new(),
        }
    }

    pub fn limits(&self) -> &SandboxLimits {
        &self.limits
    }

    /// Register or replace a user's code. The sandbox is (re)created lazily
    /// on the user's next run. A run still executing finishes into the
    /// replaced slot and is discarded.
    pub fn load_user(&self, user: UserId, code: String, memory: Option<String>) {
        debug!(%user, bytes = code.len(), "loading user code");
        let slot = UserSlot {
            code: Arc::from(code),
            memory,
            sandbox: None,
            last_error: None,
            busy: false,
        };
        if let Some(previous) = self.slots.insert(user, Arc::new(Mutex::new(slot))) {
            if let Some(sandbox) = previous.lock().sandbox.take() {
                sandbox.destroy();
            }
        }
    }

    pub fn remove_user(&self, user: &UserId) -> bool {
        match self.slots.remove(user) {
            Some((_, slot)) => {
                if let Some(sandbox) = slot.lock().sandbox.take() {
                    sandbox.destroy();
                }
                true
            }
            None => false,
        }
    }

    /// Registered users, sorted
    pub fn users(&self) -> Vec<UserId> {
        let mut users: Vec<UserId> = self.slots.iter().map(|entry| entry.key().clone()).collect();
        users.sort();
        users
    }

    /// Last good `Memory` blob of a user
    pub fn memory(&self, user: &UserId) -> Option<String> {
        let slot = self.slots.get(user)?.clone();
        let memory = slot.lock().memory.clone();
        memory
    }

    /// Run every registered user for tick `time`. Each user sees the rooms in
    /// which they own something. Results come back sorted by user.
    pub async fn run_tick(
        &self,
        time: u32,
        rooms: &[Arc<RoomSnapshot>],
        results: &HashMap<UserId, Vec<IntentOutcome>>,
    ) -> Vec<UserRun> {
        let outer_timeout = self.limits.tick_budget() * 5 + Duration::from_secs(1);
        let runs = self.users().into_iter().filter_map(|user| {
            let slot = self.slots.get(&user)?.clone();
            let visible: Vec<Arc<RoomSnapshot>> = rooms
                .iter()
                .filter(|snapshot| snapshot.owners().contains(&user))
                .cloned()
                .collect();
            let input = TickInput {
                time,
                rooms: visible,
                results: results.get(&user).cloned().unwrap_or_default(),
                last_error: None,
            };
            let limits = self.limits.clone();
            let semaphore = self.semaphore.clone();

            Some(async move {
                let started = Instant::now();
                let result = run_user(slot, user.clone(), input, limits, semaphore, outer_timeout).await;
                let elapsed = started.elapsed();

                metrics::histogram!(names::SANDBOX_RUN_SECONDS).record(elapsed.as_secs_f64());
                if let Err(fault) = &result {
                    metrics::counter!(names::SANDBOX_FAULTS_TOTAL, "kind" => fault.label()).increment(1);
                    warn!(%user, time, %fault, "sandbox fault");
                }
                UserRun { user, result, elapsed }
            })
        });

        futures::future::join_all(runs).await
    }

    /// Get pool statistics
    pub fn stats(&self) -> PoolStats {
        let slots: Vec<Arc<Mutex<UserSlot>>> = self.slots.iter().map(|entry| entry.value().clone()).collect();
        let (mut live_sandboxes, mut busy) = (0, 0);
        for slot in &slots {
            let slot = slot.lock();
            if slot.busy {
                busy += 1;
                live_sandboxes += 1;
            } else if slot.sandbox.is_some() {
                live_sandboxes += 1;
            }
        }
        PoolStats {
            users: slots.len(),
            live_sandboxes,
            busy,
            pool_size: self.pool_size,
            available_permits: self.semaphore.available_permits(),
        }
    }
}

async fn run_user(
    slot: Arc<Mutex<UserSlot>>,
    user: UserId,
    input: TickInput,
    limits: SandboxLimits,
    semaphore: Arc<Semaphore>,
    outer_timeout: Duration,
) -> Result<TickOutput, SandboxFault> {
    let deadline = tokio::time::Instant::now() + outer_timeout;
    let Some(checkout) = slot.lock().checkout() else {
        debug!(%user, "previous run still executing");
        return Err(SandboxFault::Timeout);
    };

    let permit = match tokio::time::timeout_at(deadline, semaphore.acquire_owned()).await {
        Ok(Ok(permit)) => permit,
        Ok(Err(_)) => {
            let fault = Err(SandboxFault::Setup("sandbox pool closed".to_string()));
            slot.lock().checkin(checkout.sandbox, &fault);
            return fault;
        }
        Err(_) => {
            let fault = Err(SandboxFault::Timeout);
            slot.lock().checkin(checkout.sandbox, &fault);
            return fault;
        }
    };

    let worker_slot = slot.clone();
    let handle = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        let (sandbox, result) = execute(user, checkout, input, limits);
        worker_slot.lock().checkin(sandbox, &result);
        result
    });
    match tokio::time::timeout_at(deadline, handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(join)) => {
            // The worker died before checking in
            let fault = Err(SandboxFault::Setup(format!("worker failed: {}", join)));
            slot.lock().checkin(None, &fault);
            fault
        }
        Err(_) => Err(SandboxFault::Timeout),
    }
}

/// Runs without holding the slot lock; returns the sandbox to put back
fn execute(
    user: UserId,
    checkout: Checkout,
    mut input: TickInput,
    limits: SandboxLimits,
) -> (Option<Sandbox>, Result<TickOutput, SandboxFault>) {
    input.last_error = checkout.last_error;
    let mut sandbox = match checkout.sandbox {
        Some(sandbox) => sandbox,
        None => match Sandbox::create(user, &checkout.code, checkout.memory.as_deref(), limits) {
            Ok(sandbox) => sandbox,
            Err(fault) => return (None, Err(fault)),
        },
    };
    let result = sandbox.run(&input);
    (Some(sandbox), result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::constants::BodyPartType;
    use crate::game::object::GameObject;
    use crate::game::position::{RoomName, RoomPosition};
    use crate::game::room::Room;
    use crate::processor::registry;

    const MOVER: &str = r#"
        function loop()
          Memory.ticks = (Memory.ticks or 0) + 1
          for _, creep in pairs(Game.creeps) do creep:move(TOP) end
        end
    "#;

    const HOG: &str = r#"
        function loop()
          local hoard = {}
          for i = 1, 10000000 do hoard[i] = string.rep("z", 64) .. i end
        end
    "#;

    fn shared_room() -> Arc<RoomSnapshot> {
        let name: RoomName = "W1N1".parse().unwrap();
        let mut room = Room::new(name);
        for (i, user) in ["alice", "bob"].into_iter().enumerate() {
            room.insert(GameObject::creep(
                RoomPosition::new(name, 10 + i as u8, 10).unwrap(),
                user,
                &UserId::new(user),
                &[BodyPartType::Move],
                1500,
            ));
        }
        let bytes = room.encode(registry::global()).unwrap();
        Arc::new(RoomSnapshot::new(registry::global(), bytes).unwrap())
    }

    fn pool() -> SandboxPool {
        SandboxPool::new(
            2,
            SandboxLimits {
                memory_limit_mb: 4,
                tick_budget_ms: 5_000,
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_memory_fault_is_isolated() {
        let pool = pool();
        pool.load_user(UserId::new("alice"), MOVER.to_string(), None);
        pool.load_user(UserId::new("bob"), HOG.to_string(), None);
        let rooms = vec![shared_room()];

        let runs = pool.run_tick(1, &rooms, &HashMap::new()).await;
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].user, UserId::new("alice"));
        assert_eq!(runs[0].result.as_ref().unwrap().intents.len(), 1);
        assert_eq!(runs[1].result.as_ref().unwrap_err(), &SandboxFault::MemoryLimit);

        let stats = pool.stats();
        assert_eq!(stats.users, 2);
        assert_eq!(stats.live_sandboxes, 1);
        assert_eq!(stats.available_permits, 2);
    }

    #[tokio::test]
    async fn test_memory_carries_over_and_recreation() {
        let pool = pool();
        let alice = UserId::new("alice");
        pool.load_user(alice.clone(), MOVER.to_string(), Some(r#"{"ticks":41}"#.to_string()));

        pool.run_tick(1, &[], &HashMap::new()).await;
        let memory: serde_json::Value = serde_json::from_str(&pool.memory(&alice).unwrap()).unwrap();
        assert_eq!(memory["ticks"], 42);

        // New code replaces the sandbox but keeps nothing else
        pool.load_user(alice.clone(), MOVER.to_string(), pool.memory(&alice));
        pool.run_tick(2, &[], &HashMap::new()).await;
        let memory: serde_json::Value = serde_json::from_str(&pool.memory(&alice).unwrap()).unwrap();
        assert_eq!(memory["ticks"], 43);
    }

    #[tokio::test]
    async fn test_last_error_reaches_next_tick() {
        let pool = pool();
        let alice = UserId::new("alice");
        let code = r#"
            function loop()
              if Game.time == 1 then error("boom") end
              print(Game.lastError)
            end
        "#;
        pool.load_user(alice.clone(), code.to_string(), None);

        let first = pool.run_tick(1, &[], &HashMap::new()).await;
        assert!(matches!(first[0].result, Err(SandboxFault::Script(_))));
        let second = pool.run_tick(2, &[], &HashMap::new()).await;
        let console = &second[0].result.as_ref().unwrap().console;
        assert!(console[0].contains("boom"));
    }

    #[tokio::test]
    async fn test_more_users_than_workers() {
        let pool = SandboxPool::new(1, SandboxLimits::default());
        for name in ["a", "b", "c"] {
            pool.load_user(UserId::new(name), MOVER.to_string(), None);
        }
        let runs = pool.run_tick(1, &[], &HashMap::new()).await;
        assert_eq!(runs.len(), 3);
        assert!(runs.iter().all(|run| run.result.is_ok()));
        assert!(pool.remove_user(&UserId::new("b")));
        assert_eq!(pool.users().len(), 2);
    }

    fn fast_limits() -> SandboxLimits {
        SandboxLimits {
            tick_budget_ms: 10,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_stuck_run_does_not_stall_the_pool() {
        let pool = SandboxPool::new(2, fast_limits());
        let alice = UserId::new("alice");
        let zed = UserId::new("zed");
        pool.load_user(alice.clone(), MOVER.to_string(), None);
        pool.load_user(zed.clone(), MOVER.to_string(), None);

        // A worker that has not returned owns zed's sandbox and one permit
        let stuck = pool.slots.get(&zed).unwrap().clone();
        let checkout = stuck.lock().checkout().unwrap();
        let permit = pool.semaphore.clone().try_acquire_owned().unwrap();

        for time in 1..=3 {
            let runs = tokio::time::timeout(Duration::from_secs(10), pool.run_tick(time, &[], &HashMap::new()))
                .await
                .expect("tick stalled");
            assert!(runs[0].result.is_ok());
            assert_eq!(runs[1].user, zed);
            assert_eq!(runs[1].result.as_ref().unwrap_err(), &SandboxFault::Timeout);
            assert!(runs[1].elapsed < Duration::from_millis(500));
        }
        let stats = pool.stats();
        assert_eq!(stats.busy, 1);
        assert_eq!(stats.available_permits, 1);
        assert!(pool.memory(&zed).is_none());

        drop(permit);
        stuck.lock().checkin(checkout.sandbox, &Err(SandboxFault::Timeout));
        let runs = pool.run_tick(4, &[], &HashMap::new()).await;
        assert!(runs[1].result.is_ok());
        assert_eq!(pool.stats().busy, 0);
    }

    #[tokio::test]
    async fn test_permit_wait_is_bounded() {
        let pool = SandboxPool::new(1, fast_limits());
        pool.load_user(UserId::new("alice"), MOVER.to_string(), None);
        let permit = pool.semaphore.clone().try_acquire_owned().unwrap();

        let runs = tokio::time::timeout(Duration::from_secs(10), pool.run_tick(1, &[], &HashMap::new()))
            .await
            .expect("tick stalled");
        assert_eq!(runs[0].result.as_ref().unwrap_err(), &SandboxFault::Timeout);
        assert_eq!(pool.stats().busy, 0);

        drop(permit);
        let runs = pool.run_tick(2, &[], &HashMap::new()).await;
        assert!(runs[0].result.is_ok());
    }
}
