// src/sandbox/sandbox.rs
//! One user's isolated Lua state
//!
//! Lifecycle: `create` (provision, bootstrap, restore `Memory`, run the user
//! code once) → `run` once per tick → `destroy`.

use crate::game::object::UserId;
use crate::game::room::RoomSnapshot;
use crate::processor::{Intent, IntentOutcome};
use crate::sandbox::bindings::{self, Epoch, RoomHandle};
use crate::sandbox::{SandboxFault, SandboxLimits};
use mlua::{Function, HookTriggers, Lua, LuaOptions, LuaSerdeExt, MultiValue, StdLib, Table, VmState};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

const RUNTIME: &str = include_str!("runtime.lua");

/// Pattern calls run inside C where the budget hook cannot interrupt them.
/// A call is refused when `n^(q + 1)` exceeds this, `n` being the subject
/// length and `q` the number of quantifiers in the pattern.
const PATTERN_COST_LIMIT: f64 = 1e7;

/// What a sandbox sees for one tick
#[derive(Debug, Clone, Default)]
pub struct TickInput {
    pub time: u32,
    /// Rooms this user can observe
    pub rooms: Vec<Arc<RoomSnapshot>>,
    /// Outcomes of last tick's intents
    pub results: Vec<IntentOutcome>,
    /// Fault reported for last tick, if any
    pub last_error: Option<String>,
}

/// What comes back out of a sandbox
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickOutput {
    pub intents: Vec<Intent>,
    /// Serialized `Memory` (JSON)
    pub memory: String,
    pub console: Vec<String>,
    /// Intents dropped by the per-tick cap or for being malformed
    pub dropped: usize,
}

/// Isolated Lua state for one user
pub struct Sandbox {
    user: UserId,
    lua: Lua,
    limits: SandboxLimits,
    console: Arc<Mutex<Vec<String>>>,
    epoch: Epoch,
    runs: u64,
}

impl std::fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sandbox")
            .field("user", &self.user)
            .field("runs", &self.runs)
            .field("used_memory", &self.lua.used_memory())
            .finish()
    }
}

fn is_memory_error(err: &mlua::Error) -> bool {
    match err {
        mlua::Error::MemoryError(_) => true,
        mlua::Error::CallbackError { cause, .. } => is_memory_error(cause),
        mlua::Error::WithContext { cause, .. } => is_memory_error(cause),
        _ => false,
    }
}

/// Quantifiers outside escapes and character classes
fn pattern_quantifiers(pattern: &[u8]) -> u32 {
    let mut count = 0;
    let mut i = 0;
    while i < pattern.len() {
        match pattern[i] {
            b'%' if pattern.get(i + 1) == Some(&b'b') => {
                count += 1;
                i += 4;
                continue;
            }
            b'%' => {
                i += 2;
                continue;
            }
            b'[' => {
                i += 1;
                if pattern.get(i) == Some(&b'^') {
                    i += 1;
                }
                if pattern.get(i) == Some(&b']') {
                    i += 1;
                }
                while i < pattern.len() && pattern[i] != b']' {
                    if pattern[i] == b'%' {
                        i += 1;
                    }
                    i += 1;
                }
            }
            b'*' | b'+' | b'-' | b'?' => count += 1,
            _ => {}
        }
        i += 1;
    }
    count
}

fn pattern_allowed(subject_len: usize, pattern: &[u8]) -> bool {
    let n = subject_len.max(1) as f64;
    n.powi(pattern_quantifiers(pattern) as i32 + 1) <= PATTERN_COST_LIMIT
}

fn is_truthy(value: Option<&mlua::Value>) -> bool {
    !matches!(value, None | Some(mlua::Value::Nil) | Some(mlua::Value::Boolean(false)))
}

/// Close the holes the restricted stdlib leaves open: binary chunks and
/// pattern matches that never yield to the budget hook
fn harden(lua: &Lua) -> mlua::Result<()> {
    let globals = lua.globals();
    globals.set("dofile", mlua::Value::Nil)?;
    globals.set("loadfile", mlua::Value::Nil)?;

    let load: Function = globals.get("load")?;
    let text_only = lua.create_function(move |lua, mut args: MultiValue| {
        while args.len() < 3 {
            args.push_back(mlua::Value::Nil);
        }
        args[2] = mlua::Value::String(lua.create_string("t")?);
        load.call::<MultiValue>(args)
    })?;
    globals.set("load", text_only)?;

    let string: Table = globals.get("string")?;
    string.set("dump", mlua::Value::Nil)?;
    for name in ["find", "match", "gmatch", "gsub"] {
        let original: Function = string.get(name)?;
        let honours_plain = name == "find";
        let guarded = lua.create_function(move |_, args: MultiValue| {
            let plain = honours_plain && is_truthy(args.get(3));
            if let (false, Some(mlua::Value::String(subject)), Some(mlua::Value::String(pattern))) =
                (plain, args.get(0), args.get(1))
            {
                let len = subject.as_bytes().len();
                if !pattern_allowed(len, &pattern.as_bytes()) {
                    return Err(mlua::Error::RuntimeError(format!(
                        "pattern too complex for a {}-byte subject",
                        len
                    )));
                }
            }
            original.call::<MultiValue>(args)
        })?;
        string.set(name, guarded)?;
    }
    Ok(())
}

fn classify(err: mlua::Error, expired: bool) -> SandboxFault {
    if expired {
        SandboxFault::Timeout
    } else if is_memory_error(&err) {
        SandboxFault::MemoryLimit
    } else {
        SandboxFault::Script(err.to_string())
    }
}

impl Sandbox {
    /// Provision a fresh state and run `code` once. `memory` is the user's
    /// last persisted `Memory` blob.
    pub fn create(user: UserId, code: &str, memory: Option<&str>, limits: SandboxLimits) -> Result<Self, SandboxFault> {
        let libs = StdLib::TABLE | StdLib::STRING | StdLib::MATH | StdLib::UTF8 | StdLib::COROUTINE;
        let lua = Lua::new_with(libs, LuaOptions::default()).map_err(|e| SandboxFault::Setup(e.to_string()))?;
        lua.set_memory_limit(limits.memory_limit_bytes())
            .map_err(|e| SandboxFault::Setup(e.to_string()))?;

        let sandbox = Self {
            user,
            lua,
            limits,
            console: Arc::new(Mutex::new(Vec::new())),
            epoch: Epoch::default(),
            runs: 0,
        };

        sandbox.with_budget(|lua| {
            harden(lua)?;
            bindings::install(lua, &sandbox.user, sandbox.console.clone())?;
            lua.load(RUNTIME).set_name("runtime").exec()?;
            Ok(())
        })?;
        sandbox.restore_memory(memory)?;

        sandbox.with_budget(|lua| lua.load(code).set_name("main").exec())?;
        sandbox
            .lua
            .globals()
            .get::<Function>("loop")
            .map_err(|_| SandboxFault::Script("code must define a global `loop` function".to_string()))?;

        debug!(user = %sandbox.user, used_memory = sandbox.lua.used_memory(), "sandbox created");
        Ok(sandbox)
    }

    fn restore_memory(&self, memory: Option<&str>) -> Result<(), SandboxFault> {
        let Some(blob) = memory.filter(|blob| !blob.is_empty()) else {
            return Ok(());
        };
        let parsed: serde_json::Value = match serde_json::from_str(blob) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(user = %self.user, error = %e, "discarding unreadable Memory");
                return Ok(());
            }
        };
        self.with_budget(|lua| {
            let value = lua.to_value(&parsed)?;
            if value.is_table() {
                lua.globals().set("Memory", value)?;
            }
            Ok(())
        })
    }

    /// Run `f` under the tick budget and classify any failure
    fn with_budget<T, F>(&self, f: F) -> Result<T, SandboxFault>
    where
        F: FnOnce(&Lua) -> mlua::Result<T>,
    {
        let started = Instant::now();
        let budget = self.limits.tick_budget();
        let expired = Arc::new(AtomicBool::new(false));
        let flag = expired.clone();
        self.lua.set_hook(
            HookTriggers::new().every_nth_instruction(self.limits.instruction_interval.max(1)),
            move |_lua, _debug| {
                if started.elapsed() >= budget {
                    flag.store(true, Ordering::Relaxed);
                    return Err(mlua::Error::RuntimeError("tick budget exhausted".to_string()));
                }
                Ok(VmState::Continue)
            },
        );
        let result = f(&self.lua);
        self.lua.remove_hook();
        result.map_err(|err| classify(err, expired.load(Ordering::Relaxed)))
    }

    /// Execute one tick
    pub fn run(&mut self, input: &TickInput) -> Result<TickOutput, SandboxFault> {
        self.runs += 1;
        self.console.lock().clear();
        self.epoch.advance();

        let raw_intents = self.with_budget(|lua| {
            let handles = lua.create_table()?;
            for snapshot in &input.rooms {
                handles.set(
                    snapshot.name().to_string(),
                    RoomHandle::new(snapshot, self.user.clone(), &self.epoch),
                )?;
            }
            let feedback = lua.create_table()?;
            feedback.set("results", lua.to_value(&input.results)?)?;
            if let Some(error) = &input.last_error {
                feedback.set("lastError", error.as_str())?;
            }
            let tick: Function = lua.globals().get("__tick")?;
            let intents: Table = tick.call((input.time, handles, feedback))?;
            intents
                .sequence_values::<mlua::Value>()
                .map(|intent| intent.and_then(|intent| lua.from_value::<serde_json::Value>(intent)))
                .collect::<mlua::Result<Vec<_>>>()
        })?;

        let memory = self.with_budget(|lua| {
            let memory: mlua::Value = lua.globals().get("Memory")?;
            let json: serde_json::Value = lua.from_value(memory)?;
            serde_json::to_string(&json).map_err(mlua::Error::external)
        })?;
        if memory.len() > self.limits.memory_blob_limit {
            return Err(SandboxFault::Script(format!(
                "Memory is {} bytes, limit is {}",
                memory.len(),
                self.limits.memory_blob_limit
            )));
        }

        let total = raw_intents.len();
        let intents: Vec<Intent> = raw_intents
            .into_iter()
            .filter_map(|raw| serde_json::from_value(raw).ok())
            .take(self.limits.max_intents_per_tick)
            .collect();
        let dropped = total - intents.len();
        if dropped > 0 {
            debug!(user = %self.user, dropped, "intents dropped");
        }

        Ok(TickOutput {
            intents,
            memory,
            console: std::mem::take(&mut *self.console.lock()),
            dropped,
        })
    }

    pub fn user(&self) -> &UserId {
        &self.user
    }

    /// Ticks run so far
    pub fn runs(&self) -> u64 {
        self.runs
    }

    pub fn used_memory(&self) -> usize {
        self.lua.used_memory()
    }

    /// Drop the state and everything it holds
    pub fn destroy(self) {
        debug!(user = %self.user, runs = self.runs, "sandbox destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::constants::BodyPartType;
    use crate::game::object::{GameObject, ObjectId};
    use crate::game::position::{RoomName, RoomPosition};
    use crate::game::room::Room;
    use crate::processor::{registry, ResultCode};

    fn alice() -> UserId {
        UserId::new("alice")
    }

    fn room_with_creep() -> (Arc<RoomSnapshot>, ObjectId) {
        let name: RoomName = "W1N1".parse().unwrap();
        let mut room = Room::new(name);
        let creep = room.insert(GameObject::creep(
            RoomPosition::new(name, 10, 10).unwrap(),
            "scout",
            &alice(),
            &[BodyPartType::Move],
            1500,
        ));
        room.begin_tick(7);
        let bytes = room.encode(registry::global()).unwrap();
        (Arc::new(RoomSnapshot::new(registry::global(), bytes).unwrap()), creep)
    }

    fn input(rooms: Vec<Arc<RoomSnapshot>>) -> TickInput {
        TickInput {
            time: 7,
            rooms,
            ..Default::default()
        }
    }

    #[test]
    fn test_code_must_define_loop() {
        let err = Sandbox::create(alice(), "x = 1", None, SandboxLimits::default()).unwrap_err();
        assert!(matches!(err, SandboxFault::Script(_)));

        let err = Sandbox::create(alice(), "function loop(", None, SandboxLimits::default()).unwrap_err();
        assert!(matches!(err, SandboxFault::Script(_)));
    }

    #[test]
    fn test_file_loaders_removed() {
        let code = r#"
            function loop()
              print(type(dofile), type(loadfile), type(io), type(os))
            end
        "#;
        let mut sandbox = Sandbox::create(alice(), code, None, SandboxLimits::default()).unwrap();
        let output = sandbox.run(&input(vec![])).unwrap();
        assert_eq!(output.console, vec!["nil\tnil\tnil\tnil".to_string()]);
    }

    #[test]
    fn test_binary_chunks_rejected() {
        let code = r#"
            function loop()
              local f = load("\27LuaT\0")
              print(type(string.dump), f == nil, load("return 41 + 1")(), load("return x", "c", "b", { x = 5 })())
            end
        "#;
        let mut sandbox = Sandbox::create(alice(), code, None, SandboxLimits::default()).unwrap();
        let output = sandbox.run(&input(vec![])).unwrap();
        assert_eq!(output.console, vec!["nil\ttrue\t42\t5".to_string()]);
    }

    #[test]
    fn test_backtracking_pattern_refused() {
        let limits = SandboxLimits {
            tick_budget_ms: 10,
            ..Default::default()
        };
        let code = r#"
            function loop()
              local ok = pcall(string.find, string.rep("a", 30), string.rep("a*", 12) .. "b")
              local ew, x = ("W12N3"):match("^([WE])(%d+)([NS])(%d+)$")
              print(ok, ew, x, string.find("a+b", "+", 1, true))
            end
        "#;
        let mut sandbox = Sandbox::create(alice(), code, None, limits).unwrap();
        let started = Instant::now();
        let output = sandbox.run(&input(vec![])).unwrap();
        assert!(started.elapsed() < std::time::Duration::from_secs(1));
        assert_eq!(output.console, vec!["false\tW\t12\t2\t2".to_string()]);
    }

    #[test]
    fn test_pattern_quantifier_count() {
        assert_eq!(pattern_quantifiers(b"abc"), 0);
        assert_eq!(pattern_quantifiers(b"[a-z]+%-%d*"), 2);
        assert_eq!(pattern_quantifiers(b"%b()x?"), 2);
        assert_eq!(pattern_quantifiers(b"[%]*+]"), 0);
        assert!(pattern_allowed(1_000, b"%d+"));
        assert!(!pattern_allowed(30, "a*".repeat(12).as_bytes()));
    }

    #[test]
    fn test_creep_intents_come_back() {
        let (snapshot, creep) = room_with_creep();
        let code = r#"
            function loop()
              for name, creep in pairs(Game.creeps) do
                print(name, creep.x, creep.y, Game.time)
                creep:move(RIGHT)
              end
            end
        "#;
        let mut sandbox = Sandbox::create(alice(), code, None, SandboxLimits::default()).unwrap();
        let output = sandbox.run(&input(vec![snapshot])).unwrap();
        assert_eq!(output.intents.len(), 1);
        assert_eq!(output.intents[0].object, creep);
        assert_eq!(output.intents[0].verb, "move");
        assert_eq!(output.intents[0].args["direction"], 3);
        assert_eq!(output.console, vec!["scout\t10\t10\t7".to_string()]);
    }

    #[test]
    fn test_memory_survives_recreation() {
        let code = r#"
            Memory.runs = Memory.runs or 0
            function loop()
              Memory.runs = Memory.runs + 1
            end
        "#;
        let mut sandbox = Sandbox::create(alice(), code, None, SandboxLimits::default()).unwrap();
        sandbox.run(&input(vec![])).unwrap();
        let output = sandbox.run(&input(vec![])).unwrap();
        sandbox.destroy();

        let mut sandbox = Sandbox::create(alice(), code, Some(&output.memory), SandboxLimits::default()).unwrap();
        let output = sandbox.run(&input(vec![])).unwrap();
        let memory: serde_json::Value = serde_json::from_str(&output.memory).unwrap();
        assert_eq!(memory["runs"], 3);
    }

    #[test]
    fn test_feedback_is_visible() {
        let code = r#"
            function loop()
              print(Game.lastError, #Game.results, Game.results[1].code == ERR_NOT_IN_RANGE)
            end
        "#;
        let mut sandbox = Sandbox::create(alice(), code, None, SandboxLimits::default()).unwrap();
        let output = sandbox
            .run(&TickInput {
                time: 2,
                rooms: vec![],
                results: vec![IntentOutcome {
                    object: ObjectId::generate(),
                    verb: "harvest".to_string(),
                    code: ResultCode::NotInRange,
                }],
                last_error: Some("tick budget exhausted".to_string()),
            })
            .unwrap();
        assert_eq!(output.console, vec!["tick budget exhausted\t1\ttrue".to_string()]);
    }

    #[test]
    fn test_infinite_loop_times_out() {
        let limits = SandboxLimits {
            tick_budget_ms: 30,
            ..Default::default()
        };
        let mut sandbox = Sandbox::create(alice(), "function loop() while true do end end", None, limits).unwrap();
        assert_eq!(sandbox.run(&input(vec![])).unwrap_err(), SandboxFault::Timeout);
        // The hook is gone and the state still usable
        assert_eq!(sandbox.run(&input(vec![])).unwrap_err(), SandboxFault::Timeout);
    }

    #[test]
    fn test_memory_ceiling() {
        let limits = SandboxLimits {
            memory_limit_mb: 4,
            tick_budget_ms: 5_000,
            ..Default::default()
        };
        let code = r#"
            function loop()
              local hoard = {}
              for i = 1, 10000000 do
                hoard[i] = string.rep("x", 64) .. i
              end
            end
        "#;
        let mut sandbox = Sandbox::create(alice(), code, None, limits).unwrap();
        assert_eq!(sandbox.run(&input(vec![])).unwrap_err(), SandboxFault::MemoryLimit);
    }

    #[test]
    fn test_intent_cap_and_blob_limit() {
        let (snapshot, _) = room_with_creep();
        let limits = SandboxLimits {
            max_intents_per_tick: 2,
            ..Default::default()
        };
        let code = r#"
            function loop()
              for i = 1, 5 do Game.creeps.scout:move(TOP) end
            end
        "#;
        let mut sandbox = Sandbox::create(alice(), code, None, limits).unwrap();
        let output = sandbox.run(&input(vec![snapshot])).unwrap();
        assert_eq!(output.intents.len(), 2);
        assert_eq!(output.dropped, 3);

        let limits = SandboxLimits {
            memory_blob_limit: 16,
            ..Default::default()
        };
        let code = r#"function loop() Memory.note = string.rep("y", 64) end"#;
        let mut sandbox = Sandbox::create(alice(), code, None, limits).unwrap();
        assert!(matches!(sandbox.run(&input(vec![])), Err(SandboxFault::Script(_))));
    }
}
