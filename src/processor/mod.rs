// src/processor/mod.rs
//! Intent processing
//!
//! One room per call, strictly sequential inside the room:
//!
//! 1. begin the tick (find cache and departed set cleared, aggregates fresh)
//! 2. apply intents in submission order; every handler re-checks its
//!    preconditions against the current state and only mutates on `Ok`
//! 3. run every tick handler once per live object of the matching kind
//! 4. hand back results, departures and the room's activity

pub mod context;
pub mod intent;
pub mod registry;

pub use context::{Departure, ProcessorContext, WorldInfo};
pub use intent::{Intent, IntentOutcome, ResultCode};
pub use registry::{Registry, RegistryBuilder};

use crate::game::object::{Kind, ObjectId, UserId};
use crate::game::room::Room;
use serde::de::DeserializeOwned;

/// Everything a processed room reports back to the orchestrator
#[derive(Debug, Default)]
pub struct RoomOutcome {
    pub results: Vec<(UserId, IntentOutcome)>,
    pub departures: Vec<Departure>,
    /// Process again next tick regardless of intents
    pub active: bool,
    /// Earliest tick a handler asked to be woken at
    pub wake_at: Option<u32>,
    pub applied: usize,
    pub rejected: usize,
}

/// Deserialize intent arguments; malformed arguments are `InvalidArgs`
pub fn parse_args<T: DeserializeOwned>(args: &serde_json::Value) -> Result<T, ResultCode> {
    T::deserialize(args).map_err(|_| ResultCode::InvalidArgs)
}

/// Fold a check-then-apply result into a result code
pub fn outcome(result: Result<(), ResultCode>) -> ResultCode {
    match result {
        Ok(()) => ResultCode::Ok,
        Err(code) => code,
    }
}

fn apply_intent(registry: &Registry, ctx: &mut ProcessorContext<'_>, user: &UserId, intent: &Intent) -> ResultCode {
    let Some(kind) = ctx.room.get(intent.object).map(|object| object.kind()) else {
        return ResultCode::InvalidTarget;
    };
    match registry.intent(kind, &intent.verb) {
        Some(handler) => handler(ctx, user, intent.object, &intent.args),
        None => ResultCode::InvalidArgs,
    }
}

/// Process one room for tick `time`
pub fn process_room(
    registry: &Registry,
    room: &mut Room,
    time: u32,
    intents: &[(UserId, Intent)],
    world: &WorldInfo,
) -> RoomOutcome {
    room.begin_tick(time);
    let name = room.name();
    let mut ctx = ProcessorContext::new(room, time, world);
    let mut outcome = RoomOutcome::default();

    for (user, intent) in intents {
        let code = apply_intent(registry, &mut ctx, user, intent);
        if code.is_ok() {
            outcome.applied += 1;
        } else {
            outcome.rejected += 1;
            tracing::trace!(room = %name, %user, object = %intent.object, verb = %intent.verb, ?code, "intent rejected");
        }
        outcome.results.push((
            user.clone(),
            IntentOutcome {
                object: intent.object,
                verb: intent.verb.clone(),
                code,
            },
        ));
    }

    let live: Vec<(ObjectId, Kind)> = ctx.room.objects().map(|object| (object.id, object.kind())).collect();
    for (id, kind) in live {
        for handler in registry.tick_handlers(kind) {
            if !ctx.room.contains(id) {
                break;
            }
            handler(&mut ctx, id);
        }
    }

    ctx.room.refresh_aggregates();
    let (active, wake_at, departures) = ctx.into_parts();
    outcome.active = active;
    outcome.wake_at = wake_at;
    outcome.departures = departures;

    tracing::debug!(
        room = %name,
        time,
        applied = outcome.applied,
        rejected = outcome.rejected,
        departures = outcome.departures.len(),
        active,
        "room processed"
    );
    outcome
}
