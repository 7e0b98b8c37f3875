// src/mods/spawn.rs
//! Spawns and extensions
//!
//! `spawn {body, name, directions?}` checks, in order: owner, arguments,
//! available energy, then whether the spawn is already busy. Energy is drawn
//! from the owner's spawns first, then extensions, nearest first.
//!
//! Creep names are unique per owner across the whole world. When several
//! rooms ask for the same new name in one tick, the first room in
//! processing order gets it.

use crate::game::constants::*;
use crate::game::find::{self, Relation, FIND_HOSTILE_SPAWNS, FIND_MY_SPAWNS};
use crate::game::object::*;
use crate::game::position::{Direction, RoomName, RoomPosition, Step};
use crate::game::room::Room;
use crate::game::store::{ResourceType, Store};
use crate::mods::wrong_kind;
use crate::processor::registry::{KindDescriptor, RegistryBuilder};
use crate::processor::{outcome, parse_args, Intent, ProcessorContext, ResultCode, WorldInfo};
use crate::schema::{Format, SchemaError, StructFormat, Value};
use serde::Deserialize;

pub fn register(builder: &mut RegistryBuilder) {
    builder
        .register_kind(KindDescriptor {
            kind: Kind::Spawn,
            format: spawn_format(),
            encode: encode_spawn,
            decode: decode_spawn,
        })
        .register_kind(KindDescriptor {
            kind: Kind::Extension,
            format: extension_format(),
            encode: encode_extension,
            decode: decode_extension,
        })
        .register_intent(Kind::Spawn, SPAWN_VERB, spawn_creep)
        .register_tick(Kind::Spawn, tick)
        .register_find(FIND_MY_SPAWNS, |room, viewer| {
            find::of_kinds_related(room, &[Kind::Spawn], viewer, Relation::Mine)
        })
        .register_find(FIND_HOSTILE_SPAWNS, |room, viewer| {
            find::of_kinds_related(room, &[Kind::Spawn], viewer, Relation::Hostile)
        });
}

pub fn spawn_format() -> Format {
    let spawning = StructFormat::new(
        "Spawning",
        [
            ("creep", Format::ID),
            ("directions", Format::vector(Format::UINT8)),
            ("needTime", Format::UINT32),
            ("spawnTime", Format::UINT32),
        ],
    );
    Format::structure(StructFormat::extend(
        &base_format(),
        "Spawn",
        [
            ("owner", Format::STRING),
            ("name", Format::STRING),
            ("hits", Format::INT32),
            ("store", Store::format()),
            ("spawning", Format::optional(Format::structure(spawning))),
        ],
    ))
}

pub fn extension_format() -> Format {
    Format::structure(StructFormat::extend(
        &base_format(),
        "Extension",
        [
            ("owner", Format::STRING),
            ("hits", Format::INT32),
            ("store", Store::format()),
        ],
    ))
}

fn encode_spawn(object: &GameObject) -> Result<Value, SchemaError> {
    let ObjectKind::Spawn(spawn) = &object.kind else {
        return Err(wrong_kind("spawn", object));
    };
    let spawning = spawn.spawning.as_ref().map(|spawning| {
        Value::fields([
            ("creep", Value::Id(spawning.creep.0)),
            (
                "directions",
                Value::from(spawning.directions.iter().map(|d| u8::from(*d)).collect::<Vec<_>>()),
            ),
            ("needTime", Value::from(spawning.need_time)),
            ("spawnTime", Value::from(spawning.spawn_time)),
        ])
    });
    Ok(object_value(
        object,
        [
            ("owner", user_value(&spawn.owner)),
            ("name", Value::from(spawn.name.as_str())),
            ("hits", Value::from(spawn.hits)),
            ("store", spawn.store.to_value()),
            ("spawning", Value::from(spawning)),
        ],
    ))
}

fn decode_spawn(value: &Value, room: RoomName) -> Result<GameObject, SchemaError> {
    let (id, pos) = decode_base(value, room)?;
    let spawning = match value.field("spawning")?.as_option()? {
        Some(spawning) => {
            let directions = spawning
                .field("directions")?
                .as_slice()?
                .iter()
                .map(|d| {
                    let raw = d.as_u8()?;
                    Direction::from_u8(raw).ok_or_else(|| SchemaError::Corrupt(format!("invalid direction {}", raw)))
                })
                .collect::<Result<Vec<_>, SchemaError>>()?;
            Some(Spawning {
                creep: ObjectId(spawning.field("creep")?.as_id()?),
                directions,
                need_time: spawning.field("needTime")?.as_u32()?,
                spawn_time: spawning.field("spawnTime")?.as_u32()?,
            })
        }
        None => None,
    };

    Ok(GameObject::with_id(
        id,
        pos,
        ObjectKind::Spawn(Spawn {
            owner: user_from_value(value.field("owner")?)?,
            name: value.field("name")?.as_str()?.to_string(),
            hits: value.field("hits")?.as_i32()?,
            store: Store::from_value(value.field("store")?)?,
            spawning,
        }),
    ))
}

fn encode_extension(object: &GameObject) -> Result<Value, SchemaError> {
    let ObjectKind::Extension(extension) = &object.kind else {
        return Err(wrong_kind("extension", object));
    };
    Ok(object_value(
        object,
        [
            ("owner", user_value(&extension.owner)),
            ("hits", Value::from(extension.hits)),
            ("store", extension.store.to_value()),
        ],
    ))
}

fn decode_extension(value: &Value, room: RoomName) -> Result<GameObject, SchemaError> {
    let (id, pos) = decode_base(value, room)?;
    Ok(GameObject::with_id(
        id,
        pos,
        ObjectKind::Extension(Extension {
            owner: user_from_value(value.field("owner")?)?,
            hits: value.field("hits")?.as_i32()?,
            store: Store::from_value(value.field("store")?)?,
        }),
    ))
}

const SPAWN_VERB: &str = "spawn";

/// Record the creep names `intents` (one room's batch) ask for
pub fn claim_names(world: &mut WorldInfo, room: RoomName, intents: &[(UserId, Intent)]) {
    for (user, intent) in intents.iter().filter(|(_, intent)| intent.verb == SPAWN_VERB) {
        if let Some(name) = intent.args.get("name").and_then(serde_json::Value::as_str) {
            world.claim_name(user, name, room);
        }
    }
}

#[derive(Debug, Deserialize)]
struct SpawnArgs {
    body: Vec<String>,
    name: String,
    #[serde(default)]
    directions: Option<Vec<u8>>,
}

struct SpawnPlan {
    body: Vec<BodyPartType>,
    name: String,
    directions: Vec<Direction>,
    cost: i32,
}

/// Energy structures of `owner` in withdrawal order
fn energy_structures(room: &Room, spawn: &GameObject, owner: &UserId) -> Vec<ObjectId> {
    let mut structures: Vec<&GameObject> = room
        .objects()
        .filter(|object| matches!(object.kind(), Kind::Spawn | Kind::Extension) && object.is_owned_by(owner))
        .collect();
    structures.sort_by_key(|object| {
        (
            object.kind() == Kind::Extension,
            object.pos.range_to(&spawn.pos),
        )
    });
    structures.into_iter().map(|object| object.id).collect()
}

fn check_spawn(
    room: &Room,
    world: &WorldInfo,
    user: &UserId,
    id: ObjectId,
    args: &serde_json::Value,
) -> Result<SpawnPlan, ResultCode> {
    let object = room.get(id).ok_or(ResultCode::InvalidTarget)?;
    let ObjectKind::Spawn(spawn) = &object.kind else {
        return Err(ResultCode::InvalidTarget);
    };
    if &spawn.owner != user {
        return Err(ResultCode::NotOwner);
    }

    let args: SpawnArgs = parse_args(args)?;
    if args.body.is_empty() || args.body.len() > MAX_CREEP_SIZE || args.name.is_empty() {
        return Err(ResultCode::InvalidArgs);
    }
    let body = args
        .body
        .iter()
        .map(|part| BodyPartType::from_name(part))
        .collect::<Option<Vec<_>>>()
        .ok_or(ResultCode::InvalidArgs)?;
    let directions = args
        .directions
        .unwrap_or_default()
        .into_iter()
        .map(Direction::from_u8)
        .collect::<Option<Vec<_>>>()
        .ok_or(ResultCode::InvalidArgs)?;
    let taken = room
        .by_kind(Kind::Creep)
        .filter_map(GameObject::as_creep)
        .any(|creep| creep.owner == *user && creep.name == args.name);
    if taken || !world.name_available(user, &args.name, room.name()) {
        return Err(ResultCode::InvalidArgs);
    }

    let cost: i32 = body.iter().map(|part| part.cost()).sum();
    let available: i32 = energy_structures(room, object, user)
        .into_iter()
        .filter_map(|id| room.get(id).and_then(GameObject::store))
        .map(|store| store.get(ResourceType::Energy))
        .sum();
    if available < cost {
        return Err(ResultCode::NotEnoughResources);
    }

    if spawn.spawning.is_some() {
        return Err(ResultCode::Busy);
    }

    Ok(SpawnPlan {
        body,
        name: args.name,
        directions,
        cost,
    })
}

fn spawn_creep(ctx: &mut ProcessorContext<'_>, user: &UserId, id: ObjectId, args: &serde_json::Value) -> ResultCode {
    outcome(check_spawn(ctx.room, ctx.world(), user, id, args).map(|plan| {
        let Some(spawn) = ctx.room.get(id) else {
            return;
        };
        let pos = spawn.pos;
        let sources = energy_structures(ctx.room, spawn, user);

        let mut cost = plan.cost;
        for source in sources {
            if cost == 0 {
                break;
            }
            if let Some(store) = ctx.room.get_mut(source).and_then(GameObject::store_mut) {
                cost -= store.remove(ResourceType::Energy, cost);
            }
        }

        let creep = ctx.room.insert(GameObject::creep(pos, &plan.name, user, &plan.body, 0));
        let need_time = plan.body.len() as u32 * CREEP_SPAWN_TIME;
        let spawn_time = ctx.time + need_time;
        if let Some(GameObject {
            kind: ObjectKind::Spawn(spawn),
            ..
        }) = ctx.room.get_mut(id)
        {
            spawn.spawning = Some(Spawning {
                creep,
                directions: plan.directions,
                need_time,
                spawn_time,
            });
        }
        ctx.room.refresh_aggregates();
        ctx.wake_at(spawn_time);
        tracing::debug!(spawn = %id, creep = %creep, name = %plan.name, need_time, "spawning creep");
    }))
}

/// First free tile around `pos`, preferring the requested directions
fn exit_tile(room: &Room, pos: RoomPosition, preferred: &[Direction]) -> Option<RoomPosition> {
    let candidates: &[Direction] = if preferred.is_empty() { &Direction::ALL } else { preferred };
    candidates.iter().find_map(|direction| match pos.step(*direction) {
        Step::Inside(next) if room.is_walkable(next.x, next.y) => Some(next),
        _ => None,
    })
}

fn tick(ctx: &mut ProcessorContext<'_>, id: ObjectId) {
    let time = ctx.time;
    let Some(object) = ctx.room.get(id) else {
        return;
    };
    let ObjectKind::Spawn(spawn) = &object.kind else {
        return;
    };
    let pos = object.pos;
    let pending = spawn
        .spawning
        .as_ref()
        .map(|spawning| (spawning.creep, spawning.spawn_time, spawning.directions.clone()));

    if let Some((creep, spawn_time, directions)) = pending {
        if spawn_time > time {
            ctx.wake_at(spawn_time);
        } else if !ctx.room.contains(creep) {
            clear_spawning(ctx, id);
        } else {
            match exit_tile(ctx.room, pos, &directions) {
                Some(next) => {
                    if let Some(object) = ctx.room.get_mut(creep) {
                        object.pos = next;
                        if let Some(creep) = object.as_creep_mut() {
                            creep.age_time = time + CREEP_LIFE_TIME;
                        }
                    }
                    clear_spawning(ctx, id);
                    tracing::debug!(spawn = %id, %creep, "creep spawned");
                }
                None => {
                    // Nowhere to go; try again next tick
                    if let Some(GameObject {
                        kind: ObjectKind::Spawn(spawn),
                        ..
                    }) = ctx.room.get_mut(id)
                    {
                        if let Some(spawning) = spawn.spawning.as_mut() {
                            spawning.spawn_time = time + 1;
                        }
                    }
                }
            }
            ctx.set_active();
        }
    }

    let energy_available = ctx.room.energy_available();
    if let Some(store) = ctx.room.get_mut(id).and_then(GameObject::store_mut) {
        if energy_available < SPAWN_ENERGY_CAPACITY && store.get(ResourceType::Energy) < SPAWN_ENERGY_CAPACITY {
            store.add(ResourceType::Energy, 1);
        }
    }
    ctx.set_active();
}

fn clear_spawning(ctx: &mut ProcessorContext<'_>, id: ObjectId) {
    if let Some(GameObject {
        kind: ObjectKind::Spawn(spawn),
        ..
    }) = ctx.room.get_mut(id)
    {
        spawn.spawning = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mods::testing::Fixture;
    use crate::processor::Intent;
    use serde_json::json;

    fn alice() -> UserId {
        UserId::new("alice")
    }

    fn spawn_with(fixture: &mut Fixture, energy: i32) -> ObjectId {
        let mut spawn = GameObject::spawn(Fixture::pos(10, 10), "Spawn1", &alice());
        if let Some(store) = spawn.store_mut() {
            store.clear();
            store.add(ResourceType::Energy, energy);
        }
        fixture.insert(spawn)
    }

    fn spawning(fixture: &Fixture, id: ObjectId) -> Option<Spawning> {
        match &fixture.get(id).kind {
            ObjectKind::Spawn(spawn) => spawn.spawning.clone(),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_contested_spawn_first_wins() {
        let mut fixture = Fixture::new();
        let spawn = spawn_with(&mut fixture, 250);
        let body = json!(["work", "carry", "move"]);

        let outcome = fixture.run(vec![
            (&alice(), Intent::new(spawn, "spawn", json!({"body": body, "name": "one"}))),
            (&alice(), Intent::new(spawn, "spawn", json!({"body": body, "name": "two"}))),
        ]);
        assert_eq!(
            Fixture::codes(&outcome),
            vec![ResultCode::Ok, ResultCode::NotEnoughResources]
        );
        assert_eq!(fixture.room.by_kind(Kind::Creep).count(), 1);
        // 250 - 200, plus one unit of low-energy regeneration
        assert_eq!(fixture.get(spawn).store().unwrap().get(ResourceType::Energy), 51);
    }

    #[test]
    fn test_spawn_check_order() {
        let mut fixture = Fixture::new();
        let spawn = spawn_with(&mut fixture, 300);
        let bob = UserId::new("bob");

        let outcome = fixture.run(vec![
            (&bob, Intent::new(spawn, "spawn", json!({"body": ["move"], "name": "x"}))),
            (&alice(), Intent::new(spawn, "spawn", json!({"body": ["wings"], "name": "x"}))),
            (&alice(), Intent::new(spawn, "spawn", json!({"body": [], "name": "x"}))),
            (&alice(), Intent::new(spawn, "spawn", json!({"body": ["claim"], "name": "x"}))),
            (&alice(), Intent::new(spawn, "spawn", json!({"body": ["move"], "name": "x"}))),
            (&alice(), Intent::new(spawn, "spawn", json!({"body": ["move"], "name": "y"}))),
            (&alice(), Intent::new(spawn, "spawn", json!({"body": ["move"], "name": "x"}))),
        ]);
        assert_eq!(
            Fixture::codes(&outcome),
            vec![
                ResultCode::NotOwner,
                ResultCode::InvalidArgs,
                ResultCode::InvalidArgs,
                ResultCode::NotEnoughResources,
                ResultCode::Ok,
                ResultCode::Busy,
                ResultCode::InvalidArgs,
            ]
        );
    }

    #[test]
    fn test_extensions_supply_energy_after_spawns() {
        let mut fixture = Fixture::new();
        let spawn = spawn_with(&mut fixture, 100);
        let mut extension = GameObject::extension(Fixture::pos(12, 10), &alice());
        if let Some(store) = extension.store_mut() {
            store.add(ResourceType::Energy, 50);
        }
        let extension = fixture.insert(extension);

        let outcome = fixture.run(vec![(
            &alice(),
            Intent::new(spawn, "spawn", json!({"body": ["work", "carry"], "name": "w"})),
        )]);
        assert_eq!(Fixture::codes(&outcome), vec![ResultCode::Ok]);
        assert_eq!(fixture.get(extension).store().unwrap().get(ResourceType::Energy), 0);
    }

    #[test]
    fn test_spawning_finishes_onto_free_tile() {
        let mut fixture = Fixture::new();
        let spawn = spawn_with(&mut fixture, 300);
        let outcome = fixture.run(vec![(
            &alice(),
            Intent::new(spawn, "spawn", json!({"body": ["move"], "name": "m", "directions": [3]})),
        )]);
        assert_eq!(Fixture::codes(&outcome), vec![ResultCode::Ok]);
        let pending = spawning(&fixture, spawn).unwrap();
        assert_eq!(pending.need_time, CREEP_SPAWN_TIME);

        for _ in 0..CREEP_SPAWN_TIME {
            fixture.run(vec![]);
        }
        assert!(spawning(&fixture, spawn).is_none());
        let creep = fixture.get(pending.creep);
        assert_eq!(creep.pos, Fixture::pos(11, 10));
        assert!(!creep.as_creep().unwrap().is_spawning());
    }

    #[test]
    fn test_spawning_defers_when_blocked() {
        let mut fixture = Fixture::new();
        let spawn = spawn_with(&mut fixture, 300);
        fixture.run(vec![(
            &alice(),
            Intent::new(spawn, "spawn", json!({"body": ["move"], "name": "m", "directions": [3]})),
        )]);
        fixture.insert(GameObject::source(Fixture::pos(11, 10)));
        for _ in 0..CREEP_SPAWN_TIME + 2 {
            fixture.run(vec![]);
        }
        let pending = spawning(&fixture, spawn).unwrap();
        assert_eq!(pending.spawn_time, fixture.time + 1);
    }

    #[test]
    fn test_names_unique_across_rooms() {
        let mut fixture = Fixture::new();
        let spawn = spawn_with(&mut fixture, 300);
        let elsewhere = RoomName::from_coords(5, 5);
        fixture.world.creep_names.insert((alice(), "veteran".to_string()));
        fixture.world.claim_name(&alice(), "twin", elsewhere);
        fixture.world.claim_name(&alice(), "mine", Fixture::name());

        let outcome = fixture.run(vec![
            (&alice(), Intent::new(spawn, "spawn", json!({"body": ["move"], "name": "veteran"}))),
            (&alice(), Intent::new(spawn, "spawn", json!({"body": ["move"], "name": "twin"}))),
            (&alice(), Intent::new(spawn, "spawn", json!({"body": ["move"], "name": "mine"}))),
        ]);
        assert_eq!(
            Fixture::codes(&outcome),
            vec![ResultCode::InvalidArgs, ResultCode::InvalidArgs, ResultCode::Ok]
        );
    }

    #[test]
    fn test_claims_follow_batch_order() {
        let mut world = WorldInfo::default();
        let first = RoomName::from_coords(0, 0);
        let second = RoomName::from_coords(1, 0);
        let spawn = ObjectId::generate();
        let batch = |name: &str| vec![(alice(), Intent::new(spawn, "spawn", json!({"body": ["move"], "name": name})))];
        claim_names(&mut world, first, &batch("twin"));
        claim_names(&mut world, second, &batch("twin"));
        claim_names(&mut world, second, &[(alice(), Intent::new(spawn, "move", json!({"name": "solo"})))]);

        assert_eq!(world.name_claims.get(&(alice(), "twin".to_string())), Some(&first));
        assert!(world.name_available(&alice(), "solo", first));
    }
}
