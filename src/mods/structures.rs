// src/mods/structures.rs
//! Controllers, roads, containers and construction sites
//!
//! Roads and containers lose hits on a fixed schedule and disappear at zero.
//! Construction sites turn into their structure once progress reaches the
//! total.

use crate::game::constants::*;
use crate::game::find::{
    self, Relation, FIND_CONSTRUCTION_SITES, FIND_HOSTILE_STRUCTURES, FIND_MY_CONSTRUCTION_SITES, FIND_MY_STRUCTURES,
    FIND_STRUCTURES,
};
use crate::game::object::*;
use crate::game::position::RoomName;
use crate::game::store::Store;
use crate::mods::wrong_kind;
use crate::processor::registry::{KindDescriptor, RegistryBuilder};
use crate::processor::ProcessorContext;
use crate::schema::{Format, SchemaError, StructFormat, Value};

const STRUCTURE_KINDS: [Kind; 5] = [Kind::Spawn, Kind::Extension, Kind::Controller, Kind::Road, Kind::Container];

pub fn register(builder: &mut RegistryBuilder) {
    builder
        .register_kind(KindDescriptor {
            kind: Kind::Controller,
            format: controller_format(),
            encode: encode_controller,
            decode: decode_controller,
        })
        .register_kind(KindDescriptor {
            kind: Kind::Road,
            format: road_format(),
            encode: encode_road,
            decode: decode_road,
        })
        .register_kind(KindDescriptor {
            kind: Kind::Container,
            format: container_format(),
            encode: encode_container,
            decode: decode_container,
        })
        .register_kind(KindDescriptor {
            kind: Kind::ConstructionSite,
            format: site_format(),
            encode: encode_site,
            decode: decode_site,
        })
        .register_tick(Kind::Road, decay)
        .register_tick(Kind::Container, decay)
        .register_find(FIND_STRUCTURES, |room, _| find::of_kinds(room, &STRUCTURE_KINDS))
        .register_find(FIND_MY_STRUCTURES, |room, viewer| {
            find::of_kinds_related(room, &STRUCTURE_KINDS, viewer, Relation::Mine)
        })
        .register_find(FIND_HOSTILE_STRUCTURES, |room, viewer| {
            find::of_kinds_related(room, &STRUCTURE_KINDS, viewer, Relation::Hostile)
        })
        .register_find(FIND_CONSTRUCTION_SITES, |room, _| room.ids_of(Kind::ConstructionSite))
        .register_find(FIND_MY_CONSTRUCTION_SITES, |room, viewer| {
            find::of_kinds_related(room, &[Kind::ConstructionSite], viewer, Relation::Mine)
        });
}

pub fn controller_format() -> Format {
    Format::structure(StructFormat::extend(
        &base_format(),
        "Controller",
        [
            ("owner", Format::optional(Format::STRING)),
            ("level", Format::UINT8),
            ("progress", Format::INT32),
        ],
    ))
}

pub fn road_format() -> Format {
    Format::structure(StructFormat::extend(
        &base_format(),
        "Road",
        [("hits", Format::INT32), ("nextDecayTime", Format::UINT32)],
    ))
}

pub fn container_format() -> Format {
    Format::structure(StructFormat::extend(
        &base_format(),
        "Container",
        [
            ("hits", Format::INT32),
            ("store", Store::format()),
            ("nextDecayTime", Format::UINT32),
        ],
    ))
}

pub fn site_format() -> Format {
    Format::structure(StructFormat::extend(
        &base_format(),
        "ConstructionSite",
        [
            ("owner", Format::STRING),
            ("structureType", Format::UINT8),
            ("progress", Format::INT32),
            ("progressTotal", Format::INT32),
        ],
    ))
}

fn encode_controller(object: &GameObject) -> Result<Value, SchemaError> {
    let ObjectKind::Controller(controller) = &object.kind else {
        return Err(wrong_kind("controller", object));
    };
    Ok(object_value(
        object,
        [
            ("owner", Value::from(controller.owner.as_ref().map(user_value))),
            ("level", Value::from(controller.level)),
            ("progress", Value::from(controller.progress)),
        ],
    ))
}

fn decode_controller(value: &Value, room: RoomName) -> Result<GameObject, SchemaError> {
    let (id, pos) = decode_base(value, room)?;
    let owner = value.field("owner")?.as_option()?.map(user_from_value).transpose()?;
    Ok(GameObject::with_id(
        id,
        pos,
        ObjectKind::Controller(Controller {
            owner,
            level: value.field("level")?.as_u8()?,
            progress: value.field("progress")?.as_i32()?,
        }),
    ))
}

fn encode_road(object: &GameObject) -> Result<Value, SchemaError> {
    let ObjectKind::Road(road) = &object.kind else {
        return Err(wrong_kind("road", object));
    };
    Ok(object_value(
        object,
        [
            ("hits", Value::from(road.hits)),
            ("nextDecayTime", Value::from(road.next_decay_time)),
        ],
    ))
}

fn decode_road(value: &Value, room: RoomName) -> Result<GameObject, SchemaError> {
    let (id, pos) = decode_base(value, room)?;
    Ok(GameObject::with_id(
        id,
        pos,
        ObjectKind::Road(Road {
            hits: value.field("hits")?.as_i32()?,
            next_decay_time: value.field("nextDecayTime")?.as_u32()?,
        }),
    ))
}

fn encode_container(object: &GameObject) -> Result<Value, SchemaError> {
    let ObjectKind::Container(container) = &object.kind else {
        return Err(wrong_kind("container", object));
    };
    Ok(object_value(
        object,
        [
            ("hits", Value::from(container.hits)),
            ("store", container.store.to_value()),
            ("nextDecayTime", Value::from(container.next_decay_time)),
        ],
    ))
}

fn decode_container(value: &Value, room: RoomName) -> Result<GameObject, SchemaError> {
    let (id, pos) = decode_base(value, room)?;
    Ok(GameObject::with_id(
        id,
        pos,
        ObjectKind::Container(Container {
            hits: value.field("hits")?.as_i32()?,
            store: Store::from_value(value.field("store")?)?,
            next_decay_time: value.field("nextDecayTime")?.as_u32()?,
        }),
    ))
}

fn encode_site(object: &GameObject) -> Result<Value, SchemaError> {
    let ObjectKind::ConstructionSite(site) = &object.kind else {
        return Err(wrong_kind("constructionSite", object));
    };
    Ok(object_value(
        object,
        [
            ("owner", user_value(&site.owner)),
            ("structureType", Value::from(site.structure_type.tag())),
            ("progress", Value::from(site.progress)),
            ("progressTotal", Value::from(site.progress_total)),
        ],
    ))
}

fn decode_site(value: &Value, room: RoomName) -> Result<GameObject, SchemaError> {
    let (id, pos) = decode_base(value, room)?;
    let tag = value.field("structureType")?.as_u8()?;
    let structure_type = Kind::from_tag(tag)
        .filter(|kind| kind.is_structure())
        .ok_or_else(|| SchemaError::Corrupt(format!("invalid structure type {}", tag)))?;
    Ok(GameObject::with_id(
        id,
        pos,
        ObjectKind::ConstructionSite(ConstructionSite {
            owner: user_from_value(value.field("owner")?)?,
            structure_type,
            progress: value.field("progress")?.as_i32()?,
            progress_total: value.field("progressTotal")?.as_i32()?,
        }),
    ))
}

/// Add upgrade progress, levelling up while the threshold is met
pub fn add_progress(controller: &mut Controller, amount: i32) {
    if controller.level >= MAX_CONTROLLER_LEVEL {
        return;
    }
    controller.progress += amount;
    while controller.level >= 1 && controller.level < MAX_CONTROLLER_LEVEL {
        let needed = CONTROLLER_LEVELS[usize::from(controller.level) - 1];
        if controller.progress < needed {
            break;
        }
        controller.progress -= needed;
        controller.level += 1;
        tracing::debug!(level = controller.level, "controller levelled up");
    }
    if controller.level >= MAX_CONTROLLER_LEVEL {
        controller.progress = 0;
    }
}

/// Add build progress to a site; a finished site is replaced by its structure
pub fn add_build_progress(ctx: &mut ProcessorContext<'_>, site: ObjectId, amount: i32) {
    let finished = match ctx.room.get_mut(site) {
        Some(GameObject {
            kind: ObjectKind::ConstructionSite(construction),
            ..
        }) => {
            construction.progress += amount;
            construction.progress >= construction.progress_total
        }
        _ => return,
    };
    if !finished {
        return;
    }

    let Some(removed) = ctx.destroy(site) else {
        return;
    };
    let ObjectKind::ConstructionSite(construction) = removed.kind else {
        return;
    };
    let pos = removed.pos;
    let owner = construction.owner;
    let structure = match construction.structure_type {
        Kind::Spawn => {
            let count = ctx
                .room
                .by_kind(Kind::Spawn)
                .filter(|object| object.is_owned_by(&owner))
                .count();
            GameObject::spawn(pos, &format!("Spawn{}", count + 1), &owner)
        }
        Kind::Extension => GameObject::extension(pos, &owner),
        Kind::Road => GameObject::road(pos, ctx.time + ROAD_DECAY_TIME),
        Kind::Container => GameObject::container(pos, ctx.time + CONTAINER_DECAY_TIME),
        other => {
            tracing::warn!(kind = other.name(), "construction site for unbuildable kind");
            return;
        }
    };
    let kind = structure.kind();
    let id = ctx.room.insert(structure);
    ctx.room.refresh_aggregates();
    ctx.set_active();
    tracing::debug!(structure = %id, kind = kind.name(), %owner, "construction finished");
}

/// Periodic hit loss for roads and containers
fn decay(ctx: &mut ProcessorContext<'_>, id: ObjectId) {
    let time = ctx.time;
    let (hits, next_decay_time) = match ctx.room.get_mut(id).map(|object| &mut object.kind) {
        Some(ObjectKind::Road(road)) => {
            if road.next_decay_time <= time {
                road.hits -= ROAD_DECAY_AMOUNT;
                road.next_decay_time = time + ROAD_DECAY_TIME;
            }
            (road.hits, road.next_decay_time)
        }
        Some(ObjectKind::Container(container)) => {
            if container.next_decay_time <= time {
                container.hits -= CONTAINER_DECAY;
                container.next_decay_time = time + CONTAINER_DECAY_TIME;
            }
            (container.hits, container.next_decay_time)
        }
        _ => return,
    };

    if hits > 0 {
        ctx.wake_at(next_decay_time);
        return;
    }
    if let Some(mut destroyed) = ctx.destroy(id) {
        let pos = destroyed.pos;
        if let Some(store) = destroyed.store_mut() {
            for (resource, amount) in store.clear() {
                ctx.drop_resource(pos, resource, amount);
            }
        }
        tracing::debug!(structure = %id, kind = destroyed.kind().name(), "structure decayed");
    }
    ctx.set_active();
}
