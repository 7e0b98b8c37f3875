// src/mods/source.rs
//! Energy sources
//!
//! A source that has been harvested below capacity schedules a refill
//! `ENERGY_REGEN_TIME` ticks later and sleeps until then.

use crate::game::constants::ENERGY_REGEN_TIME;
use crate::game::find::{FIND_SOURCES, FIND_SOURCES_ACTIVE};
use crate::game::object::*;
use crate::game::position::RoomName;
use crate::mods::wrong_kind;
use crate::processor::registry::{KindDescriptor, RegistryBuilder};
use crate::processor::ProcessorContext;
use crate::schema::{Format, SchemaError, StructFormat, Value};

pub fn register(builder: &mut RegistryBuilder) {
    builder
        .register_kind(KindDescriptor {
            kind: Kind::Source,
            format: format(),
            encode,
            decode,
        })
        .register_tick(Kind::Source, tick)
        .register_find(FIND_SOURCES, |room, _| room.ids_of(Kind::Source))
        .register_find(FIND_SOURCES_ACTIVE, |room, _| {
            room.by_kind(Kind::Source)
                .filter(|object| matches!(&object.kind, ObjectKind::Source(source) if source.energy > 0))
                .map(|object| object.id)
                .collect()
        });
}

pub fn format() -> Format {
    Format::structure(StructFormat::extend(
        &base_format(),
        "Source",
        [
            ("energy", Format::INT32),
            ("energyCapacity", Format::INT32),
            ("nextRegenerationTime", Format::UINT32),
        ],
    ))
}

fn encode(object: &GameObject) -> Result<Value, SchemaError> {
    let ObjectKind::Source(source) = &object.kind else {
        return Err(wrong_kind("source", object));
    };
    Ok(object_value(
        object,
        [
            ("energy", Value::from(source.energy)),
            ("energyCapacity", Value::from(source.energy_capacity)),
            ("nextRegenerationTime", Value::from(source.next_regeneration_time)),
        ],
    ))
}

fn decode(value: &Value, room: RoomName) -> Result<GameObject, SchemaError> {
    let (id, pos) = decode_base(value, room)?;
    Ok(GameObject::with_id(
        id,
        pos,
        ObjectKind::Source(Source {
            energy: value.field("energy")?.as_i32()?,
            energy_capacity: value.field("energyCapacity")?.as_i32()?,
            next_regeneration_time: value.field("nextRegenerationTime")?.as_u32()?,
        }),
    ))
}

fn tick(ctx: &mut ProcessorContext<'_>, id: ObjectId) {
    let time = ctx.time;
    let Some(GameObject {
        kind: ObjectKind::Source(source),
        ..
    }) = ctx.room.get_mut(id)
    else {
        return;
    };

    if source.next_regeneration_time == 0 {
        if source.energy >= source.energy_capacity {
            return;
        }
        source.next_regeneration_time = time + ENERGY_REGEN_TIME;
    }

    if source.next_regeneration_time <= time {
        source.energy = source.energy_capacity;
        source.next_regeneration_time = 0;
        tracing::trace!(source = %id, "source regenerated");
        ctx.set_active();
    } else {
        let wake = source.next_regeneration_time;
        ctx.wake_at(wake);
    }
}
