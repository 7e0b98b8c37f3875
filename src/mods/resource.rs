// src/mods/resource.rs
//! Dropped resources

use crate::game::constants::ENERGY_DECAY;
use crate::game::find::FIND_DROPPED_RESOURCES;
use crate::game::object::*;
use crate::game::position::RoomName;
use crate::game::store::resource_from_value;
use crate::mods::wrong_kind;
use crate::processor::registry::{KindDescriptor, RegistryBuilder};
use crate::processor::ProcessorContext;
use crate::schema::{Format, SchemaError, StructFormat, Value};

pub fn register(builder: &mut RegistryBuilder) {
    builder
        .register_kind(KindDescriptor {
            kind: Kind::Resource,
            format: format(),
            encode,
            decode,
        })
        .register_tick(Kind::Resource, tick)
        .register_find(FIND_DROPPED_RESOURCES, |room, _| room.ids_of(Kind::Resource));
}

pub fn format() -> Format {
    Format::structure(StructFormat::extend(
        &base_format(),
        "Resource",
        [("resourceType", Format::UINT8), ("amount", Format::INT32)],
    ))
}

fn encode(object: &GameObject) -> Result<Value, SchemaError> {
    let ObjectKind::Resource(resource) = &object.kind else {
        return Err(wrong_kind("resource", object));
    };
    Ok(object_value(
        object,
        [
            ("resourceType", Value::from(resource.resource_type as u8)),
            ("amount", Value::from(resource.amount)),
        ],
    ))
}

fn decode(value: &Value, room: RoomName) -> Result<GameObject, SchemaError> {
    let (id, pos) = decode_base(value, room)?;
    Ok(GameObject::with_id(
        id,
        pos,
        ObjectKind::Resource(Resource {
            resource_type: resource_from_value(value.field("resourceType")?)?,
            amount: value.field("amount")?.as_i32()?,
        }),
    ))
}

/// Piles lose `ceil(amount / ENERGY_DECAY)` per tick and vanish when empty
fn tick(ctx: &mut ProcessorContext<'_>, id: ObjectId) {
    let remaining = match ctx.room.get_mut(id) {
        Some(GameObject {
            kind: ObjectKind::Resource(pile),
            ..
        }) => {
            let decay = (pile.amount + ENERGY_DECAY - 1) / ENERGY_DECAY;
            pile.amount -= decay.max(1);
            pile.amount
        }
        _ => return,
    };
    if remaining <= 0 {
        ctx.destroy(id);
    }
    ctx.set_active();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::store::ResourceType;
    use crate::mods::testing::Fixture;

    #[test]
    fn test_small_pile_decays_away() {
        let mut fixture = Fixture::new();
        let pile = fixture.insert(GameObject::resource(Fixture::pos(5, 5), ResourceType::Energy, 2));
        fixture.run(vec![]);
        assert!(fixture.room.contains(pile));
        let outcome = fixture.run(vec![]);
        assert!(!fixture.room.contains(pile));
        assert!(outcome.active);
    }

    #[test]
    fn test_decay_rounds_up() {
        let mut fixture = Fixture::new();
        let pile = fixture.insert(GameObject::resource(Fixture::pos(5, 5), ResourceType::Energy, 1001));
        fixture.run(vec![]);
        match &fixture.get(pile).kind {
            ObjectKind::Resource(r) => assert_eq!(r.amount, 999),
            other => panic!("unexpected {:?}", other),
        }
    }
}
