// src/game/object.rs
//! Game objects
//!
//! Every object shares the `RoomObject` base (`id`, `x`, `y`) and carries one
//! kind-specific payload from a closed set. Each kind has a stable one-byte
//! discriminant used as the variant tag in the binary room layout.

use crate::game::constants::*;
use crate::game::position::{Direction, RoomName, RoomPosition};
use crate::game::store::{ResourceType, Store};
use crate::schema::{Format, SchemaError, StructFormat, Value};
use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// Immutable object identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(pub Ulid);

impl ObjectId {
    pub fn generate() -> Self {
        ObjectId(Ulid::new())
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ObjectId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s).map(ObjectId)
    }
}

/// Player identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        UserId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Object kind discriminant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[repr(u8)]
pub enum Kind {
    Creep = 1,
    Source = 2,
    Spawn = 3,
    Extension = 4,
    Controller = 5,
    Road = 6,
    Container = 7,
    Resource = 8,
    ConstructionSite = 9,
}

impl Kind {
    pub const ALL: [Kind; 9] = [
        Kind::Creep,
        Kind::Source,
        Kind::Spawn,
        Kind::Extension,
        Kind::Controller,
        Kind::Road,
        Kind::Container,
        Kind::Resource,
        Kind::ConstructionSite,
    ];

    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.tag() == tag)
    }

    pub fn name(self) -> &'static str {
        match self {
            Kind::Creep => "creep",
            Kind::Source => "source",
            Kind::Spawn => "spawn",
            Kind::Extension => "extension",
            Kind::Controller => "controller",
            Kind::Road => "road",
            Kind::Container => "container",
            Kind::Resource => "resource",
            Kind::ConstructionSite => "constructionSite",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    pub fn is_structure(self) -> bool {
        matches!(
            self,
            Kind::Spawn | Kind::Extension | Kind::Controller | Kind::Road | Kind::Container
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BodyPart {
    pub part: BodyPartType,
    pub hits: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Creep {
    pub name: String,
    pub owner: UserId,
    pub body: Vec<BodyPart>,
    pub hits: i32,
    pub fatigue: i32,
    pub store: Store,
    /// Tick at which the creep dies of old age; zero while spawning
    pub age_time: u32,
}

impl Creep {
    pub fn hits_max(&self) -> i32 {
        self.body.len() as i32 * BODYPART_HITS
    }

    /// Parts of the given type that still have hits
    pub fn active_parts(&self, part: BodyPartType) -> i32 {
        self.body.iter().filter(|p| p.part == part && p.hits > 0).count() as i32
    }

    pub fn is_spawning(&self) -> bool {
        self.age_time == 0
    }

    /// Subtract hits, wearing out body parts front to back
    pub fn apply_damage(&mut self, amount: i32) {
        self.hits = (self.hits - amount).max(0);
        let mut remaining = self.hits;
        for part in self.body.iter_mut().rev() {
            part.hits = remaining.clamp(0, BODYPART_HITS);
            remaining -= part.hits;
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Source {
    pub energy: i32,
    pub energy_capacity: i32,
    /// Tick at which energy refills; zero when no regeneration is pending
    pub next_regeneration_time: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Spawning {
    pub creep: ObjectId,
    pub directions: Vec<Direction>,
    pub need_time: u32,
    pub spawn_time: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Spawn {
    pub owner: UserId,
    pub name: String,
    pub hits: i32,
    pub store: Store,
    pub spawning: Option<Spawning>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Extension {
    pub owner: UserId,
    pub hits: i32,
    pub store: Store,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Controller {
    pub owner: Option<UserId>,
    pub level: u8,
    pub progress: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Road {
    pub hits: i32,
    pub next_decay_time: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Container {
    pub hits: i32,
    pub store: Store,
    pub next_decay_time: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub resource_type: ResourceType,
    pub amount: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConstructionSite {
    pub owner: UserId,
    pub structure_type: Kind,
    pub progress: i32,
    pub progress_total: i32,
}

/// Kind-specific payload
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectKind {
    Creep(Creep),
    Source(Source),
    Spawn(Spawn),
    Extension(Extension),
    Controller(Controller),
    Road(Road),
    Container(Container),
    Resource(Resource),
    ConstructionSite(ConstructionSite),
}

impl ObjectKind {
    pub fn kind(&self) -> Kind {
        match self {
            ObjectKind::Creep(_) => Kind::Creep,
            ObjectKind::Source(_) => Kind::Source,
            ObjectKind::Spawn(_) => Kind::Spawn,
            ObjectKind::Extension(_) => Kind::Extension,
            ObjectKind::Controller(_) => Kind::Controller,
            ObjectKind::Road(_) => Kind::Road,
            ObjectKind::Container(_) => Kind::Container,
            ObjectKind::Resource(_) => Kind::Resource,
            ObjectKind::ConstructionSite(_) => Kind::ConstructionSite,
        }
    }
}

/// An object living in a room
#[derive(Debug, Clone, PartialEq)]
pub struct GameObject {
    pub id: ObjectId,
    pub pos: RoomPosition,
    pub kind: ObjectKind,
    room: Option<RoomName>,
}

impl GameObject {
    /// Factory; assigns a fresh id
    pub fn create(pos: RoomPosition, kind: ObjectKind) -> Self {
        Self::with_id(ObjectId::generate(), pos, kind)
    }

    pub fn with_id(id: ObjectId, pos: RoomPosition, kind: ObjectKind) -> Self {
        Self {
            id,
            pos,
            kind,
            room: None,
        }
    }

    pub fn creep(pos: RoomPosition, name: &str, owner: &UserId, body: &[BodyPartType], age_time: u32) -> Self {
        let carry = body.iter().filter(|part| **part == BodyPartType::Carry).count() as i32;
        Self::create(
            pos,
            ObjectKind::Creep(Creep {
                name: name.to_string(),
                owner: owner.clone(),
                body: body
                    .iter()
                    .map(|part| BodyPart {
                        part: *part,
                        hits: BODYPART_HITS,
                    })
                    .collect(),
                hits: body.len() as i32 * BODYPART_HITS,
                fatigue: 0,
                store: Store::new(carry * CARRY_CAPACITY),
                age_time,
            }),
        )
    }

    pub fn spawn(pos: RoomPosition, name: &str, owner: &UserId) -> Self {
        Self::create(
            pos,
            ObjectKind::Spawn(Spawn {
                owner: owner.clone(),
                name: name.to_string(),
                hits: SPAWN_HITS,
                store: Store::restricted(ResourceType::Energy, SPAWN_ENERGY_CAPACITY)
                    .with(ResourceType::Energy, SPAWN_ENERGY_START),
                spawning: None,
            }),
        )
    }

    pub fn extension(pos: RoomPosition, owner: &UserId) -> Self {
        Self::create(
            pos,
            ObjectKind::Extension(Extension {
                owner: owner.clone(),
                hits: EXTENSION_HITS,
                store: Store::restricted(ResourceType::Energy, EXTENSION_ENERGY_CAPACITY),
            }),
        )
    }

    pub fn source(pos: RoomPosition) -> Self {
        Self::create(
            pos,
            ObjectKind::Source(Source {
                energy: SOURCE_ENERGY_CAPACITY,
                energy_capacity: SOURCE_ENERGY_CAPACITY,
                next_regeneration_time: 0,
            }),
        )
    }

    pub fn controller(pos: RoomPosition, owner: Option<&UserId>, level: u8) -> Self {
        Self::create(
            pos,
            ObjectKind::Controller(Controller {
                owner: owner.cloned(),
                level,
                progress: 0,
            }),
        )
    }

    pub fn road(pos: RoomPosition, next_decay_time: u32) -> Self {
        Self::create(
            pos,
            ObjectKind::Road(Road {
                hits: ROAD_HITS,
                next_decay_time,
            }),
        )
    }

    pub fn container(pos: RoomPosition, next_decay_time: u32) -> Self {
        Self::create(
            pos,
            ObjectKind::Container(Container {
                hits: CONTAINER_HITS,
                store: Store::new(CONTAINER_CAPACITY),
                next_decay_time,
            }),
        )
    }

    pub fn resource(pos: RoomPosition, resource_type: ResourceType, amount: i32) -> Self {
        Self::create(
            pos,
            ObjectKind::Resource(Resource {
                resource_type,
                amount,
            }),
        )
    }

    /// Returns `None` for kinds that cannot be built
    pub fn construction_site(pos: RoomPosition, owner: &UserId, structure_type: Kind) -> Option<Self> {
        let progress_total = match structure_type {
            Kind::Spawn => CONSTRUCTION_COST_SPAWN,
            Kind::Extension => CONSTRUCTION_COST_EXTENSION,
            Kind::Road => CONSTRUCTION_COST_ROAD,
            Kind::Container => CONSTRUCTION_COST_CONTAINER,
            _ => return None,
        };
        Some(Self::create(
            pos,
            ObjectKind::ConstructionSite(ConstructionSite {
                owner: owner.clone(),
                structure_type,
                progress: 0,
                progress_total,
            }),
        ))
    }

    /// Room currently holding this object
    pub fn room(&self) -> Option<RoomName> {
        self.room
    }

    pub(crate) fn after_insert(&mut self, room: RoomName) {
        self.room = Some(room);
    }

    pub(crate) fn after_remove(&mut self) {
        self.room = None;
    }

    pub fn kind(&self) -> Kind {
        self.kind.kind()
    }

    pub fn owner(&self) -> Option<&UserId> {
        match &self.kind {
            ObjectKind::Creep(c) => Some(&c.owner),
            ObjectKind::Spawn(s) => Some(&s.owner),
            ObjectKind::Extension(e) => Some(&e.owner),
            ObjectKind::Controller(c) => c.owner.as_ref(),
            ObjectKind::ConstructionSite(s) => Some(&s.owner),
            _ => None,
        }
    }

    pub fn is_owned_by(&self, user: &UserId) -> bool {
        self.owner() == Some(user)
    }

    pub fn hits(&self) -> Option<i32> {
        match &self.kind {
            ObjectKind::Creep(c) => Some(c.hits),
            ObjectKind::Spawn(s) => Some(s.hits),
            ObjectKind::Extension(e) => Some(e.hits),
            ObjectKind::Road(r) => Some(r.hits),
            ObjectKind::Container(c) => Some(c.hits),
            _ => None,
        }
    }

    pub fn hits_mut(&mut self) -> Option<&mut i32> {
        match &mut self.kind {
            ObjectKind::Creep(c) => Some(&mut c.hits),
            ObjectKind::Spawn(s) => Some(&mut s.hits),
            ObjectKind::Extension(e) => Some(&mut e.hits),
            ObjectKind::Road(r) => Some(&mut r.hits),
            ObjectKind::Container(c) => Some(&mut c.hits),
            _ => None,
        }
    }

    pub fn store(&self) -> Option<&Store> {
        match &self.kind {
            ObjectKind::Creep(c) => Some(&c.store),
            ObjectKind::Spawn(s) => Some(&s.store),
            ObjectKind::Extension(e) => Some(&e.store),
            ObjectKind::Container(c) => Some(&c.store),
            _ => None,
        }
    }

    pub fn store_mut(&mut self) -> Option<&mut Store> {
        match &mut self.kind {
            ObjectKind::Creep(c) => Some(&mut c.store),
            ObjectKind::Spawn(s) => Some(&mut s.store),
            ObjectKind::Extension(e) => Some(&mut e.store),
            ObjectKind::Container(c) => Some(&mut c.store),
            _ => None,
        }
    }

    pub fn as_creep(&self) -> Option<&Creep> {
        match &self.kind {
            ObjectKind::Creep(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_creep_mut(&mut self) -> Option<&mut Creep> {
        match &mut self.kind {
            ObjectKind::Creep(c) => Some(c),
            _ => None,
        }
    }

    /// Blocks movement onto its tile
    pub fn is_obstacle(&self) -> bool {
        match &self.kind {
            ObjectKind::Creep(c) => !c.is_spawning(),
            ObjectKind::Source(_)
            | ObjectKind::Spawn(_)
            | ObjectKind::Extension(_)
            | ObjectKind::Controller(_) => true,
            ObjectKind::Road(_)
            | ObjectKind::Container(_)
            | ObjectKind::Resource(_)
            | ObjectKind::ConstructionSite(_) => false,
        }
    }
}

/// Fields shared by every kind
pub fn base_format() -> StructFormat {
    StructFormat::new(
        "RoomObject",
        [("id", Format::ID), ("x", Format::UINT8), ("y", Format::UINT8)],
    )
}

/// Base fields of `object` followed by `fields`
pub fn object_value<I>(object: &GameObject, fields: I) -> Value
where
    I: IntoIterator<Item = (&'static str, Value)>,
{
    let mut all = vec![
        ("id", Value::Id(object.id.0)),
        ("x", Value::from(object.pos.x)),
        ("y", Value::from(object.pos.y)),
    ];
    all.extend(fields);
    Value::fields(all)
}

/// Read the base fields back into an id and position
pub fn decode_base(value: &Value, room: RoomName) -> Result<(ObjectId, RoomPosition), SchemaError> {
    let id = ObjectId(value.field("id")?.as_id()?);
    let x = value.field("x")?.as_u8()?;
    let y = value.field("y")?.as_u8()?;
    let pos = RoomPosition::new(room, x, y)
        .ok_or_else(|| SchemaError::Corrupt(format!("position {},{} outside room", x, y)))?;
    Ok((id, pos))
}

pub fn user_value(user: &UserId) -> Value {
    Value::from(user.as_str())
}

pub fn user_from_value(value: &Value) -> Result<UserId, SchemaError> {
    Ok(UserId::new(value.as_str()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creep(body: &[BodyPartType]) -> Creep {
        Creep {
            name: "c".to_string(),
            owner: UserId::new("alice"),
            body: body
                .iter()
                .map(|part| BodyPart {
                    part: *part,
                    hits: BODYPART_HITS,
                })
                .collect(),
            hits: body.len() as i32 * BODYPART_HITS,
            fatigue: 0,
            store: Store::new(0),
            age_time: 100,
        }
    }

    #[test]
    fn test_damage_wears_front_parts_first() {
        let mut c = creep(&[BodyPartType::Tough, BodyPartType::Attack, BodyPartType::Move]);
        c.apply_damage(150);
        assert_eq!(c.hits, 150);
        assert_eq!(c.body[0].hits, 0);
        assert_eq!(c.body[1].hits, 50);
        assert_eq!(c.body[2].hits, 100);
        assert_eq!(c.active_parts(BodyPartType::Tough), 0);
        assert_eq!(c.active_parts(BodyPartType::Attack), 1);
    }

    #[test]
    fn test_kind_tags_are_unique() {
        for kind in Kind::ALL {
            assert_eq!(Kind::from_tag(kind.tag()), Some(kind));
            assert_eq!(Kind::from_name(kind.name()), Some(kind));
        }
    }

    #[test]
    fn test_insert_hooks_manage_back_reference() {
        let room: RoomName = "W1N1".parse().unwrap();
        let pos = RoomPosition::new(room, 1, 1).unwrap();
        let mut object = GameObject::create(
            pos,
            ObjectKind::Resource(Resource {
                resource_type: ResourceType::Energy,
                amount: 5,
            }),
        );
        assert_eq!(object.room(), None);
        object.after_insert(room);
        assert_eq!(object.room(), Some(room));
        object.after_remove();
        assert_eq!(object.room(), None);
    }

    #[test]
    fn test_spawning_creep_is_not_an_obstacle() {
        let room: RoomName = "W1N1".parse().unwrap();
        let pos = RoomPosition::new(room, 1, 1).unwrap();
        let mut c = creep(&[BodyPartType::Move]);
        c.age_time = 0;
        assert!(!GameObject::create(pos, ObjectKind::Creep(c)).is_obstacle());
    }
}
