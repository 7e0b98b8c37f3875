// src/game/room.rs
//! Room world state
//!
//! A room owns its objects for the duration of their tenancy and keeps:
//!
//! - per-kind partitions in insertion order
//! - derived aggregates, recomputed whenever membership changes
//! - a per-tick find cache; once a category is computed its membership is
//!   frozen until the next `begin_tick`, even if objects come or go
//! - the set of objects that departed this tick, so cached results still
//!   resolve

use crate::game::find::FindCategory;
use crate::game::object::{GameObject, Kind, ObjectId, ObjectKind, UserId};
use crate::game::position::RoomName;
use crate::processor::registry::{self, Registry};
use crate::schema::{codec, SchemaError, Value, View};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

type FindKey = (FindCategory, Option<UserId>);

/// Values derived from room membership
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Aggregates {
    pub controller: Option<ObjectId>,
    pub energy_available: i32,
    pub energy_capacity_available: i32,
    pub owners: BTreeSet<UserId>,
}

#[derive(Debug)]
pub struct Room {
    name: RoomName,
    time: u32,
    objects: Vec<GameObject>,
    index: HashMap<ObjectId, usize>,
    partitions: HashMap<Kind, Vec<ObjectId>>,
    departed: HashMap<ObjectId, GameObject>,
    aggregates: Aggregates,
    find_cache: Mutex<HashMap<FindKey, Arc<[ObjectId]>>>,
}

impl Room {
    pub fn new(name: RoomName) -> Self {
        Self {
            name,
            time: 0,
            objects: Vec::new(),
            index: HashMap::new(),
            partitions: HashMap::new(),
            departed: HashMap::new(),
            aggregates: Aggregates::default(),
            find_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> RoomName {
        self.name
    }

    /// Tick this state belongs to
    pub fn time(&self) -> u32 {
        self.time
    }

    pub fn aggregates(&self) -> &Aggregates {
        &self.aggregates
    }

    pub fn energy_available(&self) -> i32 {
        self.aggregates.energy_available
    }

    pub fn energy_capacity_available(&self) -> i32 {
        self.aggregates.energy_capacity_available
    }

    pub fn controller(&self) -> Option<&GameObject> {
        self.aggregates.controller.and_then(|id| self.get(id))
    }

    /// Start a new tick: clear the find cache and the departed set, refresh
    /// aggregates
    pub fn begin_tick(&mut self, time: u32) {
        self.time = time;
        self.find_cache.get_mut().clear();
        self.departed.clear();
        self.refresh_aggregates();
    }

    /// Insert an object, taking ownership. An object with the same id is
    /// replaced.
    pub fn insert(&mut self, mut object: GameObject) -> ObjectId {
        let id = object.id;
        if self.index.contains_key(&id) {
            tracing::warn!(room = %self.name, object = %id, "replacing object with duplicate id");
            self.remove(id);
        }

        object.pos.room = self.name;
        object.after_insert(self.name);
        self.departed.remove(&id);
        self.partitions.entry(object.kind()).or_default().push(id);
        self.index.insert(id, self.objects.len());
        self.objects.push(object);
        self.refresh_aggregates();
        id
    }

    /// Remove an object. It stays resolvable from find results already
    /// cached this tick.
    pub fn remove(&mut self, id: ObjectId) -> Option<GameObject> {
        let position = self.index.remove(&id)?;
        let mut object = self.objects.remove(position);
        for slot in self.index.values_mut() {
            if *slot > position {
                *slot -= 1;
            }
        }
        if let Some(partition) = self.partitions.get_mut(&object.kind()) {
            partition.retain(|member| *member != id);
        }

        object.after_remove();
        self.departed.insert(id, object.clone());
        self.refresh_aggregates();
        Some(object)
    }

    pub fn get(&self, id: ObjectId) -> Option<&GameObject> {
        self.index.get(&id).map(|slot| &self.objects[*slot])
    }

    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut GameObject> {
        let slot = *self.index.get(&id)?;
        self.objects.get_mut(slot)
    }

    /// Mutable access to two distinct objects at once
    pub fn get_pair_mut(&mut self, a: ObjectId, b: ObjectId) -> Option<(&mut GameObject, &mut GameObject)> {
        let first = *self.index.get(&a)?;
        let second = *self.index.get(&b)?;
        if first == second {
            return None;
        }
        if first < second {
            let (left, right) = self.objects.split_at_mut(second);
            Some((&mut left[first], &mut right[0]))
        } else {
            let (left, right) = self.objects.split_at_mut(first);
            Some((&mut right[0], &mut left[second]))
        }
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.index.contains_key(&id)
    }

    /// Live object, or one that departed earlier this tick
    pub fn resolve(&self, id: ObjectId) -> Option<&GameObject> {
        self.get(id).or_else(|| self.departed.get(&id))
    }

    pub fn objects(&self) -> impl Iterator<Item = &GameObject> {
        self.objects.iter()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Live objects of one kind, in insertion order
    pub fn by_kind(&self, kind: Kind) -> impl Iterator<Item = &GameObject> {
        self.partitions
            .get(&kind)
            .into_iter()
            .flatten()
            .filter_map(|id| self.get(*id))
    }

    /// Ids of one kind, in insertion order
    pub fn ids_of(&self, kind: Kind) -> Vec<ObjectId> {
        self.partitions.get(&kind).cloned().unwrap_or_default()
    }

    pub fn look_at(&self, x: u8, y: u8) -> Vec<&GameObject> {
        self.objects
            .iter()
            .filter(|object| object.pos.x == x && object.pos.y == y)
            .collect()
    }

    /// No obstacle occupies the tile
    pub fn is_walkable(&self, x: u8, y: u8) -> bool {
        x < crate::game::constants::ROOM_SIZE
            && y < crate::game::constants::ROOM_SIZE
            && !self
                .objects
                .iter()
                .any(|object| object.pos.x == x && object.pos.y == y && object.is_obstacle())
    }

    pub fn refresh_aggregates(&mut self) {
        let mut aggregates = Aggregates::default();
        for object in &self.objects {
            if let Some(owner) = object.owner() {
                aggregates.owners.insert(owner.clone());
            }
            match &object.kind {
                ObjectKind::Controller(_) if aggregates.controller.is_none() => {
                    aggregates.controller = Some(object.id);
                }
                ObjectKind::Spawn(_) | ObjectKind::Extension(_) => {
                    if let Some(store) = object.store() {
                        aggregates.energy_available += store.get(crate::game::store::ResourceType::Energy);
                        aggregates.energy_capacity_available += store.capacity();
                    }
                }
                _ => {}
            }
        }
        self.aggregates = aggregates;
    }

    /// Ordered ids for a category, computed once per tick
    pub fn find_ids(&self, category: FindCategory, viewer: Option<&UserId>) -> Arc<[ObjectId]> {
        let key = (category, viewer.cloned());
        if let Some(cached) = self.find_cache.lock().get(&key) {
            return Arc::clone(cached);
        }

        let computed: Arc<[ObjectId]> = match registry::global().find_handler(category) {
            Some(handler) => handler(self, viewer).into(),
            None => {
                tracing::debug!(room = %self.name, category = category.0, "unknown find category");
                Arc::from(Vec::new())
            }
        };

        Arc::clone(self.find_cache.lock().entry(key).or_insert(computed))
    }

    /// Fresh ordered list of the category's objects. Without a filter this
    /// is a shallow copy of the cached list.
    pub fn find(&self, category: FindCategory, filter: Option<&dyn Fn(&GameObject) -> bool>) -> Vec<&GameObject> {
        self.find_for(None, category, filter)
    }

    /// Viewer-relative form used by "my" and "hostile" categories
    pub fn find_as(
        &self,
        viewer: &UserId,
        category: FindCategory,
        filter: Option<&dyn Fn(&GameObject) -> bool>,
    ) -> Vec<&GameObject> {
        self.find_for(Some(viewer), category, filter)
    }

    fn find_for(
        &self,
        viewer: Option<&UserId>,
        category: FindCategory,
        filter: Option<&dyn Fn(&GameObject) -> bool>,
    ) -> Vec<&GameObject> {
        let ids = self.find_ids(category, viewer);
        let objects = ids.iter().filter_map(|id| self.resolve(*id));
        match filter {
            Some(filter) => objects.filter(|object| filter(object)).collect(),
            None => objects.collect(),
        }
    }

    pub fn to_value(&self, registry: &Registry) -> Result<Value, SchemaError> {
        let mut objects = Vec::with_capacity(self.objects.len());
        for object in &self.objects {
            let tag = object.kind().tag();
            let descriptor = registry
                .kind(object.kind())
                .ok_or(SchemaError::UnknownVariant(tag))?;
            objects.push(Value::Variant(tag, Box::new((descriptor.encode)(object)?)));
        }
        Ok(Value::fields([
            ("name", Value::from(self.name.to_string())),
            ("time", Value::from(self.time)),
            ("objects", Value::Vector(objects)),
        ]))
    }

    pub fn encode(&self, registry: &Registry) -> Result<Bytes, SchemaError> {
        let value = self.to_value(registry)?;
        Ok(Bytes::from(codec::encode_to_vec(registry.room_format(), &value)?))
    }

    pub fn decode(registry: &Registry, bytes: &[u8]) -> Result<Room, SchemaError> {
        let value = codec::decode(registry.room_format(), bytes, 0)?;
        let name: RoomName = value
            .field("name")?
            .as_str()?
            .parse()
            .map_err(|e: crate::game::position::InvalidRoomName| SchemaError::Corrupt(e.to_string()))?;

        let mut room = Room::new(name);
        room.time = value.field("time")?.as_u32()?;
        for element in value.field("objects")?.as_slice()? {
            let (tag, payload) = element.as_variant()?;
            let kind = Kind::from_tag(tag).ok_or(SchemaError::UnknownVariant(tag))?;
            let descriptor = registry.kind(kind).ok_or(SchemaError::UnknownVariant(tag))?;
            room.insert((descriptor.decode)(payload, name)?);
        }
        room.begin_tick(room.time);
        Ok(room)
    }
}

/// Read-only per-tick view of one room, shared with every sandbox that can
/// observe it
#[derive(Debug)]
pub struct RoomSnapshot {
    pub bytes: Bytes,
    pub room: Room,
    views: HashMap<ObjectId, View>,
}

impl RoomSnapshot {
    pub fn new(registry: &Registry, bytes: Bytes) -> Result<Self, SchemaError> {
        let room = Room::decode(registry, &bytes)?;
        let root = View::root(bytes.clone(), registry.room_format().clone());
        let mut views = HashMap::with_capacity(room.len());
        for element in root.field("objects")?.elements()? {
            let id = ObjectId(element.get("id")?.as_id()?);
            views.insert(id, element);
        }
        Ok(Self { bytes, room, views })
    }

    pub fn name(&self) -> RoomName {
        self.room.name()
    }

    pub fn time(&self) -> u32 {
        self.room.time()
    }

    /// Byte-backed view of an object's variant record
    pub fn view(&self, id: ObjectId) -> Option<&View> {
        self.views.get(&id)
    }

    /// Users owning something in the room
    pub fn owners(&self) -> &BTreeSet<UserId> {
        &self.room.aggregates().owners
    }
}
