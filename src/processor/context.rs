// src/processor/context.rs
//! Mutable state handed to intent and tick handlers while a room is processed

use crate::game::object::{GameObject, Kind, ObjectId, ObjectKind, UserId};
use crate::game::position::{RoomName, RoomPosition};
use crate::game::room::Room;
use crate::game::store::ResourceType;
use std::collections::{BTreeSet, HashMap, HashSet};

/// Cross-room facts a room may consult while it is processed. Built once per
/// tick before any room runs, so every room sees the same values.
#[derive(Debug, Default, Clone)]
pub struct WorldInfo {
    /// Live rooms objects may move into
    pub rooms: BTreeSet<RoomName>,
    /// Every owner's creep names, across all rooms, at the start of the tick
    pub creep_names: HashSet<(UserId, String)>,
    /// New creep names requested this tick, mapped to the first room in
    /// processing order that asked for each
    pub name_claims: HashMap<(UserId, String), RoomName>,
}

impl WorldInfo {
    pub fn with_rooms(rooms: impl IntoIterator<Item = RoomName>) -> Self {
        Self {
            rooms: rooms.into_iter().collect(),
            ..Default::default()
        }
    }

    /// Record the creep names present in `room`
    pub fn add_creep_names(&mut self, room: &Room) {
        for creep in room.by_kind(Kind::Creep).filter_map(GameObject::as_creep) {
            self.creep_names.insert((creep.owner.clone(), creep.name.clone()));
        }
    }

    /// Claim `name` for `owner` on behalf of `room` unless an earlier room did
    pub fn claim_name(&mut self, owner: &UserId, name: &str, room: RoomName) {
        self.name_claims.entry((owner.clone(), name.to_string())).or_insert(room);
    }

    /// Whether a spawn in `room` may give `owner`'s new creep this name
    pub fn name_available(&self, owner: &UserId, name: &str, room: RoomName) -> bool {
        let key = (owner.clone(), name.to_string());
        !self.creep_names.contains(&key) && self.name_claims.get(&key).map_or(true, |claimant| *claimant == room)
    }
}

/// An object leaving the room for a neighbour; applied after every room
/// finished processing
#[derive(Debug, Clone, PartialEq)]
pub struct Departure {
    pub object: GameObject,
    pub to: RoomPosition,
}

pub struct ProcessorContext<'a> {
    pub room: &'a mut Room,
    pub time: u32,
    world: &'a WorldInfo,
    active: bool,
    wake_at: Option<u32>,
    departures: Vec<Departure>,
}

impl<'a> ProcessorContext<'a> {
    pub fn new(room: &'a mut Room, time: u32, world: &'a WorldInfo) -> Self {
        Self {
            room,
            time,
            world,
            active: false,
            wake_at: None,
            departures: Vec::new(),
        }
    }

    /// The room needs processing next tick even without intents
    pub fn set_active(&mut self) {
        self.active = true;
    }

    /// The room needs processing at `time`; the earliest request wins
    pub fn wake_at(&mut self, time: u32) {
        if time <= self.time + 1 {
            self.active = true;
        }
        self.wake_at = Some(self.wake_at.map_or(time, |current| current.min(time)));
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn next_wake(&self) -> Option<u32> {
        self.wake_at
    }

    pub fn room_exists(&self, name: RoomName) -> bool {
        self.world.rooms.contains(&name)
    }

    pub fn world(&self) -> &WorldInfo {
        self.world
    }

    /// Move an object into a neighbouring room. It leaves this room now and
    /// appears in the destination once the tick commits.
    pub fn relocate(&mut self, id: ObjectId, to: RoomPosition) -> bool {
        if to.room == self.room.name() || !self.room_exists(to.room) {
            return false;
        }
        match self.room.remove(id) {
            Some(mut object) => {
                object.pos = to;
                tracing::debug!(object = %id, from = %self.room.name(), to = %to.room, "object departing");
                self.departures.push(Departure { object, to });
                true
            }
            None => false,
        }
    }

    /// Destroy an object outright. A spawn takes the creep it was still
    /// spawning with it.
    pub fn destroy(&mut self, id: ObjectId) -> Option<GameObject> {
        let removed = self.room.remove(id)?;
        if let ObjectKind::Spawn(spawn) = &removed.kind {
            if let Some(spawning) = &spawn.spawning {
                tracing::debug!(spawn = %id, creep = %spawning.creep, "unfinished creep lost with its spawn");
                self.room.remove(spawning.creep);
            }
        }
        Some(removed)
    }

    /// Drop resources on a tile, merging into an existing pile of the same type
    pub fn drop_resource(&mut self, pos: RoomPosition, resource_type: ResourceType, amount: i32) {
        if amount <= 0 {
            return;
        }
        let existing = self
            .room
            .look_at(pos.x, pos.y)
            .into_iter()
            .find(|object| matches!(&object.kind, ObjectKind::Resource(r) if r.resource_type == resource_type))
            .map(|object| object.id);

        match existing.and_then(|id| self.room.get_mut(id)) {
            Some(GameObject {
                kind: ObjectKind::Resource(pile),
                ..
            }) => pile.amount += amount,
            _ => {
                self.room.insert(GameObject::resource(pos, resource_type, amount));
            }
        }
        self.set_active();
    }

    pub(crate) fn into_parts(self) -> (bool, Option<u32>, Vec<Departure>) {
        (self.active, self.wake_at, self.departures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::constants::BodyPartType;
    use crate::game::object::UserId;

    #[test]
    fn test_relocate_requires_known_neighbor() {
        let name: RoomName = "W1N1".parse().unwrap();
        let east: RoomName = "W0N1".parse().unwrap();
        let mut room = Room::new(name);
        let id = room.insert(GameObject::creep(
            RoomPosition::new(name, 49, 5).unwrap(),
            "scout",
            &UserId::new("alice"),
            &[BodyPartType::Move],
            1500,
        ));

        let none = WorldInfo::default();
        let mut ctx = ProcessorContext::new(&mut room, 1, &none);
        assert!(!ctx.relocate(id, RoomPosition::new(east, 0, 5).unwrap()));
        assert!(ctx.room.contains(id));

        let known = WorldInfo::with_rooms([east]);
        let mut ctx = ProcessorContext::new(&mut room, 1, &known);
        assert!(ctx.relocate(id, RoomPosition::new(east, 0, 5).unwrap()));
        let (_, _, departures) = ctx.into_parts();
        assert_eq!(departures.len(), 1);
        assert_eq!(departures[0].to.room, east);
        assert!(!room.contains(id));
    }

    #[test]
    fn test_drop_resource_merges_piles() {
        let name: RoomName = "W1N1".parse().unwrap();
        let mut room = Room::new(name);
        let none = WorldInfo::default();
        let pos = RoomPosition::new(name, 3, 3).unwrap();
        let mut ctx = ProcessorContext::new(&mut room, 1, &none);
        ctx.drop_resource(pos, ResourceType::Energy, 10);
        ctx.drop_resource(pos, ResourceType::Energy, 5);
        ctx.drop_resource(pos, ResourceType::Power, 1);
        assert!(ctx.is_active());
        assert_eq!(room.len(), 2);
    }

    #[test]
    fn test_wake_at_keeps_earliest() {
        let name: RoomName = "W1N1".parse().unwrap();
        let mut room = Room::new(name);
        let none = WorldInfo::default();
        let mut ctx = ProcessorContext::new(&mut room, 10, &none);
        ctx.wake_at(300);
        ctx.wake_at(120);
        ctx.wake_at(500);
        assert_eq!(ctx.next_wake(), Some(120));
        assert!(!ctx.is_active());
    }

    #[test]
    fn test_name_claims_go_to_first_room() {
        let alice = UserId::new("alice");
        let west: RoomName = "W1N1".parse().unwrap();
        let east: RoomName = "E1N1".parse().unwrap();
        let mut room = Room::new(west);
        room.insert(GameObject::creep(
            RoomPosition::new(west, 5, 5).unwrap(),
            "old",
            &alice,
            &[BodyPartType::Move],
            1500,
        ));
        let mut world = WorldInfo::with_rooms([west, east]);
        world.add_creep_names(&room);
        world.claim_name(&alice, "twin", east);
        world.claim_name(&alice, "twin", west);

        assert!(!world.name_available(&alice, "old", east));
        assert!(world.name_available(&alice, "twin", east));
        assert!(!world.name_available(&alice, "twin", west));
        assert!(world.name_available(&UserId::new("bob"), "twin", west));
    }
}
