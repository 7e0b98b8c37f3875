// src/game/find.rs
//! Find categories
//!
//! A category key maps to a handler computing the base list of ids for a
//! room. Handlers are registered at startup through the registry builder;
//! the room caches each category's result for the rest of the tick.

use crate::game::object::{GameObject, Kind, UserId};
use crate::game::room::Room;
use crate::game::object::ObjectId;
use serde::{Deserialize, Serialize};

/// Category key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FindCategory(pub u16);

pub const FIND_CREEPS: FindCategory = FindCategory(101);
pub const FIND_MY_CREEPS: FindCategory = FindCategory(102);
pub const FIND_HOSTILE_CREEPS: FindCategory = FindCategory(103);
pub const FIND_SOURCES_ACTIVE: FindCategory = FindCategory(104);
pub const FIND_SOURCES: FindCategory = FindCategory(105);
pub const FIND_DROPPED_RESOURCES: FindCategory = FindCategory(106);
pub const FIND_STRUCTURES: FindCategory = FindCategory(107);
pub const FIND_MY_STRUCTURES: FindCategory = FindCategory(108);
pub const FIND_HOSTILE_STRUCTURES: FindCategory = FindCategory(109);
pub const FIND_CONSTRUCTION_SITES: FindCategory = FindCategory(111);
pub const FIND_MY_SPAWNS: FindCategory = FindCategory(112);
pub const FIND_HOSTILE_SPAWNS: FindCategory = FindCategory(113);
pub const FIND_MY_CONSTRUCTION_SITES: FindCategory = FindCategory(114);

/// Names exported to sandboxed code
pub const CATEGORY_NAMES: [(&str, FindCategory); 13] = [
    ("FIND_CREEPS", FIND_CREEPS),
    ("FIND_MY_CREEPS", FIND_MY_CREEPS),
    ("FIND_HOSTILE_CREEPS", FIND_HOSTILE_CREEPS),
    ("FIND_SOURCES_ACTIVE", FIND_SOURCES_ACTIVE),
    ("FIND_SOURCES", FIND_SOURCES),
    ("FIND_DROPPED_RESOURCES", FIND_DROPPED_RESOURCES),
    ("FIND_STRUCTURES", FIND_STRUCTURES),
    ("FIND_MY_STRUCTURES", FIND_MY_STRUCTURES),
    ("FIND_HOSTILE_STRUCTURES", FIND_HOSTILE_STRUCTURES),
    ("FIND_CONSTRUCTION_SITES", FIND_CONSTRUCTION_SITES),
    ("FIND_MY_SPAWNS", FIND_MY_SPAWNS),
    ("FIND_HOSTILE_SPAWNS", FIND_HOSTILE_SPAWNS),
    ("FIND_MY_CONSTRUCTION_SITES", FIND_MY_CONSTRUCTION_SITES),
];

/// Computes a category's ids; `viewer` is set for viewer-relative lookups
pub type FindHandler = fn(&Room, Option<&UserId>) -> Vec<ObjectId>;

/// Ownership relation to the viewer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    Mine,
    Hostile,
}

impl Relation {
    pub fn matches(self, object: &GameObject, viewer: Option<&UserId>) -> bool {
        let (Some(viewer), Some(owner)) = (viewer, object.owner()) else {
            return false;
        };
        match self {
            Relation::Mine => owner == viewer,
            Relation::Hostile => owner != viewer,
        }
    }
}

/// Every live object of the given kinds, read from the kind partitions:
/// grouped in the order of `kinds`, insertion order within a kind
pub fn of_kinds(room: &Room, kinds: &[Kind]) -> Vec<ObjectId> {
    kinds
        .iter()
        .flat_map(|kind| room.by_kind(*kind))
        .map(|object| object.id)
        .collect()
}

/// Objects of the given kinds standing in `relation` to the viewer
pub fn of_kinds_related(room: &Room, kinds: &[Kind], viewer: Option<&UserId>, relation: Relation) -> Vec<ObjectId> {
    kinds
        .iter()
        .flat_map(|kind| room.by_kind(*kind))
        .filter(|object| relation.matches(object, viewer))
        .map(|object| object.id)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::constants::BodyPartType;
    use crate::game::position::{RoomName, RoomPosition};

    #[test]
    fn test_of_kinds_groups_by_kind() {
        let name: RoomName = "W1N1".parse().unwrap();
        let alice = UserId::new("alice");
        let bob = UserId::new("bob");
        let mut room = Room::new(name);
        let at = |x| RoomPosition::new(name, x, 10).unwrap();
        let creep = room.insert(GameObject::creep(at(1), "a", &alice, &[BodyPartType::Move], 1500));
        let spawn = room.insert(GameObject::spawn(at(2), "Spawn1", &alice));
        let hostile = room.insert(GameObject::creep(at(3), "b", &bob, &[BodyPartType::Move], 1500));
        room.insert(GameObject::source(at(4)));

        assert_eq!(of_kinds(&room, &[Kind::Spawn, Kind::Creep]), vec![spawn, creep, hostile]);
        assert_eq!(
            of_kinds_related(&room, &[Kind::Creep, Kind::Spawn], Some(&alice), Relation::Mine),
            vec![creep, spawn]
        );
        assert_eq!(
            of_kinds_related(&room, &[Kind::Creep], Some(&alice), Relation::Hostile),
            vec![hostile]
        );
        assert!(of_kinds_related(&room, &[Kind::Creep], None, Relation::Mine).is_empty());
    }

    #[test]
    fn test_category_names_are_unique() {
        let mut keys: Vec<_> = CATEGORY_NAMES.iter().map(|(_, c)| c.0).collect();
        keys.sort_unstable();
        keys.dedup();
        assert_eq!(keys.len(), CATEGORY_NAMES.len());
    }
}
