// src/engine/world.rs
//! Loading, seeding and saving the persisted world

use crate::game::object::{GameObject, UserId};
use crate::game::position::{RoomName, RoomPosition};
use crate::game::room::Room;
use crate::processor::Registry;
use crate::storage::{keys, Persistence};
use crate::utils::errors::{EngineError, Result};
use bytes::Bytes;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

/// Script used for users without a `<user>.lua` of their own
pub const STARTER_SCRIPT: &str = include_str!("../../scripts/starter.lua");

/// Tick counter plus every room's encoded state
#[derive(Debug, Clone, Default)]
pub struct World {
    pub time: u32,
    pub rooms: BTreeMap<RoomName, Bytes>,
}

impl World {
    /// Read the world back; `None` when nothing was saved yet
    pub async fn load<P: Persistence>(persistence: &P) -> Result<Option<World>> {
        let Some(names) = persistence.get(keys::GAME_ROOMS).await? else {
            return Ok(None);
        };
        let names: Vec<RoomName> = serde_json::from_slice(&names)
            .map_err(|e| EngineError::StorageFailed(format!("{} is corrupt: {}", keys::GAME_ROOMS, e)))?;

        let time = match persistence.get(keys::GAME_TIME).await? {
            Some(raw) => std::str::from_utf8(&raw)
                .ok()
                .and_then(|text| text.trim().parse::<u32>().ok())
                .ok_or_else(|| EngineError::StorageFailed(format!("{} is corrupt", keys::GAME_TIME)))?,
            None => 0,
        };

        let mut rooms = BTreeMap::new();
        for name in names {
            match persistence.get(&keys::room(name)).await? {
                Some(bytes) => {
                    rooms.insert(name, bytes);
                }
                None => warn!(room = %name, "listed room has no state, skipping"),
            }
        }

        info!(time, rooms = rooms.len(), "world loaded");
        Ok(Some(World { time, rooms }))
    }

    /// Fresh world with one starting room per user, laid out west to east
    pub fn seed(registry: &Registry, users: &[UserId]) -> Result<World> {
        let mut rooms = BTreeMap::new();
        for (i, user) in users.iter().enumerate() {
            let name = RoomName::from_coords(i as i32, 0);
            let at = |x, y| {
                RoomPosition::new(name, x, y).ok_or_else(|| EngineError::RuntimeError(format!("bad seed tile {},{}", x, y)))
            };

            let mut room = Room::new(name);
            room.insert(GameObject::controller(at(40, 40)?, Some(user), 1));
            room.insert(GameObject::spawn(at(25, 25)?, "Spawn1", user));
            room.insert(GameObject::source(at(10, 10)?));
            room.insert(GameObject::source(at(38, 12)?));
            rooms.insert(name, room.encode(registry)?);
        }

        info!(rooms = rooms.len(), "world seeded");
        Ok(World { time: 0, rooms })
    }

    /// Stage the whole world for the next `save`
    pub async fn store<P: Persistence>(&self, persistence: &P) -> Result<()> {
        for (name, bytes) in &self.rooms {
            persistence.set(&keys::room(*name), bytes.clone()).await?;
        }
        persistence.set(keys::GAME_TIME, Bytes::from(self.time.to_string())).await?;
        persistence.set(keys::GAME_ROOMS, room_list(self.rooms.keys())?).await
    }
}

pub(crate) fn room_list<'a>(names: impl Iterator<Item = &'a RoomName>) -> Result<Bytes> {
    let names: Vec<&RoomName> = names.collect();
    serde_json::to_vec(&names)
        .map(Bytes::from)
        .map_err(|e| EngineError::RuntimeError(e.to_string()))
}

/// Read `<user>.lua` from `dir`, falling back to the starter script
pub async fn load_script(dir: &Path, user: &UserId) -> Result<String> {
    let path = dir.join(format!("{}.lua", user));
    match tokio::fs::read_to_string(&path).await {
        Ok(code) => Ok(code),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(%user, "no script at {:?}, using the starter script", path);
            Ok(STARTER_SCRIPT.to_string())
        }
        Err(e) => Err(EngineError::StorageFailed(format!("Failed to read {:?}: {}", path, e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::registry;
    use crate::storage::MemoryPersistence;

    #[tokio::test]
    async fn test_seed_store_load() {
        let registry = registry::global();
        let users = [UserId::new("alice"), UserId::new("bob")];
        let world = World::seed(registry, &users).unwrap();
        assert_eq!(world.rooms.len(), 2);

        let store = MemoryPersistence::new();
        assert!(World::load(&store).await.unwrap().is_none());
        world.store(&store).await.unwrap();

        let loaded = World::load(&store).await.unwrap().unwrap();
        assert_eq!(loaded.time, 0);
        assert_eq!(loaded.rooms, world.rooms);

        let first = RoomName::from_coords(0, 0);
        let room = Room::decode(registry, &loaded.rooms[&first]).unwrap();
        assert_eq!(room.len(), 4);
        assert!(room.aggregates().owners.contains(&users[0]));
        assert!(room.energy_available() > 0);
    }

    #[tokio::test]
    async fn test_script_fallback() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("alice.lua"), "function loop() end").unwrap();

        let alice = load_script(dir.path(), &UserId::new("alice")).await.unwrap();
        assert_eq!(alice, "function loop() end");
        let bob = load_script(dir.path(), &UserId::new("bob")).await.unwrap();
        assert_eq!(bob, STARTER_SCRIPT);
    }
}
