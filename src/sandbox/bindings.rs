// src/sandbox/bindings.rs
//! Host objects exposed to sandboxed code
//!
//! `RoomHandle` and `ObjectView` point at a shared, read-only `RoomSnapshot`
//! and decode fields straight from its bytes, so nothing a script does can
//! reach host state. Both hold the snapshot weakly and are stamped with the
//! sandbox `Epoch` they were issued in: once the tick ends they stop
//! resolving, and a script that stashes them in a global keeps no snapshot
//! alive.

use crate::game::find::{FindCategory, CATEGORY_NAMES};
use crate::game::object::{ObjectId, UserId};
use crate::game::path::find_path;
use crate::game::position::{RoomName, RoomPosition};
use crate::game::room::RoomSnapshot;
use crate::game::constants::BodyPartType;
use crate::game::store::ResourceType;
use crate::processor::ResultCode;
use crate::schema::{SchemaError, Value};
use mlua::{Lua, MetaMethod, UserData, UserDataFields, UserDataMethods, UserDataRef};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Console lines kept per tick
pub const CONSOLE_LINE_LIMIT: usize = 256;

/// Per-sandbox tick counter; handles issued under an older value are stale
#[derive(Debug, Clone, Default)]
pub struct Epoch(Arc<AtomicU64>);

impl Epoch {
    pub fn current(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    /// Start a new tick, invalidating every handle issued so far
    pub fn advance(&self) -> u64 {
        self.0.fetch_add(1, Ordering::AcqRel) + 1
    }
}

/// Weak, tick-scoped reference to a snapshot
#[derive(Debug, Clone)]
struct Lease {
    snapshot: Weak<RoomSnapshot>,
    epoch: Epoch,
    issued: u64,
}

impl Lease {
    fn new(snapshot: &Arc<RoomSnapshot>, epoch: &Epoch) -> Self {
        Self {
            snapshot: Arc::downgrade(snapshot),
            epoch: epoch.clone(),
            issued: epoch.current(),
        }
    }

    fn resolve(&self) -> mlua::Result<Arc<RoomSnapshot>> {
        if self.epoch.current() != self.issued {
            return Err(mlua::Error::RuntimeError("room handle from an earlier tick".to_string()));
        }
        self.snapshot
            .upgrade()
            .ok_or_else(|| mlua::Error::RuntimeError("room handle from an earlier tick".to_string()))
    }
}

/// Read-only handle to one room for one viewer
#[derive(Debug, Clone)]
pub struct RoomHandle {
    lease: Lease,
    name: RoomName,
    viewer: UserId,
}

impl RoomHandle {
    pub fn new(snapshot: &Arc<RoomSnapshot>, viewer: UserId, epoch: &Epoch) -> Self {
        Self {
            lease: Lease::new(snapshot, epoch),
            name: snapshot.name(),
            viewer,
        }
    }

    pub fn is_live(&self) -> bool {
        self.lease.resolve().is_ok()
    }

    fn object(&self, snapshot: &RoomSnapshot, id: ObjectId) -> Option<ObjectView> {
        snapshot.view(id).map(|_| ObjectView {
            lease: self.lease.clone(),
            id,
            room: self.name,
        })
    }

    /// Cached ids for the category, as views
    pub fn find(&self, category: FindCategory) -> mlua::Result<Vec<ObjectView>> {
        let snapshot = self.lease.resolve()?;
        Ok(snapshot
            .room
            .find_ids(category, Some(&self.viewer))
            .iter()
            .filter_map(|id| self.object(&snapshot, *id))
            .collect())
    }

    pub fn get(&self, id: &str) -> mlua::Result<Option<ObjectView>> {
        let snapshot = self.lease.resolve()?;
        Ok(id.parse::<ObjectId>().ok().and_then(|id| self.object(&snapshot, id)))
    }

    pub fn look_at(&self, x: u8, y: u8) -> mlua::Result<Vec<ObjectView>> {
        let snapshot = self.lease.resolve()?;
        Ok(snapshot
            .room
            .look_at(x, y)
            .into_iter()
            .filter_map(|object| self.object(&snapshot, object.id))
            .collect())
    }
}

impl UserData for RoomHandle {
    fn add_fields<F: UserDataFields<Self>>(fields: &mut F) {
        fields.add_field_method_get("name", |_, this| Ok(this.name.to_string()));
        fields.add_field_method_get("time", |_, this| Ok(this.lease.resolve()?.time()));
        fields.add_field_method_get("energyAvailable", |_, this| {
            Ok(this.lease.resolve()?.room.energy_available())
        });
        fields.add_field_method_get("energyCapacityAvailable", |_, this| {
            Ok(this.lease.resolve()?.room.energy_capacity_available())
        });
    }

    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("find", |_, this, category: u16| this.find(FindCategory(category)));
        methods.add_method("get", |_, this, id: String| this.get(&id));
        methods.add_method("lookAt", |_, this, (x, y): (u8, u8)| this.look_at(x, y));
    }
}

/// One object, read lazily from the snapshot bytes
#[derive(Debug, Clone)]
pub struct ObjectView {
    lease: Lease,
    id: ObjectId,
    room: RoomName,
}

impl ObjectView {
    pub fn id(&self) -> ObjectId {
        self.id
    }

    fn read(&self, lua: &Lua, key: &str) -> mlua::Result<mlua::Value> {
        let snapshot = self.lease.resolve()?;
        let Some(view) = snapshot.view(self.id) else {
            return Ok(mlua::Value::Nil);
        };
        match key {
            "kind" => match view.variant_name() {
                Ok(name) => Ok(mlua::Value::String(lua.create_string(&name)?)),
                Err(_) => Ok(mlua::Value::Nil),
            },
            "roomName" => Ok(mlua::Value::String(lua.create_string(self.room.to_string())?)),
            _ => match view.get(key) {
                Ok(value) => value_to_lua(lua, &value),
                Err(SchemaError::NoSuchField { .. } | SchemaError::MissingField(_)) => Ok(mlua::Value::Nil),
                Err(err) => {
                    tracing::warn!(room = %self.room, key, error = %err, "object read failed");
                    Ok(mlua::Value::Nil)
                }
            },
        }
    }
}

impl UserData for ObjectView {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_meta_method(MetaMethod::Index, |lua, this, key: String| this.read(lua, &key));
        methods.add_meta_method(MetaMethod::ToString, |_, this, ()| {
            let kind = this
                .lease
                .resolve()
                .ok()
                .and_then(|snapshot| snapshot.view(this.id).and_then(|view| view.variant_name().ok()))
                .unwrap_or_default();
            Ok(format!("[{} {}]", kind, this.id))
        });
    }
}

/// Convert a decoded schema value into a plain Lua value
pub fn value_to_lua(lua: &Lua, value: &Value) -> mlua::Result<mlua::Value> {
    Ok(match value {
        Value::Bool(b) => mlua::Value::Boolean(*b),
        Value::Int(i) => mlua::Value::Integer(*i),
        Value::Double(d) => mlua::Value::Number(*d),
        Value::String(s) => mlua::Value::String(lua.create_string(s)?),
        Value::Id(id) => mlua::Value::String(lua.create_string(id.to_string())?),
        Value::Struct(fields) => {
            let table = lua.create_table_with_capacity(0, fields.len())?;
            for (name, field) in fields {
                table.set(name.as_str(), value_to_lua(lua, field)?)?;
            }
            mlua::Value::Table(table)
        }
        Value::Vector(items) => {
            let table = lua.create_table_with_capacity(items.len(), 0)?;
            for item in items {
                table.push(value_to_lua(lua, item)?)?;
            }
            mlua::Value::Table(table)
        }
        Value::Optional(None) => mlua::Value::Nil,
        Value::Optional(Some(inner)) => value_to_lua(lua, inner)?,
        Value::Variant(_, inner) => value_to_lua(lua, inner)?,
    })
}

/// Install constants and host functions into a fresh state
pub fn install(lua: &Lua, user: &UserId, console: Arc<Mutex<Vec<String>>>) -> mlua::Result<()> {
    let globals = lua.globals();

    for (name, category) in CATEGORY_NAMES {
        globals.set(name, category.0)?;
    }
    for code in ResultCode::ALL {
        globals.set(code.name(), code.code())?;
    }
    let part_names = lua.create_table()?;
    for part in BodyPartType::ALL {
        globals.set(part.name().to_uppercase(), part.name())?;
        part_names.set(part as u8, part.name())?;
    }
    globals.set("BODYPART_NAMES", part_names)?;
    let resource_names = lua.create_table()?;
    for resource in ResourceType::ALL {
        globals.set(format!("RESOURCE_{}", resource.name().to_uppercase()), resource.name())?;
        resource_names.set(resource as u8, resource.name())?;
    }
    globals.set("RESOURCE_NAMES", resource_names)?;
    globals.set("__user", user.as_str())?;

    let print = lua.create_function(move |_, args: mlua::MultiValue| {
        let line = args
            .iter()
            .map(|value| match value {
                mlua::Value::String(s) => s.to_string_lossy(),
                mlua::Value::Integer(i) => i.to_string(),
                mlua::Value::Number(n) => n.to_string(),
                mlua::Value::Boolean(b) => b.to_string(),
                mlua::Value::Nil => "nil".to_string(),
                other => other.type_name().to_string(),
            })
            .collect::<Vec<_>>()
            .join("\t");
        let mut console = console.lock();
        if console.len() < CONSOLE_LINE_LIMIT {
            console.push(line);
        }
        Ok(())
    })?;
    globals.set("print", print)?;

    let find_path_fn = lua.create_function(
        |_, (room, fx, fy, tx, ty, range): (UserDataRef<RoomHandle>, u8, u8, u8, u8, Option<u32>)| {
            let snapshot = room.lease.resolve()?;
            let name = snapshot.name();
            let (Some(from), Some(to)) = (RoomPosition::new(name, fx, fy), RoomPosition::new(name, tx, ty)) else {
                return Ok(None);
            };
            Ok(find_path(&snapshot.room, from, to, range.unwrap_or(0))
                .map(|path| path.into_iter().map(u8::from).collect::<Vec<_>>()))
        },
    )?;
    globals.set("__find_path", find_path_fn)?;

    Ok(())
}
