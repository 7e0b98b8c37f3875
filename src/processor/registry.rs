// src/processor/registry.rs
//! Startup-time registration tables
//!
//! Domain mods register, per object kind:
//!
//! - the kind's binary layout and its encode/decode functions
//! - intent handlers keyed by verb
//! - tick handlers run once per live object every processed tick
//!
//! and find handlers keyed by category. `RegistryBuilder::build` freezes
//! everything into an immutable `Registry`; one process-wide registry is
//! installed before the first tick.

use crate::game::find::{FindCategory, FindHandler};
use crate::game::object::{GameObject, Kind, ObjectId, UserId};
use crate::game::position::RoomName;
use crate::processor::context::ProcessorContext;
use crate::processor::intent::ResultCode;
use crate::schema::{Format, SchemaError, StructFormat, Value, VariantFormat};
use crate::utils::errors::{EngineError, Result};
use once_cell::sync::OnceCell;
use std::collections::{BTreeMap, HashMap};

pub type IntentHandler = fn(&mut ProcessorContext<'_>, &UserId, ObjectId, &serde_json::Value) -> ResultCode;
pub type TickHandler = fn(&mut ProcessorContext<'_>, ObjectId);
pub type EncodeFn = fn(&GameObject) -> std::result::Result<Value, SchemaError>;
pub type DecodeFn = fn(&Value, RoomName) -> std::result::Result<GameObject, SchemaError>;

/// Binary layout of one object kind
#[derive(Clone)]
pub struct KindDescriptor {
    pub kind: Kind,
    pub format: Format,
    pub encode: EncodeFn,
    pub decode: DecodeFn,
}

impl std::fmt::Debug for KindDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KindDescriptor")
            .field("kind", &self.kind)
            .field("format", &self.format.describe())
            .finish()
    }
}

#[derive(Default)]
pub struct RegistryBuilder {
    kinds: BTreeMap<Kind, KindDescriptor>,
    intents: HashMap<(Kind, String), IntentHandler>,
    ticks: BTreeMap<Kind, Vec<TickHandler>>,
    finds: HashMap<FindCategory, FindHandler>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_kind(&mut self, descriptor: KindDescriptor) -> &mut Self {
        if self.kinds.contains_key(&descriptor.kind) {
            tracing::warn!(kind = descriptor.kind.name(), "kind registered twice, keeping the last");
        }
        self.kinds.insert(descriptor.kind, descriptor);
        self
    }

    pub fn register_intent(&mut self, kind: Kind, verb: &str, handler: IntentHandler) -> &mut Self {
        if self.intents.insert((kind, verb.to_string()), handler).is_some() {
            tracing::warn!(kind = kind.name(), verb, "intent handler replaced");
        }
        self
    }

    pub fn register_tick(&mut self, kind: Kind, handler: TickHandler) -> &mut Self {
        self.ticks.entry(kind).or_default().push(handler);
        self
    }

    pub fn register_find(&mut self, category: FindCategory, handler: FindHandler) -> &mut Self {
        if self.finds.insert(category, handler).is_some() {
            tracing::warn!(category = category.0, "find handler replaced");
        }
        self
    }

    /// Freeze the tables and derive the room layout from the registered kinds
    pub fn build(self) -> Registry {
        let mut objects = VariantFormat::new("RoomObject");
        for descriptor in self.kinds.values() {
            // Kind tags are unique by construction of the map
            if let Err(error) = objects.insert(descriptor.kind.tag(), descriptor.kind.name(), descriptor.format.clone()) {
                tracing::error!(%error, "failed to register kind layout");
            }
        }

        let room_format = Format::structure(StructFormat::new(
            "Room",
            [
                ("name", Format::STRING),
                ("time", Format::UINT32),
                ("objects", Format::vector(Format::variant(objects))),
            ],
        ));

        tracing::debug!(
            kinds = self.kinds.len(),
            intents = self.intents.len(),
            finds = self.finds.len(),
            "registry built"
        );

        Registry {
            kinds: self.kinds,
            intents: self.intents,
            ticks: self.ticks,
            finds: self.finds,
            room_format,
        }
    }
}

/// Immutable dispatch tables
pub struct Registry {
    kinds: BTreeMap<Kind, KindDescriptor>,
    intents: HashMap<(Kind, String), IntentHandler>,
    ticks: BTreeMap<Kind, Vec<TickHandler>>,
    finds: HashMap<FindCategory, FindHandler>,
    room_format: Format,
}

impl Registry {
    pub fn kind(&self, kind: Kind) -> Option<&KindDescriptor> {
        self.kinds.get(&kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &KindDescriptor> {
        self.kinds.values()
    }

    pub fn intent(&self, kind: Kind, verb: &str) -> Option<IntentHandler> {
        self.intents.get(&(kind, verb.to_string())).copied()
    }

    pub fn tick_handlers(&self, kind: Kind) -> &[TickHandler] {
        self.ticks.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn find_handler(&self, category: FindCategory) -> Option<FindHandler> {
        self.finds.get(&category).copied()
    }

    pub fn find_categories(&self) -> impl Iterator<Item = FindCategory> + '_ {
        self.finds.keys().copied()
    }

    /// Layout of an encoded room
    pub fn room_format(&self) -> &Format {
        &self.room_format
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("kinds", &self.kinds.keys().collect::<Vec<_>>())
            .field("intents", &self.intents.len())
            .field("finds", &self.finds.len())
            .finish()
    }
}

static GLOBAL: OnceCell<Registry> = OnceCell::new();

/// Install the process-wide registry. Fails once a registry is in place,
/// including the default one installed lazily by `global`.
pub fn install(registry: Registry) -> Result<&'static Registry> {
    GLOBAL.set(registry).map_err(|_| EngineError::RegistryFrozen)?;
    GLOBAL.get().ok_or(EngineError::RegistryFrozen)
}

/// The process-wide registry, defaulting to the built-in mods
pub fn global() -> &'static Registry {
    GLOBAL.get_or_init(crate::mods::registry)
}
