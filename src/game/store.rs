// src/game/store.rs
//! Resource stores carried by creeps and structures

use crate::schema::{Format, SchemaError, StructFormat, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum ResourceType {
    Energy = 1,
    Power = 2,
    Hydrogen = 3,
    Oxygen = 4,
}

impl ResourceType {
    pub const ALL: [ResourceType; 4] = [
        ResourceType::Energy,
        ResourceType::Power,
        ResourceType::Hydrogen,
        ResourceType::Oxygen,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ResourceType::Energy => "energy",
            ResourceType::Power => "power",
            ResourceType::Hydrogen => "H",
            ResourceType::Oxygen => "O",
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|r| *r as u8 == value)
    }
}

/// Resource amounts held by one object
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Store {
    contents: BTreeMap<ResourceType, i32>,
    capacity: i32,
    /// Only this resource may be stored, when set
    restricted: Option<ResourceType>,
}

impl Store {
    pub fn new(capacity: i32) -> Self {
        Self {
            contents: BTreeMap::new(),
            capacity,
            restricted: None,
        }
    }

    pub fn restricted(resource: ResourceType, capacity: i32) -> Self {
        Self {
            contents: BTreeMap::new(),
            capacity,
            restricted: Some(resource),
        }
    }

    pub fn with(mut self, resource: ResourceType, amount: i32) -> Self {
        self.add(resource, amount);
        self
    }

    pub fn get(&self, resource: ResourceType) -> i32 {
        self.contents.get(&resource).copied().unwrap_or(0)
    }

    pub fn used(&self) -> i32 {
        self.contents.values().sum()
    }

    pub fn capacity(&self) -> i32 {
        self.capacity
    }

    /// Space left for `resource`
    pub fn free_capacity(&self, resource: ResourceType) -> i32 {
        match self.restricted {
            Some(only) if only != resource => 0,
            _ => (self.capacity - self.used()).max(0),
        }
    }

    pub fn accepts(&self, resource: ResourceType) -> bool {
        self.restricted.map_or(true, |only| only == resource)
    }

    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ResourceType, i32)> + '_ {
        self.contents.iter().map(|(r, a)| (*r, *a))
    }

    /// Add up to the free capacity; returns the amount that did not fit
    pub fn add(&mut self, resource: ResourceType, amount: i32) -> i32 {
        let fits = amount.min(self.free_capacity(resource)).max(0);
        if fits > 0 {
            *self.contents.entry(resource).or_insert(0) += fits;
        }
        amount - fits
    }

    /// Remove up to what is held; returns the amount removed
    pub fn remove(&mut self, resource: ResourceType, amount: i32) -> i32 {
        let held = self.get(resource);
        let taken = amount.min(held).max(0);
        if taken == held {
            self.contents.remove(&resource);
        } else {
            self.contents.insert(resource, held - taken);
        }
        taken
    }

    pub fn clear(&mut self) -> Vec<(ResourceType, i32)> {
        std::mem::take(&mut self.contents).into_iter().collect()
    }

    pub fn format() -> Format {
        let entry = StructFormat::new(
            "StoreEntry",
            [("resource", Format::UINT8), ("amount", Format::INT32)],
        );
        Format::structure(StructFormat::new(
            "Store",
            [
                ("contents", Format::vector(Format::structure(entry))),
                ("capacity", Format::INT32),
                ("restricted", Format::optional(Format::UINT8)),
            ],
        ))
    }

    pub fn to_value(&self) -> Value {
        let contents = self
            .contents
            .iter()
            .map(|(resource, amount)| {
                Value::fields([
                    ("resource", Value::from(*resource as u8)),
                    ("amount", Value::from(*amount)),
                ])
            })
            .collect::<Vec<_>>();
        Value::fields([
            ("contents", Value::Vector(contents)),
            ("capacity", Value::from(self.capacity)),
            ("restricted", Value::from(self.restricted.map(|r| r as u8))),
        ])
    }

    pub fn from_value(value: &Value) -> Result<Self, SchemaError> {
        let mut contents = BTreeMap::new();
        for entry in value.field("contents")?.as_slice()? {
            let resource = resource_from_value(entry.field("resource")?)?;
            contents.insert(resource, entry.field("amount")?.as_i32()?);
        }
        let restricted = match value.field("restricted")?.as_option()? {
            Some(tag) => Some(resource_from_value(tag)?),
            None => None,
        };
        Ok(Self {
            contents,
            capacity: value.field("capacity")?.as_i32()?,
            restricted,
        })
    }
}

pub(crate) fn resource_from_value(value: &Value) -> Result<ResourceType, SchemaError> {
    let tag = value.as_u8()?;
    ResourceType::from_u8(tag).ok_or_else(|| SchemaError::Corrupt(format!("unknown resource type {}", tag)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::codec;

    #[test]
    fn test_add_respects_capacity() {
        let mut store = Store::new(50);
        assert_eq!(store.add(ResourceType::Energy, 30), 0);
        assert_eq!(store.add(ResourceType::Energy, 30), 10);
        assert_eq!(store.get(ResourceType::Energy), 50);
        assert_eq!(store.free_capacity(ResourceType::Energy), 0);
    }

    #[test]
    fn test_restricted_store() {
        let mut store = Store::restricted(ResourceType::Energy, 300);
        assert_eq!(store.free_capacity(ResourceType::Power), 0);
        assert_eq!(store.add(ResourceType::Power, 10), 10);
        assert!(store.is_empty());
        assert_eq!(store.free_capacity(ResourceType::Energy), 300);
    }

    #[test]
    fn test_remove_drops_empty_entries() {
        let mut store = Store::new(100).with(ResourceType::Energy, 40);
        assert_eq!(store.remove(ResourceType::Energy, 100), 40);
        assert!(store.is_empty());
    }

    #[test]
    fn test_value_round_trip() {
        let store = Store::restricted(ResourceType::Energy, 300).with(ResourceType::Energy, 120);
        let bytes = codec::encode_to_vec(&Store::format(), &store.to_value()).unwrap();
        let decoded = codec::decode(&Store::format(), &bytes, 0).unwrap();
        assert_eq!(Store::from_value(&decoded).unwrap(), store);
    }
}
