// src/schema/format.rs
//! Declarative schema tree
//!
//! A `Format` describes how a value is laid out in bytes. Formats are built
//! once at startup and shared by reference count, so cloning one is cheap.

use crate::schema::SchemaError;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Leaf value types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    Bool,
    Int8,
    Uint8,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Double,
    /// u32 byte length followed by UTF-8
    String,
    /// 16-byte object identifier
    Id,
}

impl Primitive {
    /// Encoded size, or `None` for variable-size primitives
    pub fn fixed_size(self) -> Option<usize> {
        match self {
            Primitive::Bool | Primitive::Int8 | Primitive::Uint8 => Some(1),
            Primitive::Int16 | Primitive::Uint16 => Some(2),
            Primitive::Int32 | Primitive::Uint32 => Some(4),
            Primitive::Double => Some(8),
            Primitive::Id => Some(16),
            Primitive::String => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Primitive::Bool => "bool",
            Primitive::Int8 => "int8",
            Primitive::Uint8 => "uint8",
            Primitive::Int16 => "int16",
            Primitive::Uint16 => "uint16",
            Primitive::Int32 => "int32",
            Primitive::Uint32 => "uint32",
            Primitive::Double => "double",
            Primitive::String => "string",
            Primitive::Id => "id",
        }
    }
}

/// A named member of a struct
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub format: Format,
}

/// Ordered list of fields
#[derive(Debug, Clone, PartialEq)]
pub struct StructFormat {
    pub name: String,
    pub fields: Vec<Field>,
}

impl StructFormat {
    pub fn new<'a, I>(name: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, Format)>,
    {
        Self {
            name: name.into(),
            fields: fields
                .into_iter()
                .map(|(name, format)| Field {
                    name: name.to_string(),
                    format,
                })
                .collect(),
        }
    }

    /// Structural extension: the base's fields first, then `fields`
    pub fn extend<'a, I>(base: &StructFormat, name: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, Format)>,
    {
        let mut extended = Self::new(name, fields);
        let mut all = base.fields.clone();
        all.append(&mut extended.fields);
        extended.fields = all;
        extended
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|field| field.name == name)
    }
}

/// One alternative of a variant
#[derive(Debug, Clone, PartialEq)]
pub struct Alternative {
    pub tag: u8,
    pub name: String,
    pub format: Format,
}

/// Closed set of alternatives selected by a one-byte discriminant
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VariantFormat {
    pub name: String,
    alternatives: BTreeMap<u8, Alternative>,
}

impl VariantFormat {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alternatives: BTreeMap::new(),
        }
    }

    /// Register an alternative; discriminants are unique
    pub fn insert(&mut self, tag: u8, name: impl Into<String>, format: Format) -> Result<(), SchemaError> {
        if self.alternatives.contains_key(&tag) {
            return Err(SchemaError::DuplicateVariant(tag));
        }
        self.alternatives.insert(
            tag,
            Alternative {
                tag,
                name: name.into(),
                format,
            },
        );
        Ok(())
    }

    pub fn alternative(&self, tag: u8) -> Option<&Alternative> {
        self.alternatives.get(&tag)
    }

    pub fn alternatives(&self) -> impl Iterator<Item = &Alternative> {
        self.alternatives.values()
    }

    pub fn len(&self) -> usize {
        self.alternatives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alternatives.is_empty()
    }
}

/// Schema node
#[derive(Debug, Clone, PartialEq)]
pub enum Format {
    Primitive(Primitive),
    Struct(Arc<StructFormat>),
    /// u32 element count followed by the elements
    Vector(Arc<Format>),
    /// u8 presence flag followed by the payload when present
    Optional(Arc<Format>),
    /// u8 discriminant followed by the selected alternative
    Variant(Arc<VariantFormat>),
}

impl Format {
    pub const BOOL: Format = Format::Primitive(Primitive::Bool);
    pub const INT8: Format = Format::Primitive(Primitive::Int8);
    pub const UINT8: Format = Format::Primitive(Primitive::Uint8);
    pub const INT16: Format = Format::Primitive(Primitive::Int16);
    pub const UINT16: Format = Format::Primitive(Primitive::Uint16);
    pub const INT32: Format = Format::Primitive(Primitive::Int32);
    pub const UINT32: Format = Format::Primitive(Primitive::Uint32);
    pub const DOUBLE: Format = Format::Primitive(Primitive::Double);
    pub const STRING: Format = Format::Primitive(Primitive::String);
    pub const ID: Format = Format::Primitive(Primitive::Id);

    pub fn structure(format: StructFormat) -> Self {
        Format::Struct(Arc::new(format))
    }

    pub fn vector(element: Format) -> Self {
        Format::Vector(Arc::new(element))
    }

    pub fn optional(inner: Format) -> Self {
        Format::Optional(Arc::new(inner))
    }

    pub fn variant(variant: VariantFormat) -> Self {
        Format::Variant(Arc::new(variant))
    }

    /// Encoded size when it does not depend on the value
    pub fn fixed_size(&self) -> Option<usize> {
        match self {
            Format::Primitive(primitive) => primitive.fixed_size(),
            Format::Struct(structure) => structure
                .fields
                .iter()
                .map(|field| field.format.fixed_size())
                .sum(),
            Format::Vector(_) | Format::Optional(_) | Format::Variant(_) => None,
        }
    }

    /// Smallest possible encoded size, used to sanity-check vector lengths
    pub fn min_size(&self) -> usize {
        match self {
            Format::Primitive(Primitive::String) => 4,
            Format::Primitive(primitive) => primitive.fixed_size().unwrap_or(0),
            Format::Struct(structure) => structure
                .fields
                .iter()
                .map(|field| field.format.min_size())
                .sum(),
            Format::Vector(_) => 4,
            Format::Optional(_) | Format::Variant(_) => 1,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Format::Primitive(primitive) => primitive.name().to_string(),
            Format::Struct(structure) => structure.name.clone(),
            Format::Vector(element) => format!("vector<{}>", element.describe()),
            Format::Optional(inner) => format!("optional<{}>", inner.describe()),
            Format::Variant(variant) => variant.name.clone(),
        }
    }
}
