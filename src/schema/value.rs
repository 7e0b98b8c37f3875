// src/schema/value.rs
//! Decoded schema values

use crate::schema::SchemaError;
use std::collections::BTreeMap;
use ulid::Ulid;

/// A value shaped by some `Format`
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    Id(Ulid),
    Struct(BTreeMap<String, Value>),
    Vector(Vec<Value>),
    Optional(Option<Box<Value>>),
    Variant(u8, Box<Value>),
}

impl Value {
    /// Build a struct value from `(name, value)` pairs
    pub fn fields<I, K>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Value::Struct(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn none() -> Self {
        Value::Optional(None)
    }

    pub fn some(value: impl Into<Value>) -> Self {
        Value::Optional(Some(Box::new(value.into())))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Double(_) => "double",
            Value::String(_) => "string",
            Value::Id(_) => "id",
            Value::Struct(_) => "struct",
            Value::Vector(_) => "vector",
            Value::Optional(_) => "optional",
            Value::Variant(..) => "variant",
        }
    }

    fn mismatch(&self, expected: &'static str) -> SchemaError {
        SchemaError::TypeMismatch {
            expected,
            found: self.type_name(),
        }
    }

    pub fn field(&self, name: &str) -> Result<&Value, SchemaError> {
        match self {
            Value::Struct(fields) => fields
                .get(name)
                .ok_or_else(|| SchemaError::MissingField(name.to_string())),
            Value::Variant(_, payload) => payload.field(name),
            other => Err(other.mismatch("struct")),
        }
    }

    pub fn as_bool(&self) -> Result<bool, SchemaError> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(other.mismatch("bool")),
        }
    }

    pub fn as_i64(&self) -> Result<i64, SchemaError> {
        match self {
            Value::Int(i) => Ok(*i),
            other => Err(other.mismatch("int")),
        }
    }

    pub fn as_i32(&self) -> Result<i32, SchemaError> {
        let value = self.as_i64()?;
        i32::try_from(value).map_err(|_| SchemaError::OutOfRange {
            value,
            target: "int32",
        })
    }

    pub fn as_u32(&self) -> Result<u32, SchemaError> {
        let value = self.as_i64()?;
        u32::try_from(value).map_err(|_| SchemaError::OutOfRange {
            value,
            target: "uint32",
        })
    }

    pub fn as_u8(&self) -> Result<u8, SchemaError> {
        let value = self.as_i64()?;
        u8::try_from(value).map_err(|_| SchemaError::OutOfRange {
            value,
            target: "uint8",
        })
    }

    pub fn as_f64(&self) -> Result<f64, SchemaError> {
        match self {
            Value::Double(d) => Ok(*d),
            Value::Int(i) => Ok(*i as f64),
            other => Err(other.mismatch("double")),
        }
    }

    pub fn as_str(&self) -> Result<&str, SchemaError> {
        match self {
            Value::String(s) => Ok(s),
            other => Err(other.mismatch("string")),
        }
    }

    pub fn as_id(&self) -> Result<Ulid, SchemaError> {
        match self {
            Value::Id(id) => Ok(*id),
            other => Err(other.mismatch("id")),
        }
    }

    pub fn as_slice(&self) -> Result<&[Value], SchemaError> {
        match self {
            Value::Vector(items) => Ok(items),
            other => Err(other.mismatch("vector")),
        }
    }

    pub fn as_option(&self) -> Result<Option<&Value>, SchemaError> {
        match self {
            Value::Optional(inner) => Ok(inner.as_deref()),
            other => Err(other.mismatch("optional")),
        }
    }

    pub fn as_variant(&self) -> Result<(u8, &Value), SchemaError> {
        match self {
            Value::Variant(tag, payload) => Ok((*tag, payload)),
            other => Err(other.mismatch("variant")),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

macro_rules! int_value {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Value::Int(i64::from(value))
                }
            }
        )*
    };
}

int_value!(i8, u8, i16, u16, i32, u32, i64);

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Double(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<Ulid> for Value {
    fn from(value: Ulid) -> Self {
        Value::Id(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        Value::Optional(value.map(|inner| Box::new(inner.into())))
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(value: Vec<T>) -> Self {
        Value::Vector(value.into_iter().map(Into::into).collect())
    }
}
