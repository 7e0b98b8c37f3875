// src/schema/mod.rs
//! Binary object model
//!
//! - `format`: declarative schema tree (primitives, structs, vectors,
//!   optionals, variants)
//! - `value`: decoded values
//! - `codec`: byte layout
//! - `view`: lazy field access over encoded bytes

pub mod codec;
pub mod format;
pub mod value;
pub mod view;

pub use codec::{decode, encode, encode_to_vec, encoded_len};
pub use format::{Alternative, Field, Format, Primitive, StructFormat, VariantFormat};
pub use value::Value;
pub use view::{View, ViewMut};

use thiserror::Error;

/// Errors raised while building schemas or reading and writing bytes
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    #[error("truncated buffer: need {needed} bytes at offset {offset}, buffer is {len} bytes")]
    Truncated { offset: usize, needed: usize, len: usize },

    #[error("offset {offset} is past the end of a {len} byte buffer")]
    OffsetOutOfBounds { offset: usize, len: usize },

    #[error("corrupt data: {0}")]
    Corrupt(String),

    #[error("unknown variant discriminant {0}")]
    UnknownVariant(u8),

    #[error("duplicate variant discriminant {0}")]
    DuplicateVariant(u8),

    #[error("missing field: {0}")]
    MissingField(String),

    #[error("{format} has no field named {field}")]
    NoSuchField { format: String, field: String },

    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("value {value} does not fit in {target}")]
    OutOfRange { value: i64, target: &'static str },
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn record() -> Format {
        Format::structure(StructFormat::new(
            "Record",
            [
                ("a", Format::INT16),
                ("b", Format::STRING),
                ("c", Format::vector(Format::INT32)),
                ("d", Format::optional(Format::DOUBLE)),
            ],
        ))
    }

    proptest! {
        #[test]
        fn prop_decode_inverts_encode(
            a in any::<i16>(),
            b in ".{0,24}",
            c in proptest::collection::vec(any::<i32>(), 0..16),
            d in proptest::option::of(-1.0e9f64..1.0e9),
        ) {
            let value = Value::fields([
                ("a", Value::from(a)),
                ("b", Value::from(b)),
                ("c", Value::from(c)),
                ("d", Value::from(d)),
            ]);
            let bytes = encode_to_vec(&record(), &value).unwrap();
            prop_assert_eq!(decode(&record(), &bytes, 0).unwrap(), value);
            prop_assert_eq!(encoded_len(&record(), &bytes, 0).unwrap(), bytes.len());
        }

        #[test]
        fn prop_garbage_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
            let _ = decode(&record(), &bytes, 0);
        }
    }
}
