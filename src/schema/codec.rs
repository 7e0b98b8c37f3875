// src/schema/codec.rs
//! Encoding and decoding of values against a `Format`
//!
//! Layout rules (all integers little-endian):
//!
//! - primitives: fixed width, strings are `u32 len + utf8`, ids are 16 bytes
//! - struct: fields back to back in declaration order
//! - vector: `u32 count` then the elements
//! - optional: `u8 0|1` then the payload when 1
//! - variant: `u8 discriminant` then the alternative's payload

use crate::schema::format::{Format, Primitive};
use crate::schema::value::Value;
use crate::schema::SchemaError;
use std::collections::BTreeMap;
use ulid::Ulid;

/// Encode `value` at `offset`, overwriting existing bytes and growing the
/// buffer when needed. Returns the number of bytes written.
pub fn encode(format: &Format, value: &Value, buffer: &mut Vec<u8>, offset: usize) -> Result<usize, SchemaError> {
    if offset > buffer.len() {
        return Err(SchemaError::OffsetOutOfBounds {
            offset,
            len: buffer.len(),
        });
    }

    let encoded = encode_to_vec(format, value)?;
    let end = offset + encoded.len();
    if end > buffer.len() {
        buffer.resize(end, 0);
    }
    buffer[offset..end].copy_from_slice(&encoded);
    Ok(encoded.len())
}

/// Encode into a fresh buffer
pub fn encode_to_vec(format: &Format, value: &Value) -> Result<Vec<u8>, SchemaError> {
    let mut out = Vec::with_capacity(format.fixed_size().unwrap_or(64));
    write_value(format, value, &mut out)?;
    Ok(out)
}

/// Decode the value stored at `offset`
pub fn decode(format: &Format, buffer: &[u8], offset: usize) -> Result<Value, SchemaError> {
    read_value(format, buffer, offset).map(|(value, _)| value)
}

/// Size of the encoded region at `offset`, without materializing the value
pub fn encoded_len(format: &Format, buffer: &[u8], offset: usize) -> Result<usize, SchemaError> {
    if let Some(size) = format.fixed_size() {
        take(buffer, offset, size)?;
        return Ok(size);
    }

    match format {
        Format::Primitive(Primitive::String) => {
            let len = read_u32(buffer, offset)? as usize;
            take(buffer, offset + 4, len)?;
            Ok(4 + len)
        }
        Format::Primitive(primitive) => Err(SchemaError::Corrupt(format!(
            "primitive {} has no fixed size",
            primitive.name()
        ))),
        Format::Struct(structure) => {
            let mut cursor = offset;
            for field in &structure.fields {
                cursor += encoded_len(&field.format, buffer, cursor)?;
            }
            Ok(cursor - offset)
        }
        Format::Vector(element) => {
            let count = read_vector_len(element, buffer, offset)?;
            let mut cursor = offset + 4;
            if let Some(size) = element.fixed_size() {
                cursor += size * count;
                take(buffer, offset + 4, size * count)?;
            } else {
                for _ in 0..count {
                    cursor += encoded_len(element, buffer, cursor)?;
                }
            }
            Ok(cursor - offset)
        }
        Format::Optional(inner) => match read_flag(buffer, offset)? {
            false => Ok(1),
            true => Ok(1 + encoded_len(inner, buffer, offset + 1)?),
        },
        Format::Variant(variant) => {
            let tag = take(buffer, offset, 1)?[0];
            let alternative = variant
                .alternative(tag)
                .ok_or(SchemaError::UnknownVariant(tag))?;
            Ok(1 + encoded_len(&alternative.format, buffer, offset + 1)?)
        }
    }
}

fn write_value(format: &Format, value: &Value, out: &mut Vec<u8>) -> Result<(), SchemaError> {
    match format {
        Format::Primitive(primitive) => write_primitive(*primitive, value, out),
        Format::Struct(structure) => {
            for field in &structure.fields {
                let member = match value {
                    Value::Struct(members) => members.get(&field.name).ok_or_else(|| {
                        SchemaError::MissingField(format!("{}.{}", structure.name, field.name))
                    })?,
                    other => {
                        return Err(SchemaError::TypeMismatch {
                            expected: "struct",
                            found: other.type_name(),
                        })
                    }
                };
                write_value(&field.format, member, out)?;
            }
            Ok(())
        }
        Format::Vector(element) => {
            let items = value.as_slice()?;
            let count = u32::try_from(items.len()).map_err(|_| SchemaError::OutOfRange {
                value: items.len() as i64,
                target: "vector length",
            })?;
            out.extend_from_slice(&count.to_le_bytes());
            for item in items {
                write_value(element, item, out)?;
            }
            Ok(())
        }
        Format::Optional(inner) => match value.as_option()? {
            None => {
                out.push(0);
                Ok(())
            }
            Some(payload) => {
                out.push(1);
                write_value(inner, payload, out)
            }
        },
        Format::Variant(variant) => {
            let (tag, payload) = value.as_variant()?;
            let alternative = variant
                .alternative(tag)
                .ok_or(SchemaError::UnknownVariant(tag))?;
            out.push(tag);
            write_value(&alternative.format, payload, out)
        }
    }
}

fn write_primitive(primitive: Primitive, value: &Value, out: &mut Vec<u8>) -> Result<(), SchemaError> {
    fn narrow<T: TryFrom<i64>>(value: i64, target: &'static str) -> Result<T, SchemaError> {
        T::try_from(value).map_err(|_| SchemaError::OutOfRange { value, target })
    }

    match primitive {
        Primitive::Bool => out.push(u8::from(value.as_bool()?)),
        Primitive::Int8 => out.extend_from_slice(&narrow::<i8>(value.as_i64()?, "int8")?.to_le_bytes()),
        Primitive::Uint8 => out.push(narrow::<u8>(value.as_i64()?, "uint8")?),
        Primitive::Int16 => out.extend_from_slice(&narrow::<i16>(value.as_i64()?, "int16")?.to_le_bytes()),
        Primitive::Uint16 => out.extend_from_slice(&narrow::<u16>(value.as_i64()?, "uint16")?.to_le_bytes()),
        Primitive::Int32 => out.extend_from_slice(&narrow::<i32>(value.as_i64()?, "int32")?.to_le_bytes()),
        Primitive::Uint32 => out.extend_from_slice(&narrow::<u32>(value.as_i64()?, "uint32")?.to_le_bytes()),
        Primitive::Double => out.extend_from_slice(&value.as_f64()?.to_le_bytes()),
        Primitive::String => {
            let text = value.as_str()?;
            let len = narrow::<u32>(text.len() as i64, "string length")?;
            out.extend_from_slice(&len.to_le_bytes());
            out.extend_from_slice(text.as_bytes());
        }
        Primitive::Id => out.extend_from_slice(&value.as_id()?.to_bytes()),
    }
    Ok(())
}

/// Decode the value at `offset` and report how many bytes it spans
pub(crate) fn read_value(format: &Format, buffer: &[u8], offset: usize) -> Result<(Value, usize), SchemaError> {
    match format {
        Format::Primitive(primitive) => read_primitive(*primitive, buffer, offset),
        Format::Struct(structure) => {
            let mut members = BTreeMap::new();
            let mut cursor = offset;
            for field in &structure.fields {
                let (member, len) = read_value(&field.format, buffer, cursor)?;
                members.insert(field.name.clone(), member);
                cursor += len;
            }
            Ok((Value::Struct(members), cursor - offset))
        }
        Format::Vector(element) => {
            let count = read_vector_len(element, buffer, offset)?;
            let mut items = Vec::with_capacity(count);
            let mut cursor = offset + 4;
            for _ in 0..count {
                let (item, len) = read_value(element, buffer, cursor)?;
                items.push(item);
                cursor += len;
            }
            Ok((Value::Vector(items), cursor - offset))
        }
        Format::Optional(inner) => match read_flag(buffer, offset)? {
            false => Ok((Value::Optional(None), 1)),
            true => {
                let (payload, len) = read_value(inner, buffer, offset + 1)?;
                Ok((Value::Optional(Some(Box::new(payload))), 1 + len))
            }
        },
        Format::Variant(variant) => {
            let tag = take(buffer, offset, 1)?[0];
            let alternative = variant
                .alternative(tag)
                .ok_or(SchemaError::UnknownVariant(tag))?;
            let (payload, len) = read_value(&alternative.format, buffer, offset + 1)?;
            Ok((Value::Variant(tag, Box::new(payload)), 1 + len))
        }
    }
}

fn read_primitive(primitive: Primitive, buffer: &[u8], offset: usize) -> Result<(Value, usize), SchemaError> {
    macro_rules! le {
        ($ty:ty, $size:expr) => {{
            let bytes = take(buffer, offset, $size)?;
            let mut raw = [0u8; $size];
            raw.copy_from_slice(bytes);
            <$ty>::from_le_bytes(raw)
        }};
    }

    let value = match primitive {
        Primitive::Bool => Value::Bool(read_flag(buffer, offset)?),
        Primitive::Int8 => Value::Int(i64::from(le!(i8, 1))),
        Primitive::Uint8 => Value::Int(i64::from(le!(u8, 1))),
        Primitive::Int16 => Value::Int(i64::from(le!(i16, 2))),
        Primitive::Uint16 => Value::Int(i64::from(le!(u16, 2))),
        Primitive::Int32 => Value::Int(i64::from(le!(i32, 4))),
        Primitive::Uint32 => Value::Int(i64::from(le!(u32, 4))),
        Primitive::Double => Value::Double(le!(f64, 8)),
        Primitive::String => {
            let len = read_u32(buffer, offset)? as usize;
            let bytes = take(buffer, offset + 4, len)?;
            let text = std::str::from_utf8(bytes)
                .map_err(|e| SchemaError::Corrupt(format!("invalid utf-8 at {}: {}", offset + 4, e)))?;
            return Ok((Value::String(text.to_string()), 4 + len));
        }
        Primitive::Id => {
            let bytes = take(buffer, offset, 16)?;
            let mut raw = [0u8; 16];
            raw.copy_from_slice(bytes);
            Value::Id(Ulid::from_bytes(raw))
        }
    };

    // Every remaining primitive is fixed size
    Ok((value, primitive.fixed_size().unwrap_or(0)))
}

fn take(buffer: &[u8], offset: usize, len: usize) -> Result<&[u8], SchemaError> {
    offset
        .checked_add(len)
        .and_then(|end| buffer.get(offset..end))
        .ok_or(SchemaError::Truncated {
            offset,
            needed: len,
            len: buffer.len(),
        })
}

fn read_u32(buffer: &[u8], offset: usize) -> Result<u32, SchemaError> {
    let bytes = take(buffer, offset, 4)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn read_flag(buffer: &[u8], offset: usize) -> Result<bool, SchemaError> {
    match take(buffer, offset, 1)?[0] {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(SchemaError::Corrupt(format!(
            "invalid flag byte {} at {}",
            other, offset
        ))),
    }
}

/// Element count of a vector, rejecting counts the remaining bytes cannot hold
fn read_vector_len(element: &Format, buffer: &[u8], offset: usize) -> Result<usize, SchemaError> {
    let count = read_u32(buffer, offset)? as usize;
    let remaining = buffer.len().saturating_sub(offset + 4);
    if count.saturating_mul(element.min_size().max(1)) > remaining {
        return Err(SchemaError::Truncated {
            offset: offset + 4,
            needed: count.saturating_mul(element.min_size().max(1)),
            len: buffer.len(),
        });
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::format::{StructFormat, VariantFormat};

    fn shape() -> Format {
        let base = StructFormat::new("Base", [("id", Format::ID), ("name", Format::STRING)]);
        let mut variant = VariantFormat::new("Thing");
        variant
            .insert(
                1,
                "wall",
                Format::structure(StructFormat::extend(&base, "Wall", [("hits", Format::INT32)])),
            )
            .unwrap();
        variant
            .insert(
                2,
                "crate",
                Format::structure(StructFormat::extend(
                    &base,
                    "Crate",
                    [
                        ("items", Format::vector(Format::UINT16)),
                        ("label", Format::optional(Format::STRING)),
                    ],
                )),
            )
            .unwrap();
        Format::vector(Format::variant(variant))
    }

    fn sample() -> Value {
        Value::Vector(vec![
            Value::Variant(
                1,
                Box::new(Value::fields([
                    ("id", Value::Id(Ulid::from(7u128))),
                    ("name", Value::from("north")),
                    ("hits", Value::from(-5)),
                ])),
            ),
            Value::Variant(
                2,
                Box::new(Value::fields([
                    ("id", Value::Id(Ulid::from(8u128))),
                    ("name", Value::from("box")),
                    ("items", Value::from(vec![1u16, 2, 3])),
                    ("label", Value::some("fragile")),
                ])),
            ),
        ])
    }

    #[test]
    fn test_round_trip_with_variants() {
        let format = shape();
        let value = sample();
        let bytes = encode_to_vec(&format, &value).unwrap();

        assert_eq!(decode(&format, &bytes, 0).unwrap(), value);
        assert_eq!(encoded_len(&format, &bytes, 0).unwrap(), bytes.len());
    }

    #[test]
    fn test_encode_at_offset_grows_buffer() {
        let mut buffer = vec![0xAA; 3];
        let written = encode(&Format::INT32, &Value::from(42), &mut buffer, 2).unwrap();
        assert_eq!(written, 4);
        assert_eq!(buffer.len(), 6);
        assert_eq!(buffer[0], 0xAA);
        assert_eq!(decode(&Format::INT32, &buffer, 2).unwrap(), Value::Int(42));
    }

    #[test]
    fn test_truncated_buffer_is_an_error() {
        let format = shape();
        let bytes = encode_to_vec(&format, &sample()).unwrap();
        for cut in [0, 3, 10, bytes.len() - 1] {
            assert!(decode(&format, &bytes[..cut], 0).is_err(), "cut at {}", cut);
        }
    }

    #[test]
    fn test_unknown_discriminant_is_corrupt() {
        let format = shape();
        let mut bytes = encode_to_vec(&format, &sample()).unwrap();
        bytes[4] = 9; // first element's discriminant
        assert!(matches!(
            decode(&format, &bytes, 0),
            Err(SchemaError::UnknownVariant(9))
        ));
    }

    #[test]
    fn test_huge_vector_count_rejected_without_allocating() {
        let bytes = u32::MAX.to_le_bytes();
        let result = decode(&Format::vector(Format::INT32), &bytes, 0);
        assert!(matches!(result, Err(SchemaError::Truncated { .. })));
    }

    #[test]
    fn test_out_of_range_integer() {
        let result = encode_to_vec(&Format::UINT8, &Value::from(256));
        assert!(matches!(result, Err(SchemaError::OutOfRange { .. })));
    }

    #[test]
    fn test_missing_struct_field() {
        let format = Format::structure(StructFormat::new("P", [("x", Format::INT32)]));
        let result = encode_to_vec(&format, &Value::fields(Vec::<(String, Value)>::new()));
        assert!(matches!(result, Err(SchemaError::MissingField(_))));
    }
}
