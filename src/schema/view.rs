// src/schema/view.rs
//! Lazy views over encoded bytes
//!
//! A `View` reads fields straight out of a shared `Bytes` buffer without
//! decoding the whole value. `ViewMut` writes back into an owned buffer,
//! splicing the affected region when a value changes size.

use crate::schema::codec::{self, encoded_len};
use crate::schema::format::{Format, Primitive};
use crate::schema::value::Value;
use crate::schema::SchemaError;
use bytes::Bytes;

/// Offset of `name` inside the struct at `offset`, descending through a
/// leading variant discriminant
fn locate_field(format: &Format, buffer: &[u8], offset: usize, name: &str) -> Result<(usize, Format), SchemaError> {
    match format {
        Format::Struct(structure) => {
            let mut cursor = offset;
            for field in &structure.fields {
                if field.name == name {
                    return Ok((cursor, field.format.clone()));
                }
                cursor += encoded_len(&field.format, buffer, cursor)?;
            }
            Err(SchemaError::NoSuchField {
                format: structure.name.clone(),
                field: name.to_string(),
            })
        }
        Format::Variant(variant) => {
            let tag = *buffer.get(offset).ok_or(SchemaError::Truncated {
                offset,
                needed: 1,
                len: buffer.len(),
            })?;
            let alternative = variant
                .alternative(tag)
                .ok_or(SchemaError::UnknownVariant(tag))?;
            locate_field(&alternative.format, buffer, offset + 1, name)
        }
        other => Err(SchemaError::TypeMismatch {
            expected: "struct",
            found: format_kind(other),
        }),
    }
}

fn locate_index(format: &Format, buffer: &[u8], offset: usize, index: usize) -> Result<(usize, Format), SchemaError> {
    let element = match format {
        Format::Vector(element) => element,
        other => {
            return Err(SchemaError::TypeMismatch {
                expected: "vector",
                found: format_kind(other),
            })
        }
    };

    let count = vector_len(buffer, offset)?;
    if index >= count {
        return Err(SchemaError::OutOfRange {
            value: index as i64,
            target: "vector index",
        });
    }

    let mut cursor = offset + 4;
    match element.fixed_size() {
        Some(size) => cursor += size * index,
        None => {
            for _ in 0..index {
                cursor += encoded_len(element, buffer, cursor)?;
            }
        }
    }
    Ok((cursor, (**element).clone()))
}

fn vector_len(buffer: &[u8], offset: usize) -> Result<usize, SchemaError> {
    buffer
        .get(offset..offset + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as usize)
        .ok_or(SchemaError::Truncated {
            offset,
            needed: 4,
            len: buffer.len(),
        })
}

fn format_kind(format: &Format) -> &'static str {
    match format {
        Format::Primitive(Primitive::String) => "string",
        Format::Primitive(_) => "primitive",
        Format::Struct(_) => "struct",
        Format::Vector(_) => "vector",
        Format::Optional(_) => "optional",
        Format::Variant(_) => "variant",
    }
}

/// Read-only window onto an encoded value
#[derive(Debug, Clone)]
pub struct View {
    bytes: Bytes,
    offset: usize,
    format: Format,
}

impl View {
    pub fn new(bytes: Bytes, offset: usize, format: Format) -> Self {
        Self { bytes, offset, format }
    }

    /// View over a buffer whose root value starts at byte zero
    pub fn root(bytes: Bytes, format: Format) -> Self {
        Self::new(bytes, 0, format)
    }

    pub fn format(&self) -> &Format {
        &self.format
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Bytes spanned by this value
    pub fn byte_len(&self) -> Result<usize, SchemaError> {
        encoded_len(&self.format, &self.bytes, self.offset)
    }

    /// Materialize the whole value
    pub fn decode(&self) -> Result<Value, SchemaError> {
        codec::decode(&self.format, &self.bytes, self.offset)
    }

    /// Sub-view of a struct member
    pub fn field(&self, name: &str) -> Result<View, SchemaError> {
        let (offset, format) = locate_field(&self.format, &self.bytes, self.offset, name)?;
        Ok(View::new(self.bytes.clone(), offset, format))
    }

    /// Decode a single struct member
    pub fn get(&self, name: &str) -> Result<Value, SchemaError> {
        self.field(name)?.decode()
    }

    pub fn len(&self) -> Result<usize, SchemaError> {
        match &self.format {
            Format::Vector(_) => vector_len(&self.bytes, self.offset),
            other => Err(SchemaError::TypeMismatch {
                expected: "vector",
                found: format_kind(other),
            }),
        }
    }

    pub fn is_empty(&self) -> Result<bool, SchemaError> {
        Ok(self.len()? == 0)
    }

    pub fn index(&self, index: usize) -> Result<View, SchemaError> {
        let (offset, format) = locate_index(&self.format, &self.bytes, self.offset, index)?;
        Ok(View::new(self.bytes.clone(), offset, format))
    }

    /// Views of every vector element in order
    pub fn elements(&self) -> Result<Vec<View>, SchemaError> {
        let element = match &self.format {
            Format::Vector(element) => (**element).clone(),
            other => {
                return Err(SchemaError::TypeMismatch {
                    expected: "vector",
                    found: format_kind(other),
                })
            }
        };

        let count = vector_len(&self.bytes, self.offset)?;
        let mut views = Vec::with_capacity(count.min(self.bytes.len()));
        let mut cursor = self.offset + 4;
        for _ in 0..count {
            let len = encoded_len(&element, &self.bytes, cursor)?;
            views.push(View::new(self.bytes.clone(), cursor, element.clone()));
            cursor += len;
        }
        Ok(views)
    }

    /// Discriminant of a variant value
    pub fn variant_tag(&self) -> Result<u8, SchemaError> {
        match &self.format {
            Format::Variant(variant) => {
                let tag = *self.bytes.get(self.offset).ok_or(SchemaError::Truncated {
                    offset: self.offset,
                    needed: 1,
                    len: self.bytes.len(),
                })?;
                variant
                    .alternative(tag)
                    .map(|_| tag)
                    .ok_or(SchemaError::UnknownVariant(tag))
            }
            other => Err(SchemaError::TypeMismatch {
                expected: "variant",
                found: format_kind(other),
            }),
        }
    }

    pub fn variant_name(&self) -> Result<String, SchemaError> {
        let tag = self.variant_tag()?;
        match &self.format {
            Format::Variant(variant) => variant
                .alternative(tag)
                .map(|alt| alt.name.clone())
                .ok_or(SchemaError::UnknownVariant(tag)),
            _ => Err(SchemaError::UnknownVariant(tag)),
        }
    }

    /// The selected alternative's payload
    pub fn payload(&self) -> Result<View, SchemaError> {
        let tag = self.variant_tag()?;
        match &self.format {
            Format::Variant(variant) => {
                let alternative = variant
                    .alternative(tag)
                    .ok_or(SchemaError::UnknownVariant(tag))?;
                Ok(View::new(
                    self.bytes.clone(),
                    self.offset + 1,
                    alternative.format.clone(),
                ))
            }
            _ => Err(SchemaError::UnknownVariant(tag)),
        }
    }

    /// Inner view of a present optional, `None` when absent
    pub fn optional(&self) -> Result<Option<View>, SchemaError> {
        match &self.format {
            Format::Optional(inner) => match self.bytes.get(self.offset) {
                Some(0) => Ok(None),
                Some(1) => Ok(Some(View::new(
                    self.bytes.clone(),
                    self.offset + 1,
                    (**inner).clone(),
                ))),
                Some(other) => Err(SchemaError::Corrupt(format!(
                    "invalid flag byte {} at {}",
                    other, self.offset
                ))),
                None => Err(SchemaError::Truncated {
                    offset: self.offset,
                    needed: 1,
                    len: self.bytes.len(),
                }),
            },
            other => Err(SchemaError::TypeMismatch {
                expected: "optional",
                found: format_kind(other),
            }),
        }
    }
}

/// Writable window onto an owned buffer
#[derive(Debug)]
pub struct ViewMut<'a> {
    buffer: &'a mut Vec<u8>,
    offset: usize,
    format: Format,
}

impl<'a> ViewMut<'a> {
    pub fn new(buffer: &'a mut Vec<u8>, offset: usize, format: Format) -> Self {
        Self { buffer, offset, format }
    }

    pub fn field_mut(self, name: &str) -> Result<ViewMut<'a>, SchemaError> {
        let (offset, format) = locate_field(&self.format, self.buffer, self.offset, name)?;
        Ok(ViewMut::new(self.buffer, offset, format))
    }

    pub fn index_mut(self, index: usize) -> Result<ViewMut<'a>, SchemaError> {
        let (offset, format) = locate_index(&self.format, self.buffer, self.offset, index)?;
        Ok(ViewMut::new(self.buffer, offset, format))
    }

    pub fn get(&self) -> Result<Value, SchemaError> {
        codec::decode(&self.format, self.buffer, self.offset)
    }

    /// Replace the value in place. Returns the new encoded length; the bytes
    /// after this value shift when the length changes.
    pub fn set(&mut self, value: &Value) -> Result<usize, SchemaError> {
        let encoded = codec::encode_to_vec(&self.format, value)?;
        let old_len = encoded_len(&self.format, self.buffer, self.offset)?;
        let end = self.offset + old_len;
        self.buffer.splice(self.offset..end, encoded.iter().copied());
        Ok(encoded.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::format::{StructFormat, VariantFormat};

    fn creep_format() -> Format {
        Format::structure(StructFormat::new(
            "Creep",
            [
                ("name", Format::STRING),
                ("hits", Format::INT32),
                ("body", Format::vector(Format::UINT8)),
                ("owner", Format::optional(Format::STRING)),
            ],
        ))
    }

    fn creep_value() -> Value {
        Value::fields([
            ("name", Value::from("worker")),
            ("hits", Value::from(100)),
            ("body", Value::from(vec![1u8, 2, 3])),
            ("owner", Value::some("alice")),
        ])
    }

    #[test]
    fn test_field_reads_without_full_decode() {
        let format = creep_format();
        let bytes = Bytes::from(codec::encode_to_vec(&format, &creep_value()).unwrap());
        let view = View::root(bytes, format);

        assert_eq!(view.get("name").unwrap().as_str().unwrap(), "worker");
        assert_eq!(view.get("hits").unwrap().as_i32().unwrap(), 100);

        let body = view.field("body").unwrap();
        assert_eq!(body.len().unwrap(), 3);
        assert_eq!(body.index(2).unwrap().decode().unwrap(), Value::Int(3));
        assert!(body.index(3).is_err());

        let owner = view.field("owner").unwrap().optional().unwrap().unwrap();
        assert_eq!(owner.decode().unwrap().as_str().unwrap(), "alice");
    }

    #[test]
    fn test_variant_payload() {
        let mut variant = VariantFormat::new("Kind");
        variant.insert(4, "creep", creep_format()).unwrap();
        let format = Format::variant(variant);
        let value = Value::Variant(4, Box::new(creep_value()));
        let bytes = Bytes::from(codec::encode_to_vec(&format, &value).unwrap());

        let view = View::root(bytes, format);
        assert_eq!(view.variant_tag().unwrap(), 4);
        assert_eq!(view.variant_name().unwrap(), "creep");
        // field() descends through the discriminant
        assert_eq!(view.get("hits").unwrap(), Value::Int(100));
        assert_eq!(view.payload().unwrap().get("hits").unwrap(), Value::Int(100));
    }

    #[test]
    fn test_set_resizes_and_keeps_neighbours() {
        let format = creep_format();
        let mut buffer = codec::encode_to_vec(&format, &creep_value()).unwrap();

        let mut name = ViewMut::new(&mut buffer, 0, format.clone()).field_mut("name").unwrap();
        name.set(&Value::from("a much longer name")).unwrap();

        let decoded = codec::decode(&format, &buffer, 0).unwrap();
        assert_eq!(decoded.field("name").unwrap().as_str().unwrap(), "a much longer name");
        assert_eq!(decoded.field("hits").unwrap().as_i32().unwrap(), 100);
        assert_eq!(
            decoded.field("owner").unwrap().as_option().unwrap().unwrap().as_str().unwrap(),
            "alice"
        );

        let mut hits = ViewMut::new(&mut buffer, 0, format.clone()).field_mut("hits").unwrap();
        hits.set(&Value::from(42)).unwrap();
        assert_eq!(hits.get().unwrap(), Value::Int(42));
    }

    #[test]
    fn test_set_element_in_vector() {
        let format = creep_format();
        let mut buffer = codec::encode_to_vec(&format, &creep_value()).unwrap();
        let mut element = ViewMut::new(&mut buffer, 0, format.clone())
            .field_mut("body")
            .unwrap()
            .index_mut(1)
            .unwrap();
        element.set(&Value::from(9u8)).unwrap();

        let view = View::root(Bytes::from(buffer), format);
        let body: Vec<_> = view
            .field("body")
            .unwrap()
            .elements()
            .unwrap()
            .iter()
            .map(|v| v.decode().unwrap())
            .collect();
        assert_eq!(body, vec![Value::Int(1), Value::Int(9), Value::Int(3)]);
    }

    #[test]
    fn test_missing_field() {
        let format = creep_format();
        let bytes = Bytes::from(codec::encode_to_vec(&format, &creep_value()).unwrap());
        let view = View::root(bytes, format);
        assert!(matches!(view.field("age"), Err(SchemaError::NoSuchField { .. })));
    }
}
