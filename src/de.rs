// Copyright 2023 Gregory Szorc.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Serde support for decoded values.
//!
//! A [crate::value::Value] tree plus its chunk's [Metadata] and
//! [ConstantPools] contains everything needed to populate a user struct:
//! field names come from the class definitions, and constant pool
//! references resolve transparently through the pools. [from_value] drives
//! any `#[derive(Deserialize)]` type from an event's decoded value.
//!
//! All visits are transient (no borrowed-from-input strings survive the
//! call), so target types must own their data — the usual case for event
//! structs with `String` fields.

use crate::{
    constant_pool::ConstantPools,
    error::{Error, Result},
    metadata::Metadata,
    value::{Object, Primitive, Value},
};
use serde::de::{DeserializeOwned, DeserializeSeed, IntoDeserializer, Visitor};
use serde::forward_to_deserialize_any;
use std::fmt::Display;

impl serde::de::Error for Error {
    fn custom<T>(msg: T) -> Self
    where
        T: Display,
    {
        Error::Deserialize(msg.to_string())
    }
}

/// Deserialize a decoded event value into a typed struct.
pub fn from_value<'a, T: DeserializeOwned>(
    value: &Value<'a>,
    metadata: &Metadata<'a>,
    pools: &ConstantPools<'a>,
) -> Result<T> {
    T::deserialize(ValueDeserializer {
        value: Handle::Borrowed(value),
        metadata,
        pools,
    })
}

/// A value either borrowed from the caller or cloned out of a pool.
enum Handle<'a, 'chunk> {
    Borrowed(&'a Value<'chunk>),
    Owned(Value<'chunk>),
}

impl<'a, 'chunk> Handle<'a, 'chunk> {
    fn value(&self) -> &Value<'chunk> {
        match self {
            Self::Borrowed(v) => v,
            Self::Owned(v) => v,
        }
    }
}

struct ValueDeserializer<'a, 'chunk> {
    value: Handle<'a, 'chunk>,
    metadata: &'a Metadata<'chunk>,
    pools: &'a ConstantPools<'chunk>,
}

impl<'a, 'chunk> ValueDeserializer<'a, 'chunk> {
    /// Chase a constant pool reference, cloning the cached value.
    fn resolve_constant(&self, class_id: i64, index: i64) -> Result<Value<'chunk>> {
        self.pools
            .lookup(class_id, index, self.metadata)
            .map(|rc| rc.as_ref().clone())
            .ok_or_else(|| {
                Error::Deserialize(format!(
                    "constant not found in pool: class_id={class_id}, index={index}"
                ))
            })
    }

    fn resolve_string_constant(&self, index: i64) -> Result<Value<'chunk>> {
        let class_id = self
            .metadata
            .class_id("java.lang.String")
            .ok_or_else(|| Error::Deserialize("chunk declares no string class".to_string()))?;

        self.resolve_constant(class_id, index)
    }
}

struct ObjectAccess<'a, 'chunk> {
    object: Object<'chunk>,
    field_idx: usize,
    metadata: &'a Metadata<'chunk>,
    pools: &'a ConstantPools<'chunk>,
}

impl<'de, 'a, 'chunk> serde::de::MapAccess<'de> for ObjectAccess<'a, 'chunk> {
    type Error = Error;

    fn next_key_seed<K>(&mut self, seed: K) -> Result<Option<K::Value>>
    where
        K: DeserializeSeed<'de>,
    {
        if self.field_idx >= self.object.fields.len() {
            return Ok(None);
        }

        let class = self
            .metadata
            .class_by_id(self.object.class_id)
            .ok_or(Error::ClassNotFound(self.object.class_id))?;

        let name = class
            .fields
            .get(self.field_idx)
            .map(|f| f.name.to_string())
            .ok_or_else(|| {
                Error::Deserialize(format!(
                    "class {} declares fewer fields than its value holds",
                    class.name
                ))
            })?;

        seed.deserialize(name.into_deserializer()).map(Some)
    }

    fn next_value_seed<V>(&mut self, seed: V) -> Result<V::Value>
    where
        V: DeserializeSeed<'de>,
    {
        let value = self.object.fields[self.field_idx].clone();
        self.field_idx += 1;

        seed.deserialize(ValueDeserializer {
            value: Handle::Owned(value),
            metadata: self.metadata,
            pools: self.pools,
        })
    }
}

struct ArrayAccess<'a, 'chunk> {
    elements: std::vec::IntoIter<Value<'chunk>>,
    metadata: &'a Metadata<'chunk>,
    pools: &'a ConstantPools<'chunk>,
}

impl<'de, 'a, 'chunk> serde::de::SeqAccess<'de> for ArrayAccess<'a, 'chunk> {
    type Error = Error;

    fn next_element_seed<T>(&mut self, seed: T) -> Result<Option<T::Value>>
    where
        T: DeserializeSeed<'de>,
    {
        match self.elements.next() {
            None => Ok(None),
            Some(value) => seed
                .deserialize(ValueDeserializer {
                    value: Handle::Owned(value),
                    metadata: self.metadata,
                    pools: self.pools,
                })
                .map(Some),
        }
    }
}

impl<'de, 'a, 'chunk> serde::Deserializer<'de> for ValueDeserializer<'a, 'chunk> {
    type Error = Error;

    fn deserialize_any<V>(self, visitor: V) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        match self.value.value() {
            Value::Primitive(p) => match p {
                Primitive::Boolean(v) => visitor.visit_bool(*v),
                Primitive::Byte(v) => visitor.visit_i8(*v),
                Primitive::Short(v) => visitor.visit_i16(*v),
                Primitive::Integer(v) => visitor.visit_i32(*v),
                Primitive::Long(v) => visitor.visit_i64(*v),
                Primitive::Float(v) => visitor.visit_f32(*v),
                Primitive::Double(v) => visitor.visit_f64(*v),
                Primitive::Character(v) => visitor.visit_char(*v),
                Primitive::String(v) => visitor.visit_str(v.as_ref()),
                Primitive::NullString => {
                    Err(Error::Deserialize("unexpected null string".to_string()))
                }
                Primitive::StringConstantPool(index) => {
                    let resolved = self.resolve_string_constant(*index)?;

                    ValueDeserializer {
                        value: Handle::Owned(resolved),
                        metadata: self.metadata,
                        pools: self.pools,
                    }
                    .deserialize_any(visitor)
                }
            },
            Value::Object(object) => visitor.visit_map(ObjectAccess {
                object: object.clone(),
                field_idx: 0,
                metadata: self.metadata,
                pools: self.pools,
            }),
            Value::Array(elements) => visitor.visit_seq(ArrayAccess {
                elements: elements.clone().into_iter(),
                metadata: self.metadata,
                pools: self.pools,
            }),
            Value::ConstantPool { class_id, index } => {
                let resolved = self.resolve_constant(*class_id, *index)?;

                ValueDeserializer {
                    value: Handle::Owned(resolved),
                    metadata: self.metadata,
                    pools: self.pools,
                }
                .deserialize_any(visitor)
            }
        }
    }

    fn deserialize_option<V>(self, visitor: V) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        match self.value.value() {
            Value::Primitive(Primitive::NullString) => visitor.visit_none(),
            Value::Primitive(Primitive::StringConstantPool(index)) => {
                match self.resolve_string_constant(*index) {
                    Ok(resolved) => visitor.visit_some(ValueDeserializer {
                        value: Handle::Owned(resolved),
                        metadata: self.metadata,
                        pools: self.pools,
                    }),
                    Err(_) => visitor.visit_none(),
                }
            }
            Value::ConstantPool { class_id, index } => {
                match self.resolve_constant(*class_id, *index) {
                    Ok(resolved) => visitor.visit_some(ValueDeserializer {
                        value: Handle::Owned(resolved),
                        metadata: self.metadata,
                        pools: self.pools,
                    }),
                    Err(_) => visitor.visit_none(),
                }
            }
            _ => visitor.visit_some(self),
        }
    }

    forward_to_deserialize_any! {
        bool i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 f32 f64 char str string
        bytes byte_buf unit unit_struct newtype_struct seq tuple
        tuple_struct map enum identifier ignored_any struct
    }
}
