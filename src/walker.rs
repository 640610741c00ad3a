// Copyright 2023 Gregory Szorc.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Callback-driven value traversal.
//!
//! [crate::value::read_value] materialises a full [crate::value::Value]
//! tree. Consumers that only want to observe parts of a value — or nothing
//! at all — can instead implement [ValueVisitor] and drive it with [walk],
//! which decodes leaves on the fly and allocates nothing itself.
//!
//! Children are emitted in class field order. Arrays bracket their elements
//! with `on_array_start`/`on_array_end`; complex values bracket their
//! fields with `on_complex_start`/`on_complex_end`. Simple single-field
//! wrappers are unwrapped and emit no brackets.

use crate::{
    common::{leb128_i16, leb128_i32, leb128_i64},
    error::{Error, Result},
    metadata::{FieldElement, Metadata},
    string_table::{read_string, StringValue},
    value::{parse_boolean, parse_char, PrimitiveKind, MAX_NESTING},
};
use nom::number::streaming::{be_f32, be_f64, be_i8};

/// Receives the leaves and structure of one traversed value.
pub trait ValueVisitor {
    fn on_boolean(&mut self, _v: bool) {}
    fn on_byte(&mut self, _v: i8) {}
    fn on_short(&mut self, _v: i16) {}
    fn on_int(&mut self, _v: i32) {}
    fn on_long(&mut self, _v: i64) {}
    fn on_char(&mut self, _v: char) {}
    fn on_float(&mut self, _v: f32) {}
    fn on_double(&mut self, _v: f64) {}
    fn on_string(&mut self, _v: &StringValue<'_>) {}
    fn on_constant_pool_index(&mut self, _class_id: i64, _index: i64) {}
    fn on_array_start(&mut self, _len: usize) {}
    fn on_array_end(&mut self) {}
    fn on_complex_start(&mut self, _class_id: i64) {}
    fn on_complex_end(&mut self) {}
}

/// A visitor that observes nothing.
pub struct SkipVisitor;

impl ValueVisitor for SkipVisitor {}

/// Traverse one encoded value of `class_id`, emitting visitor callbacks.
///
/// Returns the input remaining after the value.
pub fn walk<'a, V: ValueVisitor + ?Sized>(
    s: &'a [u8],
    class_id: i64,
    metadata: &Metadata<'a>,
    visitor: &mut V,
) -> Result<&'a [u8]> {
    walk_at_depth(s, class_id, metadata, visitor, 0)
}

fn walk_at_depth<'a, V: ValueVisitor + ?Sized>(
    mut s: &'a [u8],
    class_id: i64,
    metadata: &Metadata<'a>,
    visitor: &mut V,
    depth: usize,
) -> Result<&'a [u8]> {
    if depth > MAX_NESTING {
        return Err(Error::TypeGraphTooDeep(class_id));
    }

    if let Some(kind) = metadata.primitive_kind(class_id) {
        return walk_primitive(s, kind, visitor);
    }

    let class = metadata
        .class_by_id(class_id)
        .ok_or(Error::ClassNotFound(class_id))?;

    if class.is_simple_wrapper() {
        return walk_field(s, &class.fields[0], metadata, visitor, depth + 1);
    }

    visitor.on_complex_start(class_id);

    for field in class.fields.iter() {
        s = walk_field(s, field, metadata, visitor, depth + 1)?;
    }

    visitor.on_complex_end();

    Ok(s)
}

fn walk_field<'a, V: ValueVisitor + ?Sized>(
    s: &'a [u8],
    field: &FieldElement<'a>,
    metadata: &Metadata<'a>,
    visitor: &mut V,
    depth: usize,
) -> Result<&'a [u8]> {
    if field.is_array_type() {
        let (mut s, len) = leb128_i32(s).map_err(Error::from)?;

        visitor.on_array_start(len as usize);

        for _ in 0..len {
            s = walk_element(s, field, metadata, visitor, depth)?;
        }

        visitor.on_array_end();

        Ok(s)
    } else {
        walk_element(s, field, metadata, visitor, depth)
    }
}

fn walk_element<'a, V: ValueVisitor + ?Sized>(
    s: &'a [u8],
    field: &FieldElement<'a>,
    metadata: &Metadata<'a>,
    visitor: &mut V,
    depth: usize,
) -> Result<&'a [u8]> {
    if field.constant_pool {
        let (s, index) = leb128_i64(s).map_err(Error::from)?;

        visitor.on_constant_pool_index(field.type_id, index);

        Ok(s)
    } else {
        walk_at_depth(s, field.type_id, metadata, visitor, depth)
    }
}

fn walk_primitive<'a, V: ValueVisitor + ?Sized>(
    s: &'a [u8],
    kind: PrimitiveKind,
    visitor: &mut V,
) -> Result<&'a [u8]> {
    let s = match kind {
        PrimitiveKind::Boolean => {
            let (s, v) = parse_boolean(s)?;
            visitor.on_boolean(v);
            s
        }
        PrimitiveKind::Byte => {
            let (s, v) = be_i8(s)?;
            visitor.on_byte(v);
            s
        }
        PrimitiveKind::Short => {
            let (s, v) = leb128_i16(s)?;
            visitor.on_short(v);
            s
        }
        PrimitiveKind::Int => {
            let (s, v) = leb128_i32(s)?;
            visitor.on_int(v);
            s
        }
        PrimitiveKind::Long => {
            let (s, v) = leb128_i64(s)?;
            visitor.on_long(v);
            s
        }
        PrimitiveKind::Char => {
            let (s, v) = parse_char(s)?;
            visitor.on_char(v);
            s
        }
        PrimitiveKind::Float => {
            let (s, v) = be_f32(s)?;
            visitor.on_float(v);
            s
        }
        PrimitiveKind::Double => {
            let (s, v) = be_f64(s)?;
            visitor.on_double(v);
            s
        }
        PrimitiveKind::String => {
            let (s, v) = read_string(s)?;
            visitor.on_string(&v);
            s
        }
    };

    Ok(s)
}
