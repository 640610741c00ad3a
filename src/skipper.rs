// Copyright 2023 Gregory Szorc.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Compiled skip programs.
//!
//! Constant pool entries do not encode their own size, so walking past a
//! value requires knowledge of its type. Decoding every value just to
//! discard it is wasteful. Instead, each class compiles once into a flat
//! instruction sequence — a [TypeSkipper] — that advances the stream past
//! one encoded value without materialising anything.
//!
//! The instruction set is fixed and small. Complex fields are inlined into
//! their parent's program at compile time; simple single-field wrappers are
//! unwrapped; array instructions carry the length of their element body so
//! the interpreter can loop it per the element count read from the stream.

use {
    crate::{
        common::leb128_u64,
        error::{Error, ParseResult, Result},
        metadata::{FieldElement, Metadata},
        string_table::skip_string,
        value::{PrimitiveKind, MAX_NESTING},
    },
    nom::bytes::streaming::take,
};

/// One instruction of a skip program.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SkipOp {
    /// Read an element count varint, then loop the following `n` ops once
    /// per element.
    Array(usize),
    /// A single raw byte (boolean or byte).
    Byte,
    /// Four raw bytes.
    Float,
    /// Eight raw bytes.
    Double,
    /// An encoded string, any encoding.
    String,
    /// A varint (short, int, long, char).
    Varint,
    /// A varint constant pool index.
    CpEntry,
}

/// A compiled program that skips one encoded value of a class.
#[derive(Clone, Debug)]
pub struct TypeSkipper {
    class_id: i64,
    ops: Vec<SkipOp>,
}

impl TypeSkipper {
    /// Compile the skip program for a class.
    pub fn build(class_id: i64, metadata: &Metadata<'_>) -> Result<Self> {
        let mut ops = Vec::new();
        push_class_ops(class_id, metadata, &mut ops, 0)?;

        Ok(Self { class_id, ops })
    }

    /// The class this program skips values of.
    pub fn class_id(&self) -> i64 {
        self.class_id
    }

    /// The compiled instructions.
    pub fn ops(&self) -> &[SkipOp] {
        &self.ops
    }

    /// Advance past exactly one encoded value of this program's class.
    pub fn skip<'a>(&self, s: &'a [u8]) -> ParseResult<'a, ()> {
        exec(&self.ops, s)
    }
}

fn exec<'a>(ops: &[SkipOp], mut s: &'a [u8]) -> ParseResult<'a, ()> {
    let mut i = 0;

    while i < ops.len() {
        match ops[i] {
            SkipOp::Byte => {
                (s, _) = take(1usize)(s)?;
            }
            SkipOp::Float => {
                (s, _) = take(4usize)(s)?;
            }
            SkipOp::Double => {
                (s, _) = take(8usize)(s)?;
            }
            SkipOp::Varint | SkipOp::CpEntry => {
                (s, _) = leb128_u64(s)?;
            }
            SkipOp::String => {
                (s, _) = skip_string(s)?;
            }
            SkipOp::Array(n) => {
                let (remaining, count) = leb128_u64(s)?;
                s = remaining;

                let body = &ops[i + 1..i + 1 + n];
                for _ in 0..count {
                    (s, _) = exec(body, s)?;
                }

                i += n;
            }
        }

        i += 1;
    }

    Ok((s, ()))
}

fn push_class_ops(
    class_id: i64,
    metadata: &Metadata<'_>,
    ops: &mut Vec<SkipOp>,
    depth: usize,
) -> Result<()> {
    if depth > MAX_NESTING {
        return Err(Error::TypeGraphTooDeep(class_id));
    }

    // This also covers java.lang.String declared with zero fields: the
    // string payload is inline or a pool reference, either way one STRING.
    if let Some(kind) = metadata.primitive_kind(class_id) {
        ops.push(match kind {
            PrimitiveKind::Boolean | PrimitiveKind::Byte => SkipOp::Byte,
            PrimitiveKind::Short
            | PrimitiveKind::Int
            | PrimitiveKind::Long
            | PrimitiveKind::Char => SkipOp::Varint,
            PrimitiveKind::Float => SkipOp::Float,
            PrimitiveKind::Double => SkipOp::Double,
            PrimitiveKind::String => SkipOp::String,
        });

        return Ok(());
    }

    let class = metadata
        .class_by_id(class_id)
        .ok_or(Error::ClassNotFound(class_id))?;

    for field in class.fields.iter() {
        push_field_ops(field, metadata, ops, depth)?;
    }

    Ok(())
}

fn push_field_ops(
    field: &FieldElement<'_>,
    metadata: &Metadata<'_>,
    ops: &mut Vec<SkipOp>,
    depth: usize,
) -> Result<()> {
    if field.is_array_type() {
        let header = ops.len();
        ops.push(SkipOp::Array(0));

        push_element_ops(field, metadata, ops, depth)?;

        ops[header] = SkipOp::Array(ops.len() - header - 1);

        Ok(())
    } else {
        push_element_ops(field, metadata, ops, depth)
    }
}

fn push_element_ops(
    field: &FieldElement<'_>,
    metadata: &Metadata<'_>,
    ops: &mut Vec<SkipOp>,
    depth: usize,
) -> Result<()> {
    if field.constant_pool {
        ops.push(SkipOp::CpEntry);

        Ok(())
    } else {
        push_class_ops(field.type_id, metadata, ops, depth + 1)
    }
}
