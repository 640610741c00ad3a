// Copyright 2023 Gregory Szorc.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! String decoding.
//!
//! Everywhere JFR stores text — metadata string table entries, event
//! fields, constant pool values — it uses the same shape: a one byte
//! [Encoding] tag, then a payload whose layout the tag selects. Three of
//! the six encodings carry inline character data, one points into the
//! `java.lang.String` constant pool, and two (null, empty) have no payload
//! at all.
//!
//! [read_string] decodes one such value into a [StringValue] in a single
//! pass, borrowing from the input wherever the encoding permits (UTF-8
//! payloads are handed out as `&str` without copying). [skip_string]
//! advances past a value while decoding nothing.
//!
//! The metadata event opens with a table of these values. The table is
//! hot — every element and attribute in the type dictionary is a table
//! index — but most entries are never looked at, so [LazyStringTable]
//! only scans entry boundaries up front and keeps each entry as a raw
//! byte range until its first lookup.

use {
    crate::{
        common::{leb128_i32, leb128_i64, leb128_u64},
        error::{Error, NomParseError, ParseResult, Result, StringResolveError},
    },
    nom::{bytes::streaming::take, number::streaming::be_u8},
    num_enum::TryFromPrimitive,
    std::borrow::Cow,
};

/// The wire tag selecting how a string's payload is laid out.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, TryFromPrimitive)]
#[repr(u8)]
pub enum Encoding {
    /// No payload; the value is the null string.
    Null = 0,
    /// No payload; the value is `""`.
    Empty = 1,
    /// A varint index into the string constant pool.
    PoolRef = 2,
    /// A varint byte length followed by UTF-8 data.
    Utf8 = 3,
    /// A varint count followed by that many varint UTF-16 code units.
    CharArray = 4,
    /// A varint byte length followed by Latin-1 data.
    Latin1 = 5,
}

impl Encoding {
    /// Read and validate the tag byte. Tags outside 0..=5 are fatal.
    pub fn parse(s: &[u8]) -> ParseResult<Self> {
        let (s, tag) = be_u8(s)?;

        match Self::try_from(tag) {
            Ok(encoding) => Ok((s, encoding)),
            Err(_) => Err(string_failure(
                s,
                StringResolveError::UnknownStringEncoding(tag),
            )),
        }
    }
}

/// One decoded string.
#[derive(Clone, Debug)]
pub enum StringValue<'a> {
    /// The writer emitted the null string.
    Null,
    /// The text lives in the `java.lang.String` constant pool at this index.
    Pooled(i64),
    /// Inline text, borrowed from the chunk when the encoding allows.
    Text(Cow<'a, str>),
}

impl<'a> StringValue<'a> {
    /// The inline text, if this value carries any.
    pub fn as_str(&self) -> Option<&str> {
        if let Self::Text(v) = self {
            Some(v.as_ref())
        } else {
            None
        }
    }

    /// Clone out the inline text. Cheap for borrowed payloads.
    pub fn to_cow(&self) -> Option<Cow<'a, str>> {
        if let Self::Text(v) = self {
            Some(v.clone())
        } else {
            None
        }
    }
}

fn string_failure(input: &[u8], error: StringResolveError) -> nom::Err<NomParseError> {
    nom::Err::Failure(NomParseError::new_string_resolve(input, error))
}

/// A varint length followed by that many raw bytes.
fn length_prefixed(s: &[u8]) -> ParseResult<&[u8]> {
    let (s, len) = leb128_i32(s)?;

    take(len.max(0) as usize)(s)
}

/// Decode one encoded string.
pub fn read_string(s: &[u8]) -> ParseResult<StringValue<'_>> {
    let (s, encoding) = Encoding::parse(s)?;

    match encoding {
        Encoding::Null => Ok((s, StringValue::Null)),
        Encoding::Empty => Ok((s, StringValue::Text(Cow::Borrowed("")))),
        Encoding::PoolRef => {
            let (s, index) = leb128_i64(s)?;

            Ok((s, StringValue::Pooled(index)))
        }
        Encoding::Utf8 => {
            let (s, raw) = length_prefixed(s)?;

            let text =
                std::str::from_utf8(raw).map_err(|e| string_failure(raw, e.into()))?;

            Ok((s, StringValue::Text(Cow::Borrowed(text))))
        }
        Encoding::CharArray => {
            let (mut s, unit_count) = leb128_i32(s)?;

            let mut units = Vec::with_capacity(unit_count.max(0) as usize);
            for _ in 0..unit_count {
                let unit;
                (s, unit) = leb128_i32(s)?;
                units.push(unit as u16);
            }

            let text =
                String::from_utf16(&units).map_err(|e| string_failure(s, e.into()))?;

            Ok((s, StringValue::Text(Cow::Owned(text))))
        }
        Encoding::Latin1 => {
            // Each byte maps to the code point of the same value.
            let (s, raw) = length_prefixed(s)?;
            let text = raw.iter().map(|b| char::from(*b)).collect::<String>();

            Ok((s, StringValue::Text(Cow::Owned(text))))
        }
    }
}

/// Advance past one encoded string without decoding its payload.
pub fn skip_string(s: &[u8]) -> ParseResult<()> {
    let (s, encoding) = Encoding::parse(s)?;

    let s = match encoding {
        Encoding::Null | Encoding::Empty => s,
        Encoding::PoolRef => leb128_i64(s)?.0,
        Encoding::Utf8 | Encoding::Latin1 => length_prefixed(s)?.0,
        Encoding::CharArray => {
            let (mut s, unit_count) = leb128_i32(s)?;
            for _ in 0..unit_count {
                (s, _) = leb128_u64(s)?;
            }
            s
        }
    };

    Ok((s, ()))
}

/// A table slot: either the entry's untouched bytes or its decode result.
enum TableSlot<'a> {
    Pending(&'a [u8]),
    Ready(Result<StringValue<'a>>),
}

/// The metadata event's string table.
///
/// Construction only locates entry boundaries; nothing is decoded until a
/// slot is first read through [Self::get], and each slot decodes at most
/// once. The set of entries never changes after construction.
pub struct LazyStringTable<'a> {
    slots: Vec<TableSlot<'a>>,
}

impl<'a> LazyStringTable<'a> {
    /// Scan `count` consecutive encoded strings, recording where each one
    /// starts and ends. Returns the input following the table.
    pub fn parse(s: &'a [u8], count: usize) -> ParseResult<'a, Self> {
        let mut slots = Vec::with_capacity(count);
        let mut rest = s;

        for _ in 0..count {
            let entry = rest;
            (rest, _) = skip_string(rest)?;

            slots.push(TableSlot::Pending(&entry[..entry.len() - rest.len()]));
        }

        Ok((rest, Self { slots }))
    }

    /// Number of table entries.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Read a table entry, decoding it on first access.
    ///
    /// Out of range indices are an error, as is an entry whose bytes fail
    /// to decode; the decode outcome — good or bad — is remembered either
    /// way.
    pub fn get(&mut self, index: usize) -> Result<&StringValue<'a>> {
        let slot = self
            .slots
            .get_mut(index)
            .ok_or(Error::StringTableUnknownIndex(index))?;

        if let TableSlot::Pending(raw) = *slot {
            let outcome = match read_string(raw) {
                Ok((_, value)) => Ok(value),
                Err(e) => Err(e.into()),
            };
            *slot = TableSlot::Ready(outcome);
        }

        match slot {
            TableSlot::Ready(Ok(value)) => Ok(value),
            TableSlot::Ready(Err(e)) => Err(e.clone()),
            TableSlot::Pending(_) => unreachable!("slot was just decoded"),
        }
    }
}
