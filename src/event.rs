// Copyright 2023 Gregory Szorc.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! JFR event records.
//!
//! Every record in a chunk body leads with a size varint and a type id
//! varint. Type ids 0 and 1 are reserved for the metadata and checkpoint
//! events; everything above is a user event decoded against the class of
//! the same id.
//!
//! [EventRecord]s are only lightly parsed: the header is decoded and the
//! record's bytes are referenced, nothing more. Callers filter on the type
//! id cheaply and choose per record how much decoding to pay for — a
//! borrowed [Value] tree, an owned [EventObject] through the cached
//! specialised deserializer, or a typed struct via serde.

use crate::{
    common::{leb128_i32, leb128_i64},
    context::ParserContext,
    deserializer::{deserializer_for, EventObject},
    error::{Error, ParseResult, Result},
    metadata::Metadata,
    value::{read_value, Value},
};
use nom::{error::context, sequence::pair};

/// The event type ID referring to a metadata event.
pub const EVENT_TYPE_METADATA: i64 = 0;

/// The event type ID referring to a constant pool event.
pub const EVENT_TYPE_CONSTANT_POOL: i64 = 1;

/// The size and type id pair opening every record in a chunk body.
#[derive(Clone, Debug, Default)]
pub struct EventHeader {
    pub size: i32,
    pub event_type: i64,
}

impl EventHeader {
    pub fn parse(s: &[u8]) -> ParseResult<Self> {
        let (s, (size, event_type)) = pair(leb128_i32, leb128_i64)(s)?;

        Ok((s, Self { size, event_type }))
    }
}

/// One event, located but not decoded: its header plus its raw bytes.
#[derive(Clone, Debug)]
pub struct EventRecord<'chunk> {
    pub header: EventHeader,

    /// Offset of this event from the start of its chunk.
    start: usize,

    /// Full event data, inclusive of header.
    event_data: &'chunk [u8],

    /// Offset of start of fields data within the event data.
    fields_data_offset: usize,
}

impl<'chunk> EventRecord<'chunk> {
    /// Parse the event record at a chunk offset.
    ///
    /// Ensures the declared space for the event is available but does not
    /// touch the fields data.
    pub fn parse_at(chunk: &'chunk [u8], pos: usize) -> Result<Self> {
        let s = chunk.get(pos..).ok_or_else(|| {
            Error::EventParse(format!("event offset {pos} outside chunk"))
        })?;

        let (after_header, header) = context("parsing event header", EventHeader::parse)(s)?;

        let header_size = s.len() - after_header.len();

        if header.size <= 0 {
            return Err(Error::EventParse(format!(
                "event at offset {pos} declares non-positive size {}",
                header.size
            )));
        }

        let size = header.size as usize;
        if size < header_size || size > s.len() {
            return Err(Error::EventParse(format!(
                "event at offset {pos} declares size {size} beyond chunk bounds"
            )));
        }

        Ok(Self {
            header,
            start: pos,
            event_data: &s[..size],
            fields_data_offset: header_size,
        })
    }

    /// The event's type id.
    pub fn type_id(&self) -> i64 {
        self.header.event_type
    }

    /// Offset of this event from the start of its chunk.
    pub fn start_offset(&self) -> usize {
        self.start
    }

    /// Total encoded size, inclusive of the header.
    pub fn size(&self) -> usize {
        self.header.size as usize
    }

    /// Size of the fields data following the header.
    pub fn payload_size(&self) -> usize {
        self.size() - self.fields_data_offset
    }

    /// Whether this is one of the two reserved records (metadata or
    /// checkpoint) rather than a user event.
    pub fn is_special_event(&self) -> bool {
        matches!(
            self.header.event_type,
            EVENT_TYPE_METADATA | EVENT_TYPE_CONSTANT_POOL
        )
    }

    /// Obtain a reference to the full data for this event, inclusive of the header.
    pub fn event_data(&self) -> &'chunk [u8] {
        self.event_data
    }

    /// Obtain a reference to the fields data for this event.
    pub fn fields_data(&self) -> &'chunk [u8] {
        &self.event_data[self.fields_data_offset..]
    }

    /// Read the leading payload varint as the event's start tick stamp.
    ///
    /// By convention every event type puts `startTime` first, so this
    /// works without consulting metadata — but that convention is all it
    /// rests on. Combine with [crate::chunk::TimeResolver] for wall clock
    /// times.
    pub fn start_ticks(&self) -> Result<i64> {
        let (_, v) = context("reading leading start time field", leb128_i64)(self.fields_data())?;

        Ok(v)
    }

    /// Read the two leading payload varints as start ticks and duration.
    ///
    /// Rests on the same untyped convention as [Self::start_ticks]; an
    /// event laid out differently yields numbers, just not these.
    pub fn start_duration(&self) -> Result<(i64, i64)> {
        let s = self.fields_data();

        let (s, start_time) = context("reading leading start time field", leb128_i64)(s)?;
        let (_, duration) = context("reading leading duration field", leb128_i64)(s)?;

        Ok((start_time, duration))
    }

    /// Materialise this event's fields as a borrowed [Value] tree.
    pub fn resolve_value(&self, metadata: &Metadata<'chunk>) -> Result<Value<'chunk>> {
        let (_, v) = read_value(self.fields_data(), self.header.event_type, metadata)?;

        Ok(v)
    }

    /// Decode this event through the chunk's cached specialised deserializer.
    ///
    /// Requires the context's metadata to be ready, which is always the
    /// case inside `on_event`.
    pub fn resolve_object(&self, ctx: &ParserContext<'chunk>) -> Result<EventObject> {
        let metadata = ctx
            .metadata()
            .ok_or_else(|| Error::EventParse("metadata not ready".to_string()))?;

        let cache = ctx
            .deserializer_cache()
            .ok_or_else(|| Error::EventParse("deserializer cache not ready".to_string()))?;

        let deserializer = deserializer_for(self.header.event_type, metadata, cache)?;

        let (_, object) = deserializer.deserialize(self.fields_data(), &mut ctx.scratch())?;

        Ok(object)
    }
}
