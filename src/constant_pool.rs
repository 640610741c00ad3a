// Copyright 2023 Gregory Szorc.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Constant pool primitives.
//!
//! Checkpoint events carry per-type pools of shared values. The pools form
//! a linked list through the chunk via `delta` offsets; the chunk header
//! locates the first event and a delta of zero terminates the chain.
//!
//! Entries do not encode their own size, so a checkpoint must be traversed
//! with type knowledge even when its values are not wanted. We traverse
//! once at read time recording `(index, offset)` pairs per type — values
//! are only decoded later, on first lookup, at most once per index.

use {
    crate::{
        common::{leb128_i32, leb128_i64},
        context::TypeFilter,
        error::{Error, ParseResult, Result},
        metadata::Metadata,
        value::{read_value, Value},
    },
    bitflags::bitflags,
    log::debug,
    nom::{
        error::context,
        number::streaming::be_i8,
        sequence::{pair, tuple},
    },
    rustc_hash::FxHashMap,
    std::{
        cell::{Cell, RefCell},
        rc::Rc,
    },
};

bitflags! {
    /// Mask bits a writer can set on a checkpoint event.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct CheckpointType: i8 {
        /// Ordinary pool data, nothing special.
        const GENERIC = 0;
        /// The checkpoint closes out a flush segment.
        const Flush = 1;
        /// The first pool wraps a serialized chunk header.
        const ChunkHeader = 2;
        /// Values that stay constant from chunk to chunk.
        const Statics = 4;
        /// Thread bookkeeping.
        const Thread = 8;
        const _ = !0;
    }
}

/// Everything a checkpoint event declares ahead of its pool data,
/// starting with the usual size and type id pair.
#[derive(Clone, Copy, Debug, Default)]
pub struct ConstantPoolHeader {
    pub size: i32,
    pub type_id: i64,
    pub timestamp: i64,
    pub duration: i64,
    /// Offset delta to the next checkpoint event. Zero terminates the chain.
    pub delta: i64,
    /// Checkpoint type mask.
    pub mask: i8,
    pub pool_count: i32,
}

impl ConstantPoolHeader {
    pub fn parse(s: &[u8]) -> ParseResult<Self> {
        // type_id is 1 for every well-formed checkpoint.
        let (s, (size, type_id)) = pair(leb128_i32, leb128_i64)(s)?;
        let (s, (timestamp, duration, delta)) =
            tuple((leb128_i64, leb128_i64, leb128_i64))(s)?;
        let (s, mask) = be_i8(s)?;
        let (s, pool_count) = leb128_i32(s)?;

        Ok((
            s,
            Self {
                size,
                type_id,
                timestamp,
                duration,
                delta,
                mask,
                pool_count,
            },
        ))
    }

    /// The raw mask interpreted as [CheckpointType] bits.
    pub fn mask_flags(&self) -> CheckpointType {
        CheckpointType::from_bits_retain(self.mask)
    }

    /// True when this checkpoint closes a flush segment.
    pub fn is_flush(&self) -> bool {
        self.mask_flags().contains(CheckpointType::Flush)
    }

    /// True when the first pool wraps a serialized chunk header.
    pub fn is_chunk_header(&self) -> bool {
        self.mask_flags().contains(CheckpointType::ChunkHeader)
    }

    /// True when the pools hold cross-chunk statics.
    pub fn is_statics(&self) -> bool {
        self.mask_flags().contains(CheckpointType::Statics)
    }

    /// True when the pools hold thread bookkeeping.
    pub fn is_thread(&self) -> bool {
        self.mask_flags().contains(CheckpointType::Thread)
    }
}

/// Holds a parsed checkpoint header and a reference to its pool data.
#[derive(Clone, Debug)]
pub struct CheckpointEvent<'a> {
    pub header: ConstantPoolHeader,

    /// Offset of the event within its chunk.
    pub offset: usize,

    /// Holds constants pool data. Not inclusive of the header.
    pub pool_data: &'a [u8],
}

impl<'a> CheckpointEvent<'a> {
    /// Parse the checkpoint event at a chunk offset.
    pub fn parse_at(chunk: &'a [u8], offset: usize) -> Result<Self> {
        let s = chunk.get(offset..).ok_or_else(|| {
            Error::EventParse(format!("checkpoint offset {offset} outside chunk"))
        })?;

        let (rest, header) = context("parsing checkpoint header", ConstantPoolHeader::parse)(s)?;

        let header_len = s.len() - rest.len();
        let size = header.size as usize;

        if header.size <= 0 || size < header_len || size > s.len() {
            return Err(Error::EventParse(format!(
                "checkpoint at offset {offset} has impossible size {}",
                header.size
            )));
        }

        Ok(Self {
            header,
            offset,
            pool_data: &rest[..size - header_len],
        })
    }
}

/// The constant pool of a single type.
///
/// Holds `index → offset` for every entry seen at checkpoint read time and
/// decodes values lazily: the first [Self::get] of an index reads one value
/// of the pool's class at the recorded offset and caches it; later lookups
/// share the cached value.
pub struct ConstantPool<'a> {
    class_id: i64,
    chunk: &'a [u8],
    offsets: FxHashMap<i64, usize>,
    values: RefCell<FxHashMap<i64, Rc<Value<'a>>>>,
}

impl<'a> ConstantPool<'a> {
    fn new(class_id: i64, chunk: &'a [u8], capacity: usize) -> Self {
        Self {
            class_id,
            chunk,
            offsets: FxHashMap::with_capacity_and_hasher(capacity, Default::default()),
            values: RefCell::new(FxHashMap::default()),
        }
    }

    /// The class whose values this pool holds.
    pub fn class_id(&self) -> i64 {
        self.class_id
    }

    /// Record the chunk offset of an entry's value bytes.
    pub fn add_offset(&mut self, index: i64, offset: usize) {
        self.offsets.insert(index, offset);
    }

    /// Whether an entry exists for this index.
    pub fn contains(&self, index: i64) -> bool {
        self.offsets.contains_key(&index)
    }

    /// Number of entries recorded for this pool.
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Number of entries whose values have been decoded.
    pub fn materialized(&self) -> usize {
        self.values.borrow().len()
    }

    /// Iterate the indices recorded for this pool.
    pub fn indices(&self) -> impl Iterator<Item = i64> + '_ {
        self.offsets.keys().copied()
    }

    /// Obtain the value of an entry.
    ///
    /// Unknown indices — including index 0, the null reference — resolve to
    /// `None`, never an error. Values are decoded at most once.
    pub fn get(&self, index: i64, metadata: &Metadata<'a>) -> Option<Rc<Value<'a>>> {
        if index == 0 {
            return None;
        }

        if let Some(v) = self.values.borrow().get(&index) {
            return Some(v.clone());
        }

        let offset = *self.offsets.get(&index)?;

        match read_value(&self.chunk[offset..], self.class_id, metadata) {
            Ok((_, v)) => {
                let v = Rc::new(v);
                self.values.borrow_mut().insert(index, v.clone());

                Some(v)
            }
            Err(err) => {
                // The bytes skipped cleanly at checkpoint read time, so a
                // decode failure here means the metadata disagrees with
                // itself. Surface as a missing constant.
                debug!(
                    "failed to materialise constant {}/{index}: {err}",
                    self.class_id
                );
                None
            }
        }
    }
}

/// All constant pools of a chunk, keyed by type id.
pub struct ConstantPools<'a> {
    chunk: &'a [u8],
    pools: FxHashMap<i64, ConstantPool<'a>>,
    ready: Cell<bool>,
    skipped_entries: Cell<u64>,
}

impl<'a> ConstantPools<'a> {
    pub fn new(chunk: &'a [u8]) -> Self {
        Self {
            chunk,
            pools: FxHashMap::default(),
            ready: Cell::new(false),
            skipped_entries: Cell::new(0),
        }
    }

    /// Record the pools declared by one checkpoint event.
    ///
    /// Offsets are recorded for types that pass `filter`; values of other
    /// types are skipped over. A zero type id is a known writer bug: it is
    /// dropped and the read retried once. A type id missing from the
    /// metadata makes the remainder of this event undecodable (entry sizes
    /// derive from type knowledge); the remainder is abandoned, counted,
    /// and the chain continues.
    pub fn register_event(
        &mut self,
        event: &CheckpointEvent<'a>,
        metadata: &Metadata<'a>,
        filter: Option<&TypeFilter>,
    ) -> Result<()> {
        let chunk = self.chunk;
        let mut s = event.pool_data;

        for _ in 0..event.header.pool_count {
            let (rest, first) = leb128_i64(s)?;
            s = rest;

            let type_id = if first == 0 {
                debug!(
                    "zero type id in checkpoint at offset {}; retrying read once",
                    event.offset
                );
                let (rest, retry) = leb128_i64(s)?;
                s = rest;
                retry
            } else {
                first
            };

            let (rest, entry_count) = leb128_i32(s)?;
            s = rest;

            let class = match metadata.class_by_id(type_id) {
                Some(class) => class,
                None => {
                    debug!(
                        "checkpoint references unknown type id {type_id}; \
                         abandoning the rest of this checkpoint event"
                    );
                    self.skipped_entries
                        .set(self.skipped_entries.get() + entry_count.max(0) as u64);
                    return Ok(());
                }
            };

            let wanted = filter.map_or(true, |f| f(class));
            let skipper = metadata.skipper_for(type_id)?;

            let mut pool = if wanted {
                Some(self.pools.entry(type_id).or_insert_with(|| {
                    ConstantPool::new(type_id, chunk, entry_count.max(0) as usize)
                }))
            } else {
                None
            };

            for _ in 0..entry_count {
                let (rest, index) = leb128_i64(s)?;
                s = rest;

                let offset = offset_in(chunk, s);

                let (rest, ()) = skipper.skip(s)?;
                s = rest;

                if let Some(pool) = pool.as_mut() {
                    pool.add_offset(index, offset);
                }
            }

            if !wanted {
                self.skipped_entries
                    .set(self.skipped_entries.get() + entry_count.max(0) as u64);
            }
        }

        Ok(())
    }

    /// Look up the pool for a type.
    pub fn pool(&self, type_id: i64) -> Option<&ConstantPool<'a>> {
        self.pools.get(&type_id)
    }

    /// Convenience lookup of a single constant.
    pub fn lookup(
        &self,
        type_id: i64,
        index: i64,
        metadata: &Metadata<'a>,
    ) -> Option<Rc<Value<'a>>> {
        self.pool(type_id)?.get(index, metadata)
    }

    /// Iterate over type ids with pools.
    pub fn type_ids(&self) -> impl Iterator<Item = i64> + use<'_, 'a> {
        self.pools.keys().copied()
    }

    /// Number of entries skipped due to filters or unknown types.
    pub fn skipped_entries(&self) -> u64 {
        self.skipped_entries.get()
    }

    /// Flip after the last checkpoint of the chunk has been read.
    pub fn set_ready(&self) {
        self.ready.set(true);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.get()
    }
}

fn offset_in(base: &[u8], s: &[u8]) -> usize {
    debug_assert!(s.len() <= base.len());
    s.as_ptr() as usize - base.as_ptr() as usize
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        testutil::{
            checkpoint_event, checkpoint_event_raw, leb, metadata_event, utf8_string,
            ChunkBuilder, ClassSpec, FieldSpec, PoolSpec,
        },
        value::Primitive,
    };

    fn string_pool_metadata() -> Vec<u8> {
        metadata_event(&ClassSpec::primitives())
    }

    #[test]
    fn header_mask_flags() {
        let header = ConstantPoolHeader {
            mask: 3,
            ..Default::default()
        };
        assert!(header.is_flush());
        assert!(header.is_chunk_header());
        assert!(!header.is_statics());
        assert!(!header.is_thread());
    }

    #[test]
    fn lazy_materialisation_happens_once() {
        let md = string_pool_metadata();
        let (_, metadata) = Metadata::parse(&md).unwrap();

        let chunk = checkpoint_event(
            &[PoolSpec::new(12)
                .entry(1, utf8_string("hi"))
                .entry(2, utf8_string("there"))],
            0,
            true,
        );

        let event = CheckpointEvent::parse_at(&chunk, 0).unwrap();
        assert_eq!(event.header.pool_count, 1);
        assert!(event.header.is_flush());

        let mut pools = ConstantPools::new(&chunk);
        pools.register_event(&event, &metadata, None).unwrap();

        let pool = pools.pool(12).unwrap();
        assert_eq!(pool.len(), 2);
        assert!(pool.contains(1));
        assert!(!pool.contains(77));
        // Offsets only; nothing decoded yet.
        assert_eq!(pool.materialized(), 0);

        let first = pool.get(1, &metadata).unwrap();
        assert_eq!(
            first.as_ref(),
            &Value::Primitive(Primitive::String("hi".into()))
        );
        assert_eq!(pool.materialized(), 1);

        let again = pool.get(1, &metadata).unwrap();
        assert!(Rc::ptr_eq(&first, &again));
        assert_eq!(pool.materialized(), 1);

        // Unknown index and the null index resolve to None.
        assert!(pool.get(77, &metadata).is_none());
        assert!(pool.get(0, &metadata).is_none());
    }

    #[test]
    fn zero_type_id_is_retried_once() {
        let md = string_pool_metadata();
        let (_, metadata) = Metadata::parse(&md).unwrap();

        // Writer bug reproduction: a stray zero before the real type id.
        let mut body = leb(0);
        body.extend_from_slice(&leb(12));
        body.extend_from_slice(&leb(1));
        body.extend_from_slice(&leb(5));
        body.extend_from_slice(&utf8_string("x"));

        let chunk = checkpoint_event_raw(1, &body, 0, true);
        let event = CheckpointEvent::parse_at(&chunk, 0).unwrap();

        let mut pools = ConstantPools::new(&chunk);
        pools.register_event(&event, &metadata, None).unwrap();

        let pool = pools.pool(12).unwrap();
        assert_eq!(pool.len(), 1);
        assert_eq!(
            pool.get(5, &metadata).unwrap().as_ref(),
            &Value::Primitive(Primitive::String("x".into()))
        );
    }

    #[test]
    fn unknown_type_abandons_rest_of_event() {
        let md = string_pool_metadata();
        let (_, metadata) = Metadata::parse(&md).unwrap();

        // A valid string pool, then a pool for an undeclared type. The
        // second pool's entries are undecodable, so everything after the
        // unknown type id is dropped.
        let mut body = leb(12);
        body.extend_from_slice(&leb(1));
        body.extend_from_slice(&leb(1));
        body.extend_from_slice(&utf8_string("kept"));
        body.extend_from_slice(&leb(99));
        body.extend_from_slice(&leb(3));
        body.extend_from_slice(&[0xde, 0xad, 0xbe, 0xef]);

        let chunk = checkpoint_event_raw(2, &body, 0, true);
        let event = CheckpointEvent::parse_at(&chunk, 0).unwrap();

        let mut pools = ConstantPools::new(&chunk);
        pools.register_event(&event, &metadata, None).unwrap();

        assert!(pools.pool(12).is_some());
        assert!(pools.pool(99).is_none());
        assert_eq!(pools.skipped_entries(), 3);
    }

    #[test]
    fn filtered_types_are_skipped_but_advanced() {
        let md = string_pool_metadata();
        let (_, metadata) = Metadata::parse(&md).unwrap();

        // Two pools; the filter drops strings but must still walk their
        // bytes so the long pool behind them parses.
        let chunk = checkpoint_event(
            &[
                PoolSpec::new(12).entry(1, utf8_string("dropped")),
                PoolSpec::new(9).entry(1, leb(42)),
            ],
            0,
            true,
        );
        let event = CheckpointEvent::parse_at(&chunk, 0).unwrap();

        let filter = |class: &crate::metadata::ClassElement<'_>| class.name != "java.lang.String";

        let mut pools = ConstantPools::new(&chunk);
        pools
            .register_event(&event, &metadata, Some(&filter))
            .unwrap();

        assert!(pools.pool(12).is_none());
        assert_eq!(pools.skipped_entries(), 1);

        let pool = pools.pool(9).unwrap();
        assert_eq!(
            pool.get(1, &metadata).unwrap().as_ref(),
            &Value::Primitive(Primitive::Long(42))
        );
    }

    #[test]
    fn chain_walk_accumulates_pools() {
        let mut classes = ClassSpec::primitives();
        classes.push(
            ClassSpec::new(100, "test.Evt").field(FieldSpec::new("name", 12).constant_pool()),
        );

        let chunk = ChunkBuilder::new()
            .add_metadata(&classes)
            .add_checkpoint(&[PoolSpec::new(12).entry(1, utf8_string("one"))], false)
            .add_checkpoint(&[PoolSpec::new(12).entry(2, utf8_string("two"))], true)
            .build();

        let regions = crate::chunk::scan_chunks(&chunk).unwrap();
        let region = &regions[0];

        let md_offset = region.header.metadata_offset as usize;
        let (_, metadata) = Metadata::parse(&region.data[md_offset..]).unwrap();

        let mut pools = ConstantPools::new(region.data);

        let mut offset = 0i64;
        let mut delta = region.header.checkpoint_offset as i64;
        let mut events = 0;

        while delta != 0 {
            let event = CheckpointEvent::parse_at(region.data, (offset + delta) as usize).unwrap();
            offset += delta;
            delta = event.header.delta;

            pools.register_event(&event, &metadata, None).unwrap();
            events += 1;
        }
        pools.set_ready();

        assert_eq!(events, 2);
        assert!(pools.is_ready());

        let pool = pools.pool(12).unwrap();
        assert_eq!(pool.len(), 2);
        assert_eq!(
            pool.get(2, &metadata).unwrap().as_ref(),
            &Value::Primitive(Primitive::String("two".into()))
        );
    }

    #[test]
    fn out_of_bounds_checkpoint_offsets_fail() {
        let chunk = checkpoint_event(&[], 0, false);

        assert!(CheckpointEvent::parse_at(&chunk, chunk.len() + 10).is_err());

        // Declared size larger than the available bytes.
        let mut truncated = checkpoint_event(&[PoolSpec::new(12).entry(1, utf8_string("x"))], 0, false);
        truncated.truncate(truncated.len() - 2);
        assert!(CheckpointEvent::parse_at(&truncated, 0).is_err());
    }
}
