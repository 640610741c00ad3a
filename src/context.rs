// Copyright 2023 Gregory Szorc.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Per-chunk parser state.
//!
//! A [ParserContext] is created for every chunk and handed to each listener
//! callback for that chunk. It owns the chunk's [Metadata] and
//! [ConstantPools] — both absent until the corresponding part of the chunk
//! has been read, which the readiness accessors report — and carries
//! consumer-facing odds and ends: the type filter, scratch buffers, a
//! plug-in state bag, and counters for non-fatal skips.
//!
//! Contexts never cross threads: a chunk's callbacks are all issued from
//! the worker that parses it. State that must outlive a chunk belongs to
//! the listener, not the context.

use {
    crate::{
        chunk::{ChunkHeader, ChunkRegion},
        constant_pool::ConstantPools,
        deserializer::DeserializerCache,
        metadata::{ClassElement, Metadata},
    },
    rustc_hash::FxHashMap,
    std::{
        any::Any,
        cell::{Cell, OnceCell, Ref, RefCell, RefMut},
        sync::Arc,
    },
};

/// Predicate deciding whether a type's constant pool entries are recorded.
pub type TypeFilter = dyn Fn(&ClassElement<'_>) -> bool + Send + Sync;

/// Reusable staging space for string decoding.
#[derive(Debug)]
pub struct ScratchBuffers {
    /// UTF-16 code unit staging for char-array strings.
    pub chars: Vec<u16>,
}

impl Default for ScratchBuffers {
    fn default() -> Self {
        Self {
            chars: Vec::with_capacity(4096),
        }
    }
}

/// State scoped to the parse of one chunk.
pub struct ParserContext<'chunk> {
    chunk_index: u32,
    chunk_offset: usize,
    header: ChunkHeader,
    metadata: OnceCell<Metadata<'chunk>>,
    pools: RefCell<ConstantPools<'chunk>>,
    cache: OnceCell<Arc<DeserializerCache>>,
    type_filter: Option<Arc<TypeFilter>>,
    scratch: RefCell<ScratchBuffers>,
    bag: RefCell<FxHashMap<String, Box<dyn Any + Send>>>,
    skipped_events: Cell<u64>,
}

impl<'chunk> ParserContext<'chunk> {
    pub(crate) fn new(region: &ChunkRegion<'chunk>, type_filter: Option<Arc<TypeFilter>>) -> Self {
        Self {
            chunk_index: region.index,
            chunk_offset: region.offset,
            header: region.header,
            metadata: OnceCell::new(),
            pools: RefCell::new(ConstantPools::new(region.data)),
            cache: OnceCell::new(),
            type_filter,
            scratch: RefCell::new(ScratchBuffers::default()),
            bag: RefCell::new(FxHashMap::default()),
            skipped_events: Cell::new(0),
        }
    }

    /// 1-based index of this chunk within the recording.
    pub fn chunk_index(&self) -> u32 {
        self.chunk_index
    }

    /// Offset of this chunk from the start of the recording.
    pub fn chunk_offset(&self) -> usize {
        self.chunk_offset
    }

    /// The chunk's parsed header.
    pub fn chunk_header(&self) -> &ChunkHeader {
        &self.header
    }

    /// The chunk's type dictionary, if metadata has been read.
    pub fn metadata(&self) -> Option<&Metadata<'chunk>> {
        self.metadata.get()
    }

    /// Whether the chunk's metadata event has been fully read.
    pub fn metadata_ready(&self) -> bool {
        self.metadata.get().is_some()
    }

    pub(crate) fn install_metadata(
        &self,
        metadata: Metadata<'chunk>,
        cache: Arc<DeserializerCache>,
    ) {
        // Single assignment per chunk; later calls would be a parser bug.
        let _ = self.metadata.set(metadata);
        let _ = self.cache.set(cache);
    }

    /// The chunk's constant pools.
    ///
    /// Pools fill in as checkpoint events are read; [Self::constant_pools_ready]
    /// reports whether the whole chain has been consumed.
    pub fn constant_pools(&self) -> Ref<'_, ConstantPools<'chunk>> {
        self.pools.borrow()
    }

    pub(crate) fn pools_mut(&self) -> RefMut<'_, ConstantPools<'chunk>> {
        self.pools.borrow_mut()
    }

    /// Whether the last checkpoint of the chunk has been read.
    pub fn constant_pools_ready(&self) -> bool {
        self.pools.borrow().is_ready()
    }

    /// The deserializer cache shared by chunks with this chunk's schema.
    pub fn deserializer_cache(&self) -> Option<&Arc<DeserializerCache>> {
        self.cache.get()
    }

    /// The consumer-provided type filter, if any.
    pub fn type_filter(&self) -> Option<&TypeFilter> {
        self.type_filter.as_deref()
    }

    pub(crate) fn scratch(&self) -> RefMut<'_, ScratchBuffers> {
        self.scratch.borrow_mut()
    }

    /// Stash a value for the remainder of this chunk's parse.
    ///
    /// The bag is dropped with the chunk. Cross-chunk state belongs to the
    /// listener.
    pub fn set_state(&self, key: impl Into<String>, value: Box<dyn Any + Send>) {
        self.bag.borrow_mut().insert(key.into(), value);
    }

    /// Remove and return a previously stashed value.
    pub fn take_state(&self, key: &str) -> Option<Box<dyn Any + Send>> {
        self.bag.borrow_mut().remove(key)
    }

    /// Whether a value is stashed under this key.
    pub fn has_state(&self, key: &str) -> bool {
        self.bag.borrow().contains_key(key)
    }

    pub(crate) fn count_skipped_event(&self) {
        self.skipped_events.set(self.skipped_events.get() + 1);
    }

    /// Number of events skipped because their type was not in the metadata.
    pub fn skipped_events(&self) -> u64 {
        self.skipped_events.get()
    }
}
