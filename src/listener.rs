// Copyright 2023 Gregory Szorc.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The consumer callback contract.
//!
//! A [Listener] receives the boundaries of a parse: the recording, each
//! chunk, each chunk's metadata and checkpoints, and each event. Every
//! callback defaults to doing nothing and returning `true`; implement only
//! what you need.
//!
//! Returning `false` short-circuits work at a well-defined scope:
//!
//! * `on_chunk_start` — the chunk is skipped; only
//!   `on_chunk_end(skipped = true)` follows.
//! * `on_metadata`, `on_checkpoint`, `on_event` — the rest of the chunk is
//!   abandoned; its `on_chunk_end(skipped = false)` still fires.
//! * `on_chunk_end` — the remainder of the recording is cancelled.
//!
//! Chunks parse in parallel. Callbacks for one chunk are issued serially
//! from that chunk's worker thread, but callbacks for different chunks run
//! concurrently and in no particular order, which is why listeners must be
//! `Sync`. `on_recording_start` and `on_recording_end` are issued from the
//! calling thread, before and after all chunk work.

use crate::{
    constant_pool::CheckpointEvent,
    context::ParserContext,
    event::EventRecord,
    metadata::Metadata,
};

/// Receives parse progress callbacks.
///
/// All methods default to `true` ("keep going").
pub trait Listener: Sync {
    /// The parse is about to process chunks.
    fn on_recording_start(&self) -> bool {
        true
    }

    /// A chunk is about to be parsed.
    ///
    /// The context carries the chunk header and index; metadata and
    /// constant pools are not ready yet.
    fn on_chunk_start(&self, _ctx: &ParserContext<'_>) -> bool {
        true
    }

    /// The chunk's type dictionary has been read.
    fn on_metadata(&self, _ctx: &ParserContext<'_>, _metadata: &Metadata<'_>) -> bool {
        true
    }

    /// One checkpoint event of the chunk's chain has been read.
    ///
    /// Fires once per checkpoint; the chunk's pools accumulate across the
    /// chain and are complete once [ParserContext::constant_pools_ready]
    /// reports true.
    fn on_checkpoint(&self, _ctx: &ParserContext<'_>, _checkpoint: &CheckpointEvent<'_>) -> bool {
        true
    }

    /// A user event was encountered.
    ///
    /// The record is lightly parsed; decoding its payload is the
    /// listener's choice. The parser resyncs to the next event from the
    /// record's declared size regardless of what the listener consumes.
    fn on_event<'a>(&self, _ctx: &ParserContext<'a>, _event: &EventRecord<'a>) -> bool {
        true
    }

    /// A chunk finished, was skipped, or was abandoned.
    fn on_chunk_end(&self, _ctx: &ParserContext<'_>, _skipped: bool) -> bool {
        true
    }

    /// The parse finished, successfully or not.
    fn on_recording_end(&self) -> bool {
        true
    }
}

/// A listener that observes nothing and never cancels.
pub struct NullListener;

impl Listener for NullListener {}
