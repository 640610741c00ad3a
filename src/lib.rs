// Copyright 2023 Gregory Szorc.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Streaming reader for Java Flight Recorder (JFR) recordings.
//!
//! A JFR file is a sequence of self-contained *chunks*. Each chunk carries
//! its own type dictionary (the metadata event), per-type pools of shared
//! values (checkpoint events), and a stream of user events encoded against
//! those types. This crate turns such a file into a typed event stream:
//!
//! * Chunks are discovered sequentially and parsed in parallel on a worker
//!   pool; the recording is memory mapped and chunks borrow disjoint
//!   slices, so nothing is copied.
//! * Constant pools record value offsets at checkpoint read time and
//!   decode values lazily, at most once per entry.
//! * Per-class decoding work is compiled once — skip programs
//!   ([skipper::TypeSkipper]) and specialised deserializers
//!   ([deserializer::Deserializer]) — and the deserializers are shared
//!   process-wide between chunks and recordings with equal schema
//!   fingerprints.
//!
//! The consumer surface is a [listener::Listener]: callbacks for
//! recording, chunk, metadata, checkpoint, and event boundaries, each able
//! to short-circuit the corresponding scope by returning `false`. Within a
//! chunk, callbacks are ordered (`on_chunk_start`, `on_metadata`,
//! `on_checkpoint`*, `on_event`*, `on_chunk_end`); across chunks they run
//! concurrently, so listeners must be `Sync`.
//!
//! ```no_run
//! use jfr_stream::{listener::Listener, context::ParserContext,
//!                  event::EventRecord, parser::Parser};
//!
//! struct Counter(std::sync::atomic::AtomicU64);
//!
//! impl Listener for Counter {
//!     fn on_event<'a>(&self, ctx: &ParserContext<'a>, event: &EventRecord<'a>) -> bool {
//!         if let Ok(object) = event.resolve_object(ctx) {
//!             let _ = object.get("startTime");
//!         }
//!         self.0.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
//!         true
//!     }
//! }
//!
//! let parser = Parser::open("recording.jfr")?;
//! let counter = Counter(Default::default());
//! parser.parse(&counter)?;
//! # Ok::<(), jfr_stream::error::Error>(())
//! ```

pub mod chunk;
pub mod common;
pub mod constant_pool;
pub mod context;
pub mod de;
pub mod deserializer;
pub mod error;
pub mod event;
pub mod listener;
pub mod metadata;
pub mod parser;
pub mod recording;
pub mod skipper;
pub mod string_table;
#[cfg(test)]
pub(crate) mod testutil;
pub mod value;
pub mod walker;

pub use crate::{
    error::{Error, Result},
    listener::Listener,
    parser::{Parser, ParserConfig},
    recording::Recording,
};
