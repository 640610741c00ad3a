// Copyright 2023 Gregory Szorc.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Recording-level parsing.
//!
//! [Parser::parse] drives a whole recording through a [Listener]. Chunk
//! boundaries are discovered sequentially on the calling thread; each chunk
//! then parses as one coarse task on a dedicated worker pool, since chunks
//! are self-contained and decode independently.
//!
//! Per-chunk results land in submission-order slots and are joined in that
//! order, so error surfacing is deterministic even though chunk callbacks
//! interleave freely across workers. The first failing chunk's error is
//! returned after `on_recording_end` has fired.

use {
    crate::{
        chunk::ChunkRegion,
        constant_pool::CheckpointEvent,
        context::{ParserContext, TypeFilter},
        deserializer::{bind_deserializers, shared_cache, DEFAULT_CACHE_MAX},
        error::{Error, Result},
        event::{EventRecord, EVENT_TYPE_CONSTANT_POOL},
        listener::Listener,
        metadata::Metadata,
        recording::Recording,
    },
    log::{debug, trace},
    rayon::iter::{IndexedParallelIterator, IntoParallelRefIterator, IntoParallelRefMutIterator, ParallelIterator},
    std::{
        panic::{catch_unwind, AssertUnwindSafe},
        path::Path,
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
    },
};

/// Worker pool size used when none is configured: all cores minus two,
/// keeping a core for the scheduling thread and one for the rest of the
/// process.
pub fn default_parallelism() -> usize {
    num_cpus::get().saturating_sub(2).max(1)
}

/// Tunables for a [Parser].
#[derive(Clone)]
pub struct ParserConfig {
    /// Number of worker threads parsing chunks.
    pub parallelism: usize,

    /// Maximum deserializers retained per schema cache.
    pub deserializer_cache_max: usize,

    /// Predicate selecting which types' constant pool entries to record.
    /// Types failing the predicate are skipped at checkpoint read time.
    pub type_filter: Option<Arc<TypeFilter>>,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            deserializer_cache_max: DEFAULT_CACHE_MAX,
            type_filter: None,
        }
    }
}

/// Parses JFR recordings.
pub struct Parser {
    recording: Recording,
    config: ParserConfig,
}

impl Parser {
    /// Open the recording at a path with default configuration.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(Recording::open(path)?))
    }

    pub fn new(recording: Recording) -> Self {
        Self::with_config(recording, ParserConfig::default())
    }

    pub fn with_config(recording: Recording, config: ParserConfig) -> Self {
        Self { recording, config }
    }

    /// Parse the whole recording, surfacing progress through `listener`.
    ///
    /// Synchronous: returns once every chunk has completed or the first
    /// fatal error is known. `on_recording_end` fires in all cases.
    pub fn parse<L: Listener + ?Sized>(&self, listener: &L) -> Result<()> {
        let result = if listener.on_recording_start() {
            self.parse_chunks(listener)
        } else {
            Ok(())
        };

        listener.on_recording_end();

        result
    }

    fn parse_chunks<L: Listener + ?Sized>(&self, listener: &L) -> Result<()> {
        let regions = crate::chunk::scan_chunks(self.recording.data())?;

        if regions.is_empty() {
            return Ok(());
        }

        trace!(
            "parsing {} chunks on {} workers",
            regions.len(),
            self.config.parallelism
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.parallelism)
            .thread_name(|i| format!("jfr-chunk-{i}"))
            .build()
            .map_err(|e| Error::Io(format!("failed to build worker pool: {e}")))?;

        let mut results: Vec<Option<Result<()>>> = regions.iter().map(|_| None).collect();
        let cancelled = AtomicBool::new(false);

        {
            let cancelled = &cancelled;
            let config = &self.config;

            pool.install(|| {
                results
                    .par_iter_mut()
                    .zip(regions.par_iter())
                    .for_each(|(slot, region)| {
                        if cancelled.load(Ordering::Acquire) {
                            *slot = Some(Ok(()));
                            return;
                        }

                        let outcome = catch_unwind(AssertUnwindSafe(|| {
                            run_chunk(region, config, listener, cancelled)
                        }))
                        .unwrap_or_else(|payload| {
                            Err(Error::Internal(format!(
                                "chunk worker panicked: {}",
                                panic_message(&payload)
                            )))
                        });

                        *slot = Some(
                            outcome
                                .map_err(|e| e.into_chunk_error(region.index, region.data.len())),
                        );
                    });
            });
        }

        // Join in submission order: the first chunk to fail wins.
        for outcome in results {
            if let Some(Err(e)) = outcome {
                return Err(e);
            }
        }

        Ok(())
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn run_chunk<'a, L: Listener + ?Sized>(
    region: &ChunkRegion<'a>,
    config: &ParserConfig,
    listener: &L,
    cancelled: &AtomicBool,
) -> Result<()> {
    let ctx = ParserContext::new(region, config.type_filter.clone());

    if !listener.on_chunk_start(&ctx) {
        if !listener.on_chunk_end(&ctx, true) {
            cancelled.store(true, Ordering::Release);
        }
        return Ok(());
    }

    let result = run_chunk_body(&ctx, region, config, listener);

    if !listener.on_chunk_end(&ctx, false) {
        cancelled.store(true, Ordering::Release);
    }

    result
}

fn run_chunk_body<'a, L: Listener + ?Sized>(
    ctx: &ParserContext<'a>,
    region: &ChunkRegion<'a>,
    config: &ParserConfig,
    listener: &L,
) -> Result<()> {
    let data = region.data;

    // Metadata first: everything else decodes against it. The offset was
    // bounds checked during the chunk scan.
    let metadata_offset = region.header.metadata_offset as usize;
    let (_, metadata) = Metadata::parse(&data[metadata_offset..])?;

    let cache = shared_cache(metadata.fingerprint(), config.deserializer_cache_max);
    ctx.install_metadata(metadata, cache);

    let (metadata, cache) = match (ctx.metadata(), ctx.deserializer_cache()) {
        (Some(metadata), Some(cache)) => (metadata, cache),
        _ => return Err(Error::Internal("metadata install failed".to_string())),
    };

    if !listener.on_metadata(ctx, metadata) {
        return Ok(());
    }

    bind_deserializers(metadata, cache)?;

    // Checkpoints form a chain of offset deltas starting from the header.
    let mut offset = 0i64;
    let mut delta = region.header.checkpoint_offset as i64;

    while delta != 0 {
        offset += delta;

        if offset <= 0 || offset as usize >= data.len() {
            return Err(Error::EventParse(format!(
                "checkpoint chain leaves chunk at offset {offset}"
            )));
        }

        let checkpoint = CheckpointEvent::parse_at(data, offset as usize)?;
        delta = checkpoint.header.delta;

        let keep_going = listener.on_checkpoint(ctx, &checkpoint);

        ctx.pools_mut()
            .register_event(&checkpoint, metadata, ctx.type_filter())?;

        if !keep_going {
            return Ok(());
        }
    }

    ctx.constant_pools().set_ready();

    // The event loop. Metadata and checkpoint events appear in the stream
    // too; the resync jump skips them like everything else.
    let mut pos = region.events_start();

    while pos < data.len() {
        let record = EventRecord::parse_at(data, pos)?;
        let next = pos + record.size();

        if record.header.event_type > EVENT_TYPE_CONSTANT_POOL {
            if metadata.class_by_id(record.header.event_type).is_some() {
                if !listener.on_event(ctx, &record) {
                    return Ok(());
                }
            } else {
                ctx.count_skipped_event();
                debug!(
                    "chunk {}: skipping event of unknown type {} at offset {pos}",
                    region.index, record.header.event_type
                );
            }
        }

        pos = next;
    }

    Ok(())
}
