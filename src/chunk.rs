// Copyright 2023 Gregory Szorc.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Chunk layout.
//!
//! A recording is a run of chunks laid end to end, each opening with the
//! fixed 68 byte [ChunkHeader]. The header makes a finished chunk fully
//! self-describing: besides version and length it records where inside
//! the chunk the metadata event sits and where the checkpoint chain
//! starts, plus the tick/epoch anchors that turn event tick stamps into
//! wall clock times.
//!
//! [scan_chunks] walks the recording once, header to header, handing back
//! one [ChunkRegion] per chunk. Regions cover the recording exactly and
//! never overlap, and a chunk decodes using nothing but its own region —
//! which is what makes one-task-per-chunk parallelism safe.

use crate::{
    error::{Error, ErrorKind, ParseResult, Result},
    metadata::RegionElement,
};
use chrono::{DateTime, Duration, FixedOffset, TimeZone, Utc};
use nom::{
    bytes::streaming::tag,
    error::context,
    number::streaming::{be_u16, be_u32, be_u64},
    sequence::{pair, tuple},
};

pub const MAGIC: [u8; 4] = *b"FLR\0";

/// The fixed header opening every chunk. All fields are big endian.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ChunkHeader {
    /// Format major version; 2 for every JDK that matters today.
    pub major: u16,

    pub minor: u16,

    /// Total chunk length in bytes, this header included.
    pub size: u64,

    /// Where the first checkpoint event starts, measured from the chunk
    /// start. The remaining checkpoints chain from there via deltas.
    pub checkpoint_offset: u64,

    /// Where the metadata event starts, measured from the chunk start.
    pub metadata_offset: u64,

    /// Wall clock time of the chunk start, in nanoseconds since the UNIX
    /// epoch.
    pub start_nanos: u64,

    /// Wall clock span the chunk covers, in nanoseconds.
    pub duration_nanos: u64,

    /// Reading of the tick counter at the chunk start.
    pub start_ticks: u64,

    /// Tick counter frequency, ticks per second.
    pub ticks_per_second: u64,

    /// Writer state in the leading byte (zero once the chunk is finished,
    /// 255 while it is still being written) and feature flags in the
    /// trailing byte.
    pub state_flags: u32,
}

impl ChunkHeader {
    /// Encoded header length. Event records start at this offset.
    pub const HEADER_SIZE: u64 = 68;

    /// Decode a header from the start of a chunk.
    pub fn parse(s: &[u8]) -> ParseResult<Self> {
        let (s, _) = context("chunk magic", tag(MAGIC))(s)?;

        let (s, (major, minor)) = pair(be_u16, be_u16)(s)?;
        let (s, (size, checkpoint_offset, metadata_offset)) =
            tuple((be_u64, be_u64, be_u64))(s)?;
        let (s, (start_nanos, duration_nanos)) = pair(be_u64, be_u64)(s)?;
        let (s, (start_ticks, ticks_per_second)) = pair(be_u64, be_u64)(s)?;
        let (s, state_flags) = be_u32(s)?;

        Ok((
            s,
            Self {
                major,
                minor,
                size,
                checkpoint_offset,
                metadata_offset,
                start_nanos,
                duration_nanos,
                start_ticks,
                ticks_per_second,
                state_flags,
            },
        ))
    }
}

/// One chunk's byte range within a recording.
#[derive(Clone, Copy, Debug)]
pub struct ChunkRegion<'a> {
    /// 1-based index of this chunk within the recording.
    pub index: u32,

    /// Offset of the chunk header from the start of the recording.
    pub offset: usize,

    pub header: ChunkHeader,

    /// The chunk's bytes, inclusive of the header.
    pub data: &'a [u8],
}

impl<'a> ChunkRegion<'a> {
    /// Offset within the chunk at which event records begin.
    pub fn events_start(&self) -> usize {
        ChunkHeader::HEADER_SIZE as usize
    }
}

fn bad_layout(index: u32, offset: usize, what: &str) -> Error {
    Error::Chunk {
        chunk_index: index,
        position: 0,
        kind: ErrorKind::Malformed,
        source: Box::new(Error::EventParse(format!(
            "impossible chunk layout at recording offset {offset}: {what}"
        ))),
    }
}

/// Discover the chunk boundaries of a recording.
///
/// Walks the file sequentially reading one header at a time. Offsets that
/// do not add up (a chunk smaller than its own header, extending past the
/// end of the file, or locating metadata outside itself) are fatal.
pub fn scan_chunks(data: &[u8]) -> Result<Vec<ChunkRegion<'_>>> {
    let mut regions = Vec::new();
    let mut offset = 0usize;
    let mut index = 1u32;

    while offset < data.len() {
        let s = &data[offset..];

        let (_, header) = context("parsing chunk header", ChunkHeader::parse)(s)
            .map_err(|e| Error::from(e).into_chunk_error(index, 0))?;

        let size = header.size as usize;
        if size < ChunkHeader::HEADER_SIZE as usize {
            return Err(bad_layout(index, offset, "chunk smaller than its header"));
        }
        if size > s.len() {
            return Err(bad_layout(index, offset, "chunk extends past end of input"));
        }
        if header.metadata_offset as usize >= size {
            return Err(bad_layout(index, offset, "metadata offset outside chunk"));
        }
        if header.checkpoint_offset as usize >= size {
            return Err(bad_layout(
                index,
                offset,
                "constant pool offset outside chunk",
            ));
        }

        regions.push(ChunkRegion {
            index,
            offset,
            header,
            data: &s[..size],
        });

        offset += size;
        index += 1;
    }

    Ok(regions)
}

/// Converts event tick stamps into durations and wall clock times.
///
/// Event times are raw tick counter readings. Making sense of one takes
/// three header fields — the tick frequency, the counter reading at the
/// chunk start, and the chunk start's epoch time — plus the timezone the
/// metadata region declares. This type bundles those once per chunk.
#[derive(Clone, Debug)]
pub struct TimeResolver {
    start_nanos: i64,
    start_ticks: u64,
    ticks_per_second: u64,
    start_time: DateTime<FixedOffset>,
}

impl TimeResolver {
    /// Construct an instance from a [ChunkHeader] and the metadata region.
    pub fn new(header: &ChunkHeader, region: &RegionElement<'_>) -> Result<Self> {
        let start_time = region
            .fixed_offset()?
            .timestamp_nanos(header.start_nanos as _);

        Ok(Self {
            start_nanos: header.start_nanos as i64,
            start_ticks: header.start_ticks,
            ticks_per_second: header.ticks_per_second,
            start_time,
        })
    }

    /// Nanoseconds elapsed between the chunk start and a tick stamp.
    #[inline]
    pub fn chunk_start_delta_nanoseconds(&self, ticks: i64) -> i64 {
        let delta_ticks = ticks - self.start_ticks as i64;

        delta_ticks / (self.ticks_per_second / 1_000_000_000).max(1) as i64
    }

    /// [Self::chunk_start_delta_nanoseconds] as a [Duration].
    pub fn chunk_start_delta_duration(&self, ticks: i64) -> Duration {
        Duration::nanoseconds(self.chunk_start_delta_nanoseconds(ticks))
    }

    /// A tick stamp as nanoseconds since the UNIX epoch.
    pub fn epoch_nanoseconds(&self, ticks: i64) -> i64 {
        self.start_nanos + self.chunk_start_delta_nanoseconds(ticks)
    }

    /// A tick stamp as a [DateTime] in the recording's own timezone.
    pub fn date_time(&self, ticks: i64) -> DateTime<FixedOffset> {
        self.start_time + self.chunk_start_delta_duration(ticks)
    }

    /// A tick stamp as a UTC [DateTime].
    pub fn date_time_utc(&self, ticks: i64) -> DateTime<Utc> {
        self.date_time(ticks).with_timezone(&Utc)
    }

    /// Nanoseconds elapsed between two tick stamps.
    #[inline]
    pub fn delta_nanoseconds(&self, start_ticks: i64, end_ticks: i64) -> i64 {
        let delta_ticks = end_ticks - start_ticks;
        delta_ticks / (self.ticks_per_second / 1_000_000_000).max(1) as i64
    }

    /// [Self::delta_nanoseconds] as a [Duration].
    pub fn delta_duration(&self, start_ticks: i64, end_ticks: i64) -> Duration {
        Duration::nanoseconds(self.delta_nanoseconds(start_ticks, end_ticks))
    }
}
