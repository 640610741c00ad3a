// Copyright 2023 Gregory Szorc.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Recording byte sources.
//!
//! A [Recording] owns the bytes of a JFR file for the duration of a parse.
//! Files are memory mapped read-only, so chunk workers read the same pages
//! concurrently without copying; in-memory buffers are supported for
//! recordings that are already loaded (and for tests).

use crate::error::Result;
use std::{fs::File, path::Path};

enum Backing {
    Mapped(memmap2::Mmap),
    Owned(Vec<u8>),
}

/// The bytes of one JFR recording.
pub struct Recording {
    backing: Backing,
}

impl Recording {
    /// Memory map the recording at a filesystem path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;

        // Safety: the mapping is read-only and private. Truncation of the
        // underlying file during the parse faults like any mapped read.
        let mapped = unsafe { memmap2::Mmap::map(&file)? };

        Ok(Self {
            backing: Backing::Mapped(mapped),
        })
    }

    /// Use an in-memory buffer as the recording.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self {
            backing: Backing::Owned(data),
        }
    }

    /// The recording's bytes.
    pub fn data(&self) -> &[u8] {
        match &self.backing {
            Backing::Mapped(mapped) => mapped,
            Backing::Owned(data) => data,
        }
    }

    /// Total size in bytes.
    pub fn len(&self) -> usize {
        self.data().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data().is_empty()
    }
}
