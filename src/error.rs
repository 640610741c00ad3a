// Copyright 2023 Gregory Szorc.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use nom::{
    error::{ContextError, ErrorKind as NomErrorKind, ParseError},
    IResult,
};
use thiserror::Error;

/// How many bytes of failing input we retain for diagnostics.
const SNIPPET_LEN: usize = 16;

#[derive(Clone, Debug, Error)]
pub enum StringResolveError {
    #[error("string tag byte {0} is not a known encoding")]
    UnknownStringEncoding(u8),

    #[error("char value outside the accepted range: {0}")]
    InvalidCharacterArray(#[from] std::char::CharTryFromError),

    #[error("string payload is not valid UTF-8")]
    InvalidUtf8String(#[from] std::str::Utf8Error),

    #[error("string payload is not valid UTF-16")]
    InvalidUtf16String(String),
}

impl From<std::string::FromUtf16Error> for StringResolveError {
    fn from(value: std::string::FromUtf16Error) -> Self {
        Self::InvalidUtf16String(value.to_string())
    }
}

/// Error type threaded through the nom parsers.
///
/// We record how many bytes remained at the failure point rather than the
/// full input: the orchestrator turns the remaining count into an absolute
/// stream position when it knows the length of the buffer being parsed.
#[derive(Clone, Debug)]
pub struct NomParseError {
    /// Bytes left in the input when the parser failed.
    pub remaining: usize,
    /// Up to [SNIPPET_LEN] bytes from the failure point.
    pub snippet: Vec<u8>,
    pub kind: NomErrorKind,
    pub contexts: Vec<&'static str>,
    pub string_resolve: Option<StringResolveError>,
}

impl<'a> ParseError<&'a [u8]> for NomParseError {
    fn from_error_kind(input: &'a [u8], kind: NomErrorKind) -> Self {
        Self {
            remaining: input.len(),
            snippet: input[..input.len().min(SNIPPET_LEN)].to_vec(),
            kind,
            contexts: vec![],
            string_resolve: None,
        }
    }

    fn append(_: &'a [u8], _: NomErrorKind, other: Self) -> Self {
        other
    }
}

impl<'a> ContextError<&'a [u8]> for NomParseError {
    fn add_context(_input: &'a [u8], ctx: &'static str, mut other: Self) -> Self {
        other.contexts.push(ctx);

        other
    }
}

impl NomParseError {
    /// Construct an instance from a [StringResolveError].
    pub fn new_string_resolve(input: &[u8], error: StringResolveError) -> Self {
        Self {
            remaining: input.len(),
            snippet: input[..input.len().min(SNIPPET_LEN)].to_vec(),
            kind: NomErrorKind::Fail,
            contexts: vec![],
            string_resolve: Some(error),
        }
    }
}

pub type ParseResult<'a, T> = IResult<&'a [u8], T, NomParseError>;

/// Coarse classification of failures surfaced to consumers.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// Structurally invalid input: bad varint, bad string id, truncated
    /// field, impossible offsets, malformed metadata tree.
    Malformed,
    /// A reference to a type the chunk metadata does not declare.
    SchemaMismatch,
    /// Underlying I/O failed.
    Io,
    /// A caught panic or violated internal invariant.
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed => write!(f, "malformed"),
            Self::SchemaMismatch => write!(f, "schema mismatch"),
            Self::Io => write!(f, "i/o"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

#[derive(Clone, Debug, Error)]
pub enum Error {
    #[error("input ended mid-structure, {0:?} more needed")]
    ParseIncomplete(nom::Needed),

    #[error("unparseable input: {0:?}")]
    ParseError(NomParseError),

    #[error("unrecoverably bad input: {0:?}")]
    ParseFailure(NomParseError),

    #[error("i/o: {0}")]
    Io(String),

    #[error("string table has no entry {0}")]
    StringTableUnknownIndex(usize),

    #[error("metadata tree has an element named {0}, which is not a thing")]
    ElementNameUnknown(String),

    #[error("metadata element is inconsistent: {0}")]
    ElementConstructLogic(String),

    #[error("no class with id {0} in this chunk's metadata")]
    ClassNotFound(i64),

    #[error("type graph for class {0} exceeds the supported nesting depth")]
    TypeGraphTooDeep(i64),

    #[error("bad event structure: {0}")]
    EventParse(String),

    #[error("deserialization: {0}")]
    Deserialize(String),

    #[error("internal error: {0}")]
    Internal(String),

    /// A fatal failure scoped to one chunk of a recording.
    ///
    /// `position` is the offset within the chunk at which parsing stopped,
    /// best effort. The wrapped error retains the full detail.
    #[error("chunk {chunk_index} at offset {position}: {kind} error: {source}")]
    Chunk {
        chunk_index: u32,
        position: usize,
        kind: ErrorKind,
        source: Box<Error>,
    },
}

impl From<nom::Err<NomParseError>> for Error {
    fn from(value: nom::Err<NomParseError>) -> Self {
        match value {
            nom::Err::Incomplete(needed) => Self::ParseIncomplete(needed),
            nom::Err::Error(e) => Self::ParseError(e),
            nom::Err::Failure(e) => Self::ParseFailure(e),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl Error {
    /// The kind label for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ParseIncomplete(_)
            | Self::ParseError(_)
            | Self::ParseFailure(_)
            | Self::StringTableUnknownIndex(_)
            | Self::ElementNameUnknown(_)
            | Self::ElementConstructLogic(_)
            | Self::TypeGraphTooDeep(_)
            | Self::EventParse(_)
            | Self::Deserialize(_) => ErrorKind::Malformed,
            Self::ClassNotFound(_) => ErrorKind::SchemaMismatch,
            Self::Io(_) => ErrorKind::Io,
            Self::Internal(_) => ErrorKind::Internal,
            Self::Chunk { kind, .. } => *kind,
        }
    }

    /// Best-effort stream position for a parse error within a buffer of
    /// `buffer_len` bytes. Our parsers only ever advance, so the remaining
    /// byte count at the failure point locates the error.
    fn position(&self, buffer_len: usize) -> usize {
        match self {
            Self::ParseError(e) | Self::ParseFailure(e) => {
                buffer_len.saturating_sub(e.remaining)
            }
            _ => 0,
        }
    }

    /// Scope this error to a chunk, attaching index, position, and kind.
    pub(crate) fn into_chunk_error(self, chunk_index: u32, chunk_len: usize) -> Self {
        if let Self::Chunk { .. } = self {
            return self;
        }

        Self::Chunk {
            chunk_index,
            position: self.position(chunk_len),
            kind: self.kind(),
            source: Box::new(self),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
