// Copyright 2023 Gregory Szorc.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Common functionality.
//!
//! JFR integers are LEB-128 encoded with a twist: the encoding is capped at
//! 9 bytes and the 9th byte contributes all 8 of its bits. The longest
//! possible varint therefore always terminates; the only undecodable input
//! is a truncated one.

use crate::error::ParseResult;
use nom::number::streaming::be_i8;

/// Decode one varint, consuming at most 9 bytes.
///
/// With the `swar-varint` feature (default) and at least 9 bytes of input,
/// the stop byte is located from the continuation bit bitmap of a single
/// 8-byte word instead of a per-byte branch. Shorter inputs always use the
/// sequential path.
#[inline]
pub fn leb128_u64(s: &[u8]) -> ParseResult<u64> {
    #[cfg(feature = "swar-varint")]
    if s.len() >= 9 {
        return leb128_u64_swar(s);
    }

    leb128_u64_sequential(s)
}

/// The byte-at-a-time decoding loop.
pub fn leb128_u64_sequential(mut s: &[u8]) -> ParseResult<u64> {
    let mut res = 0u64;

    let mut x: i8;

    for i in 0..8 {
        (s, x) = be_i8(s)?;

        res |= ((x as u64) & 0x7f) << (7 * i);
        if x >= 0 {
            return Ok((s, res));
        }
    }

    let (s, x) = be_i8(s)?;
    res |= (x as u8 as u64) << 56;

    Ok((s, res))
}

/// Decode from a buffer known to hold at least 9 bytes.
#[cfg(feature = "swar-varint")]
fn leb128_u64_swar(s: &[u8]) -> ParseResult<u64> {
    let mut word = [0u8; 8];
    word.copy_from_slice(&s[..8]);
    let word = u64::from_le_bytes(word);

    // A zero continuation bit marks the stop byte.
    let stops = !word & 0x8080_8080_8080_8080;

    if stops != 0 {
        let stop = (stops.trailing_zeros() >> 3) as usize;

        let mut res = 0u64;
        for (i, x) in s[..=stop].iter().enumerate() {
            res |= ((*x as u64) & 0x7f) << (7 * i);
        }

        Ok((&s[stop + 1..], res))
    } else {
        let mut res = 0u64;
        for (i, x) in s[..8].iter().enumerate() {
            res |= ((*x as u64) & 0x7f) << (7 * i);
        }
        res |= (s[8] as u64) << 56;

        Ok((&s[9..], res))
    }
}

pub fn leb128_i64(s: &[u8]) -> ParseResult<i64> {
    let (s, x) = leb128_u64(s)?;

    Ok((s, x as i64))
}

pub fn leb128_i16(s: &[u8]) -> ParseResult<i16> {
    let (s, x) = leb128_u64(s)?;

    Ok((s, x as i16))
}

pub fn leb128_i32(s: &[u8]) -> ParseResult<i32> {
    let (s, x) = leb128_u64(s)?;

    Ok((s, x as i32))
}
