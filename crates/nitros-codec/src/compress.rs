//! Bounded zstd sections shared by the image and point cloud codecs.

use std::io::{Cursor, Read};

use crate::error::{CodecError, Result};

/// Largest size a compressed section may declare once inflated. Matches the
/// default frame payload limit.
pub const MAX_INFLATED: usize = nitros_frame::DEFAULT_MAX_PAYLOAD;

pub(crate) fn deflate(raw: &[u8], level: i32) -> Result<Vec<u8>> {
    Ok(zstd::encode_all(Cursor::new(raw), level)?)
}

/// Inflate a section declared to hold `expected` bytes.
///
/// Reads at most `expected + 1` bytes, so an oversized body shows up as a
/// length mismatch without being fully decompressed.
pub(crate) fn inflate(body: &[u8], expected: usize) -> Result<Vec<u8>> {
    if expected > MAX_INFLATED {
        return Err(CodecError::Corrupt(format!(
            "compressed section declares {expected} bytes, limit is {MAX_INFLATED}"
        )));
    }
    let decoder = zstd::stream::read::Decoder::new(Cursor::new(body))?;
    let mut out = Vec::with_capacity(expected);
    decoder.take(expected as u64 + 1).read_to_end(&mut out)?;
    Ok(out)
}
