//! zlib compression of stored payloads
//!
//! Compression is opportunistic on the write side: anything that fails or
//! does not shrink the payload is discarded and the value goes out as-is.
//! On the read side a value carrying the zlib flag must inflate or the read
//! fails.

use crate::error::{DecompressError, Error};

/// Initial inflate buffer size
pub const INFLATE_CHUNK: usize = 16 * 1024;

/// Upper bound on a single inflated value
pub const MAX_INFLATED_SIZE: usize = 64 * 1024 * 1024;

/// zlib's own default level
pub const DEFAULT_COMPRESS_LEVEL: u32 = 6;

/// Per-store compression settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompressionOptions {
    /// Payloads at least this long are compressed; 0 disables compression
    pub min_compress_len: usize,
    /// zlib level 0..=9, `None` for the zlib default
    pub level: Option<u32>,
}

impl CompressionOptions {
    pub fn new(min_compress_len: usize, level: Option<u32>) -> Self {
        Self {
            min_compress_len,
            level,
        }
    }

    /// Compression turned off
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Reject settings the stage cannot honor, before any I/O happens
    pub fn validate(&self) -> Result<(), Error> {
        if let Some(level) = self.level
            && level > 9
        {
            return Err(Error::Value(format!(
                "compress_level must be between 0 and 9, got {level}"
            )));
        }
        if self.min_compress_len > 0 && !is_supported() {
            return Err(Error::Value(
                "min_compress_len is set but zlib support is not compiled in".to_string(),
            ));
        }
        Ok(())
    }

    fn applies_to(&self, len: usize) -> bool {
        self.min_compress_len > 0 && self.level != Some(0) && len >= self.min_compress_len
    }
}

/// Whether zlib support was compiled in
pub fn is_supported() -> bool {
    cfg!(feature = "zlib")
}

/// Compress `data` when the options ask for it and it actually helps
pub fn maybe_compress(data: &[u8], options: &CompressionOptions) -> Option<Vec<u8>> {
    if !is_supported() || !options.applies_to(data.len()) {
        return None;
    }

    let compressed = deflate(data, options.level.unwrap_or(DEFAULT_COMPRESS_LEVEL))?;
    if compressed.len() >= data.len() {
        tracing::trace!(
            original = data.len(),
            compressed = compressed.len(),
            "discarding compression that did not shrink the value"
        );
        return None;
    }
    Some(compressed)
}

/// Inflate a zlib payload
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, DecompressError> {
    decompress_bounded(data, MAX_INFLATED_SIZE)
}

#[cfg(feature = "zlib")]
fn deflate(data: &[u8], level: u32) -> Option<Vec<u8>> {
    use flate2::Compression;
    use flate2::write::ZlibEncoder;
    use std::io::Write;

    let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len() / 2), Compression::new(level));
    match encoder.write_all(data).and_then(|()| encoder.finish()) {
        Ok(out) => Some(out),
        Err(e) => {
            tracing::warn!(error = %e, "deflate failed, storing value uncompressed");
            None
        }
    }
}

#[cfg(not(feature = "zlib"))]
fn deflate(_data: &[u8], _level: u32) -> Option<Vec<u8>> {
    None
}

#[cfg(feature = "zlib")]
pub(crate) fn decompress_bounded(data: &[u8], limit: usize) -> Result<Vec<u8>, DecompressError> {
    use flate2::{Decompress, FlushDecompress, Status};

    let mut inflater = Decompress::new(true);
    let mut out = Vec::with_capacity(INFLATE_CHUNK.min(limit));

    loop {
        let consumed = inflater.total_in() as usize;
        let produced = inflater.total_out();

        let status = inflater
            .decompress_vec(&data[consumed..], &mut out, FlushDecompress::Finish)
            .map_err(|e| DecompressError::Malformed(e.to_string()))?;

        match status {
            Status::StreamEnd => return Ok(out),
            Status::Ok | Status::BufError => {
                if out.len() == out.capacity() {
                    // Out of room: double, up to the limit
                    let capacity = out.capacity();
                    if capacity >= limit {
                        return Err(DecompressError::TooLarge { limit });
                    }
                    let target = capacity.saturating_mul(2).min(limit);
                    out.reserve_exact(target - out.len());
                } else if inflater.total_out() == produced
                    && inflater.total_in() as usize == consumed
                {
                    return Err(DecompressError::Malformed(
                        "truncated zlib stream".to_string(),
                    ));
                }
            }
        }
    }
}

#[cfg(not(feature = "zlib"))]
pub(crate) fn decompress_bounded(_data: &[u8], _limit: usize) -> Result<Vec<u8>, DecompressError> {
    Err(DecompressError::Unsupported)
}
