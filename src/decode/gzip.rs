//! gzip unwrapping for compressed activity archives

use super::ActivityFormat;
use crate::error::DecodeError;
use flate2::read::GzDecoder;
use std::borrow::Cow;
use std::io::Read;

pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

pub fn is_gzip(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[..2] == GZIP_MAGIC
}

/// Inflate `bytes` when they carry the gzip magic, otherwise borrow them as-is.
///
/// A damaged archive is reported as `Decompression`, never as a parse error of
/// the inner format.
pub fn maybe_decompress(bytes: &[u8], format: ActivityFormat) -> Result<Cow<'_, [u8]>, DecodeError> {
    if !is_gzip(bytes) {
        return Ok(Cow::Borrowed(bytes));
    }

    let mut decoder = GzDecoder::new(bytes);
    let mut inflated = Vec::with_capacity(bytes.len() * 4);
    decoder
        .read_to_end(&mut inflated)
        .map_err(|e| DecodeError::Decompression {
            format,
            reason: e.to_string(),
        })?;

    tracing::trace!(
        compressed = bytes.len(),
        inflated = inflated.len(),
        "Inflated gzip payload"
    );
    Ok(Cow::Owned(inflated))
}
