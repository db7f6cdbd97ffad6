//! zlib compression of plaintext payloads.

use crate::error::{CryptoError, CryptoResult};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read, Write};

/// Compresses `data` with zlib at `level` (0-9).
pub fn compress(data: &[u8], level: u32) -> CryptoResult<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len() / 4), Compression::new(level));
    encoder
        .write_all(data)
        .map_err(|e| CryptoError::Compress(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| CryptoError::Compress(e.to_string()))
}

/// Inflates zlib data.
pub fn decompress(data: &[u8]) -> CryptoResult<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::with_capacity(data.len().saturating_mul(4));
    decoder
        .read_to_end(&mut out)
        .map_err(|e| CryptoError::Decompress(e.to_string()))?;
    Ok(out)
}
