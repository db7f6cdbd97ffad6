//! Incremental base64 for large buffers.
//!
//! Buffers are encoded slice by slice into one growing string rather than in
//! a single whole-buffer call. Encode slices are a multiple of 3 bytes and
//! decode slices a multiple of 4 characters, so the slice boundaries never
//! fall inside a base64 quantum and the output is identical to a one-shot
//! encoding.

use crate::error::{CryptoError, CryptoResult};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// Raw bytes per encode step (multiple of 3).
const ENCODE_SLICE: usize = 3 * 16 * 1024;
/// Characters per decode step (multiple of 4).
const DECODE_SLICE: usize = 4 * 16 * 1024;

/// Encodes `data` as padded standard base64.
#[must_use]
pub fn encode_base64(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len().div_ceil(3) * 4);
    for slice in data.chunks(ENCODE_SLICE) {
        STANDARD.encode_string(slice, &mut out);
    }
    out
}

/// Decodes padded standard base64 produced by [`encode_base64`].
pub fn decode_base64(encoded: &str) -> CryptoResult<Vec<u8>> {
    let bytes = encoded.as_bytes();
    if bytes.len() % 4 != 0 {
        return Err(CryptoError::malformed(format!(
            "base64 length {} is not a multiple of 4",
            bytes.len()
        )));
    }
    // Padding is only legal in the final quantum.
    if let Some(pos) = bytes.iter().position(|&b| b == b'=') {
        if pos + 2 < bytes.len() {
            return Err(CryptoError::malformed("base64 padding before end of input"));
        }
    }

    let mut out = Vec::with_capacity(bytes.len() / 4 * 3);
    for slice in bytes.chunks(DECODE_SLICE) {
        STANDARD
            .decode_vec(slice, &mut out)
            .map_err(|e| CryptoError::malformed(format!("invalid base64: {e}")))?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn matches_one_shot_encoding_across_slice_boundaries() {
        let data: Vec<u8> = (0..(ENCODE_SLICE * 2 + 7)).map(|i| (i * 31 % 251) as u8).collect();
        let incremental = encode_base64(&data);
        assert_eq!(incremental, STANDARD.encode(&data));
        assert_eq!(decode_base64(&incremental).unwrap(), data);
    }

    #[test]
    fn rejects_bad_length() {
        assert!(matches!(decode_base64("abc"), Err(CryptoError::Malformed(_))));
    }

    #[test]
    fn rejects_inner_padding() {
        assert!(decode_base64("QQ==QUJD").is_err());
    }

    #[test]
    fn rejects_non_alphabet() {
        assert!(decode_base64("@@@@").is_err());
    }

    proptest! {
        #[test]
        fn roundtrip(data in prop::collection::vec(any::<u8>(), 0..4096)) {
            prop_assert_eq!(decode_base64(&encode_base64(&data)).unwrap(), data);
        }
    }
}
