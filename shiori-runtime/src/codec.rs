//! Wire codec helpers
//!
//! The plugin wire format is postcard: LEB128 varints for lengths and
//! enum tags, zigzag varints for signed integers, little-endian IEEE
//! floats, `(len, bytes)` strings, tag-byte options. Domain types carry
//! serde derives in wire order, so encoding and decoding go through
//! `postcard` directly; this module adds the linear-memory framing and
//! the few request shapes that exist only on the wire.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Length of the result-pointer header: an `i32` total length followed by
/// an `i32` capacity the reader ignores.
pub const RESULT_HEADER_LEN: usize = 8;

/// Read the payload behind a result pointer returned by a modern export.
///
/// Returns `None` for an empty payload: a non-positive pointer, a header
/// length of 8 or less, or a header that runs past the end of memory.
pub fn read_result_payload(memory: &[u8], ptr: i32) -> Option<Vec<u8>> {
    if ptr <= 0 {
        return None;
    }
    let start = ptr as usize;
    let header_end = start.checked_add(RESULT_HEADER_LEN)?;
    if header_end > memory.len() {
        return None;
    }
    let total = i32::from_le_bytes(memory[start..start + 4].try_into().ok()?);
    if total <= RESULT_HEADER_LEN as i32 {
        return None;
    }
    let end = start.checked_add(total as usize)?;
    if end > memory.len() {
        tracing::warn!(ptr, total, "result pointer runs past plugin memory");
        return None;
    }
    Some(memory[header_end..end].to_vec())
}

/// Encode a value to its postcard byte form.
pub fn encode<T: Serialize>(value: &T) -> Vec<u8> {
    // Encoding our own wire structs cannot fail short of allocation failure.
    postcard::to_allocvec(value).unwrap_or_default()
}

/// Decode a payload, logging and returning `None` on malformed input.
///
/// A malformed payload is a plugin bug rather than a caller-actionable
/// condition, so decode failures never escape past this boundary.
pub fn decode<T: for<'de> Deserialize<'de>>(bytes: &[u8], what: &'static str) -> Option<T> {
    match postcard::from_bytes(bytes) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(what, %err, len = bytes.len(), "failed to decode plugin payload");
            None
        }
    }
}

/// An image request produced by `get_image_request`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ImageRequest {
    pub url: Option<String>,
    pub headers: BTreeMap<String, String>,
}

/// The response description handed to `process_page_image`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageResponse {
    pub code: u16,
    pub headers: BTreeMap<String, String>,
    pub request_url: Option<String>,
    pub request_headers: BTreeMap<String, String>,
    /// Rid of the decoded image resource, zigzag-encoded.
    pub image: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zigzag_varint_bytes() {
        assert_eq!(postcard::to_allocvec(&0i32).unwrap(), vec![0x00]);
        assert_eq!(postcard::to_allocvec(&1i32).unwrap(), vec![0x02]);
        assert_eq!(postcard::to_allocvec(&-1i32).unwrap(), vec![0x01]);
        assert_eq!(postcard::to_allocvec(&100i32).unwrap(), vec![0xc8, 0x01]);
        assert_eq!(postcard::to_allocvec(&-100i32).unwrap(), vec![0xc7, 0x01]);
    }

    #[test]
    fn test_result_payload_framing() {
        let mut memory = vec![0u8; 64];
        // Header at offset 16: total length 11 -> 3 payload bytes.
        memory[16..20].copy_from_slice(&11i32.to_le_bytes());
        memory[20..24].copy_from_slice(&64i32.to_le_bytes());
        memory[24..27].copy_from_slice(b"abc");
        assert_eq!(read_result_payload(&memory, 16).unwrap(), b"abc");
    }

    #[test]
    fn test_result_payload_empty_cases() {
        let mut memory = vec![0u8; 32];
        assert!(read_result_payload(&memory, 0).is_none());
        assert!(read_result_payload(&memory, -1).is_none());
        // total == 8 means no payload
        memory[4..8].copy_from_slice(&8i32.to_le_bytes());
        assert!(read_result_payload(&memory, 4).is_none());
        // header past end of memory
        assert!(read_result_payload(&memory, 30).is_none());
    }

    #[test]
    fn test_image_response_roundtrip() {
        let response = ImageResponse {
            code: 200,
            headers: BTreeMap::from([("content-type".into(), "image/png".into())]),
            request_url: Some("https://x.y/p.png".into()),
            request_headers: BTreeMap::new(),
            image: 7,
        };
        let bytes = encode(&response);
        let back: ImageResponse = decode(&bytes, "image response").unwrap();
        assert_eq!(back, response);
    }

    #[test]
    fn test_decode_failure_is_none() {
        let garbage = [0xffu8, 0xff, 0xff];
        assert!(decode::<ImageRequest>(&garbage, "image request").is_none());
    }
}
