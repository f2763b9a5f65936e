//! Text conversion at the native boundary
//!
//! All text crossing into or out of telldus-core goes through these helpers.
//! The encoding is process-wide state, UTF-8 unless reconfigured.

use crate::error::Result;
use parking_lot::RwLock;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;

/// Byte encoding used for text crossing the native boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8,
    Latin1,
}

static ENCODING: RwLock<TextEncoding> = RwLock::new(TextEncoding::Utf8);

/// Set the process-wide text encoding for native calls.
pub fn set_string_encoding(encoding: TextEncoding) {
    *ENCODING.write() = encoding;
}

/// The currently configured text encoding.
pub fn string_encoding() -> TextEncoding {
    *ENCODING.read()
}

/// Encode a string parameter for a native call.
///
/// Interior nul bytes cannot be represented in a C string and fail with
/// `InvalidString`.
pub(crate) fn encode_str(text: &str) -> Result<CString> {
    let bytes = match string_encoding() {
        TextEncoding::Utf8 => text.as_bytes().to_vec(),
        TextEncoding::Latin1 => text
            .chars()
            .map(|c| if (c as u32) < 0x100 { c as u8 } else { b'?' })
            .collect(),
    };
    Ok(CString::new(bytes)?)
}

/// Decode bytes produced by the native library.
pub(crate) fn decode_bytes(bytes: &[u8]) -> String {
    match string_encoding() {
        TextEncoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
        TextEncoding::Latin1 => bytes.iter().map(|&b| b as char).collect(),
    }
}

/// Decode a NUL-terminated fixed-size output buffer.
pub(crate) fn decode_buffer(buf: &[u8]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    decode_bytes(&buf[..end])
}

/// Decode a nullable C string pointer without taking ownership.
///
/// # Safety
/// `ptr` must be NULL or point to a valid NUL-terminated string.
pub(crate) unsafe fn decode_ptr(ptr: *const c_char) -> String {
    if ptr.is_null() {
        return String::new();
    }
    decode_bytes(CStr::from_ptr(ptr).to_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utf8_roundtrip() {
        let encoded = encode_str("åäö").unwrap();
        assert_eq!(decode_bytes(encoded.as_bytes()), "åäö");
    }

    #[test]
    fn test_interior_nul_rejected() {
        assert!(encode_str("a\0b").is_err());
    }

    #[test]
    fn test_decode_buffer_stops_at_nul() {
        let buf = [b'a', b'b', 0, b'c', 0];
        assert_eq!(decode_buffer(&buf), "ab");
    }

    #[test]
    fn test_decode_buffer_without_nul_takes_all() {
        let buf = [b'x'; 4];
        assert_eq!(decode_buffer(&buf), "xxxx");
    }

    #[test]
    fn test_latin1() {
        let _guard = crate::mock::test_guard();
        set_string_encoding(TextEncoding::Latin1);
        let encoded = encode_str("café").unwrap();
        assert_eq!(encoded.as_bytes(), b"caf\xe9");
        assert_eq!(decode_bytes(b"caf\xe9"), "café");
        // Characters outside Latin-1 degrade to '?'
        assert_eq!(encode_str("€").unwrap().as_bytes(), b"?");
        set_string_encoding(TextEncoding::Utf8);
    }
}
