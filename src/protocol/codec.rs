//! Hex payload codec.
//!
//! Sockets are configured for hex receive mode, so every payload the modem
//! reports (`SRING` inline data, `#SRECV` responses) arrives as ASCII hex.

use crate::error::{Error, Result};

/// Decodes an ASCII hex payload into raw bytes.
///
/// Accepts upper- and lower-case digits.
///
/// # Errors
///
/// Returns [`Error::MalformedNotification`] for odd lengths or non-hex digits.
pub fn decode_hex(payload: &[u8]) -> Result<Vec<u8>> {
    hex::decode(payload).map_err(|e| {
        Error::malformed_notification(format!(
            "{e}: {}",
            String::from_utf8_lossy(&payload[..payload.len().min(32)])
        ))
    })
}

/// Encodes raw bytes as upper-case ASCII hex, the way the modem reports them.
#[must_use]
pub fn encode_hex(data: &[u8]) -> String {
    hex::encode_upper(data)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    #[test]
    fn test_decode_mixed_case() {
        assert_eq!(decode_hex(b"48656c6C6F").expect("decode"), b"hello");
    }

    #[test]
    fn test_decode_empty() {
        assert!(decode_hex(b"").expect("decode").is_empty());
    }

    #[test]
    fn test_decode_odd_length() {
        let err = decode_hex(b"ABC").unwrap_err();
        assert!(matches!(err, Error::MalformedNotification { .. }));
    }

    #[test]
    fn test_decode_non_hex() {
        assert!(decode_hex(b"ZZ").is_err());
    }

    #[test]
    fn test_every_byte_value() {
        let all: Vec<u8> = (0..=255).collect();
        assert_eq!(decode_hex(encode_hex(&all).as_bytes()).expect("decode"), all);
    }

    proptest! {
        #[test]
        fn prop_hex_round_trip(data in proptest::collection::vec(any::<u8>(), 0..512)) {
            let encoded = encode_hex(&data);
            prop_assert_eq!(encoded.len(), data.len() * 2);
            prop_assert_eq!(decode_hex(encoded.as_bytes()).unwrap(), data);
        }
    }
}
