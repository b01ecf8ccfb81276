//! Characteristic value decoding.
//!
//! Turns raw characteristic values into the text and integers shown for a
//! device: the Generic Access device name and the Device Information system id.

use std::fmt;

use crate::error::{Error, Result};

/// Decode a characteristic value as UTF-8 text.
///
/// Invalid UTF-8 is rejected rather than replaced.
///
/// # Example
///
/// ```
/// use key_input_gatt::protocol::decode_utf8;
///
/// assert_eq!(decode_utf8(&[0x41, 0x42]).unwrap(), "AB");
/// assert!(decode_utf8(&[0xff]).is_err());
/// ```
pub fn decode_utf8(bytes: &[u8]) -> Result<String> {
    std::str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(|e| Error::Decode {
            context: format!("invalid UTF-8 at byte {}", e.valid_up_to()),
        })
}

/// Fold a byte sequence into a big-endian unsigned integer.
///
/// Each step computes `(acc << 8) | byte` on a 64-bit accumulator, so for
/// inputs longer than eight bytes only the last eight survive.
///
/// # Example
///
/// ```
/// use key_input_gatt::protocol::decode_big_endian_uint;
///
/// assert_eq!(decode_big_endian_uint(&[0x01, 0x02]), 0x0102);
/// assert_eq!(decode_big_endian_uint(&[]), 0);
/// ```
pub fn decode_big_endian_uint(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .fold(0u64, |acc, &byte| (acc << 8) | u64::from(byte))
}

/// Device Information System ID, decoded as a big-endian integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SystemId(pub u64);

impl SystemId {
    /// Decode a raw System ID characteristic value.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(decode_big_endian_uint(bytes))
    }

    /// The raw integer value.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SystemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016X}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_decode_utf8_valid() {
        assert_eq!(decode_utf8(b"Key Pad").unwrap(), "Key Pad");
        assert_eq!(decode_utf8(&[]).unwrap(), "");
    }

    #[test]
    fn test_decode_utf8_invalid() {
        let err = decode_utf8(&[0x41, 0xc3, 0x28]).unwrap_err();
        assert!(matches!(err, Error::Decode { .. }));
        assert!(err.to_string().contains("byte 1"));
    }

    #[test]
    fn test_decode_big_endian_uint() {
        assert_eq!(decode_big_endian_uint(&[0x01, 0x02]), 0x0102);
        assert_eq!(decode_big_endian_uint(&[]), 0);
        assert_eq!(
            decode_big_endian_uint(&[0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07]),
            0x0001_0203_0405_0607
        );
    }

    #[test]
    fn test_decode_big_endian_uint_truncates_beyond_64_bits() {
        let bytes = [0xAA, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
        assert_eq!(decode_big_endian_uint(&bytes), 0x0102_0304_0506_0708);
    }

    #[test]
    fn test_system_id_display() {
        let id = SystemId::from_bytes(&[0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07]);
        assert_eq!(id.to_string(), "0001020304050607");
        assert_eq!(SystemId(0xab).to_string(), "00000000000000AB");
    }

    proptest! {
        #[test]
        fn prop_fold_matches_be_bytes(bytes in proptest::collection::vec(any::<u8>(), 0..=8)) {
            let mut padded = [0u8; 8];
            padded[8 - bytes.len()..].copy_from_slice(&bytes);
            prop_assert_eq!(decode_big_endian_uint(&bytes), u64::from_be_bytes(padded));
        }

        #[test]
        fn prop_fold_keeps_last_eight_bytes(bytes in proptest::collection::vec(any::<u8>(), 8..32)) {
            let tail = &bytes[bytes.len() - 8..];
            prop_assert_eq!(decode_big_endian_uint(&bytes), decode_big_endian_uint(tail));
        }

        #[test]
        fn prop_utf8_roundtrip(text in ".*") {
            prop_assert_eq!(decode_utf8(text.as_bytes()).unwrap(), text);
        }
    }
}
