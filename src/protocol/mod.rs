//! Value decoding for the characteristics read from a key-input device.

pub mod decode;

pub use decode::{decode_big_endian_uint, decode_utf8, SystemId};
