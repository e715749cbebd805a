//! Byte-oriented codecs.
//!
//! `BinaryCodec` passes bytes through unchanged; `UuidCodec` stores a GUID
//! as its 16 raw bytes.

use super::traits::{Codec, CodecError};
use uuid::Uuid;

/// Binary codec - no transformation.
///
/// Bytes pass through unchanged. Used for `KeyDataType::Binary` keys and
/// opaque values.
///
/// # Example
///
/// ```
/// use relistore_storage::codec::{BinaryCodec, Codec};
///
/// let codec = BinaryCodec;
/// let data = b"hello world".to_vec();
///
/// let encoded = codec.encode(&data);
/// assert_eq!(data, encoded);
///
/// let decoded = codec.decode(&encoded).unwrap();
/// assert_eq!(data, decoded);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryCodec;

impl Codec<Vec<u8>> for BinaryCodec {
    fn encode(&self, value: &Vec<u8>) -> Vec<u8> {
        value.clone()
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(bytes.to_vec())
    }

    fn codec_id(&self) -> &str {
        "binary"
    }
}

/// GUID codec, 16 bytes in RFC 4122 byte order.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidCodec;

impl Codec<Uuid> for UuidCodec {
    fn encode(&self, value: &Uuid) -> Vec<u8> {
        value.as_bytes().to_vec()
    }

    fn decode(&self, bytes: &[u8]) -> Result<Uuid, CodecError> {
        Uuid::from_slice(bytes).map_err(|_| CodecError::length("guid", 16, bytes.len()))
    }

    fn codec_id(&self) -> &str {
        "guid"
    }
}
