//! String codecs.

use super::traits::{Codec, CodecError};

/// UTF-16LE string codec.
///
/// The default encoding for `KeyDataType::String` keys; ordinal comparison
/// of keys compares UTF-16 code units.
#[derive(Debug, Clone, Copy, Default)]
pub struct Utf16StringCodec;

impl Codec<String> for Utf16StringCodec {
    fn encode(&self, value: &String) -> Vec<u8> {
        let mut out = Vec::with_capacity(value.len() * 2);
        for unit in value.encode_utf16() {
            out.extend_from_slice(&unit.to_le_bytes());
        }
        out
    }

    fn decode(&self, bytes: &[u8]) -> Result<String, CodecError> {
        if bytes.len() % 2 != 0 {
            return Err(CodecError::DecodeError(format!(
                "utf-16 payload has odd length {}",
                bytes.len()
            )));
        }
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16(&units).map_err(|e| CodecError::DecodeError(e.to_string()))
    }

    fn codec_id(&self) -> &str {
        "utf16"
    }
}

/// UTF-8 string codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct Utf8StringCodec;

impl Codec<String> for Utf8StringCodec {
    fn encode(&self, value: &String) -> Vec<u8> {
        value.as_bytes().to_vec()
    }

    fn decode(&self, bytes: &[u8]) -> Result<String, CodecError> {
        String::from_utf8(bytes.to_vec()).map_err(|e| CodecError::DecodeError(e.to_string()))
    }

    fn codec_id(&self) -> &str {
        "utf8"
    }
}
