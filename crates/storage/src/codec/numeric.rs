//! Fixed-width numeric codecs.
//!
//! All numbers are stored little-endian so the key ordering descriptor can
//! decode them without knowing which codec produced them.

use super::traits::{Codec, CodecError};

macro_rules! le_codec {
    ($(#[$doc:meta])* $name:ident, $ty:ty, $id:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, Default)]
        pub struct $name;

        impl Codec<$ty> for $name {
            fn encode(&self, value: &$ty) -> Vec<u8> {
                value.to_le_bytes().to_vec()
            }

            fn decode(&self, bytes: &[u8]) -> Result<$ty, CodecError> {
                const WIDTH: usize = std::mem::size_of::<$ty>();
                let raw: [u8; WIDTH] = bytes
                    .try_into()
                    .map_err(|_| CodecError::length($id, WIDTH, bytes.len()))?;
                Ok(<$ty>::from_le_bytes(raw))
            }

            fn codec_id(&self) -> &str {
                $id
            }
        }
    };
}

le_codec!(
    /// Single byte codec.
    ByteCodec, u8, "byte"
);
le_codec!(
    /// 16-bit signed integer codec.
    Int16Codec, i16, "int16"
);
le_codec!(
    /// 16-bit unsigned integer codec.
    UInt16Codec, u16, "uint16"
);
le_codec!(
    /// 32-bit signed integer codec.
    Int32Codec, i32, "int32"
);
le_codec!(
    /// 32-bit unsigned integer codec.
    UInt32Codec, u32, "uint32"
);
le_codec!(
    /// 64-bit signed integer codec. Also used for date-time and time-span ticks.
    Int64Codec, i64, "int64"
);
le_codec!(
    /// 64-bit unsigned integer codec.
    UInt64Codec, u64, "uint64"
);
le_codec!(
    /// IEEE-754 single precision codec.
    SingleCodec, f32, "single"
);
le_codec!(
    /// IEEE-754 double precision codec.
    DoubleCodec, f64, "double"
);
