//! Key and value codecs.
//!
//! A keyed store only ever sees bytes. The codec seam lets any key or value
//! type be composed with the store: the typed [`Btree`](crate::Btree) facade
//! receives one codec for keys and one for values at construction and runs
//! every argument and result through them.
//!
//! Provided codecs:
//!
//! - `BinaryCodec`: pass-through for `Vec<u8>`
//! - `UuidCodec`: 16 raw bytes
//! - Numeric codecs (`Int32Codec`, `UInt64Codec`, `DoubleCodec`, ...): little-endian
//! - `Utf16StringCodec` / `Utf8StringCodec`
//!
//! # Usage
//!
//! ```
//! use relistore_storage::codec::{Codec, Int32Codec};
//!
//! let codec = Int32Codec;
//! let encoded = codec.encode(&5);
//! assert_eq!(codec.decode(&encoded).unwrap(), 5);
//! ```

mod binary;
mod numeric;
mod text;
mod traits;

pub use binary::{BinaryCodec, UuidCodec};
pub use numeric::{
    ByteCodec, DoubleCodec, Int16Codec, Int32Codec, Int64Codec, SingleCodec, UInt16Codec,
    UInt32Codec, UInt64Codec,
};
pub use text::{Utf16StringCodec, Utf8StringCodec};
pub use traits::{Codec, CodecError};
