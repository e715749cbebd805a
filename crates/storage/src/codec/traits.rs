//! Codec trait definitions.

use relistore_core::Error;

/// Key/value codec trait.
///
/// Every key and value passing into a keyed store goes through a codec.
/// A codec is a bijection over its supported domain:
/// `decode(&encode(x)) == x`.
///
/// # Thread Safety
///
/// Codecs must be `Send + Sync` so one instance can serve every concurrent
/// caller of a store.
///
/// # Codec Identity
///
/// Each codec has an identifier used in diagnostics and in the typed
/// store's tracing spans.
pub trait Codec<T>: Send + Sync {
    /// Encode a value into its byte form.
    fn encode(&self, value: &T) -> Vec<u8>;

    /// Decode bytes produced by [`Codec::encode`].
    ///
    /// Returns an error if the bytes are not a valid encoding for `T`.
    fn decode(&self, bytes: &[u8]) -> Result<T, CodecError>;

    /// Unique codec identifier.
    fn codec_id(&self) -> &str;
}

/// Codec errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// Byte length does not match what the codec requires.
    #[error("Invalid length for {codec}: expected {expected}, got {actual}")]
    InvalidLength {
        /// Codec that rejected the input
        codec: String,
        /// Required length
        expected: usize,
        /// Supplied length
        actual: usize,
    },

    /// Bytes are well sized but not a valid encoding (bad UTF-8, odd UTF-16, ...).
    #[error("Decode error: {0}")]
    DecodeError(String),
}

impl CodecError {
    pub(crate) fn length(codec: &str, expected: usize, actual: usize) -> Self {
        CodecError::InvalidLength {
            codec: codec.to_string(),
            expected,
            actual,
        }
    }
}

impl From<CodecError> for Error {
    fn from(e: CodecError) -> Self {
        Error::Codec(e.to_string())
    }
}
