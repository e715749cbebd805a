//! Encoded values
//!
//! An [`EncodedValue`] is either bytes or null. Null is a tombstone: the key
//! is present but carries no value, which callers must tell apart from an
//! absent key (`KeyNotFound`). Empty bytes are a third, distinct state.

use std::fmt;
use std::sync::Arc;

/// Immutable, cheaply cloned value bytes, or null
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct EncodedValue(Option<Arc<[u8]>>);

impl EncodedValue {
    /// The null value
    pub fn null() -> Self {
        Self(None)
    }

    /// Wrap value bytes
    pub fn from_bytes(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self(Some(bytes.into()))
    }

    /// Whether this is the null value
    pub fn is_null(&self) -> bool {
        self.0.is_none()
    }

    /// Borrow the bytes, `None` if null
    pub fn as_bytes(&self) -> Option<&[u8]> {
        self.0.as_deref()
    }

    /// Copy the bytes out, `None` if null
    pub fn to_vec(&self) -> Option<Vec<u8>> {
        self.0.as_deref().map(<[u8]>::to_vec)
    }

    /// Byte length; null counts as zero
    pub fn len(&self) -> usize {
        self.0.as_ref().map_or(0, |b| b.len())
    }

    /// True for null and for empty bytes
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Vec<u8>> for EncodedValue {
    fn from(bytes: Vec<u8>) -> Self {
        Self::from_bytes(bytes)
    }
}

impl From<Option<Vec<u8>>> for EncodedValue {
    fn from(bytes: Option<Vec<u8>>) -> Self {
        Self(bytes.map(Arc::from))
    }
}

impl From<&[u8]> for EncodedValue {
    fn from(bytes: &[u8]) -> Self {
        Self::from_bytes(bytes)
    }
}

impl fmt::Debug for EncodedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            None => write!(f, "EncodedValue(null)"),
            Some(b) => write!(f, "EncodedValue({} bytes)", b.len()),
        }
    }
}
