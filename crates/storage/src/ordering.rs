//! Key ordering descriptor
//!
//! A [`KeyComparisonDescription`] fixes the total order of encoded keys in a
//! store: which data type the key bytes hold, whether string comparison is
//! culture aware, the maximum key size and whether keys are fixed length.
//!
//! Numeric keys are expected in the little-endian form produced by the
//! numeric codecs; string keys in UTF-16LE (`String`) or UTF-8 (`Utf8String`).

use relistore_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Data type carried by key bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyDataType {
    /// Unset; rejected by validation
    Invalid,
    /// Opaque bytes, ordinal order
    Binary,
    /// u8
    Byte,
    /// UTF-16 code unit
    Char,
    /// i64 ticks
    DateTime,
    /// i64 ticks
    TimeSpan,
    /// i16
    Int16,
    /// u16
    UInt16,
    /// i32
    Int32,
    /// u32
    UInt32,
    /// i64
    Int64,
    /// u64
    UInt64,
    /// f32
    Single,
    /// f64
    Double,
    /// 16-byte GUID, ordinal order
    Guid,
    /// UTF-16LE string
    String,
    /// UTF-8 string
    Utf8String,
}

impl KeyDataType {
    /// Encoded width of fixed-width types, `None` for variable-length ones
    pub fn fixed_width(&self) -> Option<usize> {
        match self {
            KeyDataType::Byte => Some(1),
            KeyDataType::Char | KeyDataType::Int16 | KeyDataType::UInt16 => Some(2),
            KeyDataType::Int32 | KeyDataType::UInt32 | KeyDataType::Single => Some(4),
            KeyDataType::DateTime
            | KeyDataType::TimeSpan
            | KeyDataType::Int64
            | KeyDataType::UInt64
            | KeyDataType::Double => Some(8),
            KeyDataType::Guid => Some(16),
            KeyDataType::Invalid
            | KeyDataType::Binary
            | KeyDataType::String
            | KeyDataType::Utf8String => None,
        }
    }

    /// Whether culture-aware comparison applies to this type
    pub fn is_string(&self) -> bool {
        matches!(self, KeyDataType::String | KeyDataType::Utf8String)
    }
}

impl fmt::Display for KeyDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

fn default_data_type() -> KeyDataType {
    KeyDataType::Binary
}

fn default_maximum_key_size() -> u32 {
    1024
}

/// Describes how keys are compared and bounded.
///
/// # Example
///
/// ```toml
/// [key_comparison]
/// data_type = "Int32"
/// maximum_key_size = 4
/// is_fixed_length = true
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyComparisonDescription {
    /// Type of the key bytes
    #[serde(default = "default_data_type")]
    pub data_type: KeyDataType,
    /// Culture name for string keys; `None` means ordinal comparison
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub culture: Option<String>,
    /// Upper bound on encoded key length in bytes
    #[serde(default = "default_maximum_key_size")]
    pub maximum_key_size: u32,
    /// Every key is exactly `maximum_key_size` bytes
    #[serde(default)]
    pub is_fixed_length: bool,
}

impl Default for KeyComparisonDescription {
    fn default() -> Self {
        Self {
            data_type: default_data_type(),
            culture: None,
            maximum_key_size: default_maximum_key_size(),
            is_fixed_length: false,
        }
    }
}

impl KeyComparisonDescription {
    /// Descriptor for a fixed-width type with `maximum_key_size` set to its width
    ///
    /// Falls back to the default size for variable-length types.
    pub fn for_type(data_type: KeyDataType) -> Self {
        match data_type.fixed_width() {
            Some(width) => Self {
                data_type,
                culture: None,
                maximum_key_size: width as u32,
                is_fixed_length: true,
            },
            None => Self {
                data_type,
                ..Self::default()
            },
        }
    }

    /// Set the culture used for string comparison
    pub fn with_culture(mut self, culture: impl Into<String>) -> Self {
        self.culture = Some(culture.into());
        self
    }

    /// Set the maximum key size
    pub fn with_maximum_key_size(mut self, size: u32) -> Self {
        self.maximum_key_size = size;
        self
    }

    /// Check the descriptor is internally consistent
    ///
    /// # Errors
    /// `InvalidConfiguration` when the data type is `Invalid`, the maximum
    /// key size is zero or smaller than a fixed-width type's width, or a
    /// culture is set to an empty name.
    pub fn validate(&self) -> Result<()> {
        if self.data_type == KeyDataType::Invalid {
            return Err(Error::InvalidConfiguration(
                "key data type is Invalid".to_string(),
            ));
        }
        if self.maximum_key_size == 0 {
            return Err(Error::InvalidConfiguration(
                "maximum key size must be greater than zero".to_string(),
            ));
        }
        if let Some(width) = self.data_type.fixed_width() {
            if (self.maximum_key_size as usize) < width {
                return Err(Error::InvalidConfiguration(format!(
                    "maximum key size {} is smaller than the {} width of {}",
                    self.maximum_key_size, self.data_type, width
                )));
            }
        }
        if let Some(culture) = &self.culture {
            if culture.trim().is_empty() {
                return Err(Error::InvalidConfiguration(
                    "culture name must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Check that an encoded key fits this descriptor
    ///
    /// # Errors
    /// `InvalidArgument` for empty or oversized keys, or keys whose length
    /// does not match a fixed width.
    pub fn validate_key(&self, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::InvalidArgument("key must not be empty".to_string()));
        }
        if key.len() > self.maximum_key_size as usize {
            return Err(Error::InvalidArgument(format!(
                "key of {} bytes exceeds maximum key size {}",
                key.len(),
                self.maximum_key_size
            )));
        }
        if let Some(width) = self.data_type.fixed_width() {
            if key.len() != width {
                return Err(Error::InvalidArgument(format!(
                    "{} key must be {} bytes, got {}",
                    self.data_type,
                    width,
                    key.len()
                )));
            }
        } else if self.is_fixed_length && key.len() != self.maximum_key_size as usize {
            return Err(Error::InvalidArgument(format!(
                "fixed-length key must be {} bytes, got {}",
                self.maximum_key_size,
                key.len()
            )));
        }
        if self.data_type == KeyDataType::String && key.len() % 2 != 0 {
            return Err(Error::InvalidArgument(
                "utf-16 key has odd length".to_string(),
            ));
        }
        Ok(())
    }

    /// Total order over two encoded keys
    pub fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        match self.data_type {
            KeyDataType::Byte => cmp_fixed::<1, _>(a, b, |r| r[0]),
            KeyDataType::Char | KeyDataType::UInt16 => cmp_fixed(a, b, u16::from_le_bytes),
            KeyDataType::Int16 => cmp_fixed(a, b, i16::from_le_bytes),
            KeyDataType::Int32 => cmp_fixed(a, b, i32::from_le_bytes),
            KeyDataType::UInt32 => cmp_fixed(a, b, u32::from_le_bytes),
            KeyDataType::DateTime | KeyDataType::TimeSpan | KeyDataType::Int64 => {
                cmp_fixed(a, b, i64::from_le_bytes)
            }
            KeyDataType::UInt64 => cmp_fixed(a, b, u64::from_le_bytes),
            KeyDataType::Single => cmp_fixed(a, b, |r: [u8; 4]| {
                TotalF32(f32::from_le_bytes(r))
            }),
            KeyDataType::Double => cmp_fixed(a, b, |r: [u8; 8]| {
                TotalF64(f64::from_le_bytes(r))
            }),
            KeyDataType::String => self.compare_utf16(a, b),
            KeyDataType::Utf8String => self.compare_utf8(a, b),
            KeyDataType::Binary | KeyDataType::Guid | KeyDataType::Invalid => a.cmp(b),
        }
    }

    fn compare_utf16(&self, a: &[u8], b: &[u8]) -> Ordering {
        let ordinal = || utf16_units(a).cmp(utf16_units(b));
        if self.culture.is_none() {
            return ordinal();
        }
        let la = String::from_utf16_lossy(&utf16_units(a).collect::<Vec<_>>()).to_lowercase();
        let lb = String::from_utf16_lossy(&utf16_units(b).collect::<Vec<_>>()).to_lowercase();
        la.cmp(&lb).then_with(ordinal)
    }

    fn compare_utf8(&self, a: &[u8], b: &[u8]) -> Ordering {
        if self.culture.is_none() {
            return a.cmp(b);
        }
        let la = String::from_utf8_lossy(a).to_lowercase();
        let lb = String::from_utf8_lossy(b).to_lowercase();
        la.cmp(&lb).then_with(|| a.cmp(b))
    }
}

fn utf16_units(bytes: &[u8]) -> impl Iterator<Item = u16> + '_ {
    bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
}

fn cmp_fixed<const N: usize, T: Ord>(a: &[u8], b: &[u8], read: fn([u8; N]) -> T) -> Ordering {
    match (<[u8; N]>::try_from(a), <[u8; N]>::try_from(b)) {
        (Ok(x), Ok(y)) => read(x).cmp(&read(y)),
        // Malformed widths never reach a store; order them bytewise.
        _ => a.cmp(b),
    }
}

#[derive(PartialEq)]
struct TotalF32(f32);

impl Eq for TotalF32 {}

impl PartialOrd for TotalF32 {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TotalF32 {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

#[derive(PartialEq)]
struct TotalF64(f64);

impl Eq for TotalF64 {}

impl PartialOrd for TotalF64 {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TotalF64 {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// An encoded key paired with the descriptor that orders it
///
/// This is the map key of a store's entry table, so the ordered map follows
/// the descriptor instead of raw byte order.
#[derive(Clone)]
pub struct SortKey {
    bytes: Arc<[u8]>,
    order: Arc<KeyComparisonDescription>,
}

impl SortKey {
    /// Pair key bytes with an ordering
    pub fn new(bytes: Arc<[u8]>, order: Arc<KeyComparisonDescription>) -> Self {
        Self { bytes, order }
    }

    /// Encoded key bytes
    pub fn bytes(&self) -> &Arc<[u8]> {
        &self.bytes
    }
}

impl fmt::Debug for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SortKey({})", Error::describe_key(&self.bytes))
    }
}

impl PartialEq for SortKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SortKey {}

impl PartialOrd for SortKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SortKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.order.compare(&self.bytes, &other.bytes)
    }
}
