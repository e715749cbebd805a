//! Redo/undo log records
//!
//! Every successful mutation of a keyed store returns a [`RedoUndo`] pair.
//! Each half is an [`OperationData`]: an ordered list of opaque buffers that
//! a replica feeds back into [`BtreeStore::apply`](crate::BtreeStore::apply).
//!
//! ## Record Format
//!
//! ```text
//! buffer 0 (header, 24 bytes):
//!   [version: u8][op: u8][flags: u8][reserved: u8]
//!   [sequence_number: u64][conditional_offset: u32][partial_update_offset: u32]
//!   [crc32: u32]
//! buffer 1..: key, value, conditional value, then entry key/value pairs
//! ```
//!
//! - All integers are little-endian
//! - **crc32** covers header bytes 0..20, the buffer count, then each later
//!   buffer as `[len: u32][bytes]`
//! - Entry value buffers carry a one-byte presence prefix (0 = null, 1 = bytes)
//! - A null value is flagged and has no buffer of its own

use crate::value::EncodedValue;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher;
use relistore_core::{Error, Result, SequenceNumber};
use std::io::Cursor;

/// Current record format version
pub const FORMAT_VERSION: u8 = 1;

/// Size of the header buffer
pub const HEADER_SIZE: usize = 24;

const CRC_OFFSET: usize = 20;

const FLAG_HAS_KEY: u8 = 0x01;
const FLAG_HAS_VALUE: u8 = 0x02;
const FLAG_VALUE_NULL: u8 = 0x04;
const FLAG_HAS_CONDITIONAL: u8 = 0x08;
const FLAG_HAS_ENTRIES: u8 = 0x10;

/// Logical operation carried by a log record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OperationType {
    /// Insert of a new key
    Insert = 1,
    /// Removal of a key
    Delete = 2,
    /// Replacement of a present key's value
    Update = 3,
    /// Overwrite of a byte range inside a present key's value
    PartialUpdate = 4,
    /// Removal of every key
    Erase = 5,
    /// Bulk load of entries (undo of erase, copy stream chunk)
    Restore = 6,
}

impl OperationType {
    fn from_u8(tag: u8) -> Result<Self> {
        Ok(match tag {
            1 => OperationType::Insert,
            2 => OperationType::Delete,
            3 => OperationType::Update,
            4 => OperationType::PartialUpdate,
            5 => OperationType::Erase,
            6 => OperationType::Restore,
            other => {
                return Err(Error::CorruptRecord(format!(
                    "unknown operation type {}",
                    other
                )))
            }
        })
    }
}

/// An ordered collection of opaque log buffers
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OperationData {
    buffers: Vec<Vec<u8>>,
}

impl OperationData {
    /// Wrap raw buffers (as received from a replication stream)
    pub fn from_buffers(buffers: Vec<Vec<u8>>) -> Self {
        Self { buffers }
    }

    /// Borrow the buffers
    pub fn buffers(&self) -> &[Vec<u8>] {
        &self.buffers
    }

    /// Take the buffers
    pub fn into_buffers(self) -> Vec<Vec<u8>> {
        self.buffers
    }

    /// Number of buffers
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// True when there are no buffers
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Total byte size across buffers
    pub fn byte_len(&self) -> usize {
        self.buffers.iter().map(Vec::len).sum()
    }
}

/// Redo and undo records produced by one mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedoUndo {
    /// Replays the mutation forward
    pub redo: OperationData,
    /// Reverses the mutation
    pub undo: OperationData,
}

/// A decoded log record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BtreeOperation {
    /// What the record does
    pub operation_type: OperationType,
    /// Sequence number the producing call was tagged with
    pub sequence_number: SequenceNumber,
    /// Target key (absent for Erase and Restore)
    pub key: Option<Vec<u8>>,
    /// New value, or the partial bytes of a PartialUpdate
    pub value: Option<EncodedValue>,
    /// Comparand for conditional records
    pub conditional_value: Option<Vec<u8>>,
    /// Offset of the comparand inside the current value
    pub conditional_offset: u32,
    /// Offset a PartialUpdate writes at
    pub partial_update_offset: u32,
    /// Entries of a Restore record
    pub entries: Vec<(Vec<u8>, EncodedValue)>,
}

impl BtreeOperation {
    fn bare(operation_type: OperationType, sequence_number: SequenceNumber) -> Self {
        Self {
            operation_type,
            sequence_number,
            key: None,
            value: None,
            conditional_value: None,
            conditional_offset: 0,
            partial_update_offset: 0,
            entries: Vec::new(),
        }
    }

    /// Insert `key` with `value`
    pub fn insert(seq: SequenceNumber, key: &[u8], value: EncodedValue) -> Self {
        Self {
            key: Some(key.to_vec()),
            value: Some(value),
            ..Self::bare(OperationType::Insert, seq)
        }
    }

    /// Replace the value of `key`
    pub fn update(seq: SequenceNumber, key: &[u8], value: EncodedValue) -> Self {
        Self {
            key: Some(key.to_vec()),
            value: Some(value),
            ..Self::bare(OperationType::Update, seq)
        }
    }

    /// Write `partial` into the value of `key` at `offset`
    pub fn partial_update(seq: SequenceNumber, key: &[u8], offset: u32, partial: &[u8]) -> Self {
        Self {
            key: Some(key.to_vec()),
            value: Some(EncodedValue::from_bytes(partial)),
            partial_update_offset: offset,
            ..Self::bare(OperationType::PartialUpdate, seq)
        }
    }

    /// Remove `key`
    pub fn delete(seq: SequenceNumber, key: &[u8]) -> Self {
        Self {
            key: Some(key.to_vec()),
            ..Self::bare(OperationType::Delete, seq)
        }
    }

    /// Remove every key
    pub fn erase(seq: SequenceNumber) -> Self {
        Self::bare(OperationType::Erase, seq)
    }

    /// Load `entries`
    pub fn restore(seq: SequenceNumber, entries: Vec<(Vec<u8>, EncodedValue)>) -> Self {
        Self {
            entries,
            ..Self::bare(OperationType::Restore, seq)
        }
    }

    /// Attach a condition (informational; replay is unconditional)
    pub fn with_condition(mut self, offset: u32, check: &[u8]) -> Self {
        self.conditional_offset = offset;
        self.conditional_value = Some(check.to_vec());
        self
    }

    /// Key bytes, or `CorruptRecord` if the record carries none
    pub fn require_key(&self) -> Result<&[u8]> {
        self.key
            .as_deref()
            .ok_or_else(|| Error::CorruptRecord(format!("{:?} record without key", self.operation_type)))
    }

    /// Value, or `CorruptRecord` if the record carries none
    pub fn require_value(&self) -> Result<&EncodedValue> {
        self.value.as_ref().ok_or_else(|| {
            Error::CorruptRecord(format!("{:?} record without value", self.operation_type))
        })
    }

    /// Encode into log buffers
    pub fn encode(&self) -> OperationData {
        let mut flags = 0u8;
        let mut tail: Vec<Vec<u8>> = Vec::new();

        if let Some(key) = &self.key {
            flags |= FLAG_HAS_KEY;
            tail.push(key.clone());
        }
        if let Some(value) = &self.value {
            flags |= FLAG_HAS_VALUE;
            match value.as_bytes() {
                Some(bytes) => tail.push(bytes.to_vec()),
                None => flags |= FLAG_VALUE_NULL,
            }
        }
        if let Some(check) = &self.conditional_value {
            flags |= FLAG_HAS_CONDITIONAL;
            tail.push(check.clone());
        }
        if self.operation_type == OperationType::Restore {
            flags |= FLAG_HAS_ENTRIES;
            for (key, value) in &self.entries {
                tail.push(key.clone());
                tail.push(encode_entry_value(value));
            }
        }

        let mut header = Vec::with_capacity(HEADER_SIZE);
        header.push(FORMAT_VERSION);
        header.push(self.operation_type as u8);
        header.push(flags);
        header.push(0);
        // Writes into a Vec cannot fail.
        let _ = header.write_u64::<LittleEndian>(self.sequence_number);
        let _ = header.write_u32::<LittleEndian>(self.conditional_offset);
        let _ = header.write_u32::<LittleEndian>(self.partial_update_offset);
        let crc = checksum(&header[..CRC_OFFSET], &tail);
        let _ = header.write_u32::<LittleEndian>(crc);

        let mut buffers = Vec::with_capacity(tail.len() + 1);
        buffers.push(header);
        buffers.extend(tail);
        OperationData { buffers }
    }

    /// Decode log buffers produced by [`BtreeOperation::encode`]
    ///
    /// # Errors
    /// `CorruptRecord` for a short or unversioned header, an unknown
    /// operation type, a checksum mismatch, or missing or extra buffers.
    pub fn decode(data: &OperationData) -> Result<Self> {
        let (header, tail) = data
            .buffers
            .split_first()
            .ok_or_else(|| Error::CorruptRecord("empty log record".to_string()))?;
        if header.len() != HEADER_SIZE {
            return Err(Error::CorruptRecord(format!(
                "header is {} bytes, expected {}",
                header.len(),
                HEADER_SIZE
            )));
        }

        let mut cursor = Cursor::new(header.as_slice());
        let version = cursor.read_u8()?;
        if version != FORMAT_VERSION {
            return Err(Error::CorruptRecord(format!(
                "unsupported record version {}",
                version
            )));
        }
        let op = OperationType::from_u8(cursor.read_u8()?)?;
        let flags = cursor.read_u8()?;
        let _reserved = cursor.read_u8()?;
        let sequence_number = cursor.read_u64::<LittleEndian>()?;
        let conditional_offset = cursor.read_u32::<LittleEndian>()?;
        let partial_update_offset = cursor.read_u32::<LittleEndian>()?;
        let stored_crc = cursor.read_u32::<LittleEndian>()?;

        let computed = checksum(&header[..CRC_OFFSET], tail);
        if stored_crc != computed {
            return Err(Error::CorruptRecord(format!(
                "CRC mismatch: stored {:08x}, computed {:08x}",
                stored_crc, computed
            )));
        }

        let mut rest = tail.iter();
        let mut next = |what: &str| {
            rest.next()
                .cloned()
                .ok_or_else(|| Error::CorruptRecord(format!("missing {} buffer", what)))
        };

        let mut operation = Self::bare(op, sequence_number);
        operation.conditional_offset = conditional_offset;
        operation.partial_update_offset = partial_update_offset;

        if flags & FLAG_HAS_KEY != 0 {
            operation.key = Some(next("key")?);
        }
        if flags & FLAG_HAS_VALUE != 0 {
            operation.value = Some(if flags & FLAG_VALUE_NULL != 0 {
                EncodedValue::null()
            } else {
                EncodedValue::from(next("value")?)
            });
        }
        if flags & FLAG_HAS_CONDITIONAL != 0 {
            operation.conditional_value = Some(next("conditional value")?);
        }
        if flags & FLAG_HAS_ENTRIES != 0 {
            let remaining: Vec<Vec<u8>> = rest.cloned().collect();
            if remaining.len() % 2 != 0 {
                return Err(Error::CorruptRecord(
                    "entry list has an unpaired key".to_string(),
                ));
            }
            for pair in remaining.chunks_exact(2) {
                operation
                    .entries
                    .push((pair[0].clone(), decode_entry_value(&pair[1])?));
            }
        } else if rest.next().is_some() {
            return Err(Error::CorruptRecord(format!(
                "{:?} record has trailing buffers",
                op
            )));
        }
        Ok(operation)
    }
}

/// CRC over the header prefix, the buffer count, and each buffer's length and bytes
fn checksum(header: &[u8], tail: &[Vec<u8>]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(header);
    hasher.update(&(tail.len() as u32).to_le_bytes());
    for buffer in tail {
        hasher.update(&(buffer.len() as u32).to_le_bytes());
        hasher.update(buffer);
    }
    hasher.finalize()
}

fn encode_entry_value(value: &EncodedValue) -> Vec<u8> {
    match value.as_bytes() {
        None => vec![0],
        Some(bytes) => {
            let mut out = Vec::with_capacity(bytes.len() + 1);
            out.push(1);
            out.extend_from_slice(bytes);
            out
        }
    }
}

fn decode_entry_value(buffer: &[u8]) -> Result<EncodedValue> {
    match buffer.split_first() {
        Some((0, [])) => Ok(EncodedValue::null()),
        Some((1, bytes)) => Ok(EncodedValue::from(bytes)),
        _ => Err(Error::CorruptRecord(
            "malformed entry value buffer".to_string(),
        )),
    }
}
