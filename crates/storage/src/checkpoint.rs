//! Checkpoint images for persisted stores
//!
//! ## File Format
//!
//! ```text
//! [magic: "RLCK"][payload: bincode CheckpointImage][crc32: u32 LE]
//! ```
//!
//! - **crc32** covers the magic and the payload
//! - Images are written to a temporary sibling, synced, then renamed over
//!   the previous image, so a reader never observes a torn write

use crc32fast::Hasher;
use relistore_core::{Error, PartitionId, ReplicaId, Result, SequenceNumber};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

const MAGIC: &[u8; 4] = b"RLCK";

/// Current image format version
pub const IMAGE_FORMAT_VERSION: u32 = 1;

/// Serializable state of a store at a checkpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointImage {
    /// Image format version
    pub format_version: u32,
    /// Partition that wrote the image
    pub partition_id: PartitionId,
    /// Replica that wrote the image
    pub replica_id: ReplicaId,
    /// Sequence number passed to the checkpoint call
    pub checkpoint_sequence_number: SequenceNumber,
    /// Stability watermark at checkpoint time
    pub stable_sequence_number: SequenceNumber,
    /// High-water mark at checkpoint time
    pub last_sequence_number: SequenceNumber,
    /// Live entries in key order; `None` values are null
    pub entries: Vec<(Vec<u8>, Option<Vec<u8>>)>,
}

/// Serialize `image` and atomically replace the file at `path`.
///
/// Returns the number of bytes written.
///
/// # Errors
/// `CapacityExceeded` if the encoded image is larger than `limit`.
pub fn write_image(path: &Path, image: &CheckpointImage, limit: Option<u64>) -> Result<u64> {
    let payload = bincode::serialize(image)?;

    let mut bytes = Vec::with_capacity(MAGIC.len() + payload.len() + 4);
    bytes.extend_from_slice(MAGIC);
    bytes.extend_from_slice(&payload);
    let mut hasher = Hasher::new();
    hasher.update(&bytes);
    bytes.extend_from_slice(&hasher.finalize().to_le_bytes());

    let size = bytes.len() as u64;
    if let Some(limit) = limit {
        if size > limit {
            return Err(Error::CapacityExceeded(format!(
                "checkpoint image of {} bytes exceeds storage limit {}",
                size, limit
            )));
        }
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;

    tracing::debug!(
        path = %path.display(),
        size,
        entries = image.entries.len(),
        checkpoint_lsn = image.checkpoint_sequence_number,
        "Checkpoint image written"
    );
    Ok(size)
}

/// Read and verify the image at `path`.
///
/// # Errors
/// `InvalidConfiguration` if no image exists; `CorruptRecord` if it fails
/// the magic, checksum or decode checks.
pub fn read_image(path: &Path) -> Result<(CheckpointImage, u64)> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(Error::InvalidConfiguration(format!(
                "no checkpoint image to recover from at '{}'",
                path.display()
            )))
        }
        Err(e) => return Err(e.into()),
    };

    if bytes.len() < MAGIC.len() + 4 || &bytes[..MAGIC.len()] != MAGIC {
        return Err(Error::CorruptRecord(format!(
            "'{}' is not a checkpoint image",
            path.display()
        )));
    }
    let (body, trailer) = bytes.split_at(bytes.len() - 4);
    let stored = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    let mut hasher = Hasher::new();
    hasher.update(body);
    let computed = hasher.finalize();
    if stored != computed {
        return Err(Error::CorruptRecord(format!(
            "checkpoint CRC mismatch: stored {:08x}, computed {:08x}",
            stored, computed
        )));
    }

    let image: CheckpointImage = bincode::deserialize(&body[MAGIC.len()..])?;
    if image.format_version != IMAGE_FORMAT_VERSION {
        return Err(Error::CorruptRecord(format!(
            "unsupported checkpoint format {}",
            image.format_version
        )));
    }
    Ok((image, bytes.len() as u64))
}
