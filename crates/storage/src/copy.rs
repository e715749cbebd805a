//! Copy streams for building a replica from another store's state

use crate::log::{BtreeOperation, OperationData};
use crate::value::EncodedValue;
use relistore_core::SequenceNumber;

/// Entries per Restore record in a copy stream
pub const COPY_CHUNK_ENTRIES: usize = 512;

/// State of a store as of one sequence number, as a series of Restore records
///
/// Feed each record to [`BtreeStore::apply_copy_data`](crate::BtreeStore::apply_copy_data)
/// on the receiving store.
#[derive(Debug)]
pub struct CopyStream {
    up_to: SequenceNumber,
    entries: std::vec::IntoIter<(Vec<u8>, EncodedValue)>,
    total: usize,
}

impl CopyStream {
    pub(crate) fn new(up_to: SequenceNumber, entries: Vec<(Vec<u8>, EncodedValue)>) -> Self {
        Self {
            up_to,
            total: entries.len(),
            entries: entries.into_iter(),
        }
    }

    /// Sequence number the stream reflects
    pub fn up_to(&self) -> SequenceNumber {
        self.up_to
    }

    /// Entries carried by the whole stream
    pub fn total_entries(&self) -> usize {
        self.total
    }
}

impl Iterator for CopyStream {
    type Item = OperationData;

    fn next(&mut self) -> Option<Self::Item> {
        let chunk: Vec<_> = self.entries.by_ref().take(COPY_CHUNK_ENTRIES).collect();
        if chunk.is_empty() {
            return None;
        }
        Some(BtreeOperation::restore(self.up_to, chunk).encode())
    }
}
