//! Store statistics

use relistore_core::SequenceNumber;
use serde::Serialize;

/// Read-only snapshot of a store's counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct BtreeStatistics {
    /// Estimated bytes held by keys, values and version bookkeeping
    pub memory_usage_bytes: u64,
    /// Size of the last checkpoint image (0 for volatile stores)
    pub storage_usage_bytes: u64,
    /// Pages needed for `memory_usage_bytes` at the configured page size
    pub page_count: u64,
    /// Live (present, not deleted) keys
    pub record_count: u64,
    /// Versions retained across all keys, stable or not
    pub version_count: u64,
    /// Highest sequence number seen
    pub last_sequence_number: SequenceNumber,
    /// Stability watermark
    pub stable_sequence_number: SequenceNumber,
    /// Sequence number of the last checkpoint
    pub checkpoint_sequence_number: SequenceNumber,
}
