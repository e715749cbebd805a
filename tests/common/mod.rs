//! Shared test utilities for all integration test suites.
//!
//! Import via `#[path = "../common/mod.rs"] mod common;` from any suite's main.rs.

#![allow(dead_code)]
#![allow(unused_imports)]

use std::path::Path;
use std::sync::Once;
use std::time::Duration;

pub use relistore::codec::{Codec, Int32Codec, Utf16StringCodec};
pub use relistore::{
    AtomicGroupId, BtreeConfiguration, BtreeStorageConfiguration, BtreeStore, CancellationToken,
    EncodedValue, Error, KeyComparisonDescription, KeyDataType, LockMode, PartitionId, ReplicaId,
    TransactionManager,
};

// ============================================================================
// Initialization
// ============================================================================

static INIT_TRACING: Once = Once::new();

/// Install a test-writer subscriber once per test binary.
///
/// Filter with `RUST_LOG`, e.g. `RUST_LOG=relistore_concurrency=debug`.
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

// ============================================================================
// Stores
// ============================================================================

/// Volatile config ordered by little-endian i32 keys.
pub fn int32_config() -> BtreeConfiguration {
    BtreeConfiguration::volatile(KeyComparisonDescription::for_type(KeyDataType::Int32))
}

/// Partition used by persisted test stores, so a reopen recovers its own image
pub const TEST_PARTITION: &str = "0f8e2c4a-51d3-4b6e-9a7c-3e2d1b0a9f86";

/// Persisted config rooted at `dir`.
pub fn persisted_config(dir: &Path) -> BtreeConfiguration {
    BtreeConfiguration {
        partition_id: PartitionId::from_string(TEST_PARTITION).expect("Invalid test partition"),
        storage: BtreeStorageConfiguration::persisted(dir),
        ..int32_config()
    }
}

/// Open an empty volatile Int32-keyed store.
pub async fn open_int32_store() -> BtreeStore {
    init_tracing();
    BtreeStore::open(int32_config(), false, &CancellationToken::new())
        .await
        .expect("Failed to open store")
}

pub fn key(k: i32) -> Vec<u8> {
    Int32Codec.encode(&k)
}

pub fn text(s: &str) -> EncodedValue {
    EncodedValue::from(Utf16StringCodec.encode(&s.to_string()))
}

pub fn decode_text(value: &EncodedValue) -> Option<String> {
    value
        .as_bytes()
        .map(|bytes| Utf16StringCodec.decode(bytes).expect("Invalid UTF-16 value"))
}

// ============================================================================
// Transactions
// ============================================================================

/// Open a transaction manager for replica 1.
pub async fn open_transaction_manager() -> TransactionManager {
    init_tracing();
    let manager = TransactionManager::new(ReplicaId(1));
    manager.open().await.expect("Failed to open transaction manager");
    manager
}

pub const SHORT_TIMEOUT: Duration = Duration::from_millis(100);
