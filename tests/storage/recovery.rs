//! Checkpoint and Recovery Tests
//!
//! Persisted stores write a checkpoint image; reopening with `recover`
//! reproduces the checkpointed state.

use crate::common::*;
use tempfile::TempDir;

#[tokio::test]
async fn close_with_flush_then_recover() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let cancel = CancellationToken::new();

    let store = BtreeStore::open(persisted_config(dir.path()), false, &cancel)
        .await
        .unwrap();
    for k in 0..100 {
        store.insert(&key(k), text(&format!("row {}", k)), k as u64 + 1, &cancel).await.unwrap();
    }
    store.delete(&key(50), 101, &cancel).await.unwrap();
    store.insert(&key(200), EncodedValue::null(), 102, &cancel).await.unwrap();
    store.close(true, &cancel).await.unwrap();

    let recovered = BtreeStore::open(persisted_config(dir.path()), true, &cancel)
        .await
        .unwrap();
    let stats = recovered.statistics();
    assert_eq!(stats.record_count, 100);
    assert_eq!(stats.last_sequence_number, 102);
    assert_eq!(stats.checkpoint_sequence_number, 102);

    let value = recovered.seek(&key(42), &cancel).await.unwrap();
    assert_eq!(decode_text(&value).as_deref(), Some("row 42"));
    assert!(recovered.seek(&key(50), &cancel).await.is_err());
    assert!(recovered.seek(&key(200), &cancel).await.unwrap().is_null());
}

#[tokio::test]
async fn recovered_store_accepts_new_writes() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let cancel = CancellationToken::new();

    let store = BtreeStore::open(persisted_config(dir.path()), false, &cancel)
        .await
        .unwrap();
    store.insert(&key(1), text("one"), 1, &cancel).await.unwrap();
    store.on_operation_stable(1, &cancel).await.unwrap();
    store.checkpoint(1, &cancel).await.unwrap();
    // not covered by the checkpoint
    store.insert(&key(2), text("two"), 2, &cancel).await.unwrap();
    store.abort();

    let recovered = BtreeStore::open(persisted_config(dir.path()), true, &cancel)
        .await
        .unwrap();
    assert!(recovered.seek(&key(2), &cancel).await.is_err());
    assert_eq!(recovered.stable_sequence_number(), 1);
    recovered.insert(&key(2), text("two again"), 3, &cancel).await.unwrap();
    assert_eq!(recovered.statistics().record_count, 2);
}

#[tokio::test]
async fn checkpoint_cannot_move_backwards() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let cancel = CancellationToken::new();
    let store = BtreeStore::open(persisted_config(dir.path()), false, &cancel)
        .await
        .unwrap();
    store.checkpoint(10, &cancel).await.unwrap();
    assert!(matches!(
        store.checkpoint(5, &cancel).await,
        Err(Error::InvalidArgument(_))
    ));
    assert!(store.statistics().storage_usage_bytes > 0);
}

#[tokio::test]
async fn config_file_drives_open() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("btree.toml");
    std::fs::write(
        &path,
        format!(
            r#"
replica_id = 4

[storage]
is_volatile = false
path = "{}"

[key_comparison]
data_type = "Int32"
maximum_key_size = 4
is_fixed_length = true
"#,
            dir.path().join("data").display().to_string().replace('\\', "/")
        ),
    )
    .unwrap();

    let config = BtreeConfiguration::from_file(&path).unwrap();
    assert_eq!(config.replica_id, ReplicaId(4));
    let cancel = CancellationToken::new();
    let store = BtreeStore::open(config, false, &cancel).await.unwrap();
    store.insert(&key(1), text("x"), 1, &cancel).await.unwrap();
    store.close(true, &cancel).await.unwrap();
    assert!(dir.path().join("data").join("btree.ckpt").exists());
}
