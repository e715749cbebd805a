//! Replication Tests
//!
//! Redo records produced on a primary replay to the same state on a replica;
//! undo records reverse them.

use crate::common::*;
use relistore::OperationType;

#[tokio::test]
async fn redo_replays_on_another_store() {
    let primary = open_int32_store().await;
    let replica = open_int32_store().await;
    let cancel = CancellationToken::new();

    let log = primary.insert(&key(17), text("payload"), 3, &cancel).await.unwrap();
    let op = replica.apply(3, &log.redo, false, &cancel).await.unwrap();

    assert_eq!(op.operation_type, OperationType::Insert);
    assert_eq!(op.key.as_deref(), Some(&key(17)[..]));
    assert_eq!(op.value, Some(text("payload")));
    let value = replica.seek(&key(17), &cancel).await.unwrap();
    assert_eq!(decode_text(&value).as_deref(), Some("payload"));
}

#[tokio::test]
async fn decode_only_matches_full_apply() {
    let primary = open_int32_store().await;
    let decoded_only = open_int32_store().await;
    let applied = open_int32_store().await;
    let cancel = CancellationToken::new();

    let log = primary.insert(&key(1), text("same"), 1, &cancel).await.unwrap();
    let a = decoded_only.apply(1, &log.redo, true, &cancel).await.unwrap();
    let b = applied.apply(1, &log.redo, false, &cancel).await.unwrap();

    assert_eq!(a, b);
    assert_eq!(decoded_only.statistics().record_count, 0);
    assert_eq!(applied.seek(&key(1), &cancel).await.unwrap(), text("same"));
}

#[tokio::test]
async fn replica_follows_a_mixed_history() {
    let primary = open_int32_store().await;
    let replica = open_int32_store().await;
    let cancel = CancellationToken::new();

    let mut history = Vec::new();
    for k in 0..10 {
        history.push(primary.insert(&key(k), text("v1"), k as u64 + 1, &cancel).await.unwrap());
    }
    history.push(primary.update(&key(3), text("v2"), 20, &cancel).await.unwrap());
    history.push(primary.delete(&key(4), 21, &cancel).await.unwrap().1);
    let (applied, log) = primary
        .conditional_partial_update(&key(5), 2, &[0xAA, 0xBB], 0, &[], 22, &cancel)
        .await
        .unwrap();
    assert!(applied);
    history.push(log.unwrap());
    history.push(primary.upsert(&key(50), text("new"), 23, &cancel).await.unwrap().1);

    for (i, log) in history.iter().enumerate() {
        replica.apply(i as u64 + 1, &log.redo, false, &cancel).await.unwrap();
    }

    assert_eq!(replica.statistics().record_count, primary.statistics().record_count);
    for k in [0, 3, 5, 9, 50] {
        assert_eq!(
            replica.seek(&key(k), &cancel).await.unwrap(),
            primary.seek(&key(k), &cancel).await.unwrap()
        );
    }
    assert!(replica.seek(&key(4), &cancel).await.is_err());
}

#[tokio::test]
async fn undo_in_reverse_order_restores_initial_state() {
    let store = open_int32_store().await;
    let cancel = CancellationToken::new();
    store.insert(&key(1), text("base"), 1, &cancel).await.unwrap();

    let logs = vec![
        store.update(&key(1), text("changed"), 2, &cancel).await.unwrap(),
        store.insert(&key(2), text("added"), 3, &cancel).await.unwrap(),
        store.delete(&key(1), 4, &cancel).await.unwrap().1,
    ];
    for (i, log) in logs.iter().rev().enumerate() {
        store.apply(10 + i as u64, &log.undo, false, &cancel).await.unwrap();
    }

    assert_eq!(store.statistics().record_count, 1);
    let value = store.seek(&key(1), &cancel).await.unwrap();
    assert_eq!(decode_text(&value).as_deref(), Some("base"));
    assert!(store.seek(&key(2), &cancel).await.is_err());
}

#[tokio::test]
async fn replay_on_mismatched_state_fails() {
    let primary = open_int32_store().await;
    let replica = open_int32_store().await;
    let cancel = CancellationToken::new();

    primary.insert(&key(1), text("a"), 1, &cancel).await.unwrap();
    let log = primary.update(&key(1), text("b"), 2, &cancel).await.unwrap();
    assert!(matches!(
        replica.apply(2, &log.redo, false, &cancel).await,
        Err(Error::KeyNotFound(_))
    ));

    let insert = primary.insert(&key(2), text("c"), 3, &cancel).await.unwrap();
    replica.apply(3, &insert.redo, false, &cancel).await.unwrap();
    assert!(matches!(
        replica.apply(4, &insert.redo, false, &cancel).await,
        Err(Error::DuplicateKey(_))
    ));
}

#[tokio::test]
async fn corrupted_record_is_rejected() {
    let primary = open_int32_store().await;
    let replica = open_int32_store().await;
    let cancel = CancellationToken::new();

    let log = primary.insert(&key(1), text("a"), 1, &cancel).await.unwrap();
    let mut buffers = log.redo.into_buffers();
    let last = buffers.len() - 1;
    buffers[last].push(0xFF);
    let tampered = relistore::OperationData::from_buffers(buffers);

    assert!(matches!(
        replica.apply(1, &tampered, false, &cancel).await,
        Err(Error::CorruptRecord(_))
    ));
    assert_eq!(replica.statistics().record_count, 0);
}
