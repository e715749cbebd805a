//! Storage Integration Tests
//!
//! End-to-end behaviour of the keyed store: mutations and their log records,
//! replication by replay, stability, checkpoints and copy streams.

#[path = "../common/mod.rs"]
mod common;

mod recovery;
mod replication;
