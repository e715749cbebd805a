//! Range scans over a store
//!
//! A scan materializes the matching entries when it is opened, so it reflects
//! the store at that instant and never holds the store's lock between calls.

use crate::btree::BtreeStore;
use crate::value::EncodedValue;
use relistore_core::{Error, Result};
use std::sync::Arc;

/// One entry produced by a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanItem {
    /// Encoded key
    pub key: Arc<[u8]>,
    /// Value, `None` if the scan was opened without values
    pub value: Option<EncodedValue>,
}

#[derive(Debug)]
enum ScanState {
    Created,
    Open { items: Vec<ScanItem>, position: usize },
    Closed,
}

/// Forward cursor over a key range
///
/// Created by [`BtreeStore::create_scan`]. Bounds are inclusive and compared
/// with the store's key ordering; the prefix filter matches raw key bytes.
#[derive(Debug)]
pub struct BtreeScan<'a> {
    store: &'a BtreeStore,
    state: ScanState,
}

impl<'a> BtreeScan<'a> {
    pub(crate) fn new(store: &'a BtreeStore) -> Self {
        Self {
            store,
            state: ScanState::Created,
        }
    }

    /// Position the scan on `[begin, end]`, optionally restricted to keys starting with `prefix`
    ///
    /// Reopening an open scan replaces its range. A range with `begin > end`
    /// is empty.
    pub fn open(
        &mut self,
        begin: Option<&[u8]>,
        end: Option<&[u8]>,
        prefix: Option<&[u8]>,
        value_needed: bool,
    ) -> Result<()> {
        if matches!(self.state, ScanState::Closed) {
            return Err(closed());
        }
        let items = self.store.snapshot_range(begin, end, prefix, value_needed)?;
        tracing::trace!(items = items.len(), "Scan opened");
        self.state = ScanState::Open { items, position: 0 };
        Ok(())
    }

    /// Advance and return the next entry, `None` once exhausted
    pub fn move_next(&mut self) -> Result<Option<ScanItem>> {
        let (items, position) = self.open_state()?;
        let item = items.get(*position).cloned();
        if item.is_some() {
            *position += 1;
        }
        Ok(item)
    }

    /// Key the next `move_next` would return, without advancing
    pub fn peek_next_key(&mut self) -> Result<Option<Arc<[u8]>>> {
        let (items, position) = self.open_state()?;
        Ok(items.get(*position).map(|item| item.key.clone()))
    }

    /// Rewind to the start of the opened range
    pub fn reset(&mut self) -> Result<()> {
        let (_, position) = self.open_state()?;
        *position = 0;
        Ok(())
    }

    /// Release the scan; later calls fail with `AlreadyClosed`
    pub fn close(&mut self) {
        self.state = ScanState::Closed;
    }

    fn open_state(&mut self) -> Result<(&mut Vec<ScanItem>, &mut usize)> {
        match &mut self.state {
            ScanState::Open { items, position } => Ok((items, position)),
            ScanState::Created => Err(Error::InvalidArgument(
                "scan has not been opened".to_string(),
            )),
            ScanState::Closed => Err(closed()),
        }
    }
}

fn closed() -> Error {
    Error::AlreadyClosed("scan".to_string())
}
