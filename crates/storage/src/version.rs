//! Per-key version chains
//!
//! Each key in a store keeps the versions written since its last stable
//! version. Reads see the newest version. Once the stability watermark
//! reaches a version, everything older in that chain is superseded and is
//! reclaimed; a chain whose only remaining version is a stable delete marker
//! is dropped outright.
//!
//! [`EntryTable`] owns the ordered map of chains together with the counters
//! that `statistics()` reports, and keeps them in step on every change.

use crate::ordering::SortKey;
use crate::value::EncodedValue;
use relistore_core::SequenceNumber;
use std::collections::BTreeMap;

/// Fixed per-version bookkeeping charged to memory usage
pub(crate) const VERSION_OVERHEAD: u64 = 24;

/// Extra charge for a value held outside its entry
pub(crate) const OUT_OF_LINE_OVERHEAD: u64 = 16;

/// State recorded by one version
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum VersionState {
    /// Key holds this value (possibly null)
    Present(EncodedValue),
    /// Key was deleted
    Deleted,
}

fn version_cost(inline_values: bool, state: &VersionState) -> u64 {
    match state {
        VersionState::Present(value) if !value.is_null() && !inline_values => {
            VERSION_OVERHEAD + OUT_OF_LINE_OVERHEAD + value.len() as u64
        }
        VersionState::Present(value) => VERSION_OVERHEAD + value.len() as u64,
        VersionState::Deleted => VERSION_OVERHEAD,
    }
}

/// One version of a key
#[derive(Debug, Clone)]
pub(crate) struct Version {
    pub(crate) sequence_number: SequenceNumber,
    pub(crate) state: VersionState,
}

/// Versions of one key in the order they were applied
#[derive(Debug, Clone, Default)]
pub(crate) struct VersionChain {
    versions: Vec<Version>,
}

impl VersionChain {
    /// Value visible to readers, `None` if absent or deleted
    pub(crate) fn current(&self) -> Option<&EncodedValue> {
        match self.versions.last().map(|v| &v.state) {
            Some(VersionState::Present(value)) => Some(value),
            _ => None,
        }
    }

    /// Value visible as of `up_to`: the newest version tagged at or below it
    pub(crate) fn visible_at(&self, up_to: SequenceNumber) -> Option<&EncodedValue> {
        let version = self
            .versions
            .iter()
            .rev()
            .find(|v| v.sequence_number <= up_to)?;
        match &version.state {
            VersionState::Present(value) => Some(value),
            VersionState::Deleted => None,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.versions.len()
    }
}

/// Ordered entry table of a store
#[derive(Debug)]
pub(crate) struct EntryTable {
    entries: BTreeMap<SortKey, VersionChain>,
    live_records: usize,
    version_count: usize,
    memory_usage: u64,
    inline_values: bool,
}

impl EntryTable {
    pub(crate) fn new(inline_values: bool) -> Self {
        Self {
            entries: BTreeMap::new(),
            live_records: 0,
            version_count: 0,
            memory_usage: 0,
            inline_values,
        }
    }

    /// Memory a new `state` version for `key` would add
    pub(crate) fn cost_of(&self, key: &SortKey, state: &VersionState) -> u64 {
        let key_cost = if self.entries.contains_key(key) {
            0
        } else {
            key.bytes().len() as u64
        };
        key_cost + version_cost(self.inline_values, state)
    }

    pub(crate) fn current(&self, key: &SortKey) -> Option<&EncodedValue> {
        self.entries.get(key).and_then(VersionChain::current)
    }

    /// Append a version to `key`'s chain
    pub(crate) fn push(&mut self, key: SortKey, sequence_number: SequenceNumber, state: VersionState) {
        let cost = self.cost_of(&key, &state);
        let now_live = matches!(state, VersionState::Present(_));
        let chain = self.entries.entry(key).or_default();
        let was_live = chain.current().is_some();
        chain.versions.push(Version {
            sequence_number,
            state,
        });
        match (was_live, now_live) {
            (false, true) => self.live_records += 1,
            (true, false) => self.live_records -= 1,
            _ => {}
        }
        self.version_count += 1;
        self.memory_usage += cost;
    }

    /// Reclaim versions superseded at or below `watermark`
    ///
    /// Returns the number of versions dropped.
    pub(crate) fn reclaim(&mut self, watermark: SequenceNumber) -> usize {
        let mut dropped_versions = 0usize;
        let mut freed = 0u64;
        let mut emptied = Vec::new();
        let inline_values = self.inline_values;
        let cost = |state: &VersionState| version_cost(inline_values, state);

        for (key, chain) in self.entries.iter_mut() {
            let newest_stable = chain
                .versions
                .iter()
                .rposition(|v| v.sequence_number <= watermark);
            let Some(index) = newest_stable else {
                continue;
            };
            for old in chain.versions.drain(..index) {
                freed += cost(&old.state);
                dropped_versions += 1;
            }
            if chain.versions.len() == 1 && chain.versions[0].state == VersionState::Deleted {
                freed += cost(&chain.versions[0].state) + key.bytes().len() as u64;
                dropped_versions += 1;
                emptied.push(key.clone());
            }
        }
        for key in emptied {
            self.entries.remove(&key);
        }
        self.version_count -= dropped_versions;
        self.memory_usage = self.memory_usage.saturating_sub(freed);
        dropped_versions
    }

    /// Iterate live entries in key order
    pub(crate) fn live(&self) -> impl Iterator<Item = (&SortKey, &EncodedValue)> {
        self.entries
            .iter()
            .filter_map(|(k, chain)| chain.current().map(|v| (k, v)))
    }

    /// Iterate chains in key order
    pub(crate) fn chains(&self) -> impl Iterator<Item = (&SortKey, &VersionChain)> {
        self.entries.iter()
    }

    /// Chains within a key range
    pub(crate) fn range(
        &self,
        range: (std::ops::Bound<SortKey>, std::ops::Bound<SortKey>),
    ) -> impl Iterator<Item = (&SortKey, &VersionChain)> {
        self.entries.range(range)
    }

    pub(crate) fn live_records(&self) -> usize {
        self.live_records
    }

    pub(crate) fn version_count(&self) -> usize {
        self.version_count
    }

    pub(crate) fn memory_usage(&self) -> u64 {
        self.memory_usage
    }
}
