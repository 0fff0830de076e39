//! Multi-version ordered tables shared by the backends.
//!
//! Every key carries a short chain of `(version, live)` marks. A commit
//! appends marks at a fresh version; a snapshot pinned at version `v` sees a
//! key when the newest mark at or below `v` is live.
//!
//! Snapshots pin their version while alive. After each commit, chains
//! touched at or below the oldest pinned version are compacted: marks no
//! snapshot can observe are dropped, and keys whose only remaining mark is
//! a delete leave the table.

use crate::backend::{IndexId, KeyOrdering, StorageSnapshot};
use crate::batch::{BatchOp, WriteBatch};
use crate::error::{StorageError, StorageResult};
use bytes::Bytes;
use parking_lot::RwLock;
use std::cmp::Ordering;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

/// A key positioned by its index's ordering function.
#[derive(Clone)]
struct OrderedKey {
    bytes: Bytes,
    ordering: KeyOrdering,
}

impl OrderedKey {
    fn new(bytes: Bytes, ordering: KeyOrdering) -> Self {
        Self { bytes, ordering }
    }
}

impl PartialEq for OrderedKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for OrderedKey {}

impl PartialOrd for OrderedKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedKey {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.ordering)(&self.bytes, &other.bytes)
    }
}

/// `(version, live)` marks, oldest first.
type Chain = Vec<(u64, bool)>;

fn visible(chain: &Chain, version: u64) -> bool {
    chain
        .iter()
        .rev()
        .find(|(at, _)| *at <= version)
        .is_some_and(|(_, live)| *live)
}

/// Drops the marks no snapshot at or above `horizon` can observe.
///
/// Returns `false` when nothing is left and the key can be removed.
fn compact(chain: &mut Chain, horizon: u64) -> bool {
    if let Some(base) = chain.iter().rposition(|(at, _)| *at <= horizon) {
        let keep_base = chain[base].1;
        chain.drain(..if keep_base { base } else { base + 1 });
    }
    !chain.is_empty()
}

struct IndexTable {
    ordering: KeyOrdering,
    entries: BTreeMap<OrderedKey, Chain>,
}

impl IndexTable {
    /// Records `live` for `key` at `version`; returns whether the chain now
    /// holds marks a later compaction may drop.
    fn apply(&mut self, key: &Bytes, live: bool, version: u64) -> bool {
        let ordered = OrderedKey::new(key.clone(), self.ordering);
        match self.entries.get_mut(&ordered) {
            Some(chain) => {
                match chain.last_mut() {
                    Some(last) if last.0 == version => last.1 = live,
                    _ => chain.push((version, live)),
                }
                chain.len() > 1 || !live
            }
            None if live => {
                self.entries.insert(ordered, vec![(version, true)]);
                false
            }
            None => false,
        }
    }

    fn compact(&mut self, key: &Bytes, horizon: u64) {
        let ordered = OrderedKey::new(key.clone(), self.ordering);
        if let Some(chain) = self.entries.get_mut(&ordered) {
            if !compact(chain, horizon) {
                self.entries.remove(&ordered);
            }
        }
    }
}

/// Keys whose chains can shrink once every snapshot older than `version`
/// is gone.
struct Garbage {
    version: u64,
    index: IndexId,
    key: Bytes,
}

/// The versioned contents of every declared index.
#[derive(Default)]
pub(crate) struct VersionedTables {
    indexes: RwLock<HashMap<IndexId, IndexTable>>,
    version: AtomicU64,
    /// Live snapshot count per pinned version.
    pins: Mutex<BTreeMap<u64, usize>>,
    garbage: Mutex<VecDeque<Garbage>>,
}

impl VersionedTables {
    pub(crate) fn declare(&self, index: IndexId, ordering: KeyOrdering) {
        self.indexes
            .write()
            .entry(index)
            .or_insert_with(|| IndexTable {
                ordering,
                entries: BTreeMap::new(),
            });
    }

    pub(crate) fn is_declared(&self, index: IndexId) -> bool {
        self.indexes.read().contains_key(&index)
    }

    /// Checks that every op of `batch` targets a declared index.
    pub(crate) fn validate(&self, batch: &WriteBatch) -> StorageResult<()> {
        let indexes = self.indexes.read();
        match batch.ops().iter().find(|op| !indexes.contains_key(&op.index())) {
            Some(op) => Err(StorageError::IndexNotDeclared(op.index())),
            None => Ok(()),
        }
    }

    /// Applies `batch` at the next version and publishes that version.
    pub(crate) fn apply(&self, batch: &WriteBatch) -> StorageResult<u64> {
        let mut indexes = self.indexes.write();
        if let Some(op) = batch.ops().iter().find(|op| !indexes.contains_key(&op.index())) {
            return Err(StorageError::IndexNotDeclared(op.index()));
        }

        let version = self.version.load(AtomicOrdering::Acquire) + 1;
        let mut garbage = self.garbage.lock();
        for op in batch.ops() {
            let live = matches!(op, BatchOp::Put { .. });
            if let Some(table) = indexes.get_mut(&op.index()) {
                if table.apply(op.key(), live, version) {
                    garbage.push_back(Garbage {
                        version,
                        index: op.index(),
                        key: op.key().clone(),
                    });
                }
            }
        }
        self.version.store(version, AtomicOrdering::Release);

        let horizon = self.horizon();
        while garbage.front().is_some_and(|g| g.version <= horizon) {
            if let Some(g) = garbage.pop_front() {
                if let Some(table) = indexes.get_mut(&g.index) {
                    table.compact(&g.key, horizon);
                }
            }
        }
        Ok(version)
    }

    /// Oldest version any live snapshot can read.
    fn horizon(&self) -> u64 {
        let pins = self.pins.lock();
        pins.keys()
            .next()
            .copied()
            .unwrap_or_else(|| self.version.load(AtomicOrdering::Acquire))
    }

    pub(crate) fn snapshot(self: &Arc<Self>) -> Arc<dyn StorageSnapshot> {
        let version = {
            let mut pins = self.pins.lock();
            let version = self.version.load(AtomicOrdering::Acquire);
            *pins.entry(version).or_insert(0) += 1;
            version
        };
        Arc::new(TableSnapshot {
            tables: Arc::clone(self),
            version,
        })
    }

    fn unpin(&self, version: u64) {
        let mut pins = self.pins.lock();
        if let Some(count) = pins.get_mut(&version) {
            *count -= 1;
            if *count == 0 {
                pins.remove(&version);
            }
        }
    }

    /// Every key visible at the newest version, as one batch of puts.
    pub(crate) fn live_batch(&self) -> WriteBatch {
        let indexes = self.indexes.read();
        let version = self.version.load(AtomicOrdering::Acquire);
        let mut ids: Vec<_> = indexes.keys().copied().collect();
        ids.sort_unstable();

        let mut batch = WriteBatch::new();
        for id in ids {
            if let Some(table) = indexes.get(&id) {
                for (key, chain) in &table.entries {
                    if visible(chain, version) {
                        batch.put(id, key.bytes.clone());
                    }
                }
            }
        }
        batch
    }

    /// Number of keys held for `index`, including ones only old snapshots see.
    #[cfg(test)]
    pub(crate) fn stored_keys(&self, index: IndexId) -> usize {
        self.indexes
            .read()
            .get(&index)
            .map_or(0, |table| table.entries.len())
    }

    fn scan(
        &self,
        index: IndexId,
        from: &[u8],
        to: &[u8],
        version: u64,
        limit: usize,
    ) -> StorageResult<Vec<Bytes>> {
        let indexes = self.indexes.read();
        let table = indexes
            .get(&index)
            .ok_or(StorageError::IndexNotDeclared(index))?;
        let ordering = table.ordering;

        let direction = ordering(from, to);
        if direction == Ordering::Equal {
            return Ok(Vec::new());
        }

        let from_key = OrderedKey::new(Bytes::copy_from_slice(from), ordering);
        let to_key = OrderedKey::new(Bytes::copy_from_slice(to), ordering);
        let pick = |(key, chain): (&OrderedKey, &Chain)| {
            visible(chain, version).then(|| key.bytes.clone())
        };

        let keys = if direction == Ordering::Less {
            table
                .entries
                .range((Bound::Included(from_key), Bound::Excluded(to_key)))
                .filter_map(pick)
                .take(limit)
                .collect()
        } else {
            table
                .entries
                .range((Bound::Excluded(to_key), Bound::Included(from_key)))
                .rev()
                .filter_map(pick)
                .take(limit)
                .collect()
        };
        Ok(keys)
    }
}

/// A snapshot pinned to one version of a [`VersionedTables`].
struct TableSnapshot {
    tables: Arc<VersionedTables>,
    version: u64,
}

impl Drop for TableSnapshot {
    fn drop(&mut self) {
        self.tables.unpin(self.version);
    }
}

impl StorageSnapshot for TableSnapshot {
    fn version(&self) -> u64 {
        self.version
    }

    fn range(&self, index: IndexId, from: &[u8], to: &[u8]) -> StorageResult<Vec<Bytes>> {
        self.tables.scan(index, from, to, self.version, usize::MAX)
    }

    fn first(&self, index: IndexId, from: &[u8], to: &[u8]) -> StorageResult<Option<Bytes>> {
        Ok(self
            .tables
            .scan(index, from, to, self.version, 1)?
            .into_iter()
            .next())
    }
}
