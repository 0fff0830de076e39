//! Storage backend trait definitions.

use crate::batch::WriteBatch;
use crate::error::StorageResult;
use bytes::Bytes;
use std::cmp::Ordering;
use std::path::Path;
use std::sync::Arc;

/// Identifier of one logical ordered index inside a backend.
pub type IndexId = u8;

/// Total order over the keys of one index.
///
/// Must be consistent for the lifetime of the data: keys are positioned by it
/// on every write, and range bounds are compared with it on every scan.
pub type KeyOrdering = fn(&[u8], &[u8]) -> Ordering;

/// Byte-wise ordering, the default for most indexes.
#[must_use]
pub fn memcmp(a: &[u8], b: &[u8]) -> Ordering {
    a.cmp(b)
}

/// An ordered key-value backend hosting several independently sorted indexes.
///
/// Backends store keys only; every piece of a datom lives in its key. They do
/// not interpret key bytes beyond the ordering function declared per index.
///
/// # Invariants
///
/// - Every index is declared with [`declare_index`](Self::declare_index)
///   before [`init`](Self::init)
/// - [`commit`](Self::commit) applies all operations of a batch or none
/// - A [`StorageSnapshot`] never observes a commit that finished after it was
///   taken
/// - Backends must be `Send + Sync` so one writer and many readers can share
///   them
///
/// # Implementors
///
/// - [`super::InMemoryBackend`] - For testing and ephemeral stores
/// - [`super::FileBackend`] - For persistent storage
pub trait StorageBackend: Send + Sync {
    /// Registers an index and its key ordering.
    ///
    /// Declaring the same index twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is already initialized and does not
    /// know the index.
    fn declare_index(&self, index: IndexId, ordering: KeyOrdering) -> StorageResult<()>;

    /// Opens or creates the physical storage.
    ///
    /// Backends without a physical location ignore `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage cannot be opened, is locked, or its
    /// persisted contents are corrupted.
    fn init(&self, path: Option<&Path>) -> StorageResult<()>;

    /// Creates an empty batch for this backend.
    fn create_batch(&self) -> WriteBatch {
        WriteBatch::new()
    }

    /// Applies every operation of `batch` atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch references an undeclared index or the
    /// write cannot be made durable. Nothing is applied in that case.
    fn commit(&self, batch: WriteBatch) -> StorageResult<()>;

    /// Compacts persisted state so reopening does not replay deleted keys.
    ///
    /// Backends without persisted state do nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is not initialized or the compacted
    /// state cannot be written.
    fn checkpoint(&self) -> StorageResult<()> {
        Ok(())
    }

    /// Returns an immutable point-in-time read view.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is not initialized.
    fn snapshot(&self) -> StorageResult<Arc<dyn StorageSnapshot>>;
}

/// An immutable read view of every index at one commit.
pub trait StorageSnapshot: Send + Sync {
    /// Returns the commit version this view is pinned to.
    fn version(&self) -> u64;

    /// Scans `index` between two bounds.
    ///
    /// When `from <= to` the scan is ascending over `from <= key < to`.
    /// When `from > to` the scan is descending over `to < key <= from`.
    ///
    /// # Errors
    ///
    /// Returns an error if the index was never declared.
    fn range(&self, index: IndexId, from: &[u8], to: &[u8]) -> StorageResult<Vec<Bytes>>;

    /// Returns the first key a [`range`](Self::range) scan would yield.
    ///
    /// # Errors
    ///
    /// Returns an error if the index was never declared.
    fn first(&self, index: IndexId, from: &[u8], to: &[u8]) -> StorageResult<Option<Bytes>> {
        Ok(self.range(index, from, to)?.into_iter().next())
    }
}
