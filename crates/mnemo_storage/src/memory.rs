//! In-memory storage backend for testing.

use crate::backend::{IndexId, KeyOrdering, StorageBackend, StorageSnapshot};
use crate::batch::WriteBatch;
use crate::error::{StorageError, StorageResult};
use crate::table::VersionedTables;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// An in-memory multi-version backend.
///
/// This backend keeps every index in memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral stores that don't need persistence
///
/// # Example
///
/// ```rust
/// use mnemo_storage::{memcmp, InMemoryBackend, StorageBackend};
///
/// let backend = InMemoryBackend::new();
/// backend.declare_index(1, memcmp).unwrap();
/// backend.init(None).unwrap();
///
/// let mut batch = backend.create_batch();
/// batch.put(1, b"key".to_vec());
/// backend.commit(batch).unwrap();
///
/// let snapshot = backend.snapshot().unwrap();
/// assert_eq!(snapshot.range(1, b"a", b"z").unwrap().len(), 1);
/// ```
#[derive(Default)]
pub struct InMemoryBackend {
    tables: Arc<VersionedTables>,
    initialized: AtomicBool,
}

impl InMemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_initialized(&self) -> StorageResult<()> {
        if self.initialized.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(StorageError::NotInitialized)
        }
    }
}

impl std::fmt::Debug for InMemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBackend")
            .field("initialized", &self.initialized.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl StorageBackend for InMemoryBackend {
    fn declare_index(&self, index: IndexId, ordering: KeyOrdering) -> StorageResult<()> {
        if self.initialized.load(Ordering::Acquire) && !self.tables.is_declared(index) {
            return Err(StorageError::AlreadyInitialized);
        }
        self.tables.declare(index, ordering);
        Ok(())
    }

    fn init(&self, _path: Option<&Path>) -> StorageResult<()> {
        if self.initialized.swap(true, Ordering::AcqRel) {
            return Err(StorageError::AlreadyInitialized);
        }
        Ok(())
    }

    fn commit(&self, batch: WriteBatch) -> StorageResult<()> {
        self.ensure_initialized()?;
        self.tables.apply(&batch)?;
        Ok(())
    }

    fn snapshot(&self) -> StorageResult<Arc<dyn StorageSnapshot>> {
        self.ensure_initialized()?;
        Ok(self.tables.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memcmp;
    use bytes::Bytes;

    fn open() -> InMemoryBackend {
        let backend = InMemoryBackend::new();
        backend.declare_index(1, memcmp).unwrap();
        backend.declare_index(2, memcmp).unwrap();
        backend.init(None).unwrap();
        backend
    }

    #[test]
    fn memory_new_is_empty() {
        let backend = open();
        let snapshot = backend.snapshot().unwrap();
        assert!(snapshot.range(1, &[], &[0xFF]).unwrap().is_empty());
        assert_eq!(snapshot.version(), 0);
    }

    #[test]
    fn memory_snapshot_before_init_fails() {
        let backend = InMemoryBackend::new();
        assert!(matches!(
            backend.snapshot(),
            Err(StorageError::NotInitialized)
        ));
    }

    #[test]
    fn memory_double_init_fails() {
        let backend = open();
        assert!(matches!(
            backend.init(None),
            Err(StorageError::AlreadyInitialized)
        ));
    }

    #[test]
    fn memory_redeclare_is_noop() {
        let backend = open();
        assert!(backend.declare_index(1, memcmp).is_ok());
        assert!(backend.declare_index(3, memcmp).is_err());
    }

    #[test]
    fn memory_commit_spans_indexes() {
        let backend = open();
        let mut batch = backend.create_batch();
        batch.put(1, b"one".to_vec());
        batch.put(2, b"two".to_vec());
        backend.commit(batch).unwrap();

        let snapshot = backend.snapshot().unwrap();
        assert_eq!(
            snapshot.range(1, b"", b"z").unwrap(),
            vec![Bytes::from_static(b"one")]
        );
        assert_eq!(
            snapshot.range(2, b"", b"z").unwrap(),
            vec![Bytes::from_static(b"two")]
        );
    }

    #[test]
    fn memory_dropped_batch_is_discarded() {
        let backend = open();
        {
            let mut batch = backend.create_batch();
            batch.put(1, b"lost".to_vec());
        }
        assert!(backend
            .snapshot()
            .unwrap()
            .range(1, b"", b"z")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn memory_snapshots_are_isolated_across_threads() {
        let backend = Arc::new(open());
        let mut batch = backend.create_batch();
        batch.put(1, b"a".to_vec());
        backend.commit(batch).unwrap();
        let pinned = backend.snapshot().unwrap();

        let writer = Arc::clone(&backend);
        std::thread::spawn(move || {
            for i in 0..50u8 {
                let mut batch = writer.create_batch();
                batch.put(1, vec![b'b', i]);
                writer.commit(batch).unwrap();
            }
        })
        .join()
        .unwrap();

        assert_eq!(pinned.range(1, b"", b"z").unwrap().len(), 1);
        assert_eq!(backend.snapshot().unwrap().range(1, b"", b"z").unwrap().len(), 51);
    }
}
