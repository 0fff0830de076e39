//! Store fixtures and a shared test schema.

use mnemo_core::{
    AttributeDef, AttributeId, Cardinality, CommitResult, CoreResult, DatomStore, EntityId,
    PartitionId, StoreConfig, Transaction, ValueTag,
};
use std::path::{Path, PathBuf};
use std::sync::Once;
use tempfile::TempDir;

/// A test store with automatic cleanup.
pub struct TestStore {
    /// The store instance.
    pub store: DatomStore,
    /// Kept alive so the directory outlives the store.
    temp_dir: Option<TempDir>,
}

impl TestStore {
    /// Opens a fresh in-memory store.
    pub fn memory() -> Self {
        init_tracing();
        Self {
            store: DatomStore::open_in_memory().expect("failed to open in-memory store"),
            temp_dir: None,
        }
    }

    /// Opens a fresh store in a temporary directory.
    pub fn file() -> Self {
        init_tracing();
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let store = DatomStore::open(Self::config(temp_dir.path()))
            .expect("failed to open file store");
        Self {
            store,
            temp_dir: Some(temp_dir),
        }
    }

    fn config(dir: &Path) -> StoreConfig {
        StoreConfig::default()
            .path(dir.join("store"))
            .sync_on_commit(false)
    }

    /// Directory of a file-backed store.
    pub fn path(&self) -> Option<PathBuf> {
        self.temp_dir.as_ref().map(|d| d.path().join("store"))
    }

    /// Closes the store and opens it again from the same directory.
    ///
    /// # Panics
    ///
    /// Panics for in-memory stores.
    pub fn reopen(self) -> Self {
        let Self { store, temp_dir } = self;
        let temp_dir = temp_dir.expect("only file stores can be reopened");
        store.close();
        drop(store);
        let store = DatomStore::open(Self::config(temp_dir.path()))
            .expect("failed to reopen file store");
        Self {
            store,
            temp_dir: Some(temp_dir),
        }
    }

    /// Builds and commits a transaction, panicking on failure.
    pub fn commit(&self, build: impl FnOnce(&mut Transaction)) -> CommitResult {
        self.try_commit(build).expect("transaction failed")
    }

    /// Builds and commits a transaction.
    pub fn try_commit(&self, build: impl FnOnce(&mut Transaction)) -> CoreResult<CommitResult> {
        let mut tx = Transaction::new();
        build(&mut tx);
        self.store.transact(tx).wait()
    }
}

impl std::ops::Deref for TestStore {
    type Target = DatomStore;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

/// Runs a test with a temporary in-memory store.
pub fn with_temp_store<F, R>(f: F) -> R
where
    F: FnOnce(&TestStore) -> R,
{
    let store = TestStore::memory();
    f(&store)
}

/// An id in the default entity partition.
pub fn entity(payload: u64) -> EntityId {
    PartitionId::ENTITY.make_id(payload)
}

/// Installs a `RUST_LOG`-filtered subscriber once per test binary.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Attributes describing files and directories.
#[derive(Debug, Clone, Copy)]
pub struct FileSchema {
    /// `file/path`: indexed string, cardinality one.
    pub path: AttributeId,
    /// `file/size`: unsigned, cardinality one.
    pub size: AttributeId,
    /// `file/tag`: strings, cardinality many.
    pub tag: AttributeId,
    /// `file/parent`: reference to the containing directory.
    pub parent: AttributeId,
    /// `file/checksum`: bytes, no history kept.
    pub checksum: AttributeId,
}

impl FileSchema {
    /// Definitions in registration order.
    pub fn definitions() -> Vec<AttributeDef> {
        vec![
            AttributeDef::new("file/path", ValueTag::Utf8)
                .indexed(true)
                .documentation("absolute path"),
            AttributeDef::new("file/size", ValueTag::UInt64),
            AttributeDef::new("file/tag", ValueTag::Utf8).cardinality(Cardinality::Many),
            AttributeDef::new("file/parent", ValueTag::Reference),
            AttributeDef::new("file/checksum", ValueTag::Blob).no_history(true),
        ]
    }

    /// Registers the schema in `store`.
    pub fn register(store: &DatomStore) -> Self {
        let ids = store
            .register_attributes(Self::definitions())
            .expect("failed to register file schema");
        Self {
            path: ids[0],
            size: ids[1],
            tag: ids[2],
            parent: ids[3],
            checksum: ids[4],
        }
    }
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// A store holding `count` files `/file-N` of size `N`.
    pub fn populated_store(count: u64) -> (TestStore, FileSchema, Vec<EntityId>) {
        let store = TestStore::memory();
        let schema = FileSchema::register(&store);
        let mut tx = Transaction::new();
        let temps: Vec<_> = (0..count)
            .map(|n| {
                let e = tx.temp_id(PartitionId::ENTITY);
                tx.add(e, schema.path, format!("/file-{n}"))
                    .add(e, schema.size, n);
                e
            })
            .collect();
        let result = store.transact(tx).wait().expect("failed to populate store");
        let ids = temps
            .into_iter()
            .map(|t| result.remap(t).expect("temp id was not remapped"))
            .collect();
        (store, schema, ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_registers_schema() {
        let store = TestStore::memory();
        let schema = FileSchema::register(&store);
        assert_eq!(store.attribute_id("file/tag").unwrap(), schema.tag);
        assert!(store.path().is_none());
    }

    #[test]
    fn with_temp_store_commits() {
        with_temp_store(|store| {
            let schema = FileSchema::register(store);
            let result = store.commit(|tx| {
                tx.add(entity(1), schema.size, 10u64);
            });
            assert_eq!(result.datoms, 2);
        });
    }

    #[test]
    fn file_store_reopens() {
        let store = TestStore::file();
        let schema = FileSchema::register(&store);
        store.commit(|tx| {
            tx.add(entity(1), schema.path, "/kept");
        });

        let store = store.reopen();
        assert_eq!(
            store.db().get(entity(1), schema.path).unwrap(),
            Some("/kept".into())
        );
    }

    #[test]
    fn populated_scenario() {
        let (store, schema, ids) = scenarios::populated_store(10);
        assert_eq!(ids.len(), 10);
        assert_eq!(store.db().datoms_for_attribute(schema.size).unwrap().len(), 10);
    }
}
