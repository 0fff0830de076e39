//! # MnemoDB Storage
//!
//! Ordered key-value backends for MnemoDB.
//!
//! This crate provides the lowest-level storage abstraction for MnemoDB.
//! A backend hosts several independently sorted indexes of **opaque keys**:
//! it orders them with a comparison function supplied per index, but never
//! interprets their contents.
//!
//! ## Design Principles
//!
//! - Keys are the whole record; there are no values
//! - Writes go through atomic [`WriteBatch`]es
//! - Reads go through immutable [`StorageSnapshot`]s that never observe later
//!   commits
//! - Backends must be `Send + Sync` for one writer and many readers
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For testing and ephemeral storage
//! - [`FileBackend`] - Persistent storage via a checksummed commit log
//!
//! ## Example
//!
//! ```rust
//! use mnemo_storage::{memcmp, InMemoryBackend, StorageBackend};
//!
//! let backend = InMemoryBackend::new();
//! backend.declare_index(7, memcmp).unwrap();
//! backend.init(None).unwrap();
//!
//! let mut batch = backend.create_batch();
//! batch.put(7, b"b".to_vec());
//! batch.put(7, b"a".to_vec());
//! backend.commit(batch).unwrap();
//!
//! let keys = backend.snapshot().unwrap().range(7, b"z", b"").unwrap();
//! assert_eq!(keys[0].as_ref(), b"b");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod batch;
mod error;
mod file;
mod memory;
mod table;

pub use backend::{memcmp, IndexId, KeyOrdering, StorageBackend, StorageSnapshot};
pub use batch::{BatchOp, WriteBatch};
pub use error::{StorageError, StorageResult};
pub use file::{FileBackend, LOG_MAGIC, LOG_VERSION};
pub use memory::InMemoryBackend;
