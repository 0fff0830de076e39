//! # MnemoDB Core
//!
//! Embedded, append-only, multi-index datom store.
//!
//! Every fact is a datom `(entity, attribute, value, transaction, retract?)`
//! stored as a single ordered key in nine indexes: a transaction log plus
//! current and history variants of EAVT, AEVT, AVET and VAET.
//!
//! This crate provides:
//! - Key codec with an order-preserving fixed prefix ([`KeyPrefix`])
//! - Typed values ([`Value`], [`ValueTag`])
//! - Attribute registry with persisted definitions ([`AttributeRegistry`])
//! - Per-partition id allocation ([`NextIdCache`])
//! - Single-writer transaction pipeline ([`DatomStore`])
//! - Immutable read views ([`Db`]) and a revision feed ([`Revisions`])
//! - Columnar compression of id runs ([`PackedColumn`], [`IndexSegment`])
//!
//! ## Example
//!
//! ```rust
//! use mnemo_core::{AttributeDef, DatomStore, PartitionId, Transaction, ValueTag};
//!
//! let store = DatomStore::open_in_memory()?;
//! let name = store.register_attributes(vec![
//!     AttributeDef::new("person/name", ValueTag::Utf8).indexed(true),
//! ])?[0];
//!
//! let mut tx = Transaction::new();
//! let ann = tx.temp_id(PartitionId::ENTITY);
//! tx.add(ann, name, "ann");
//! let committed = store.transact(tx).wait()?;
//!
//! let ann = committed.remap(ann).unwrap();
//! assert_eq!(store.db().find_by_value(name, &"ann".into())?, vec![ann]);
//! # Ok::<(), mnemo_core::CoreError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod attribute;
pub mod column;
mod config;
mod datom;
mod db;
mod error;
mod id_cache;
mod index;
pub mod key;
mod revisions;
mod store;
pub mod transaction;
mod types;
mod value;

pub use attribute::{
    Attribute, AttributeDef, AttributeRegistry, Cardinality, ResolvedDatom, Symbol,
    SymbolInterner,
};
pub use column::{ColumnKind, IndexSegment, PackedColumn};
pub use config::StoreConfig;
pub use datom::Datom;
pub use db::Db;
pub use error::{CoreError, CoreResult};
pub use id_cache::{last_entity_in_partition, NextIdCache};
pub use index::{IndexSet, IndexType};
pub use key::{KeyHead, KeyPrefix, KEY_PREFIX_SIZE};
pub use revisions::{Revision, Revisions};
pub use store::DatomStore;
pub use transaction::{CommitResult, Fact, PendingTransaction, Transaction, TxFunction, TxState};
pub use types::{AttributeId, EntityId, PartitionId, TxId, PAYLOAD_MASK};
pub use value::{Value, ValueTag};
