//! Immutable, point-in-time database views.
//!
//! A [`Db`] pairs a backend snapshot with the attribute registry and the id
//! of the last transaction it contains. It is cheap to clone and can be
//! read from any number of threads while the writer keeps committing.
//!
//! # Example
//!
//! ```rust
//! use mnemo_core::{AttributeDef, DatomStore, PartitionId, Transaction, ValueTag};
//!
//! let store = DatomStore::open_in_memory()?;
//! let path = store.register_attributes(vec![AttributeDef::new("file/path", ValueTag::Utf8)])?[0];
//!
//! let mut tx = Transaction::new();
//! let file = tx.temp_id(PartitionId::ENTITY);
//! tx.add(file, path, "/a");
//! let result = store.transact(tx).wait()?;
//!
//! let db = store.db();
//! let e = result.remap(file).unwrap();
//! assert_eq!(db.get(e, path)?, Some("/a".into()));
//! # Ok::<(), mnemo_core::CoreError>(())
//! ```

use crate::attribute::{Attribute, AttributeRegistry, Cardinality, ResolvedDatom};
use crate::column::IndexSegment;
use crate::datom::Datom;
use crate::error::{CoreError, CoreResult};
use crate::index::IndexType;
use crate::key::KeyHead;
use crate::types::{AttributeId, EntityId, TxId};
use crate::value::Value;
use mnemo_storage::StorageSnapshot;
use std::fmt;
use std::sync::Arc;

struct DbInner {
    snapshot: Arc<dyn StorageSnapshot>,
    registry: Arc<AttributeRegistry>,
    basis_tx: TxId,
}

/// A consistent read view of the store as of one transaction.
#[derive(Clone)]
pub struct Db {
    inner: Arc<DbInner>,
}

impl Db {
    pub(crate) fn new(
        snapshot: Arc<dyn StorageSnapshot>,
        registry: Arc<AttributeRegistry>,
        basis_tx: TxId,
    ) -> Self {
        Self {
            inner: Arc::new(DbInner {
                snapshot,
                registry,
                basis_tx,
            }),
        }
    }

    /// Last transaction visible in this view.
    #[must_use]
    pub fn basis_tx(&self) -> TxId {
        self.inner.basis_tx
    }

    /// The attribute registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<AttributeRegistry> {
        &self.inner.registry
    }

    /// The underlying backend snapshot.
    #[must_use]
    pub fn snapshot(&self) -> &dyn StorageSnapshot {
        self.inner.snapshot.as_ref()
    }

    /// Looks up an attribute by name.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownAttribute`] if it is not registered.
    pub fn attribute(&self, name: &str) -> CoreResult<Arc<Attribute>> {
        self.inner.registry.require(name)
    }

    /// Raw range scan over one index.
    ///
    /// Ascending when `from <= to` under the index ordering, descending
    /// otherwise.
    ///
    /// # Errors
    ///
    /// Returns a storage error or [`CoreError::MalformedKey`] for a stored
    /// key that cannot be decoded.
    pub fn datoms(&self, index: IndexType, from: &[u8], to: &[u8]) -> CoreResult<Vec<Datom>> {
        self.inner
            .snapshot
            .range(index.as_byte(), from, to)?
            .into_iter()
            .map(Datom::from_bytes)
            .collect()
    }

    fn scan(&self, head: &KeyHead, index: IndexType) -> CoreResult<Vec<Datom>> {
        let (from, to) = head.range();
        self.datoms(index, &from, &to)
    }

    /// Current datoms of `e`, ordered by attribute.
    ///
    /// # Errors
    ///
    /// Returns a storage or decoding error.
    pub fn entity(&self, e: EntityId) -> CoreResult<Vec<Datom>> {
        let index = IndexType::EavtCurrent;
        self.scan(&KeyHead::new(index).entity(e), index)
    }

    /// Current datoms of `e` for one attribute.
    ///
    /// # Errors
    ///
    /// Returns a storage or decoding error.
    pub fn entity_attribute(&self, e: EntityId, a: AttributeId) -> CoreResult<Vec<Datom>> {
        let index = IndexType::EavtCurrent;
        self.scan(&KeyHead::new(index).entity(e).attribute(a), index)
    }

    /// Current value of a cardinality-one attribute.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownAttribute`] if `a` is not registered,
    /// [`CoreError::InvalidOperation`] if it has cardinality many, or a
    /// storage or decoding error.
    pub fn get(&self, e: EntityId, a: AttributeId) -> CoreResult<Option<Value>> {
        let attribute = self.inner.registry.get(a)?;
        if attribute.cardinality == Cardinality::Many {
            return Err(CoreError::invalid_operation(format!(
                "{} has cardinality many; use get_many",
                attribute.symbol
            )));
        }
        self.entity_attribute(e, a)?
            .first()
            .map(Datom::value)
            .transpose()
    }

    /// Every current value of an attribute on `e`, in value order.
    ///
    /// # Errors
    ///
    /// Returns a storage or decoding error.
    pub fn get_many(&self, e: EntityId, a: AttributeId) -> CoreResult<Vec<Value>> {
        let mut datoms = self.entity_attribute(e, a)?;
        datoms.sort_by(|x, y| x.value_bytes().cmp(y.value_bytes()));
        datoms.iter().map(Datom::value).collect()
    }

    /// Retractions of `e` and the assertions that replaced them, in
    /// `(A, T)` order.
    ///
    /// # Errors
    ///
    /// Returns a storage or decoding error.
    pub fn history(&self, e: EntityId) -> CoreResult<Vec<Datom>> {
        let index = IndexType::EavtHistory;
        self.scan(&KeyHead::new(index).entity(e), index)
    }

    /// Current datoms of one attribute across all entities.
    ///
    /// # Errors
    ///
    /// Returns a storage or decoding error.
    pub fn datoms_for_attribute(&self, a: AttributeId) -> CoreResult<Vec<Datom>> {
        let index = IndexType::AevtCurrent;
        self.scan(&KeyHead::new(index).attribute(a), index)
    }

    /// Entities whose current value of `a` equals `value`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if `a` is not indexed, or an
    /// encoding, storage or decoding error.
    pub fn find_by_value(&self, a: AttributeId, value: &Value) -> CoreResult<Vec<EntityId>> {
        let attribute = self.inner.registry.get(a)?;
        if !attribute.indexed {
            return Err(CoreError::invalid_operation(format!(
                "{} is not indexed",
                attribute.symbol
            )));
        }
        self.by_value(IndexType::AvetCurrent, a, &value.encode()?)
    }

    /// Entities whose current value of reference attribute `a` is `target`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if `a` is not a reference
    /// attribute, or a storage or decoding error.
    pub fn referencing(&self, a: AttributeId, target: EntityId) -> CoreResult<Vec<EntityId>> {
        let attribute = self.inner.registry.get(a)?;
        if !attribute.is_reference() {
            return Err(CoreError::invalid_operation(format!(
                "{} is not a reference attribute",
                attribute.symbol
            )));
        }
        self.by_value(IndexType::VaetCurrent, a, &target.as_u64().to_be_bytes())
    }

    fn by_value(&self, index: IndexType, a: AttributeId, value: &[u8]) -> CoreResult<Vec<EntityId>> {
        let (from, to) = KeyHead::new(index).attribute(a).value_range(value);
        Ok(self
            .datoms(index, &from, &to)?
            .iter()
            .map(Datom::e)
            .collect())
    }

    /// Every datom written by transaction `tx`, retractions first.
    ///
    /// # Errors
    ///
    /// Returns a storage or decoding error.
    pub fn tx_datoms(&self, tx: TxId) -> CoreResult<Vec<Datom>> {
        let index = IndexType::TxLog;
        self.scan(&KeyHead::new(index).tx(tx), index)
    }

    /// Materializes a range scan as a columnar segment.
    ///
    /// # Errors
    ///
    /// Returns a storage or decoding error.
    pub fn segment(&self, index: IndexType, from: &[u8], to: &[u8]) -> CoreResult<IndexSegment> {
        Ok(IndexSegment::build(index, &self.datoms(index, from, to)?))
    }

    /// Looks up a datom's attribute and decodes its value.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownAttribute`] or [`CoreError::InvalidValue`].
    pub fn resolve(&self, datom: &Datom) -> CoreResult<ResolvedDatom> {
        self.inner.registry.resolve(datom)
    }
}

impl fmt::Debug for Db {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Db")
            .field("basis_tx", &self.inner.basis_tx)
            .field("version", &self.inner.snapshot.version())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::{AttributeDef, SymbolInterner};
    use crate::index::IndexSet;
    use crate::types::PartitionId;
    use crate::value::ValueTag;
    use mnemo_storage::InMemoryBackend;

    const NAME: AttributeId = AttributeId::new(20);
    const FRIEND: AttributeId = AttributeId::new(21);
    const TAG: AttributeId = AttributeId::new(22);

    fn tx(n: u64) -> TxId {
        TxId::from(PartitionId::TRANSACTIONS.make_id(n))
    }

    fn e(n: u64) -> EntityId {
        PartitionId::ENTITY.make_id(n)
    }

    /// Writes datoms straight into the indexes, bypassing the writer.
    fn fixture(datoms: &[(Datom, &[IndexType])]) -> Db {
        let interner = Arc::new(SymbolInterner::new());
        let registry = Arc::new(AttributeRegistry::new(Arc::clone(&interner)));
        let defs = [
            (NAME, AttributeDef::new("person/name", ValueTag::Utf8).indexed(true)),
            (FRIEND, AttributeDef::new("person/friend", ValueTag::Reference)),
            (
                TAG,
                AttributeDef::new("person/tag", ValueTag::Utf8).cardinality(Cardinality::Many),
            ),
        ];
        let attrs: Vec<_> = defs
            .into_iter()
            .map(|(id, def)| {
                let symbol = interner.intern(&def.name);
                def.into_attribute(id, symbol)
            })
            .collect();
        registry.register(&attrs).unwrap();

        let set = IndexSet::open(Arc::new(InMemoryBackend::new()), None).unwrap();
        let mut batch = set.batch();
        for (datom, indexes) in datoms {
            for &index in *indexes {
                set.put(&mut batch, index, datom);
            }
        }
        set.commit(batch).unwrap();
        Db::new(set.snapshot().unwrap(), registry, tx(3))
    }

    fn assert_datom(e: EntityId, a: AttributeId, v: impl Into<Value>, t: u64) -> Datom {
        Datom::assert(e, a, &v.into(), tx(t)).unwrap()
    }

    const CURRENT: &[IndexType] = &[
        IndexType::TxLog,
        IndexType::EavtCurrent,
        IndexType::AevtCurrent,
    ];
    const INDEXED: &[IndexType] = &[
        IndexType::TxLog,
        IndexType::EavtCurrent,
        IndexType::AevtCurrent,
        IndexType::AvetCurrent,
    ];
    const REFERENCE: &[IndexType] = &[
        IndexType::TxLog,
        IndexType::EavtCurrent,
        IndexType::AevtCurrent,
        IndexType::VaetCurrent,
    ];

    #[test]
    fn get_returns_current_value() {
        let db = fixture(&[(assert_datom(e(1), NAME, "ann", 2), INDEXED)]);
        assert_eq!(db.get(e(1), NAME).unwrap(), Some(Value::from("ann")));
        assert_eq!(db.get(e(2), NAME).unwrap(), None);
        assert_eq!(db.basis_tx(), tx(3));
    }

    #[test]
    fn get_rejects_cardinality_many() {
        let db = fixture(&[]);
        assert!(matches!(
            db.get(e(1), TAG),
            Err(CoreError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn get_many_returns_all_values() {
        let db = fixture(&[
            (assert_datom(e(1), TAG, "b", 2), CURRENT),
            (assert_datom(e(1), TAG, "a", 3), CURRENT),
        ]);
        assert_eq!(
            db.get_many(e(1), TAG).unwrap(),
            vec![Value::from("a"), Value::from("b")]
        );
    }

    #[test]
    fn entity_lists_attributes_in_order() {
        let db = fixture(&[
            (assert_datom(e(1), TAG, "x", 2), CURRENT),
            (assert_datom(e(1), NAME, "ann", 2), INDEXED),
            (assert_datom(e(2), NAME, "bob", 2), INDEXED),
        ]);
        let attrs: Vec<_> = db.entity(e(1)).unwrap().iter().map(Datom::a).collect();
        assert_eq!(attrs, vec![NAME, TAG]);
    }

    #[test]
    fn find_by_value_uses_avet() {
        let db = fixture(&[
            (assert_datom(e(1), NAME, "ann", 2), INDEXED),
            (assert_datom(e(2), NAME, "bob", 2), INDEXED),
            (assert_datom(e(3), NAME, "ann", 2), INDEXED),
            (assert_datom(e(4), NAME, "anne", 2), INDEXED),
        ]);
        assert_eq!(
            db.find_by_value(NAME, &Value::from("ann")).unwrap(),
            vec![e(1), e(3)]
        );
        assert!(db.find_by_value(NAME, &Value::from("zed")).unwrap().is_empty());
        assert!(matches!(
            db.find_by_value(TAG, &Value::from("x")),
            Err(CoreError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn referencing_uses_vaet() {
        let db = fixture(&[
            (assert_datom(e(1), FRIEND, e(9), 2), REFERENCE),
            (assert_datom(e(2), FRIEND, e(9), 2), REFERENCE),
            (assert_datom(e(3), FRIEND, e(8), 2), REFERENCE),
        ]);
        assert_eq!(db.referencing(FRIEND, e(9)).unwrap(), vec![e(1), e(2)]);
        assert!(db.referencing(NAME, e(9)).is_err());
    }

    #[test]
    fn tx_datoms_reads_log() {
        let db = fixture(&[
            (assert_datom(e(1), NAME, "ann", 2), INDEXED),
            (assert_datom(e(2), NAME, "bob", 3), INDEXED),
        ]);
        let datoms = db.tx_datoms(tx(3)).unwrap();
        assert_eq!(datoms.len(), 1);
        assert_eq!(datoms[0].e(), e(2));
        assert_eq!(datoms[0].index(), IndexType::TxLog);
    }

    #[test]
    fn segment_and_resolve() {
        let db = fixture(&[
            (assert_datom(e(1), NAME, "ann", 2), INDEXED),
            (assert_datom(e(2), NAME, "bob", 2), INDEXED),
        ]);
        let (from, to) = KeyHead::new(IndexType::AevtCurrent).attribute(NAME).range();
        let segment = db.segment(IndexType::AevtCurrent, &from, &to).unwrap();
        assert_eq!(segment.len(), 2);

        let resolved = db.resolve(&segment.datom(1).unwrap()).unwrap();
        assert_eq!(resolved.value, Value::from("bob"));
        assert_eq!(resolved.attribute.symbol.as_str(), "person/name");
    }

    #[test]
    fn descending_scan() {
        let db = fixture(&[
            (assert_datom(e(1), NAME, "ann", 2), INDEXED),
            (assert_datom(e(2), NAME, "bob", 2), INDEXED),
        ]);
        let (from, to) = KeyHead::new(IndexType::EavtCurrent).range();
        let datoms = db.datoms(IndexType::EavtCurrent, &to, &from).unwrap();
        let entities: Vec<_> = datoms.iter().map(Datom::e).collect();
        assert_eq!(entities, vec![e(2), e(1)]);
    }
}
