//! Columnar materialization of a run of datoms.

use super::packed::PackedColumn;
use crate::datom::Datom;
use crate::index::IndexType;
use crate::key::KeyPrefix;
use crate::types::{AttributeId, EntityId, TxId};
use crate::value::ValueTag;
use bytes::{Bytes, BytesMut};

const RETRACT_FLAG: u64 = 1;
const TAG_SHIFT: u32 = 1;

/// A read-only columnar copy of datoms from one index.
///
/// Rows are pivoted into parallel packed columns (entity, attribute,
/// transaction, flags) plus value offsets into one shared value blob.
#[derive(Debug, Clone)]
pub struct IndexSegment {
    index: IndexType,
    entities: PackedColumn,
    attributes: PackedColumn,
    transactions: PackedColumn,
    flags: PackedColumn,
    value_offsets: PackedColumn,
    values: Bytes,
}

impl IndexSegment {
    /// Pivots `datoms` into columns; rows keep their input order.
    #[must_use]
    pub fn build(index: IndexType, datoms: &[Datom]) -> Self {
        let mut entities = Vec::with_capacity(datoms.len());
        let mut attributes = Vec::with_capacity(datoms.len());
        let mut transactions = Vec::with_capacity(datoms.len());
        let mut flags = Vec::with_capacity(datoms.len());
        let mut offsets = Vec::with_capacity(datoms.len() + 1);
        let mut values = BytesMut::new();

        offsets.push(0);
        for datom in datoms {
            entities.push(datom.e().as_u64());
            attributes.push(u64::from(datom.a().as_u16()));
            transactions.push(datom.t().as_u64());
            let retract = if datom.is_retract() { RETRACT_FLAG } else { 0 };
            flags.push((u64::from(datom.value_tag().as_byte()) << TAG_SHIFT) | retract);
            values.extend_from_slice(datom.value_bytes());
            offsets.push(values.len() as u64);
        }

        Self {
            index,
            entities: PackedColumn::pack(&entities),
            attributes: PackedColumn::pack(&attributes),
            transactions: PackedColumn::pack(&transactions),
            flags: PackedColumn::pack(&flags),
            value_offsets: PackedColumn::pack(&offsets),
            values: values.freeze(),
        }
    }

    /// Index the rows were read from.
    #[must_use]
    pub fn index(&self) -> IndexType {
        self.index
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// True when the segment has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entity of row `i`.
    #[must_use]
    pub fn e(&self, i: usize) -> Option<EntityId> {
        self.entities.get(i).map(EntityId::new)
    }

    /// Attribute of row `i`.
    #[must_use]
    pub fn a(&self, i: usize) -> Option<AttributeId> {
        self.attributes.get(i).map(|a| AttributeId::new(a as u16))
    }

    /// Transaction of row `i`.
    #[must_use]
    pub fn t(&self, i: usize) -> Option<TxId> {
        self.transactions.get(i).map(TxId::new)
    }

    /// Retraction flag of row `i`.
    #[must_use]
    pub fn is_retract(&self, i: usize) -> Option<bool> {
        self.flags.get(i).map(|f| f & RETRACT_FLAG != 0)
    }

    /// Value tag of row `i`.
    #[must_use]
    pub fn value_tag(&self, i: usize) -> Option<ValueTag> {
        self.flags
            .get(i)
            .and_then(|f| ValueTag::from_byte((f >> TAG_SHIFT) as u8))
    }

    /// Encoded value bytes of row `i`.
    #[must_use]
    pub fn value_bytes(&self, i: usize) -> Option<&[u8]> {
        let start = usize::try_from(self.value_offsets.get(i)?).ok()?;
        let end = usize::try_from(self.value_offsets.get(i + 1)?).ok()?;
        self.values.get(start..end)
    }

    /// Rebuilds row `i` as a datom in the segment's index layout.
    #[must_use]
    pub fn datom(&self, i: usize) -> Option<Datom> {
        let prefix = KeyPrefix::new(
            self.index,
            self.e(i)?,
            self.a(i)?,
            self.t(i)?,
            self.is_retract(i)?,
            self.value_tag(i)?,
        );
        Some(Datom::new(prefix, self.value_bytes(i)?))
    }

    /// Iterates over the rows as datoms.
    pub fn iter(&self) -> impl Iterator<Item = Datom> + '_ {
        (0..self.len()).filter_map(move |i| self.datom(i))
    }

    /// The entity column.
    #[must_use]
    pub fn entities(&self) -> &PackedColumn {
        &self.entities
    }

    /// The attribute column.
    #[must_use]
    pub fn attributes(&self) -> &PackedColumn {
        &self.attributes
    }

    /// The transaction column.
    #[must_use]
    pub fn transactions(&self) -> &PackedColumn {
        &self.transactions
    }
}
