//! Core identifier types.
//!
//! Every entity id is 64 bits wide. The top byte names a partition and the
//! low 56 bits are a payload allocated monotonically within it, so ids from
//! different partitions never overlap numerically.

use std::fmt;

/// Mask selecting the 56-bit payload of an id.
pub const PAYLOAD_MASK: u64 = 0x00FF_FFFF_FFFF_FFFF;

const PARTITION_SHIFT: u32 = 56;

/// Bits 40..48 of a temporary id carry the partition it should land in.
const TEMP_TARGET_SHIFT: u32 = 40;
const TEMP_SEQUENCE_MASK: u64 = (1 << TEMP_TARGET_SHIFT) - 1;

/// One of the 256 statically reserved id ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PartitionId(pub u8);

impl PartitionId {
    /// Attribute definitions; `E` equals the attribute id.
    pub const ATTRIBUTE: Self = Self(0);
    /// Transaction entities.
    pub const TRANSACTIONS: Self = Self(1);
    /// Default partition for user entities.
    pub const ENTITY: Self = Self(2);
    /// Temporary ids, replaced by permanent ones at commit.
    pub const TEMP: Self = Self(3);

    /// Creates a partition id.
    #[must_use]
    pub const fn new(id: u8) -> Self {
        Self(id)
    }

    /// Returns the raw partition byte.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self.0
    }

    /// Builds the id with the given payload in this partition.
    #[must_use]
    pub const fn make_id(self, payload: u64) -> EntityId {
        EntityId(((self.0 as u64) << PARTITION_SHIFT) | (payload & PAYLOAD_MASK))
    }

    /// Smallest id in this partition.
    #[must_use]
    pub const fn min_id(self) -> EntityId {
        self.make_id(0)
    }

    /// Largest id in this partition.
    #[must_use]
    pub const fn max_id(self) -> EntityId {
        self.make_id(PAYLOAD_MASK)
    }

    /// Returns true for partitions above the reserved ones.
    #[must_use]
    pub const fn is_user(self) -> bool {
        self.0 > Self::TEMP.0
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "partition:{}", self.0)
    }
}

/// Identifier of an entity.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityId(pub u64);

impl EntityId {
    /// The temporary id that stands for the transaction being committed.
    pub const TX_SELF: Self = PartitionId::TEMP.min_id();

    /// Creates an entity id from its raw value.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw id value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the partition encoded in the top byte.
    #[must_use]
    pub const fn partition(self) -> PartitionId {
        PartitionId((self.0 >> PARTITION_SHIFT) as u8)
    }

    /// Returns the 56-bit payload.
    #[must_use]
    pub const fn payload(self) -> u64 {
        self.0 & PAYLOAD_MASK
    }

    /// Largest sequence a temporary id can carry.
    pub const MAX_TEMP_SEQUENCE: u64 = TEMP_SEQUENCE_MASK;

    /// Builds a temporary id that will be remapped into `target`.
    ///
    /// `sequence` distinguishes temporaries within one transaction and must
    /// be in `1..=MAX_TEMP_SEQUENCE`; `None` otherwise. Sequence 0 is
    /// reserved so no temporary id can equal [`EntityId::TX_SELF`].
    #[must_use]
    pub const fn temp(target: PartitionId, sequence: u64) -> Option<Self> {
        if sequence == 0 || sequence > TEMP_SEQUENCE_MASK {
            return None;
        }
        Some(Self::temp_unchecked(target, sequence))
    }

    pub(crate) const fn temp_unchecked(target: PartitionId, sequence: u64) -> Self {
        PartitionId::TEMP.make_id(
            ((target.0 as u64) << TEMP_TARGET_SHIFT) | (sequence & TEMP_SEQUENCE_MASK),
        )
    }

    /// Returns true if this id lives in the temporary partition.
    #[must_use]
    pub const fn is_temp(self) -> bool {
        self.partition().0 == PartitionId::TEMP.0
    }

    /// Partition a temporary id is remapped into.
    #[must_use]
    pub const fn temp_target(self) -> PartitionId {
        PartitionId(((self.0 >> TEMP_TARGET_SHIFT) & 0xFF) as u8)
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({}:{})", self.partition().0, self.payload())
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e:{}:{}", self.partition().0, self.payload())
    }
}

/// Identifier of a transaction.
///
/// A transaction id is also a valid [`EntityId`] in
/// [`PartitionId::TRANSACTIONS`], so transactions can carry attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TxId(pub u64);

impl TxId {
    /// Creates a transaction id from its raw value.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw id value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns this transaction as an entity.
    #[must_use]
    pub const fn as_entity(self) -> EntityId {
        EntityId(self.0)
    }
}

impl From<EntityId> for TxId {
    fn from(id: EntityId) -> Self {
        Self(id.0)
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx:{}", self.0 & PAYLOAD_MASK)
    }
}

/// Dense runtime identifier of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AttributeId(pub u16);

impl AttributeId {
    /// Creates an attribute id.
    #[must_use]
    pub const fn new(id: u16) -> Self {
        Self(id)
    }

    /// Returns the raw id value.
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Returns the entity that carries this attribute's definition.
    #[must_use]
    pub const fn as_entity(self) -> EntityId {
        PartitionId::ATTRIBUTE.make_id(self.0 as u64)
    }
}

impl fmt::Display for AttributeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "attr:{}", self.0)
    }
}
