//! Datoms: immutable facts stored as `KeyPrefix || value-bytes`.

use crate::error::{CoreError, CoreResult};
use crate::index::IndexType;
use crate::key::{KeyPrefix, KEY_PREFIX_SIZE};
use crate::types::{AttributeId, EntityId, TxId};
use crate::value::{Value, ValueTag};
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

/// One fact `(E, A, V, T, retract?)` in the layout of a specific index.
///
/// The bytes are shared, so clones are cheap and datoms read from a
/// snapshot do not copy the stored key.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Datom {
    prefix: KeyPrefix,
    bytes: Bytes,
}

impl Datom {
    /// Builds a datom from a prefix and already-encoded value bytes.
    #[must_use]
    pub fn new(prefix: KeyPrefix, value: &[u8]) -> Self {
        let mut buf = BytesMut::with_capacity(KEY_PREFIX_SIZE + value.len());
        buf.put_slice(&prefix.encode());
        buf.put_slice(value);
        Self {
            prefix,
            bytes: buf.freeze(),
        }
    }

    /// Builds an assertion of `value` in EAVT layout.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be encoded.
    pub fn assert(e: EntityId, a: AttributeId, value: &Value, t: TxId) -> CoreResult<Self> {
        let prefix = KeyPrefix::new(IndexType::EavtCurrent, e, a, t, false, value.tag());
        Ok(Self::new(prefix, &value.encode()?))
    }

    /// Parses a stored key.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::MalformedKey`] if the prefix is invalid.
    pub fn from_bytes(bytes: Bytes) -> CoreResult<Self> {
        let prefix = KeyPrefix::decode(&bytes)?;
        Ok(Self { prefix, bytes })
    }

    /// Returns the decoded prefix.
    #[must_use]
    pub fn prefix(&self) -> &KeyPrefix {
        &self.prefix
    }

    /// Index whose layout these bytes follow.
    #[must_use]
    pub fn index(&self) -> IndexType {
        self.prefix.index
    }

    /// Entity.
    #[must_use]
    pub fn e(&self) -> EntityId {
        self.prefix.e
    }

    /// Attribute.
    #[must_use]
    pub fn a(&self) -> AttributeId {
        self.prefix.a
    }

    /// Transaction.
    #[must_use]
    pub fn t(&self) -> TxId {
        self.prefix.t
    }

    /// True for a retraction.
    #[must_use]
    pub fn is_retract(&self) -> bool {
        self.prefix.is_retract
    }

    /// Tag of the value bytes.
    #[must_use]
    pub fn value_tag(&self) -> ValueTag {
        self.prefix.value_tag
    }

    /// Encoded value bytes.
    #[must_use]
    pub fn value_bytes(&self) -> &[u8] {
        &self.bytes[KEY_PREFIX_SIZE..]
    }

    /// Decodes the value.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidValue`] if the bytes do not match the tag.
    pub fn value(&self) -> CoreResult<Value> {
        Value::decode(self.value_tag(), self.value_bytes())
    }

    /// True when both datoms carry the same value.
    #[must_use]
    pub fn same_value(&self, other: &Self) -> bool {
        self.value_tag() == other.value_tag() && self.value_bytes() == other.value_bytes()
    }

    /// True when both datoms state the same `(E, A, V)`, ignoring `T`.
    #[must_use]
    pub fn same_fact(&self, other: &Self) -> bool {
        self.e() == other.e() && self.a() == other.a() && self.same_value(other)
    }

    /// Returns the full key.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consumes the datom and returns its key.
    #[must_use]
    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }

    /// Returns the same fact laid out for `index`.
    #[must_use]
    pub fn to_index(&self, index: IndexType) -> Self {
        if index == self.prefix.index {
            return self.clone();
        }
        Self::new(self.prefix.with_index(index), self.value_bytes())
    }

    /// Returns the retraction of this fact stamped with `tx`.
    #[must_use]
    pub fn retracted_at(&self, tx: TxId) -> Self {
        let prefix = KeyPrefix {
            t: tx,
            is_retract: true,
            ..self.prefix
        };
        Self::new(prefix, self.value_bytes())
    }

    /// Checks that this datom is a valid retraction target for `other`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ConsistencyViolation`] when the entity or
    /// attribute differ, or when `same_value` is requested and the values
    /// differ.
    pub fn check_target(&self, other: &Self, same_value: bool) -> CoreResult<()> {
        if self.e() != other.e() || self.a() != other.a() {
            return Err(CoreError::consistency_violation(format!(
                "retraction target {self:?} does not match {other:?}"
            )));
        }
        if same_value && !self.same_value(other) {
            return Err(CoreError::consistency_violation(format!(
                "retraction target {self:?} has a different value than {other:?}"
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for Datom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = self
            .value()
            .map_or_else(|_| format!("<{} bytes>", self.value_bytes().len()), |v| v.to_string());
        write!(
            f,
            "[{} {} {} {}{}]",
            self.e(),
            self.a(),
            value,
            self.t(),
            if self.is_retract() { " retract" } else { "" }
        )
    }
}
