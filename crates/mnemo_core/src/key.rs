//! Fixed-width key prefix codec.
//!
//! Every stored key is `KeyPrefix || value-bytes`. The prefix is
//! [`KEY_PREFIX_SIZE`] bytes for every index, with integers written
//! big-endian so byte order equals numeric order. The index tag in byte 0
//! selects which field comes first:
//!
//! ```text
//! TxLog               | tag | T (8) | E (8) | A (2) | op | vtag |
//! EAVT                | tag | E (8) | A (2) | T (8) | op | vtag |
//! AEVT / AVET / VAET  | tag | A (2) | E (8) | T (8) | op | vtag |
//! ```
//!
//! `op` is 0 for a retraction and 1 for an assertion, so a retraction sorts
//! ahead of the assertion that replaces it in the same transaction.
//!
//! TxLog, EAVT and AEVT compare whole keys with `memcmp`. AVET and VAET
//! compare the attribute, then the value bytes, then the rest of the prefix
//! (see [`value_first`]).

use crate::error::{CoreError, CoreResult};
use crate::index::IndexType;
use crate::types::{AttributeId, EntityId, TxId};
use crate::value::ValueTag;
use std::cmp::Ordering;

/// Size in bytes of the encoded prefix.
pub const KEY_PREFIX_SIZE: usize = 21;

/// Bytes covering the index tag and attribute in attribute-first layouts.
const ATTRIBUTE_HEAD: usize = 3;

const OP_RETRACT: u8 = 0;
const OP_ASSERT: u8 = 1;

/// Which field an index places right after its tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// `T E A`.
    TxFirst,
    /// `E A T`.
    EntityFirst,
    /// `A E T`.
    AttributeFirst,
}

/// Decoded fixed prefix of a stored key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyPrefix {
    /// Index the key is laid out for.
    pub index: IndexType,
    /// Entity.
    pub e: EntityId,
    /// Attribute.
    pub a: AttributeId,
    /// Transaction.
    pub t: TxId,
    /// True for a retraction.
    pub is_retract: bool,
    /// Type of the value bytes that follow.
    pub value_tag: ValueTag,
}

impl KeyPrefix {
    /// Creates a prefix.
    #[must_use]
    pub const fn new(
        index: IndexType,
        e: EntityId,
        a: AttributeId,
        t: TxId,
        is_retract: bool,
        value_tag: ValueTag,
    ) -> Self {
        Self {
            index,
            e,
            a,
            t,
            is_retract,
            value_tag,
        }
    }

    /// Encodes the prefix in the layout of its index.
    #[must_use]
    pub fn encode(&self) -> [u8; KEY_PREFIX_SIZE] {
        let mut buf = [0u8; KEY_PREFIX_SIZE];
        buf[0] = self.index.as_byte();
        let e = self.e.as_u64().to_be_bytes();
        let a = self.a.as_u16().to_be_bytes();
        let t = self.t.as_u64().to_be_bytes();
        match self.index.layout() {
            Layout::TxFirst => {
                buf[1..9].copy_from_slice(&t);
                buf[9..17].copy_from_slice(&e);
                buf[17..19].copy_from_slice(&a);
            }
            Layout::EntityFirst => {
                buf[1..9].copy_from_slice(&e);
                buf[9..11].copy_from_slice(&a);
                buf[11..19].copy_from_slice(&t);
            }
            Layout::AttributeFirst => {
                buf[1..3].copy_from_slice(&a);
                buf[3..11].copy_from_slice(&e);
                buf[11..19].copy_from_slice(&t);
            }
        }
        buf[19] = if self.is_retract { OP_RETRACT } else { OP_ASSERT };
        buf[20] = self.value_tag.as_byte();
        buf
    }

    /// Decodes the prefix at the start of `bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::MalformedKey`] if `bytes` is shorter than
    /// [`KEY_PREFIX_SIZE`] or carries an unknown index tag, op byte or value
    /// tag.
    pub fn decode(bytes: &[u8]) -> CoreResult<Self> {
        if bytes.len() < KEY_PREFIX_SIZE {
            return Err(CoreError::malformed_key(format!(
                "key is {} bytes, prefix needs {KEY_PREFIX_SIZE}",
                bytes.len()
            )));
        }
        let index = IndexType::from_byte(bytes[0])
            .ok_or_else(|| CoreError::malformed_key(format!("unknown index tag {}", bytes[0])))?;

        let read_u64 = |at: usize| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&bytes[at..at + 8]);
            u64::from_be_bytes(buf)
        };
        let read_u16 = |at: usize| u16::from_be_bytes([bytes[at], bytes[at + 1]]);

        let (e, a, t) = match index.layout() {
            Layout::TxFirst => (read_u64(9), read_u16(17), read_u64(1)),
            Layout::EntityFirst => (read_u64(1), read_u16(9), read_u64(11)),
            Layout::AttributeFirst => (read_u64(3), read_u16(1), read_u64(11)),
        };

        let is_retract = match bytes[19] {
            OP_RETRACT => true,
            OP_ASSERT => false,
            other => return Err(CoreError::malformed_key(format!("unknown op byte {other}"))),
        };
        let value_tag = ValueTag::from_byte(bytes[20])
            .ok_or_else(|| CoreError::malformed_key(format!("unknown value tag {}", bytes[20])))?;

        Ok(Self {
            index,
            e: EntityId::new(e),
            a: AttributeId::new(a),
            t: TxId::new(t),
            is_retract,
            value_tag,
        })
    }

    /// Returns the same fact laid out for another index.
    #[must_use]
    pub const fn with_index(mut self, index: IndexType) -> Self {
        self.index = index;
        self
    }
}

/// Rewrites the prefix of a full key for `index`, keeping its value bytes.
///
/// # Errors
///
/// Returns [`CoreError::MalformedKey`] if the prefix cannot be decoded.
pub fn reorder(bytes: &[u8], index: IndexType) -> CoreResult<Vec<u8>> {
    let prefix = KeyPrefix::decode(bytes)?.with_index(index);
    let mut out = Vec::with_capacity(bytes.len());
    out.extend_from_slice(&prefix.encode());
    out.extend_from_slice(&bytes[KEY_PREFIX_SIZE..]);
    Ok(out)
}

/// Ordering for value-first indexes (AVET, VAET).
///
/// Compares the tag and attribute, then the value bytes, then the remaining
/// prefix bytes. Tolerates keys shorter than a full prefix so range bounds
/// can be partial.
#[must_use]
pub fn value_first(a: &[u8], b: &[u8]) -> Ordering {
    fn split(k: &[u8]) -> (&[u8], &[u8], &[u8]) {
        let head = &k[..k.len().min(ATTRIBUTE_HEAD)];
        let rest = k
            .get(ATTRIBUTE_HEAD..k.len().min(KEY_PREFIX_SIZE))
            .unwrap_or(&[]);
        let value = k.get(KEY_PREFIX_SIZE..).unwrap_or(&[]);
        (head, value, rest)
    }
    let (ha, va, ra) = split(a);
    let (hb, vb, rb) = split(b);
    ha.cmp(hb).then_with(|| va.cmp(vb)).then_with(|| ra.cmp(rb))
}

/// Smallest byte string greater than every key starting with `prefix`.
///
/// Returns `None` if `prefix` is all `0xFF`.
#[must_use]
pub fn successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut out = prefix.to_vec();
    while let Some(last) = out.pop() {
        if last != 0xFF {
            out.push(last + 1);
            return Some(out);
        }
    }
    None
}

/// Builds a key head from an index tag and leading fields.
#[derive(Debug, Clone)]
pub struct KeyHead(Vec<u8>);

impl KeyHead {
    /// Starts a head for `index`.
    #[must_use]
    pub fn new(index: IndexType) -> Self {
        let mut bytes = Vec::with_capacity(KEY_PREFIX_SIZE);
        bytes.push(index.as_byte());
        Self(bytes)
    }

    /// Appends an entity id.
    #[must_use]
    pub fn entity(mut self, e: EntityId) -> Self {
        self.0.extend_from_slice(&e.as_u64().to_be_bytes());
        self
    }

    /// Appends an attribute id.
    #[must_use]
    pub fn attribute(mut self, a: AttributeId) -> Self {
        self.0.extend_from_slice(&a.as_u16().to_be_bytes());
        self
    }

    /// Appends a transaction id.
    #[must_use]
    pub fn tx(mut self, t: TxId) -> Self {
        self.0.extend_from_slice(&t.as_u64().to_be_bytes());
        self
    }

    /// Appends one raw byte, such as a partition.
    #[must_use]
    pub fn byte(mut self, b: u8) -> Self {
        self.0.push(b);
        self
    }

    /// Ascending bounds covering every `memcmp` key that starts with this head.
    #[must_use]
    pub fn range(&self) -> (Vec<u8>, Vec<u8>) {
        let to = successor(&self.0).unwrap_or_else(|| vec![0xFF; KEY_PREFIX_SIZE + 1]);
        (self.0.clone(), to)
    }

    /// Ascending bounds covering a value-first head followed by exactly `value`.
    ///
    /// The head must be the tag and attribute of an AVET or VAET index.
    #[must_use]
    pub fn value_range(&self, value: &[u8]) -> (Vec<u8>, Vec<u8>) {
        let pad = KEY_PREFIX_SIZE.saturating_sub(self.0.len());
        let mut from = self.0.clone();
        from.extend(std::iter::repeat(0x00).take(pad));
        from.extend_from_slice(value);
        let mut to = self.0.clone();
        to.extend(std::iter::repeat(0xFF).take(pad));
        to.extend_from_slice(value);
        (from, to)
    }

    /// Returns the raw head bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}
