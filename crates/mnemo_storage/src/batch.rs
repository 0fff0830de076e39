//! Atomic write batches.

use crate::backend::IndexId;
use crate::error::{StorageError, StorageResult};
use bytes::Bytes;

/// A single buffered mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    /// Insert a key into an index.
    Put {
        /// Destination index.
        index: IndexId,
        /// Full key bytes.
        key: Bytes,
    },
    /// Remove a key from an index.
    Delete {
        /// Source index.
        index: IndexId,
        /// Full key bytes.
        key: Bytes,
    },
}

impl BatchOp {
    const PUT: u8 = 1;
    const DELETE: u8 = 2;

    /// Returns the index this operation targets.
    #[must_use]
    pub fn index(&self) -> IndexId {
        match self {
            Self::Put { index, .. } | Self::Delete { index, .. } => *index,
        }
    }

    /// Returns the key this operation targets.
    #[must_use]
    pub fn key(&self) -> &Bytes {
        match self {
            Self::Put { key, .. } | Self::Delete { key, .. } => key,
        }
    }
}

/// Buffered puts and deletes applied atomically by
/// [`StorageBackend::commit`](crate::StorageBackend::commit).
///
/// Dropping a batch without committing it discards every buffered operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    /// Creates an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffers an insert of `key` into `index`.
    pub fn put(&mut self, index: IndexId, key: impl Into<Bytes>) {
        self.ops.push(BatchOp::Put {
            index,
            key: key.into(),
        });
    }

    /// Buffers a removal of `key` from `index`.
    pub fn delete(&mut self, index: IndexId, key: impl Into<Bytes>) {
        self.ops.push(BatchOp::Delete {
            index,
            key: key.into(),
        });
    }

    /// Returns the number of buffered operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Returns true when nothing has been buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Returns the buffered operations in insertion order.
    #[must_use]
    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    /// Serializes the batch for the commit log.
    ///
    /// Layout: `count:u32` then per op `kind:u8 | index:u8 | len:u32 | key`,
    /// all integers little-endian.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let body: usize = self.ops.iter().map(|op| 6 + op.key().len()).sum();
        let mut buf = Vec::with_capacity(4 + body);
        buf.extend_from_slice(&(self.ops.len() as u32).to_le_bytes());
        for op in &self.ops {
            let kind = match op {
                BatchOp::Put { .. } => BatchOp::PUT,
                BatchOp::Delete { .. } => BatchOp::DELETE,
            };
            buf.push(kind);
            buf.push(op.index());
            buf.extend_from_slice(&(op.key().len() as u32).to_le_bytes());
            buf.extend_from_slice(op.key());
        }
        buf
    }

    /// Parses a batch written by [`WriteBatch::encode`].
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Corrupted`] on truncation, unknown op kinds or
    /// trailing bytes.
    pub fn decode(payload: &[u8]) -> StorageResult<Self> {
        let mut cursor = 0usize;

        let read_u32 = |cursor: &mut usize| -> StorageResult<u32> {
            let end = *cursor + 4;
            let bytes: [u8; 4] = payload
                .get(*cursor..end)
                .and_then(|s| s.try_into().ok())
                .ok_or_else(|| StorageError::corrupted("unexpected end of batch"))?;
            *cursor = end;
            Ok(u32::from_le_bytes(bytes))
        };

        let count = read_u32(&mut cursor)? as usize;
        let mut batch = Self {
            ops: Vec::with_capacity(count.min(payload.len() / 6 + 1)),
        };

        for _ in 0..count {
            let header = payload
                .get(cursor..cursor + 2)
                .ok_or_else(|| StorageError::corrupted("unexpected end of batch"))?;
            let (kind, index) = (header[0], header[1]);
            cursor += 2;
            let len = read_u32(&mut cursor)? as usize;
            let key = payload
                .get(cursor..cursor + len)
                .ok_or_else(|| StorageError::corrupted("batch key extends past payload"))?;
            cursor += len;
            let key = Bytes::copy_from_slice(key);
            match kind {
                BatchOp::PUT => batch.put(index, key),
                BatchOp::DELETE => batch.delete(index, key),
                other => {
                    return Err(StorageError::corrupted(format!(
                        "unknown batch op kind {other}"
                    )))
                }
            }
        }

        if cursor != payload.len() {
            return Err(StorageError::corrupted(format!(
                "batch has {} trailing bytes",
                payload.len() - cursor
            )));
        }

        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_starts_empty() {
        let batch = WriteBatch::new();
        assert!(batch.is_empty());
        assert_eq!(batch.len(), 0);
    }

    #[test]
    fn batch_preserves_op_order() {
        let mut batch = WriteBatch::new();
        batch.put(1, vec![1u8, 2]);
        batch.delete(2, vec![3u8]);
        batch.put(1, vec![4u8]);

        let kinds: Vec<_> = batch
            .ops()
            .iter()
            .map(|op| matches!(op, BatchOp::Put { .. }))
            .collect();
        assert_eq!(kinds, vec![true, false, true]);
        assert_eq!(batch.ops()[1].index(), 2);
    }

    #[test]
    fn batch_encoding_is_readable() {
        let mut batch = WriteBatch::new();
        batch.put(3, b"hello".to_vec());
        batch.delete(9, Vec::new());

        let decoded = WriteBatch::decode(&batch.encode()).unwrap();
        assert_eq!(decoded, batch);
    }

    #[test]
    fn batch_decode_rejects_truncation() {
        let mut batch = WriteBatch::new();
        batch.put(3, b"hello".to_vec());
        let encoded = batch.encode();

        let result = WriteBatch::decode(&encoded[..encoded.len() - 1]);
        assert!(matches!(result, Err(StorageError::Corrupted(_))));
    }

    #[test]
    fn batch_decode_rejects_trailing_bytes() {
        let mut encoded = WriteBatch::new().encode();
        encoded.push(0);
        assert!(WriteBatch::decode(&encoded).is_err());
    }

    #[test]
    fn batch_decode_rejects_unknown_kind() {
        let mut batch = WriteBatch::new();
        batch.put(1, vec![0u8]);
        let mut encoded = batch.encode();
        encoded[4] = 7;
        assert!(WriteBatch::decode(&encoded).is_err());
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        fn op_strategy() -> impl Strategy<Value = (bool, u8, Vec<u8>)> {
            (any::<bool>(), 0u8..12, prop::collection::vec(any::<u8>(), 0..40))
        }

        proptest! {
            #[test]
            fn decoded_batch_replays_same_ops(ops in prop::collection::vec(op_strategy(), 0..30)) {
                let mut batch = WriteBatch::new();
                for (is_put, index, key) in &ops {
                    if *is_put {
                        batch.put(*index, key.clone());
                    } else {
                        batch.delete(*index, key.clone());
                    }
                }
                let decoded = WriteBatch::decode(&batch.encode()).unwrap();
                prop_assert_eq!(decoded.len(), ops.len());
                for (op, (is_put, index, key)) in decoded.ops().iter().zip(&ops) {
                    prop_assert_eq!(matches!(op, BatchOp::Put { .. }), *is_put);
                    prop_assert_eq!(op.index(), *index);
                    prop_assert_eq!(op.key().as_ref(), key.as_slice());
                }
            }

            #[test]
            fn decode_never_panics(payload in prop::collection::vec(any::<u8>(), 0..200)) {
                let _ = WriteBatch::decode(&payload);
            }
        }
    }
}
