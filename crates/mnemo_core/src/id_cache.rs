//! Per-partition entity id allocation.

use crate::datom::Datom;
use crate::error::{CoreError, CoreResult};
use crate::index::IndexType;
use crate::key::{successor, KeyHead};
use crate::types::{EntityId, PartitionId, PAYLOAD_MASK};
use mnemo_storage::StorageSnapshot;

const PARTITIONS: usize = 256;

/// Last payload handed out in each partition.
///
/// Owned by the writer thread; it is never shared, so it needs no locking.
/// A partition's counter is bootstrapped lazily from storage the first time
/// an id is requested there.
#[derive(Debug, Clone)]
pub struct NextIdCache {
    last: [Option<u64>; PARTITIONS],
}

impl Default for NextIdCache {
    fn default() -> Self {
        Self::new()
    }
}

impl NextIdCache {
    /// Creates a cache with every partition unset.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last: [None; PARTITIONS],
        }
    }

    /// Allocates the next id in `partition`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::PartitionExhausted`] once every payload has been
    /// used, [`CoreError::InvalidOperation`] for the temporary partition, or
    /// a storage error from the bootstrap seek.
    pub fn next_id(
        &mut self,
        snapshot: &dyn StorageSnapshot,
        partition: PartitionId,
    ) -> CoreResult<EntityId> {
        if partition == PartitionId::TEMP {
            return Err(CoreError::invalid_operation(
                "ids are never allocated in the temporary partition",
            ));
        }
        let slot = &mut self.last[usize::from(partition.as_u8())];
        let last = match *slot {
            Some(last) => last,
            None => last_entity_in_partition(snapshot, partition)?.map_or(0, EntityId::payload),
        };
        let next = last + 1;
        if next > PAYLOAD_MASK {
            return Err(CoreError::PartitionExhausted {
                partition: partition.as_u8(),
            });
        }
        *slot = Some(next);
        Ok(partition.make_id(next))
    }

    /// Last id handed out in `partition`, if any was handed out by this cache.
    #[must_use]
    pub fn peek(&self, partition: PartitionId) -> Option<EntityId> {
        self.last[usize::from(partition.as_u8())].map(|p| partition.make_id(p))
    }

    /// Records an id written without being allocated here, so later
    /// allocations in its partition skip past it.
    ///
    /// # Errors
    ///
    /// Returns a storage error from the bootstrap seek.
    pub fn observe(&mut self, snapshot: &dyn StorageSnapshot, e: EntityId) -> CoreResult<()> {
        let partition = e.partition();
        let slot = &mut self.last[usize::from(partition.as_u8())];
        let last = match *slot {
            Some(last) => last,
            None => last_entity_in_partition(snapshot, partition)?.map_or(0, EntityId::payload),
        };
        *slot = Some(last.max(e.payload()));
        Ok(())
    }

    /// Forgets every counter so the next request re-reads storage.
    pub fn reset(&mut self) {
        self.last = [None; PARTITIONS];
    }
}

/// Highest entity id of `partition` present in EAVT, current or history.
///
/// A single reverse seek per index; no scan.
///
/// # Errors
///
/// Returns a storage error or [`CoreError::MalformedKey`] if the key found
/// cannot be decoded.
pub fn last_entity_in_partition(
    snapshot: &dyn StorageSnapshot,
    partition: PartitionId,
) -> CoreResult<Option<EntityId>> {
    let mut best = None;
    for index in [IndexType::EavtCurrent, IndexType::EavtHistory] {
        let head = KeyHead::new(index).byte(partition.as_u8());
        let Some(upper) = successor(head.as_bytes()) else {
            continue;
        };
        if let Some(key) = snapshot.first(index.as_byte(), &upper, head.as_bytes())? {
            let e = Datom::from_bytes(key)?.e();
            best = best.max(Some(e));
        }
    }
    Ok(best)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexSet;
    use crate::types::{AttributeId, TxId};
    use crate::value::Value;
    use mnemo_storage::InMemoryBackend;
    use proptest::prelude::*;
    use std::sync::Arc;

    fn empty_set() -> IndexSet {
        IndexSet::open(Arc::new(InMemoryBackend::new()), None).unwrap()
    }

    fn seed(set: &IndexSet, ids: &[EntityId], index: IndexType) {
        let tx = TxId::from(PartitionId::TRANSACTIONS.make_id(1));
        let mut batch = set.batch();
        for &e in ids {
            let datom = Datom::assert(e, AttributeId::new(10), &Value::UInt64(1), tx).unwrap();
            set.put(&mut batch, index, &datom);
        }
        set.commit(batch).unwrap();
    }

    #[test]
    fn empty_partition_starts_at_one() {
        let set = empty_set();
        let snapshot = set.snapshot().unwrap();
        let mut cache = NextIdCache::new();
        assert_eq!(
            cache.next_id(snapshot.as_ref(), PartitionId::ENTITY).unwrap(),
            PartitionId::ENTITY.make_id(1)
        );
        assert_eq!(
            cache.next_id(snapshot.as_ref(), PartitionId::ENTITY).unwrap(),
            PartitionId::ENTITY.make_id(2)
        );
    }

    #[test]
    fn bootstrap_reads_highest_stored_id() {
        let set = empty_set();
        seed(
            &set,
            &[
                PartitionId::ENTITY.make_id(7),
                PartitionId::ENTITY.make_id(40),
                PartitionId::new(4).make_id(900),
            ],
            IndexType::EavtCurrent,
        );
        seed(&set, &[PartitionId::ENTITY.make_id(55)], IndexType::EavtHistory);

        let snapshot = set.snapshot().unwrap();
        assert_eq!(
            last_entity_in_partition(snapshot.as_ref(), PartitionId::ENTITY).unwrap(),
            Some(PartitionId::ENTITY.make_id(55))
        );

        let mut cache = NextIdCache::new();
        assert_eq!(
            cache.next_id(snapshot.as_ref(), PartitionId::ENTITY).unwrap(),
            PartitionId::ENTITY.make_id(56)
        );
        assert_eq!(
            cache.next_id(snapshot.as_ref(), PartitionId::new(4)).unwrap(),
            PartitionId::new(4).make_id(901)
        );
        assert_eq!(
            cache.next_id(snapshot.as_ref(), PartitionId::new(5)).unwrap(),
            PartitionId::new(5).make_id(1)
        );
    }

    #[test]
    fn highest_partition_is_seekable() {
        let set = empty_set();
        let top = PartitionId::new(u8::MAX);
        seed(&set, &[top.make_id(3)], IndexType::EavtCurrent);
        let snapshot = set.snapshot().unwrap();
        assert_eq!(
            last_entity_in_partition(snapshot.as_ref(), top).unwrap(),
            Some(top.make_id(3))
        );
    }

    #[test]
    fn temp_partition_is_refused() {
        let set = empty_set();
        let snapshot = set.snapshot().unwrap();
        let result = NextIdCache::new().next_id(snapshot.as_ref(), PartitionId::TEMP);
        assert!(matches!(result, Err(CoreError::InvalidOperation { .. })));
    }

    #[test]
    fn exhausted_partition_fails() {
        let set = empty_set();
        seed(&set, &[PartitionId::ENTITY.max_id()], IndexType::EavtCurrent);
        let snapshot = set.snapshot().unwrap();
        let result = NextIdCache::new().next_id(snapshot.as_ref(), PartitionId::ENTITY);
        assert!(matches!(
            result,
            Err(CoreError::PartitionExhausted { partition: 2 })
        ));
    }

    #[test]
    fn reset_rereads_storage() {
        let set = empty_set();
        let mut cache = NextIdCache::new();
        let snapshot = set.snapshot().unwrap();
        cache.next_id(snapshot.as_ref(), PartitionId::ENTITY).unwrap();
        assert_eq!(cache.peek(PartitionId::ENTITY), Some(PartitionId::ENTITY.make_id(1)));

        cache.reset();
        assert_eq!(cache.peek(PartitionId::ENTITY), None);
    }

    #[test]
    fn observed_ids_are_skipped() {
        let set = empty_set();
        let snapshot = set.snapshot().unwrap();
        let mut cache = NextIdCache::new();

        cache
            .observe(snapshot.as_ref(), PartitionId::ENTITY.make_id(100))
            .unwrap();
        cache
            .observe(snapshot.as_ref(), PartitionId::ENTITY.make_id(40))
            .unwrap();
        assert_eq!(
            cache.next_id(snapshot.as_ref(), PartitionId::ENTITY).unwrap(),
            PartitionId::ENTITY.make_id(101)
        );
    }

    proptest! {
        #[test]
        fn ids_stay_in_partition_and_increase(partition in 0u8..=255, count in 1usize..50) {
            prop_assume!(partition != PartitionId::TEMP.as_u8());
            let set = empty_set();
            let snapshot = set.snapshot().unwrap();
            let partition = PartitionId::new(partition);
            let mut cache = NextIdCache::new();

            let mut previous = None;
            for _ in 0..count {
                let id = cache.next_id(snapshot.as_ref(), partition).unwrap();
                prop_assert_eq!(id.partition(), partition);
                prop_assert!(id >= partition.min_id() && id <= partition.max_id());
                prop_assert!(previous.map_or(true, |p| id > p));
                previous = Some(id);
            }
        }
    }
}
