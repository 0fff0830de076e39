//! Benchmark utilities.

use mnemo_core::{AttributeDef, AttributeId, DatomStore, EntityId, PartitionId, ValueTag};
use rand::Rng;

/// Random printable path of `len` characters.
pub fn random_path(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len).map(|_| rng.gen_range(b'a'..=b'z') as char).collect()
}

/// `count` consecutive ids in the entity partition.
pub fn entity_ids(count: usize) -> Vec<EntityId> {
    (1..=count as u64).map(|p| PartitionId::ENTITY.make_id(p)).collect()
}

/// Raw id values drawn from `partitions` partitions with small payloads.
pub fn mixed_partition_ids(count: usize, partitions: u8) -> Vec<u64> {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|_| {
            let partition = PartitionId::new(rng.gen_range(2..2 + partitions));
            partition.make_id(rng.gen_range(1..4096)).as_u64()
        })
        .collect()
}

/// Opens an in-memory store with `bench/path` (indexed) and `bench/size`.
pub fn bench_store() -> (DatomStore, AttributeId, AttributeId) {
    let store = DatomStore::open_in_memory().expect("failed to open store");
    let ids = store
        .register_attributes(vec![
            AttributeDef::new("bench/path", ValueTag::Utf8).indexed(true),
            AttributeDef::new("bench/size", ValueTag::UInt64),
        ])
        .expect("failed to register attributes");
    (store, ids[0], ids[1])
}
