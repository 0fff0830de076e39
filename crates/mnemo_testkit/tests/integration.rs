//! End-to-end scenarios against a running store.

use mnemo_core::{
    AttributeDef, CoreError, DatomStore, IndexType, KeyHead, PartitionId, StoreConfig,
    Transaction, TxState, Value, ValueTag,
};
use mnemo_testkit::prelude::*;
use proptest::prelude::*;
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::thread;
use std::time::Duration;

#[test]
fn path_change_keeps_history() {
    let store = TestStore::memory();
    let schema = FileSchema::register(&store);
    let e = entity(100);

    let first = store.commit(|tx| {
        tx.add(e, schema.path, "/a");
    });
    let second = store.commit(|tx| {
        tx.add(e, schema.path, "/b");
    });

    let db = store.db();
    assert_eq!(db.get(e, schema.path).unwrap(), Some(Value::from("/b")));
    assert_eq!(db.find_by_value(schema.path, &"/b".into()).unwrap(), vec![e]);
    assert!(db.find_by_value(schema.path, &"/a".into()).unwrap().is_empty());

    let history = db.history(e).unwrap();
    assert_eq!(history.len(), 2);
    assert!(history[0].is_retract());
    assert_eq!(history[0].value().unwrap(), Value::from("/a"));
    assert!(!history[1].is_retract());
    assert_eq!(history[1].t(), second.tx_id);

    // The first view is unchanged.
    assert_eq!(first.db.get(e, schema.path).unwrap(), Some(Value::from("/a")));
}

#[test]
fn no_history_attribute_only_keeps_current() {
    let store = TestStore::memory();
    let schema = FileSchema::register(&store);
    let e = entity(1);
    store.commit(|tx| {
        tx.add(e, schema.checksum, vec![1u8, 2]);
    });
    store.commit(|tx| {
        tx.add(e, schema.checksum, vec![3u8]);
    });

    let db = store.db();
    assert_eq!(db.get(e, schema.checksum).unwrap(), Some(Value::Blob(vec![3])));
    assert!(db.history(e).unwrap().is_empty());
}

#[test]
fn cardinality_many_accumulates_values() {
    let store = TestStore::memory();
    let schema = FileSchema::register(&store);
    let e = entity(1);
    store.commit(|tx| {
        tx.add(e, schema.tag, "b").add(e, schema.tag, "a");
    });
    store.commit(|tx| {
        tx.add(e, schema.tag, "c").add(e, schema.tag, "a");
    });

    let db = store.db();
    let tags = db.get_many(e, schema.tag).unwrap();
    assert_eq!(tags, vec![Value::from("a"), Value::from("b"), Value::from("c")]);
    assert!(matches!(
        db.get(e, schema.tag),
        Err(CoreError::InvalidOperation { .. })
    ));
    assert!(db.history(e).unwrap().is_empty());
}

#[test]
fn directory_tree_by_reference() {
    let store = TestStore::memory();
    let schema = FileSchema::register(&store);

    let mut tx = Transaction::new();
    let root = tx.temp_id(PartitionId::ENTITY);
    let children: Vec<_> = (0..3)
        .map(|n| {
            let child = tx.temp_id(PartitionId::ENTITY);
            tx.add(child, schema.path, format!("/child-{n}"))
                .add(child, schema.parent, root);
            child
        })
        .collect();
    tx.add(root, schema.path, "/");
    let result = store.transact(tx).wait().unwrap();

    let root = result.remap(root).unwrap();
    let mut expected: Vec<_> = children.iter().map(|c| result.remap(*c).unwrap()).collect();
    expected.sort();

    let mut found = store.db().referencing(schema.parent, root).unwrap();
    found.sort();
    assert_eq!(found, expected);
    assert_eq!(result.remaps.len(), 4);
}

#[test]
fn temp_ids_continue_after_raw_ids() {
    let store = TestStore::memory();
    let schema = FileSchema::register(&store);

    store.commit(|tx| {
        tx.add(entity(500), schema.size, 1u64);
    });
    let result = store.commit(|tx| {
        let e = tx.temp_id(PartitionId::ENTITY);
        tx.add(e, schema.size, 2u64);
    });
    let allocated = result.remaps.values().next().copied().unwrap();
    assert_eq!(allocated, entity(501));
}

#[test]
fn partitions_allocate_independently() {
    let store = TestStore::memory();
    let schema = FileSchema::register(&store);
    let docs = PartitionId::new(7);
    let media = PartitionId::new(8);

    let mut tx = Transaction::new();
    let a = tx.temp_id(docs);
    let b = tx.temp_id(media);
    let c = tx.temp_id(docs);
    tx.add(a, schema.size, 1u64)
        .add(b, schema.size, 2u64)
        .add(c, schema.size, 3u64);
    let result = store.transact(tx).wait().unwrap();

    assert_eq!(result.remap(a), Some(docs.make_id(1)));
    assert_eq!(result.remap(c), Some(docs.make_id(2)));
    assert_eq!(result.remap(b), Some(media.make_id(1)));
}

#[test]
fn reserved_temp_targets_are_rejected() {
    let store = TestStore::memory();
    let schema = FileSchema::register(&store);
    let err = store
        .try_commit(|tx| {
            let e = tx.temp_id(PartitionId::TRANSACTIONS);
            tx.add(e, schema.size, 1u64);
        })
        .unwrap_err();
    assert!(matches!(err, CoreError::InvalidOperation { .. }));
}

#[test]
fn failed_transaction_leaves_no_trace() {
    let store = TestStore::memory();
    let schema = FileSchema::register(&store);
    let before = store.db();

    let mut tx = Transaction::new();
    let e = tx.temp_id(PartitionId::ENTITY);
    tx.add(e, schema.path, "/x").add(e, schema.size, "not a number");
    let pending = store.transact(tx);
    assert!(matches!(pending.wait(), Err(CoreError::InvalidValue { .. })));

    let after = store.db();
    assert_eq!(after.basis_tx(), before.basis_tx());
    assert!(after.find_by_value(schema.path, &"/x".into()).unwrap().is_empty());
}

#[test]
fn function_sees_committed_state() {
    let store = TestStore::memory();
    let schema = FileSchema::register(&store);
    let counter = entity(1);
    store.commit(|tx| {
        tx.add(counter, schema.size, 0u64);
    });

    let pending: Vec<_> = (0..10)
        .map(|_| {
            let mut tx = Transaction::new();
            tx.add_function(move |db, tx| {
                let n = db.get(counter, schema.size)?.and_then(|v| v.as_u64()).unwrap_or(0);
                tx.add(counter, schema.size, n + 1);
                Ok(())
            });
            store.transact(tx)
        })
        .collect();
    for p in pending {
        p.wait().unwrap();
    }
    assert_eq!(store.db().get(counter, schema.size).unwrap(), Some(Value::UInt64(10)));
}

#[test]
fn nested_functions_run_until_done() {
    let store = TestStore::memory();
    let schema = FileSchema::register(&store);
    let e = entity(9);

    let mut tx = Transaction::new();
    tx.add_function(move |_, tx| {
        tx.add(e, schema.tag, "outer");
        tx.add_function(move |_, tx| {
            tx.add(e, schema.tag, "inner");
            Ok(())
        });
        Ok(())
    });
    store.transact(tx).wait().unwrap();

    assert_eq!(
        store.db().get_many(e, schema.tag).unwrap(),
        vec![Value::from("inner"), Value::from("outer")]
    );
}

#[test]
fn timeout_reports_but_write_lands() {
    let config = StoreConfig::default().transaction_timeout(Duration::from_millis(20));
    let store = DatomStore::open(config).unwrap();
    let size = store
        .register_attributes(vec![AttributeDef::new("file/size", ValueTag::UInt64)])
        .unwrap()[0];

    let mut tx = Transaction::new();
    tx.add_function(move |_, tx| {
        thread::sleep(Duration::from_millis(200));
        tx.add(entity(1), size, 1u64);
        Ok(())
    });
    let pending = store.transact(tx);
    let err = pending.wait().unwrap_err();
    assert!(err.is_timeout());

    let mut waited = 0;
    while store.db().get(entity(1), size).unwrap().is_none() && waited < 100 {
        thread::sleep(Duration::from_millis(10));
        waited += 1;
    }
    assert_eq!(store.db().get(entity(1), size).unwrap(), Some(Value::UInt64(1)));
}

#[test]
fn pending_state_after_commit() {
    let store = TestStore::memory();
    let schema = FileSchema::register(&store);
    let mut tx = Transaction::new();
    tx.add(entity(1), schema.size, 1u64);
    let pending = store.transact(tx);
    store.sync().unwrap();
    assert_eq!(pending.state(), TxState::Committed);
}

#[test]
fn revisions_arrive_in_commit_order() {
    let store = TestStore::memory();
    let schema = FileSchema::register(&store);
    let revisions = store.revisions();

    let ids: Vec<_> = (0..5u64)
        .map(|n| {
            store
                .commit(|tx| {
                    tx.add(entity(n + 1), schema.size, n);
                })
                .tx_id
        })
        .collect();

    let received: Vec<_> = revisions.iter().take(5).map(|r| r.tx_id).collect();
    assert_eq!(received, ids);
    assert_eq!(store.revision_feed().poll(Some(ids[2]), 10).len(), 2);
}

#[test]
fn reopen_reloads_attributes_and_counters() {
    let store = TestStore::file();
    let schema = FileSchema::register(&store);
    let first = store.commit(|tx| {
        let e = tx.temp_id(PartitionId::ENTITY);
        tx.add(e, schema.path, "/kept").add(e, schema.tag, "x");
    });
    let kept = first.remaps.values().next().copied().unwrap();

    let store = store.reopen();
    let db = store.db();
    assert_eq!(db.basis_tx(), first.tx_id);
    assert_eq!(store.attribute_id("file/path").unwrap(), schema.path);

    let attribute = store.registry().get(schema.path).unwrap();
    assert!(attribute.indexed);
    assert_eq!(attribute.documentation.as_deref(), Some("absolute path"));
    assert_eq!(db.find_by_value(schema.path, &"/kept".into()).unwrap(), vec![kept]);

    let again = FileSchema::register(&store);
    assert_eq!(again.checksum, schema.checksum);

    let next = store.commit(|tx| {
        let e = tx.temp_id(PartitionId::ENTITY);
        tx.add(e, schema.path, "/new");
    });
    assert!(next.tx_id > first.tx_id);
    assert!(next.remaps.values().all(|e| *e > kept));

    let fresh = store
        .register_attributes(vec![AttributeDef::new("dir/name", ValueTag::Utf8)])
        .unwrap()[0];
    assert!(fresh > schema.checksum);
}

#[test]
fn torn_log_tail_is_dropped_on_reopen() {
    let store = TestStore::file();
    let schema = FileSchema::register(&store);
    store.commit(|tx| {
        tx.add(entity(1), schema.path, "/safe");
    });
    let dir = store.path().unwrap();
    store.close();

    let mut log = OpenOptions::new()
        .append(true)
        .open(dir.join("datoms.log"))
        .unwrap();
    log.write_all(b"MNL").unwrap();
    drop(log);

    let store = store.reopen();
    assert_eq!(
        store.db().get(entity(1), schema.path).unwrap(),
        Some(Value::from("/safe"))
    );
    store.commit(|tx| {
        tx.add(entity(2), schema.path, "/after");
    });
}

#[test]
fn second_open_of_same_directory_fails() {
    let store = TestStore::file();
    let path = store.path().unwrap();
    assert!(DatomStore::open_path(&path).is_err());
}

#[test]
fn segments_compress_entity_runs() {
    let (store, schema, ids) = scenarios::populated_store(200);
    let db = store.db();
    let index = IndexType::AevtCurrent;
    let (from, to) = KeyHead::new(index).attribute(schema.size).range();
    let segment = db.segment(index, &from, &to).unwrap();

    assert_eq!(segment.len(), 200);
    let entities: Vec<u64> = ids.iter().map(|e| e.as_u64()).collect();
    assert_eq!(segment.entities().unpack(), entities);
    assert!(segment.entities().size_in_bytes() < 200 * 8);
}

#[derive(Debug, Default)]
struct Model {
    sizes: HashMap<u64, u64>,
    replaced: usize,
    retracted: usize,
}

impl Model {
    fn apply(&mut self, step: &Step) {
        match *step {
            Step::Assert { e, value } => match self.sizes.insert(e, value) {
                Some(old) if old != value => self.replaced += 1,
                _ => {}
            },
            Step::Retract { e, value } => {
                if self.sizes.get(&e) == Some(&value) {
                    self.sizes.remove(&e);
                    self.retracted += 1;
                }
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn store_matches_model(steps in steps_strategy(24)) {
        let store = TestStore::memory();
        let schema = FileSchema::register(&store);
        let mut model = Model::default();

        for step in &steps {
            store.commit(|tx| match *step {
                Step::Assert { e, value } => {
                    tx.add(entity(e), schema.size, value);
                }
                Step::Retract { e, value } => {
                    tx.retract(entity(e), schema.size, value);
                }
            });
            model.apply(step);
        }

        let db = store.db();
        let mut history = 0;
        for e in 1..5u64 {
            let got = db.get(entity(e), schema.size).unwrap().and_then(|v| v.as_u64());
            prop_assert_eq!(got, model.sizes.get(&e).copied());
            history += db.history(entity(e)).unwrap().len();
        }
        // Each replacement writes a retraction and an assertion.
        prop_assert_eq!(history, model.replaced * 2 + model.retracted);
    }
}
