//! Load helpers for the single-writer pipeline.
//!
//! These drive many transactions through one store, from one or several
//! threads, and report throughput plus how many transactions failed.

use crate::fixtures::{entity, FileSchema};
use mnemo_core::{CoreError, DatomStore, Transaction, TxId};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the run.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total operations: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Configuration for stress runs.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of transactions to submit.
    pub operations: usize,
    /// Number of submitting or reading threads.
    pub threads: usize,
    /// Number of distinct entities written.
    pub entity_count: u64,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 10_000,
            threads: 4,
            entity_count: 1_000,
        }
    }
}

fn outcome(result: Result<(), CoreError>, successful: &mut usize, failed: &mut usize) {
    match result {
        Ok(()) => *successful += 1,
        Err(_) => *failed += 1,
    }
}

/// Submits one transaction at a time and waits for each.
pub fn stress_sequential_writes(
    store: &DatomStore,
    schema: FileSchema,
    config: &StressConfig,
) -> StressTestResult {
    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for i in 0..config.operations {
        let e = entity(i as u64 % config.entity_count + 1);
        let mut tx = Transaction::new();
        tx.add(e, schema.size, i as u64);
        let result = store.transact(tx).wait().map(|_| ());
        outcome(result, &mut successful, &mut failed);
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

/// Submits every transaction first, then waits for all of them.
///
/// Returns the result and the committed transaction ids in submission
/// order.
pub fn stress_pipelined_writes(
    store: &DatomStore,
    schema: FileSchema,
    config: &StressConfig,
) -> (StressTestResult, Vec<TxId>) {
    let start = Instant::now();
    let pending: Vec<_> = (0..config.operations)
        .map(|i| {
            let mut tx = Transaction::new();
            tx.add(entity(i as u64 % config.entity_count + 1), schema.size, i as u64);
            store.transact(tx)
        })
        .collect();

    let mut ids = Vec::with_capacity(pending.len());
    let mut failed = 0usize;
    for p in pending {
        match p.wait() {
            Ok(result) => ids.push(result.tx_id),
            Err(_) => failed += 1,
        }
    }

    (StressTestResult::new(ids.len(), failed, start.elapsed()), ids)
}

/// Submits from several threads at once and checks that every committed
/// transaction got a distinct id.
pub fn stress_concurrent_writes(
    store: Arc<DatomStore>,
    schema: FileSchema,
    config: &StressConfig,
) -> StressTestResult {
    let ops_per_thread = config.operations / config.threads;
    let entity_count = config.entity_count;
    let start = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|t| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                let mut ids = Vec::with_capacity(ops_per_thread);
                let mut failed = 0usize;
                for i in 0..ops_per_thread {
                    let n = (t * ops_per_thread + i) as u64;
                    let mut tx = Transaction::new();
                    tx.add(entity(n % entity_count + 1), schema.size, n);
                    match store.transact(tx).wait() {
                        Ok(result) => ids.push(result.tx_id),
                        Err(_) => failed += 1,
                    }
                }
                (ids, failed)
            })
        })
        .collect();

    let mut seen = HashSet::new();
    let mut successful = 0usize;
    let mut failed = 0usize;
    for handle in handles {
        let (ids, thread_failed) = handle.join().expect("thread panicked");
        failed += thread_failed;
        for id in ids {
            if seen.insert(id) {
                successful += 1;
            } else {
                failed += 1;
            }
        }
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

/// Reads from several threads while the calling thread keeps writing.
///
/// A read fails if a view ever shows a size smaller than one seen earlier
/// by the same reader, since sizes only grow.
pub fn stress_concurrent_reads(
    store: Arc<DatomStore>,
    schema: FileSchema,
    config: &StressConfig,
) -> StressTestResult {
    let e = entity(1);
    let mut tx = Transaction::new();
    tx.add(e, schema.size, 0u64);
    let _ = store.transact(tx).wait();

    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let reads_per_thread = config.operations / config.threads;
    let start = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|_| {
            let store = Arc::clone(&store);
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);
            thread::spawn(move || {
                let mut high = 0u64;
                for _ in 0..reads_per_thread {
                    match store.db().get(e, schema.size) {
                        Ok(Some(value)) => {
                            let size = value.as_u64().unwrap_or(0);
                            if size >= high {
                                high = size;
                                successful.fetch_add(1, Ordering::Relaxed);
                            } else {
                                failed.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                        _ => {
                            failed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            })
        })
        .collect();

    for n in 1..=config.entity_count {
        let mut tx = Transaction::new();
        tx.add(e, schema.size, n);
        let _ = store.transact(tx).wait();
    }

    for handle in handles {
        handle.join().expect("thread panicked");
    }

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
}

/// Every other transaction carries a function that aborts it.
pub fn stress_transaction_aborts(
    store: &DatomStore,
    schema: FileSchema,
    config: &StressConfig,
) -> StressTestResult {
    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for i in 0..config.operations {
        let mut tx = Transaction::new();
        tx.add(entity(i as u64 % config.entity_count + 1), schema.size, i as u64);
        if i % 2 == 0 {
            tx.add_function(|_, _| Err(CoreError::transaction_aborted("intentional")));
        }
        let result = store.transact(tx).wait().map(|_| ());
        outcome(result, &mut successful, &mut failed);
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

/// Writes `config.operations` datoms in transactions of 100 new entities.
pub fn stress_large_transactions(
    store: &DatomStore,
    schema: FileSchema,
    config: &StressConfig,
) -> StressTestResult {
    let batch_size = 100;
    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for batch in 0..(config.operations / batch_size) {
        let mut tx = Transaction::new();
        for i in 0..batch_size {
            let e = tx.temp_id(mnemo_core::PartitionId::ENTITY);
            tx.add(e, schema.path, format!("/batch-{batch}/{i}"));
        }
        match store.transact(tx).wait() {
            Ok(_) => successful += batch_size,
            Err(_) => failed += batch_size,
        }
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::TestStore;

    fn config(operations: usize) -> StressConfig {
        StressConfig {
            operations,
            threads: 4,
            entity_count: 50,
        }
    }

    #[test]
    fn sequential_writes() {
        let store = TestStore::memory();
        let schema = FileSchema::register(&store);
        let result = stress_sequential_writes(&store, schema, &config(500));
        assert_eq!(result.failed_ops, 0);
        assert_eq!(result.successful_ops, 500);
    }

    #[test]
    fn pipelined_writes_commit_in_order() {
        let store = TestStore::memory();
        let schema = FileSchema::register(&store);
        let (result, ids) = stress_pipelined_writes(&store, schema, &config(500));
        assert_eq!(result.failed_ops, 0);
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn concurrent_writes_get_distinct_ids() {
        let store = Arc::new(DatomStore::open_in_memory().unwrap());
        let schema = FileSchema::register(&store);
        let result = stress_concurrent_writes(Arc::clone(&store), schema, &config(400));
        assert_eq!(result.failed_ops, 0);
        assert_eq!(result.successful_ops, 400);
    }

    #[test]
    fn concurrent_reads_see_monotonic_views() {
        let store = Arc::new(DatomStore::open_in_memory().unwrap());
        let schema = FileSchema::register(&store);
        let result = stress_concurrent_reads(store, schema, &config(2_000));
        assert_eq!(result.failed_ops, 0);
    }

    #[test]
    fn transaction_aborts() {
        let store = TestStore::memory();
        let schema = FileSchema::register(&store);
        let result = stress_transaction_aborts(&store, schema, &config(100));
        assert_eq!(result.successful_ops, 50);
        assert_eq!(result.failed_ops, 50);
    }

    #[test]
    fn large_transactions() {
        let store = TestStore::memory();
        let schema = FileSchema::register(&store);
        let result = stress_large_transactions(&store, schema, &config(1_000));
        assert_eq!(result.failed_ops, 0);
        assert_eq!(store.db().datoms_for_attribute(schema.path).unwrap().len(), 1_000);
    }
}
