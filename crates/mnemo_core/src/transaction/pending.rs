//! Caller-side handles for submitted transactions.

use crate::db::Db;
use crate::error::{CoreError, CoreResult};
use crate::types::{EntityId, TxId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Lifecycle of a submitted transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    /// Waiting in the writer's queue.
    Queued,
    /// Temporary ids and transaction functions are being resolved.
    Resolving,
    /// Index writes are being built and committed.
    Applying,
    /// Committed and visible.
    Committed,
    /// Aborted; nothing was written.
    Failed,
    /// The caller stopped waiting; the writer may still finish it.
    TimedOut,
}

impl TxState {
    /// True once the writer is done with the transaction.
    #[must_use]
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Committed | Self::Failed)
    }
}

pub(crate) type StateCell = Arc<Mutex<TxState>>;

/// Outcome of a committed transaction.
#[derive(Debug, Clone)]
pub struct CommitResult {
    /// Id assigned to the transaction.
    pub tx_id: TxId,
    /// Temporary id → allocated id.
    pub remaps: HashMap<EntityId, EntityId>,
    /// View that includes the transaction.
    pub db: Db,
    /// Number of datoms written to the transaction log.
    pub datoms: usize,
}

impl CommitResult {
    /// Real id for a temporary id used in the transaction.
    #[must_use]
    pub fn remap(&self, temp: EntityId) -> Option<EntityId> {
        self.remaps.get(&temp).copied()
    }
}

/// Handle to a transaction submitted to the writer.
#[derive(Debug)]
pub struct PendingTransaction {
    receiver: Receiver<CoreResult<CommitResult>>,
    state: StateCell,
    timeout: Duration,
}

impl PendingTransaction {
    pub(crate) fn new(
        receiver: Receiver<CoreResult<CommitResult>>,
        state: StateCell,
        timeout: Duration,
    ) -> Self {
        Self {
            receiver,
            state,
            timeout,
        }
    }

    /// Current state as last set by the writer or by a timed-out wait.
    #[must_use]
    pub fn state(&self) -> TxState {
        *self.state.lock()
    }

    /// Blocks until the writer finishes or the store's deadline expires.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TransactionTimeout`] when the deadline expires
    /// (the write may still land), [`CoreError::StoreClosed`] when the writer
    /// stopped, or the error that failed the transaction.
    pub fn wait(self) -> CoreResult<CommitResult> {
        let timeout = self.timeout;
        self.wait_timeout(timeout)
    }

    /// Blocks up to `timeout` for the writer to finish.
    ///
    /// # Errors
    ///
    /// See [`wait`](Self::wait).
    pub fn wait_timeout(self, timeout: Duration) -> CoreResult<CommitResult> {
        match self.receiver.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                let mut state = self.state.lock();
                if !state.is_finished() {
                    *state = TxState::TimedOut;
                }
                warn!(?timeout, "transaction not processed before deadline");
                Err(CoreError::TransactionTimeout { timeout })
            }
            Err(RecvTimeoutError::Disconnected) => Err(CoreError::StoreClosed),
        }
    }
}
