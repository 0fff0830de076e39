//! Stream of committed revisions.
//!
//! Every commit publishes a [`Revision`] carrying the new transaction id and
//! a [`Db`] view that includes it. Subscribers receive revisions in commit
//! order on an `mpsc` channel; the writer thread does the sending, so a
//! subscriber that wants to do heavy work should move it to its own thread.
//!
//! # Usage
//!
//! ```rust
//! use mnemo_core::{DatomStore, Transaction};
//!
//! let store = DatomStore::open_in_memory()?;
//! let revisions = store.revisions();
//!
//! let committed = store.transact(Transaction::new()).wait()?;
//! let revision = revisions.recv().unwrap();
//! assert_eq!(revision.tx_id, committed.tx_id);
//! # Ok::<(), mnemo_core::CoreError>(())
//! ```

use crate::db::Db;
use crate::types::TxId;
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, Sender};

/// A committed transaction and the view it produced.
#[derive(Debug, Clone)]
pub struct Revision {
    /// Transaction id.
    pub tx_id: TxId,
    /// View as of `tx_id`.
    pub db: Db,
}

/// Distributes revisions to subscribers and keeps a short history.
pub struct Revisions {
    subscribers: RwLock<Vec<Sender<Revision>>>,
    history: RwLock<VecDeque<Revision>>,
    max_history: usize,
}

impl Revisions {
    /// Creates a feed that keeps the last `max_history` revisions.
    #[must_use]
    pub fn new(max_history: usize) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            history: RwLock::new(VecDeque::new()),
            max_history,
        }
    }

    /// Returns a receiver for every revision published from now on.
    pub fn subscribe(&self) -> Receiver<Revision> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Sends `revision` to every live subscriber.
    ///
    /// Subscribers whose receiver was dropped are forgotten.
    pub fn publish(&self, revision: Revision) {
        {
            let mut history = self.history.write();
            history.push_back(revision.clone());
            while history.len() > self.max_history {
                history.pop_front();
            }
        }

        let mut subscribers = self.subscribers.write();
        subscribers.retain(|tx| tx.send(revision.clone()).is_ok());
    }

    /// Revisions after `after`, oldest first, at most `limit`.
    ///
    /// Only the retained history is searched.
    #[must_use]
    pub fn poll(&self, after: Option<TxId>, limit: usize) -> Vec<Revision> {
        self.history
            .read()
            .iter()
            .filter(|r| after.map_or(true, |after| r.tx_id > after))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Id of the most recently published revision.
    #[must_use]
    pub fn latest_tx(&self) -> Option<TxId> {
        self.history.read().back().map(|r| r.tx_id)
    }

    /// Number of live subscribers as of the last publish.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Number of retained revisions.
    #[must_use]
    pub fn history_len(&self) -> usize {
        self.history.read().len()
    }
}

impl std::fmt::Debug for Revisions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Revisions")
            .field("subscribers", &self.subscriber_count())
            .field("history", &self.history_len())
            .finish()
    }
}
