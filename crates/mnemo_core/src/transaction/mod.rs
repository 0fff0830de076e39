//! Transactions: building them, tracking them, and turning their facts
//! into index writes.
//!
//! A [`Transaction`] is a list of facts plus optional transaction
//! functions. It is handed to the store's single writer, which returns a
//! [`PendingTransaction`] immediately; the writer then moves it through
//! [`TxState::Queued`] → `Resolving` → `Applying` → `Committed` (or
//! `Failed`).

pub(crate) mod apply;
mod builder;
mod pending;

pub use builder::{Fact, Transaction, TxFunction};
pub use pending::{CommitResult, PendingTransaction, TxState};
pub(crate) use pending::StateCell;
