//! Transaction builder.

use crate::db::Db;
use crate::error::CoreResult;
use crate::types::{AttributeId, EntityId, PartitionId};
use crate::value::Value;
use std::fmt;

/// A function run by the writer against the pre-transaction view.
///
/// It may append facts (and further functions) to the transaction it is
/// given. Returning an error aborts the whole transaction.
pub type TxFunction = Box<dyn FnOnce(&Db, &mut Transaction) -> CoreResult<()> + Send>;

/// One fact to assert or retract.
#[derive(Debug, Clone, PartialEq)]
pub struct Fact {
    /// Entity; may be a temporary id.
    pub e: EntityId,
    /// Attribute.
    pub a: AttributeId,
    /// Value; references may be temporary ids.
    pub value: Value,
    /// True to retract instead of assert.
    pub is_retract: bool,
}

/// Facts and functions to commit together.
///
/// # Example
///
/// ```rust
/// use mnemo_core::{AttributeId, PartitionId, Transaction};
///
/// let name = AttributeId::new(9);
/// let mut tx = Transaction::new();
/// let person = tx.temp_id(PartitionId::ENTITY);
/// tx.add(person, name, "ann");
/// assert_eq!(tx.len(), 1);
/// ```
#[derive(Default)]
pub struct Transaction {
    facts: Vec<Fact>,
    functions: Vec<TxFunction>,
    last_temp: u64,
}

impl Transaction {
    /// Creates an empty transaction.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a fresh temporary id that the writer will replace with a new
    /// id in `partition`.
    ///
    /// The same temporary id maps to the same real id everywhere in this
    /// transaction.
    pub fn temp_id(&mut self, partition: PartitionId) -> EntityId {
        self.last_temp = self.last_temp % EntityId::MAX_TEMP_SEQUENCE + 1;
        EntityId::temp_unchecked(partition, self.last_temp)
    }

    /// The id that stands for this transaction's own entity.
    #[must_use]
    pub const fn self_id() -> EntityId {
        EntityId::TX_SELF
    }

    /// Asserts `value` for `a` on `e`.
    pub fn add(&mut self, e: EntityId, a: AttributeId, value: impl Into<Value>) -> &mut Self {
        self.push(e, a, value.into(), false)
    }

    /// Retracts `value` for `a` on `e`.
    pub fn retract(&mut self, e: EntityId, a: AttributeId, value: impl Into<Value>) -> &mut Self {
        self.push(e, a, value.into(), true)
    }

    fn push(&mut self, e: EntityId, a: AttributeId, value: Value, is_retract: bool) -> &mut Self {
        self.facts.push(Fact {
            e,
            a,
            value,
            is_retract,
        });
        self
    }

    /// Queues a function to run in the writer before indexing.
    pub fn add_function<F>(&mut self, function: F) -> &mut Self
    where
        F: FnOnce(&Db, &mut Transaction) -> CoreResult<()> + Send + 'static,
    {
        self.functions.push(Box::new(function));
        self
    }

    /// The facts added so far.
    #[must_use]
    pub fn facts(&self) -> &[Fact] {
        &self.facts
    }

    /// Number of facts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.facts.len()
    }

    /// True when there are no facts.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    /// Number of functions not yet run.
    #[must_use]
    pub fn function_count(&self) -> usize {
        self.functions.len()
    }

    pub(crate) fn take_functions(&mut self) -> Vec<TxFunction> {
        std::mem::take(&mut self.functions)
    }

    pub(crate) fn into_facts(self) -> Vec<Fact> {
        self.facts
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("facts", &self.facts)
            .field("functions", &self.functions.len())
            .finish()
    }
}
