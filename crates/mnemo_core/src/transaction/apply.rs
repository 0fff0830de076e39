//! Per-fact commit decisions and the index writes they produce.

use crate::attribute::{Attribute, Cardinality};
use crate::datom::Datom;
use crate::db::Db;
use crate::error::CoreResult;
use crate::index::{IndexSet, IndexType};
use crate::types::{AttributeId, EntityId, TxId};
use mnemo_storage::WriteBatch;
use std::collections::HashSet;
use std::sync::Arc;

/// What the current indexes already hold for an incoming assertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PreviousState {
    /// Nothing to replace.
    NotExists,
    /// The exact fact is already current.
    Duplicate,
    /// A different value of a cardinality-one attribute is current.
    Exists(Datom),
}

/// A fact ready to be indexed: remapped, type-checked, stamped with the
/// transaction id.
#[derive(Debug, Clone)]
pub(crate) struct Prepared {
    pub datom: Datom,
    pub attribute: Arc<Attribute>,
    /// The entity was minted in this transaction.
    pub remapped: bool,
}

/// Decides how an assertion relates to the current state in `db`.
pub(crate) fn previous_state(
    remapped: bool,
    attribute: &Attribute,
    db: &Db,
    datom: &Datom,
) -> CoreResult<PreviousState> {
    if remapped {
        return Ok(PreviousState::NotExists);
    }
    let current = db.entity_attribute(datom.e(), datom.a())?;
    let state = match attribute.cardinality {
        Cardinality::Many => {
            if current.iter().any(|d| d.same_value(datom)) {
                PreviousState::Duplicate
            } else {
                PreviousState::NotExists
            }
        }
        Cardinality::One => match current.into_iter().next() {
            None => PreviousState::NotExists,
            Some(previous) if previous.same_value(datom) => PreviousState::Duplicate,
            Some(previous) => PreviousState::Exists(previous),
        },
    };
    Ok(state)
}

/// The current datom an explicit retraction removes, if it is current.
pub(crate) fn retraction_target(db: &Db, datom: &Datom) -> CoreResult<Option<Datom>> {
    Ok(db
        .entity_attribute(datom.e(), datom.a())?
        .into_iter()
        .find(|d| d.same_value(datom)))
}

/// Drops facts that a later fact in the same transaction supersedes.
///
/// The last statement about an exact `(E, A, V)` wins, and for
/// cardinality-one attributes only the last assertion per `(E, A)` is kept.
/// Survivors keep their relative order.
pub(crate) fn dedupe(facts: Vec<Prepared>) -> Vec<Prepared> {
    let mut exact: HashSet<(EntityId, AttributeId, Vec<u8>)> = HashSet::new();
    let mut single: HashSet<(EntityId, AttributeId)> = HashSet::new();

    let mut kept: Vec<Prepared> = facts
        .into_iter()
        .rev()
        .filter(|fact| {
            let d = &fact.datom;
            if !exact.insert((d.e(), d.a(), d.value_bytes().to_vec())) {
                return false;
            }
            d.is_retract()
                || fact.attribute.cardinality == Cardinality::Many
                || single.insert((d.e(), d.a()))
        })
        .collect();
    kept.reverse();
    kept
}

/// Current indexes an attribute's datoms live in.
fn current_indexes(attribute: &Attribute) -> impl Iterator<Item = IndexType> {
    let reference = attribute.is_reference();
    let indexed = attribute.indexed;
    [
        (IndexType::EavtCurrent, true),
        (IndexType::AevtCurrent, true),
        (IndexType::VaetCurrent, reference),
        (IndexType::AvetCurrent, indexed),
    ]
    .into_iter()
    .filter_map(|(index, used)| used.then_some(index))
}

/// Accumulates one transaction's index writes into a single batch.
pub(crate) struct IndexWriter<'a> {
    indexes: &'a IndexSet,
    batch: WriteBatch,
    tx: TxId,
    log_entries: usize,
}

impl<'a> IndexWriter<'a> {
    pub fn new(indexes: &'a IndexSet, tx: TxId) -> Self {
        Self {
            indexes,
            batch: indexes.batch(),
            tx,
            log_entries: 0,
        }
    }

    /// Writes a new fact to the log and every current index it belongs in.
    pub fn assert(&mut self, attribute: &Attribute, datom: &Datom) {
        self.log(datom);
        for index in current_indexes(attribute) {
            self.indexes.put(&mut self.batch, index, datom);
        }
    }

    /// Removes `previous` from the current indexes and records its
    /// retraction at this transaction.
    pub fn retract(&mut self, attribute: &Attribute, previous: &Datom) {
        let retraction = previous.retracted_at(self.tx);
        self.log(&retraction);
        for index in current_indexes(attribute) {
            self.indexes.delete(&mut self.batch, index, previous);
            if !attribute.no_history {
                self.indexes.put(&mut self.batch, index.history(), &retraction);
            }
        }
    }

    /// Retracts `previous` and asserts `datom` in its place; history gets
    /// both the retraction and the replacing assertion.
    pub fn replace(&mut self, attribute: &Attribute, previous: &Datom, datom: &Datom) {
        self.retract(attribute, previous);
        if !attribute.no_history {
            for index in current_indexes(attribute) {
                self.indexes.put(&mut self.batch, index.history(), datom);
            }
        }
        self.assert(attribute, datom);
    }

    fn log(&mut self, datom: &Datom) {
        self.indexes.put(&mut self.batch, IndexType::TxLog, datom);
        self.log_entries += 1;
    }

    /// Number of datoms written to the transaction log.
    pub fn log_entries(&self) -> usize {
        self.log_entries
    }

    pub fn into_batch(self) -> WriteBatch {
        self.batch
    }
}
