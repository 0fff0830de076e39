//! The nine physical indexes and their handle over a backend.
//!
//! Four logical orders (EAVT, AEVT, VAET, AVET) each come as a *current*
//! variant holding facts that are true now and a *history* variant holding
//! retractions and the assertions that replaced them. The transaction log
//! orders every write by transaction.

use crate::datom::Datom;
use crate::error::CoreResult;
use crate::key::{self, Layout};
use mnemo_storage::{memcmp, KeyOrdering, StorageBackend, StorageSnapshot, WriteBatch};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Physical index identifier; the discriminant is the key's tag byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum IndexType {
    /// Every write, ordered by `(T, E, A)`.
    TxLog = 1,
    /// Current facts by `(E, A, T)`.
    EavtCurrent = 2,
    /// Historical facts by `(E, A, T)`.
    EavtHistory = 3,
    /// Current facts by `(A, E, T)`.
    AevtCurrent = 4,
    /// Historical facts by `(A, E, T)`.
    AevtHistory = 5,
    /// Current reference facts by `(A, referenced entity, E)`.
    VaetCurrent = 6,
    /// Historical reference facts by `(A, referenced entity, E)`.
    VaetHistory = 7,
    /// Current indexed facts by `(A, V, E)`.
    AvetCurrent = 8,
    /// Historical indexed facts by `(A, V, E)`.
    AvetHistory = 9,
}

impl IndexType {
    /// All indexes in tag order.
    pub const ALL: [Self; 9] = [
        Self::TxLog,
        Self::EavtCurrent,
        Self::EavtHistory,
        Self::AevtCurrent,
        Self::AevtHistory,
        Self::VaetCurrent,
        Self::VaetHistory,
        Self::AvetCurrent,
        Self::AvetHistory,
    ];

    /// Converts a tag byte to an index.
    #[must_use]
    pub fn from_byte(b: u8) -> Option<Self> {
        Self::ALL.get(usize::from(b).checked_sub(1)?).copied()
    }

    /// Converts the index to its tag byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// Field order of keys in this index.
    #[must_use]
    pub const fn layout(self) -> Layout {
        match self {
            Self::TxLog => Layout::TxFirst,
            Self::EavtCurrent | Self::EavtHistory => Layout::EntityFirst,
            _ => Layout::AttributeFirst,
        }
    }

    /// Returns true for the `*-current` indexes.
    #[must_use]
    pub const fn is_current(self) -> bool {
        matches!(
            self,
            Self::EavtCurrent | Self::AevtCurrent | Self::VaetCurrent | Self::AvetCurrent
        )
    }

    /// Returns true for the `*-history` indexes.
    #[must_use]
    pub const fn is_history(self) -> bool {
        !self.is_current() && !matches!(self, Self::TxLog)
    }

    /// History variant of a current index; other indexes map to themselves.
    #[must_use]
    pub const fn history(self) -> Self {
        match self {
            Self::EavtCurrent => Self::EavtHistory,
            Self::AevtCurrent => Self::AevtHistory,
            Self::VaetCurrent => Self::VaetHistory,
            Self::AvetCurrent => Self::AvetHistory,
            other => other,
        }
    }

    /// Current variant of a history index; other indexes map to themselves.
    #[must_use]
    pub const fn current(self) -> Self {
        match self {
            Self::EavtHistory => Self::EavtCurrent,
            Self::AevtHistory => Self::AevtCurrent,
            Self::VaetHistory => Self::VaetCurrent,
            Self::AvetHistory => Self::AvetCurrent,
            other => other,
        }
    }

    /// Returns true when keys are ordered by value before entity.
    #[must_use]
    pub const fn is_value_first(self) -> bool {
        matches!(
            self,
            Self::VaetCurrent | Self::VaetHistory | Self::AvetCurrent | Self::AvetHistory
        )
    }

    /// Key ordering the backend must apply to this index.
    #[must_use]
    pub fn ordering(self) -> KeyOrdering {
        if self.is_value_first() {
            key::value_first
        } else {
            memcmp
        }
    }
}

impl fmt::Display for IndexType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::TxLog => "txlog",
            Self::EavtCurrent => "eavt",
            Self::EavtHistory => "eavt-history",
            Self::AevtCurrent => "aevt",
            Self::AevtHistory => "aevt-history",
            Self::VaetCurrent => "vaet",
            Self::VaetHistory => "vaet-history",
            Self::AvetCurrent => "avet",
            Self::AvetHistory => "avet-history",
        };
        f.write_str(name)
    }
}

/// The nine indexes hosted by one backend.
///
/// Pure storage: it places datoms into indexes and scans them, and leaves
/// every decision about *which* indexes a fact belongs in to the writer.
#[derive(Clone)]
pub struct IndexSet {
    backend: Arc<dyn StorageBackend>,
}

impl IndexSet {
    /// Declares every index on `backend` and initializes it.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be opened.
    pub fn open(backend: Arc<dyn StorageBackend>, path: Option<&Path>) -> CoreResult<Self> {
        for index in IndexType::ALL {
            backend.declare_index(index.as_byte(), index.ordering())?;
        }
        backend.init(path)?;
        Ok(Self { backend })
    }

    /// Creates an empty batch.
    #[must_use]
    pub fn batch(&self) -> WriteBatch {
        self.backend.create_batch()
    }

    /// Buffers `datom` into `index`.
    pub fn put(&self, batch: &mut WriteBatch, index: IndexType, datom: &Datom) {
        batch.put(index.as_byte(), datom.to_index(index).into_bytes());
    }

    /// Buffers removal of `datom` from `index`.
    pub fn delete(&self, batch: &mut WriteBatch, index: IndexType, datom: &Datom) {
        batch.delete(index.as_byte(), datom.to_index(index).into_bytes());
    }

    /// Commits a batch atomically.
    ///
    /// # Errors
    ///
    /// Returns the backend's error; nothing is applied in that case.
    pub fn commit(&self, batch: WriteBatch) -> CoreResult<()> {
        self.backend.commit(batch)?;
        Ok(())
    }

    /// Compacts the backend's persisted state.
    ///
    /// # Errors
    ///
    /// Returns the backend's error.
    pub fn checkpoint(&self) -> CoreResult<()> {
        self.backend.checkpoint()?;
        Ok(())
    }

    /// Takes a point-in-time snapshot.
    ///
    /// # Errors
    ///
    /// Returns the backend's error.
    pub fn snapshot(&self) -> CoreResult<Arc<dyn StorageSnapshot>> {
        Ok(self.backend.snapshot()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_bytes_roundtrip() {
        for index in IndexType::ALL {
            assert_eq!(IndexType::from_byte(index.as_byte()), Some(index));
        }
        assert_eq!(IndexType::from_byte(0), None);
        assert_eq!(IndexType::from_byte(10), None);
    }

    #[test]
    fn current_and_history_pair_up() {
        for index in IndexType::ALL {
            if index.is_current() {
                assert!(index.history().is_history());
                assert_eq!(index.history().current(), index);
            }
        }
        assert_eq!(IndexType::TxLog.history(), IndexType::TxLog);
        assert!(!IndexType::TxLog.is_current());
        assert!(!IndexType::TxLog.is_history());
    }

    #[test]
    fn only_avet_and_vaet_are_value_first() {
        let value_first: Vec<_> = IndexType::ALL
            .into_iter()
            .filter(|i| i.is_value_first())
            .collect();
        assert_eq!(
            value_first,
            vec![
                IndexType::VaetCurrent,
                IndexType::VaetHistory,
                IndexType::AvetCurrent,
                IndexType::AvetHistory
            ]
        );
    }
}
