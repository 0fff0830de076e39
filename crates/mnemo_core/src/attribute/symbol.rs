//! Interned `namespace/name` symbols.

use parking_lot::RwLock;
use std::borrow::Borrow;
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// An interned attribute name such as `person/name`.
///
/// Symbols from the same [`SymbolInterner`] share one allocation per name,
/// so equal symbols are also pointer-equal.
#[derive(Clone)]
pub struct Symbol(Arc<str>);

impl Symbol {
    /// Returns the full `namespace/name` text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Part before the last `/`, or empty.
    #[must_use]
    pub fn namespace(&self) -> &str {
        self.0.rsplit_once('/').map_or("", |(ns, _)| ns)
    }

    /// Part after the last `/`.
    #[must_use]
    pub fn name(&self) -> &str {
        self.0.rsplit_once('/').map_or(&self.0, |(_, name)| name)
    }

    /// True when both symbols share one allocation.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for Symbol {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || self.0 == other.0
    }
}

impl Eq for Symbol {}

impl Hash for Symbol {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl Borrow<str> for Symbol {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ":{}", self.0)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Table of interned symbols.
///
/// Owned by the store and shared with its registry; names are only ever
/// added.
#[derive(Debug, Default)]
pub struct SymbolInterner {
    symbols: RwLock<HashSet<Symbol>>,
}

impl SymbolInterner {
    /// Creates an empty interner.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the symbol for `name`, creating it on first use.
    pub fn intern(&self, name: &str) -> Symbol {
        if let Some(symbol) = self.symbols.read().get(name) {
            return symbol.clone();
        }
        let mut symbols = self.symbols.write();
        if let Some(symbol) = symbols.get(name) {
            return symbol.clone();
        }
        let symbol = Symbol(Arc::from(name));
        symbols.insert(symbol.clone());
        symbol
    }

    /// Returns the symbol for `name` if it was interned.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Symbol> {
        self.symbols.read().get(name).cloned()
    }

    /// Number of interned symbols.
    #[must_use]
    pub fn len(&self) -> usize {
        self.symbols.read().len()
    }

    /// True when nothing has been interned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
