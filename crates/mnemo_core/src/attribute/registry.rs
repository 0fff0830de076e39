//! Dense id → attribute table shared by the writer and every reader.

use super::{Attribute, Symbol, SymbolInterner};
use crate::datom::Datom;
use crate::error::{CoreError, CoreResult};
use crate::types::{AttributeId, EntityId, TxId};
use crate::value::Value;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

/// Number of attribute id slots.
pub const MAX_ATTRIBUTES: usize = 1 << 16;

/// A datom with its attribute looked up and its value decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedDatom {
    /// Entity.
    pub e: EntityId,
    /// Attribute definition.
    pub attribute: Arc<Attribute>,
    /// Decoded value.
    pub value: Value,
    /// Transaction.
    pub t: TxId,
    /// True for a retraction.
    pub is_retract: bool,
}

/// Registry of every known attribute.
///
/// Slots are write-once: a reader that sees an attribute in a slot will
/// see the same attribute forever, so lookups by id never lock.
/// Registration is serialized by an internal mutex.
pub struct AttributeRegistry {
    interner: Arc<SymbolInterner>,
    slots: Box<[OnceLock<Arc<Attribute>>]>,
    by_symbol: RwLock<HashMap<Symbol, AttributeId>>,
    register_lock: Mutex<()>,
}

impl AttributeRegistry {
    /// Creates an empty registry that interns names into `interner`.
    #[must_use]
    pub fn new(interner: Arc<SymbolInterner>) -> Self {
        Self {
            interner,
            slots: (0..MAX_ATTRIBUTES).map(|_| OnceLock::new()).collect(),
            by_symbol: RwLock::new(HashMap::new()),
            register_lock: Mutex::new(()),
        }
    }

    /// The interner shared with this registry.
    #[must_use]
    pub fn interner(&self) -> &Arc<SymbolInterner> {
        &self.interner
    }

    /// Adds attributes.
    ///
    /// Registering an attribute that is already present with an identical
    /// definition is a no-op. Nothing is registered if any entry conflicts.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DuplicateAttribute`] if an id is already bound
    /// to a different definition or a symbol is already bound to another id.
    pub fn register(&self, attributes: &[Attribute]) -> CoreResult<()> {
        let _guard = self.register_lock.lock();

        let mut seen: HashMap<&str, AttributeId> = HashMap::new();
        for attr in attributes {
            if let Some(existing) = self.slot(attr.id) {
                if existing.as_ref() != attr {
                    return Err(CoreError::duplicate_attribute(
                        &attr.symbol,
                        format!("id {} is already bound to {}", attr.id, existing.symbol),
                    ));
                }
            }
            if let Some(id) = self.by_symbol.read().get(attr.symbol.as_str()) {
                if *id != attr.id {
                    return Err(CoreError::duplicate_attribute(
                        &attr.symbol,
                        format!("already registered as {id}"),
                    ));
                }
            }
            if let Some(id) = seen.insert(attr.symbol.as_str(), attr.id) {
                if id != attr.id {
                    return Err(CoreError::duplicate_attribute(
                        &attr.symbol,
                        format!("listed twice, as {id} and {}", attr.id),
                    ));
                }
            }
        }

        let mut by_symbol = self.by_symbol.write();
        for attr in attributes {
            let symbol = self.interner.intern(attr.symbol.as_str());
            let attr = Attribute {
                symbol: symbol.clone(),
                ..attr.clone()
            };
            let id = attr.id;
            // Slots are only written here, under the register lock, so an
            // occupied slot already holds an equal attribute.
            let _ = self.slots[usize::from(id.as_u16())].set(Arc::new(attr));
            by_symbol.insert(symbol, id);
        }
        Ok(())
    }

    fn slot(&self, id: AttributeId) -> Option<&Arc<Attribute>> {
        self.slots[usize::from(id.as_u16())].get()
    }

    /// Looks up an attribute by id.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownAttribute`] if the id is not registered.
    pub fn get(&self, id: AttributeId) -> CoreResult<Arc<Attribute>> {
        self.slot(id)
            .cloned()
            .ok_or_else(|| CoreError::unknown_attribute(id))
    }

    /// Returns true when `id` is registered.
    #[must_use]
    pub fn contains(&self, id: AttributeId) -> bool {
        self.slot(id).is_some()
    }

    /// Looks up an attribute by `namespace/name`.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Arc<Attribute>> {
        let id = *self.by_symbol.read().get(name)?;
        self.slot(id).cloned()
    }

    /// Looks up an attribute by `namespace/name`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownAttribute`] if the name is not registered.
    pub fn require(&self, name: &str) -> CoreResult<Arc<Attribute>> {
        self.lookup(name)
            .ok_or_else(|| CoreError::unknown_attribute(name))
    }

    /// Every registered attribute, ordered by id.
    #[must_use]
    pub fn all(&self) -> Vec<Arc<Attribute>> {
        let mut ids: Vec<AttributeId> = self.by_symbol.read().values().copied().collect();
        ids.sort_unstable();
        ids.into_iter().filter_map(|id| self.slot(id).cloned()).collect()
    }

    /// Number of registered attributes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_symbol.read().len()
    }

    /// True when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Highest registered id.
    #[must_use]
    pub fn max_id(&self) -> Option<AttributeId> {
        self.by_symbol.read().values().copied().max()
    }

    /// Looks up the datom's attribute and decodes its value.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownAttribute`] if the attribute is not
    /// registered, or [`CoreError::InvalidValue`] if the value bytes do not
    /// match the attribute's type.
    pub fn resolve(&self, datom: &Datom) -> CoreResult<ResolvedDatom> {
        let attribute = self.get(datom.a())?;
        if datom.value_tag() != attribute.value_tag {
            return Err(CoreError::invalid_value(format!(
                "{} holds {} values, datom carries {}",
                attribute.symbol,
                attribute.value_tag,
                datom.value_tag()
            )));
        }
        Ok(ResolvedDatom {
            e: datom.e(),
            value: datom.value()?,
            t: datom.t(),
            is_retract: datom.is_retract(),
            attribute,
        })
    }
}

impl std::fmt::Debug for AttributeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttributeRegistry")
            .field("attributes", &self.len())
            .finish_non_exhaustive()
    }
}
