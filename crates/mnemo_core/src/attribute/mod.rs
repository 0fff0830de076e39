//! Attributes: named, typed slots a datom can fill.
//!
//! An attribute is identified by a [`Symbol`] (`namespace/name`) that never
//! changes, and at runtime by a dense [`AttributeId`] assigned once when it
//! is first registered and persisted as datoms on the attribute's entity.

pub mod builtin;
mod registry;
mod symbol;

pub use registry::{AttributeRegistry, ResolvedDatom, MAX_ATTRIBUTES};
pub use symbol::{Symbol, SymbolInterner};

use crate::types::AttributeId;
use crate::value::ValueTag;

/// How many current values an entity may hold for an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Cardinality {
    /// A new value replaces the previous one.
    One = 0,
    /// Values accumulate until retracted.
    Many = 1,
}

impl Cardinality {
    /// Converts a byte to a cardinality.
    #[must_use]
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::One),
            1 => Some(Self::Many),
            _ => None,
        }
    }
}

/// A registered attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    /// Dense runtime id.
    pub id: AttributeId,
    /// Stable identity.
    pub symbol: Symbol,
    /// Type of every value.
    pub value_tag: ValueTag,
    /// Cardinality.
    pub cardinality: Cardinality,
    /// Whether values are kept in the AVET index.
    pub indexed: bool,
    /// Whether replaced values are left out of the history indexes.
    pub no_history: bool,
    /// Whether entities may omit this attribute.
    pub optional: bool,
    /// Free-form description.
    pub documentation: Option<String>,
}

impl Attribute {
    /// True when values point at other entities.
    #[must_use]
    pub fn is_reference(&self) -> bool {
        self.value_tag == ValueTag::Reference
    }

    /// True when `def` describes this attribute.
    #[must_use]
    pub fn matches(&self, def: &AttributeDef) -> bool {
        self.symbol.as_str() == def.name
            && self.value_tag == def.value_tag
            && self.cardinality == def.cardinality
            && self.indexed == def.indexed
            && self.no_history == def.no_history
            && self.optional == def.optional
            && self.documentation == def.documentation
    }
}

/// Definition of an attribute before it has been assigned an id.
///
/// # Example
///
/// ```rust
/// use mnemo_core::{AttributeDef, Cardinality, ValueTag};
///
/// let tags = AttributeDef::new("post/tag", ValueTag::Utf8)
///     .cardinality(Cardinality::Many)
///     .indexed(true);
/// assert!(tags.indexed);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeDef {
    /// `namespace/name`.
    pub name: String,
    /// Type of every value.
    pub value_tag: ValueTag,
    /// Cardinality.
    pub cardinality: Cardinality,
    /// Whether values are kept in the AVET index.
    pub indexed: bool,
    /// Whether replaced values are left out of the history indexes.
    pub no_history: bool,
    /// Whether entities may omit this attribute.
    pub optional: bool,
    /// Free-form description.
    pub documentation: Option<String>,
}

impl AttributeDef {
    /// Creates a cardinality-one, unindexed definition.
    #[must_use]
    pub fn new(name: impl Into<String>, value_tag: ValueTag) -> Self {
        Self {
            name: name.into(),
            value_tag,
            cardinality: Cardinality::One,
            indexed: false,
            no_history: false,
            optional: false,
            documentation: None,
        }
    }

    /// Sets the cardinality.
    #[must_use]
    pub fn cardinality(mut self, value: Cardinality) -> Self {
        self.cardinality = value;
        self
    }

    /// Sets whether values are kept in the AVET index.
    #[must_use]
    pub fn indexed(mut self, value: bool) -> Self {
        self.indexed = value;
        self
    }

    /// Sets whether history is skipped.
    #[must_use]
    pub fn no_history(mut self, value: bool) -> Self {
        self.no_history = value;
        self
    }

    /// Sets whether the attribute is optional.
    #[must_use]
    pub fn optional(mut self, value: bool) -> Self {
        self.optional = value;
        self
    }

    /// Sets the documentation string.
    #[must_use]
    pub fn documentation(mut self, text: impl Into<String>) -> Self {
        self.documentation = Some(text.into());
        self
    }

    /// Binds the definition to an id.
    #[must_use]
    pub fn into_attribute(self, id: AttributeId, symbol: Symbol) -> Attribute {
        Attribute {
            id,
            symbol,
            value_tag: self.value_tag,
            cardinality: self.cardinality,
            indexed: self.indexed,
            no_history: self.no_history,
            optional: self.optional,
            documentation: self.documentation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn def_builder_sets_flags() {
        let def = AttributeDef::new("person/friend", ValueTag::Reference)
            .cardinality(Cardinality::Many)
            .no_history(true)
            .documentation("people this person knows");
        assert_eq!(def.cardinality, Cardinality::Many);
        assert!(def.no_history);
        assert!(!def.indexed);
    }

    #[test]
    fn attribute_matches_its_definition() {
        let interner = SymbolInterner::new();
        let def = AttributeDef::new("person/friend", ValueTag::Reference);
        let attr = def
            .clone()
            .into_attribute(AttributeId::new(30), interner.intern("person/friend"));

        assert!(attr.is_reference());
        assert!(attr.matches(&def));
        assert!(!attr.matches(&def.indexed(true)));
    }

    #[test]
    fn cardinality_bytes() {
        assert_eq!(Cardinality::from_byte(0), Some(Cardinality::One));
        assert_eq!(Cardinality::from_byte(1), Some(Cardinality::Many));
        assert_eq!(Cardinality::from_byte(2), None);
    }
}
