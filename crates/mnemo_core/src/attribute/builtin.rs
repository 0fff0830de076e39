//! Built-in attributes that describe attributes themselves.
//!
//! An attribute's definition is stored as ordinary datoms on its own entity
//! (partition 0, payload = attribute id), so the registry can be rebuilt
//! from the EAVT-current index when a store is reopened.

use super::{Attribute, AttributeDef, Cardinality, SymbolInterner};
use crate::datom::Datom;
use crate::error::{CoreError, CoreResult};
use crate::types::AttributeId;
use crate::value::{Value, ValueTag};

/// `db/uniqueId`: the attribute's symbol.
pub const UNIQUE_ID: AttributeId = AttributeId::new(1);
/// `db/valueType`: the attribute's [`ValueTag`] byte.
pub const VALUE_TYPE: AttributeId = AttributeId::new(2);
/// `db/indexed`: 1 when values go into AVET.
pub const INDEXED: AttributeId = AttributeId::new(3);
/// `db/optional`: 1 when entities may omit the attribute.
pub const OPTIONAL: AttributeId = AttributeId::new(4);
/// `db/noHistory`: 1 when replaced values skip the history indexes.
pub const NO_HISTORY: AttributeId = AttributeId::new(5);
/// `db/cardinality`: [`Cardinality`] byte.
pub const CARDINALITY: AttributeId = AttributeId::new(6);
/// `db/doc`: free-form documentation.
pub const DOCUMENTATION: AttributeId = AttributeId::new(7);
/// `db.tx/timestamp`: commit time of a transaction, ms since the epoch.
pub const TX_TIMESTAMP: AttributeId = AttributeId::new(8);

/// Highest id reserved for built-ins.
pub const LAST_BUILTIN: AttributeId = TX_TIMESTAMP;

/// Definitions of every built-in attribute.
#[must_use]
pub fn definitions() -> Vec<(AttributeId, AttributeDef)> {
    vec![
        (
            UNIQUE_ID,
            AttributeDef::new("db/uniqueId", ValueTag::Ascii)
                .indexed(true)
                .documentation("Unique symbol of an attribute"),
        ),
        (
            VALUE_TYPE,
            AttributeDef::new("db/valueType", ValueTag::UInt8)
                .documentation("Value tag of an attribute"),
        ),
        (
            INDEXED,
            AttributeDef::new("db/indexed", ValueTag::UInt8).optional(true),
        ),
        (
            OPTIONAL,
            AttributeDef::new("db/optional", ValueTag::UInt8).optional(true),
        ),
        (
            NO_HISTORY,
            AttributeDef::new("db/noHistory", ValueTag::UInt8).optional(true),
        ),
        (
            CARDINALITY,
            AttributeDef::new("db/cardinality", ValueTag::UInt8).optional(true),
        ),
        (
            DOCUMENTATION,
            AttributeDef::new("db/doc", ValueTag::Utf8).optional(true),
        ),
        (
            TX_TIMESTAMP,
            AttributeDef::new("db.tx/timestamp", ValueTag::Int64)
                .documentation("Commit time of a transaction in milliseconds"),
        ),
    ]
}

/// Built-in attributes bound to their ids.
#[must_use]
pub fn attributes(interner: &SymbolInterner) -> Vec<Attribute> {
    definitions()
        .into_iter()
        .map(|(id, def)| {
            let symbol = interner.intern(&def.name);
            def.into_attribute(id, symbol)
        })
        .collect()
}

/// The `(attribute, value)` facts that persist `attr` on its own entity.
#[must_use]
pub fn definition_facts(attr: &Attribute) -> Vec<(AttributeId, Value)> {
    let flag = |b: bool| Value::UInt8(u8::from(b));
    let mut facts = vec![
        (UNIQUE_ID, Value::Ascii(attr.symbol.as_str().to_owned())),
        (VALUE_TYPE, Value::UInt8(attr.value_tag.as_byte())),
        (INDEXED, flag(attr.indexed)),
        (OPTIONAL, flag(attr.optional)),
        (NO_HISTORY, flag(attr.no_history)),
        (CARDINALITY, Value::UInt8(attr.cardinality as u8)),
    ];
    if let Some(doc) = &attr.documentation {
        facts.push((DOCUMENTATION, Value::Utf8(doc.clone())));
    }
    facts
}

/// Rebuilds an attribute from the current datoms on its entity.
///
/// # Errors
///
/// Returns [`CoreError::InvalidValue`] if the symbol or value type is
/// missing or a stored flag is out of range.
pub fn attribute_from_datoms(
    id: AttributeId,
    datoms: &[Datom],
    interner: &SymbolInterner,
) -> CoreResult<Attribute> {
    let mut name = None;
    let mut value_tag = None;
    let mut def_flags = (false, false, false);
    let mut cardinality = Cardinality::One;
    let mut documentation = None;

    for datom in datoms.iter().filter(|d| !d.is_retract()) {
        let value = datom.value()?;
        let byte = || stored_byte(id, datom, &value);
        match datom.a() {
            UNIQUE_ID => name = value.as_str().map(str::to_owned),
            VALUE_TYPE => value_tag = ValueTag::from_byte(byte()?),
            INDEXED => def_flags.0 = byte()? != 0,
            OPTIONAL => def_flags.1 = byte()? != 0,
            NO_HISTORY => def_flags.2 = byte()? != 0,
            CARDINALITY => {
                cardinality = Cardinality::from_byte(byte()?).ok_or_else(|| {
                    CoreError::invalid_value(format!("attribute {id} has a bad cardinality"))
                })?;
            }
            DOCUMENTATION => documentation = value.as_str().map(str::to_owned),
            _ => {}
        }
    }

    let name = name
        .ok_or_else(|| CoreError::invalid_value(format!("attribute {id} has no uniqueId")))?;
    let value_tag = value_tag
        .ok_or_else(|| CoreError::invalid_value(format!("attribute {id} has no valueType")))?;
    let symbol = interner.intern(&name);

    let (indexed, optional, no_history) = def_flags;
    let mut def = AttributeDef::new(name, value_tag)
        .cardinality(cardinality)
        .indexed(indexed)
        .optional(optional)
        .no_history(no_history);
    def.documentation = documentation;
    Ok(def.into_attribute(id, symbol))
}

fn stored_byte(id: AttributeId, datom: &Datom, value: &Value) -> CoreResult<u8> {
    match value {
        Value::UInt8(b) => Ok(*b),
        other => Err(CoreError::invalid_value(format!(
            "attribute {id} stores {other} under {}",
            datom.a()
        ))),
    }
}
