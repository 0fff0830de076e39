//! Property-based test generators using proptest.

use mnemo_core::{EntityId, PartitionId, Value, ValueTag};
use proptest::prelude::*;

/// Strategy for ids in the default entity partition.
pub fn entity_id_strategy() -> impl Strategy<Value = EntityId> {
    (1u64..10_000).prop_map(|p| PartitionId::ENTITY.make_id(p))
}

/// Strategy for ids in user partitions.
pub fn user_entity_strategy() -> impl Strategy<Value = EntityId> {
    (4u8..=255, 1u64..10_000).prop_map(|(p, payload)| PartitionId::new(p).make_id(payload))
}

/// Strategy for attribute names such as `ns/name`.
pub fn attribute_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9]{0,7}/[a-z][a-zA-Z0-9]{0,15}").expect("invalid regex")
}

/// Strategy for value types that can be stored.
pub fn value_tag_strategy() -> impl Strategy<Value = ValueTag> {
    prop_oneof![
        Just(ValueTag::UInt8),
        Just(ValueTag::UInt16),
        Just(ValueTag::UInt32),
        Just(ValueTag::UInt64),
        Just(ValueTag::Int64),
        Just(ValueTag::Float64),
        Just(ValueTag::Ascii),
        Just(ValueTag::Utf8),
        Just(ValueTag::Blob),
        Just(ValueTag::Reference),
    ]
}

/// Strategy for values of a given type.
pub fn value_strategy(tag: ValueTag) -> BoxedStrategy<Value> {
    match tag {
        ValueTag::Null => Just(Value::Null).boxed(),
        ValueTag::UInt8 => any::<u8>().prop_map(Value::UInt8).boxed(),
        ValueTag::UInt16 => any::<u16>().prop_map(Value::UInt16).boxed(),
        ValueTag::UInt32 => any::<u32>().prop_map(Value::UInt32).boxed(),
        ValueTag::UInt64 => any::<u64>().prop_map(Value::UInt64).boxed(),
        ValueTag::Int64 => any::<i64>().prop_map(Value::Int64).boxed(),
        ValueTag::Float64 => (-1.0e12f64..1.0e12).prop_map(Value::Float64).boxed(),
        ValueTag::Ascii => prop::string::string_regex("[ -~]{0,24}")
            .expect("invalid regex")
            .prop_map(Value::Ascii)
            .boxed(),
        ValueTag::Utf8 => any::<String>().prop_map(Value::Utf8).boxed(),
        ValueTag::Blob => prop::collection::vec(any::<u8>(), 0..64)
            .prop_map(Value::Blob)
            .boxed(),
        ValueTag::Reference => entity_id_strategy().prop_map(Value::Reference).boxed(),
    }
}

/// Strategy for a value together with its type.
pub fn typed_value_strategy() -> impl Strategy<Value = (ValueTag, Value)> {
    value_tag_strategy().prop_flat_map(|tag| (Just(tag), value_strategy(tag)))
}

/// One step of a single-attribute workload.
#[derive(Debug, Clone)]
pub enum Step {
    /// Assert `value` on entity slot `e`.
    Assert {
        /// Entity slot.
        e: u64,
        /// Value.
        value: u64,
    },
    /// Retract `value` from entity slot `e`.
    Retract {
        /// Entity slot.
        e: u64,
        /// Value.
        value: u64,
    },
}

/// Strategy for short assert/retract workloads over a few entities and
/// values, so collisions are frequent.
pub fn steps_strategy(max_len: usize) -> impl Strategy<Value = Vec<Step>> {
    let step = prop_oneof![
        3 => (1u64..5, 0u64..4).prop_map(|(e, value)| Step::Assert { e, value }),
        1 => (1u64..5, 0u64..4).prop_map(|(e, value)| Step::Retract { e, value }),
    ];
    prop::collection::vec(step, 1..max_len)
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn values_match_their_tag((tag, value) in typed_value_strategy()) {
            prop_assert_eq!(value.tag(), tag);
        }

        #[test]
        fn user_entities_are_in_user_partitions(e in user_entity_strategy()) {
            prop_assert!(e.partition().is_user());
            prop_assert!(!e.is_temp());
        }

        #[test]
        fn attribute_names_are_ascii(name in attribute_name_strategy()) {
            prop_assert!(name.is_ascii());
            prop_assert!(name.contains('/'));
        }
    }
}
