use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use conduit_types::{Envelope, Value};
use proptest::prelude::*;

fn hash_of(env: &Envelope) -> u64 {
    let mut h = DefaultHasher::new();
    env.hash(&mut h);
    h.finish()
}

fn value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Int),
        any::<f64>().prop_map(Value::Float),
        any::<char>().prop_map(Value::Char),
        "[ -~]{0,16}".prop_map(Value::Text),
        proptest::collection::vec(any::<u8>(), 0..8).prop_map(Value::Bytes),
    ]
}

/// Unique names with arbitrary values, in generation order.
fn fields_strategy() -> impl Strategy<Value = Vec<(String, Value)>> {
    proptest::collection::btree_map("[a-z]{1,8}", value_strategy(), 0..12)
        .prop_map(|m: BTreeMap<String, Value>| m.into_iter().collect())
        .prop_shuffle()
}

proptest! {
    #[test]
    fn fields_read_back_by_name_and_position(fields in fields_strategy()) {
        let env = Envelope::from_pairs(fields.clone()).unwrap();
        prop_assert_eq!(env.len(), fields.len());
        for (i, (name, value)) in fields.iter().enumerate() {
            prop_assert_eq!(env.value(name.as_str()), Some(value));
            prop_assert_eq!(env.value(i), Some(value));
            prop_assert_eq!(&env.field_names()[i], name);
        }
    }

    #[test]
    fn defaults_stand_in_for_missing_fields(fields in fields_strategy(), default in any::<i64>()) {
        let env = Envelope::from_pairs(fields).unwrap();
        prop_assert_eq!(env.get_i64_or("MISSING", default), default);
        prop_assert_eq!(env.get_i64("MISSING").unwrap(), 0);
        prop_assert!(!env.get_bool("MISSING").unwrap());
        prop_assert_eq!(env.get_string("MISSING").unwrap(), None);
    }

    #[test]
    fn identical_sequences_are_equal_and_hash_equal(fields in fields_strategy()) {
        let a = Envelope::from_pairs(fields.clone()).unwrap();
        let b = Envelope::from_pairs(fields).unwrap();
        prop_assert_eq!(&a, &b);
        prop_assert_eq!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn reordering_breaks_equality(fields in fields_strategy()) {
        prop_assume!(fields.len() >= 2);
        let mut reversed = fields.clone();
        reversed.reverse();
        let a = Envelope::from_pairs(fields).unwrap();
        let b = Envelope::from_pairs(reversed).unwrap();
        prop_assert_ne!(a, b);
    }
}
