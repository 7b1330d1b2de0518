//! Property-based tests for the entity normalizer

use mealsync::client::normalize::{normalize_lenient, normalize_patch, schema, FieldKind};
use mealsync::shared::EntityFamily;
use proptest::prelude::*;
use serde_json::{json, Value};

fn family() -> impl Strategy<Value = EntityFamily> {
    prop::sample::select(EntityFamily::ALL.to_vec())
}

fn scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        (-1000i64..1000).prop_map(|n| json!(n)),
        (-1000.0f64..1000.0).prop_map(|n| json!(n)),
        "[ a-zA-Z0-9]{0,12}".prop_map(Value::String),
    ]
}

fn field_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        3 => scalar(),
        1 => prop::collection::vec(scalar(), 0..5).prop_map(Value::Array),
    ]
}

/// Raw payloads mixing canonical keys, aliases and unknown keys
fn payload(family: EntityFamily) -> impl Strategy<Value = Value> {
    let keys: Vec<&'static str> = schema(family)
        .iter()
        .flat_map(|spec| std::iter::once(spec.name).chain(spec.aliases.iter().copied()))
        .chain(["extra", "createdAt", "user_id"])
        .collect();
    prop::collection::btree_map(prop::sample::select(keys), field_value(), 0..10)
        .prop_map(|map| Value::Object(map.into_iter().map(|(k, v)| (k.to_string(), v)).collect()))
}

proptest! {
    #[test]
    fn test_normalize_is_idempotent((family, raw) in family().prop_flat_map(|f| (Just(f), payload(f)))) {
        let once = normalize_lenient(family, &raw);
        let twice = normalize_lenient(family, &serde_json::to_value(&once).unwrap());
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn test_canonical_shape((family, raw) in family().prop_flat_map(|f| (Just(f), payload(f)))) {
        let entity = normalize_lenient(family, &raw);
        prop_assert!(entity.get("user_id").is_none());
        for spec in schema(family) {
            let value = entity.get(spec.name);
            prop_assert!(value.is_some(), "missing {}", spec.name);
            for alias in spec.aliases {
                prop_assert!(entity.get(alias).is_none(), "alias {} survived", alias);
            }
            match (spec.kind, value.unwrap()) {
                (FieldKind::List, Value::Array(items)) => {
                    prop_assert!(items.iter().all(|item| item.as_str().is_some_and(|s| !s.is_empty())));
                }
                (FieldKind::Number, Value::Null) => {}
                (FieldKind::Number, Value::Number(n)) => {
                    prop_assert!(n.as_f64().unwrap() > 0.0);
                }
                (FieldKind::Text { .. }, Value::String(s)) => {
                    prop_assert_eq!(s.trim(), s.as_str());
                }
                (FieldKind::Flag, Value::Bool(_)) => {}
                (kind, other) => {
                    prop_assert!(false, "{:?} field {} held {}", kind, spec.name, other);
                }
            }
        }
    }

    #[test]
    fn test_patch_touches_only_present_fields(name in "[a-zA-Z]{1,10}") {
        let patch = normalize_patch(EntityFamily::Recipes, &json!({"name": name.clone()})).unwrap();
        prop_assert_eq!(patch.fields.len(), 1);
        prop_assert_eq!(patch.text("name"), Some(name.as_str()));
    }
}
