//! Schema reconciliation for loaded documents.
//!
//! Given a freshly loaded document and the current [`ShapeDescriptor`], this
//! module produces the document the application expects today.
//!
//! # Algorithm
//!
//! 1. Walk the expected shape, not the loaded value
//! 2. Keep fields that exist and have the right kind, recursing into
//!    objects and lists
//! 3. Fill missing, null or mistyped required fields from defaults
//!    (catalogue items first, then the field default)
//! 4. Drop fields the shape does not know, mistyped optional fields,
//!    retired and duplicate catalogue items
//! 5. Append catalogue items missing from a keyed list, in catalogue order
//!
//! The walk is total: any JSON value reconciles to a valid document, and
//! reconciling the output again is a no-op.

use crate::{
    shape::{Catalogue, FieldDef, ListShape, ObjectShape},
    FieldType, Fingerprint, ShapeDescriptor,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

/// Memoized outcomes kept per reconciler before the memo is reset.
const MEMO_CAPACITY: usize = 64;

/// Result of reconciling one loaded value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reconciled {
    /// The reconciled document
    pub value: Value,
    /// Fingerprint of `value`
    pub fingerprint: Fingerprint,
    /// Whether `value` differs from the loaded input
    pub changed: bool,
    /// Paths of fields and items that were filled from defaults
    pub added: Vec<String>,
    /// Paths of fields and items that were dropped
    pub removed: Vec<String>,
}

#[derive(Default)]
struct Changes {
    added: Vec<String>,
    removed: Vec<String>,
}

/// Reconcile `loaded` against `shape`.
pub fn reconcile(loaded: &Value, shape: &ShapeDescriptor) -> Reconciled {
    let mut changes = Changes::default();

    if !loaded.is_object() && !loaded.is_null() {
        changes.removed.push("$".to_string());
    }
    let value = reconcile_object(loaded, &shape.root, None, "", &mut changes);

    let fingerprint = Fingerprint::of_value(&value);
    let changed = fingerprint != Fingerprint::of_value(loaded);

    Reconciled {
        value,
        fingerprint,
        changed,
        added: changes.added,
        removed: changes.removed,
    }
}

fn join(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{path}.{name}")
    }
}

fn reconcile_object(
    loaded: &Value,
    shape: &ObjectShape,
    fallback: Option<&Value>,
    path: &str,
    changes: &mut Changes,
) -> Value {
    let empty = Map::new();
    let source = loaded.as_object().unwrap_or(&empty);
    let mut out = Map::new();

    for field in &shape.fields {
        let field_path = join(path, &field.name);

        match source.get(&field.name) {
            Some(Value::Null) if field.default.as_ref().map_or(true, Value::is_null) => {
                out.insert(field.name.clone(), Value::Null);
            }
            Some(v) if !v.is_null() && field.field_type.accepts(v) => {
                let v = reconcile_field(v, &field.field_type, &field_path, changes);
                out.insert(field.name.clone(), v);
            }
            present => {
                if let Some(default) = default_for(field, fallback) {
                    let v = reconcile_field(default, &field.field_type, &field_path, changes);
                    out.insert(field.name.clone(), v);
                    changes.added.push(field_path);
                } else if present.is_some() {
                    changes.removed.push(field_path);
                }
            }
        }
    }

    for key in source.keys() {
        if shape.field(key).is_none() {
            changes.removed.push(join(path, key));
        }
    }

    Value::Object(out)
}

/// Default for a missing required field: the catalogue item's own value if it
/// has the right kind, otherwise the field default.
fn default_for<'a>(field: &'a FieldDef, fallback: Option<&'a Value>) -> Option<&'a Value> {
    let default = field.default.as_ref()?;
    let from_catalogue = fallback
        .and_then(|item| item.get(&field.name))
        .filter(|v| !v.is_null() && field.field_type.accepts(v));
    Some(from_catalogue.unwrap_or(default))
}

fn reconcile_field(
    value: &Value,
    field_type: &FieldType,
    path: &str,
    changes: &mut Changes,
) -> Value {
    match field_type {
        FieldType::Object(shape) => reconcile_object(value, shape, None, path, changes),
        FieldType::List(shape) => reconcile_list(value, shape, path, changes),
        _ => value.clone(),
    }
}

fn reconcile_list(value: &Value, shape: &ListShape, path: &str, changes: &mut Changes) -> Value {
    let items = value.as_array().map(Vec::as_slice).unwrap_or(&[]);

    let out = match &shape.catalogue {
        None => items
            .iter()
            .enumerate()
            .filter_map(|(i, item)| {
                let item_path = format!("{path}[{i}]");
                if item.is_object() {
                    Some(reconcile_object(item, &shape.item, None, &item_path, changes))
                } else {
                    changes.removed.push(item_path);
                    None
                }
            })
            .collect(),
        Some(catalogue) => reconcile_keyed(items, &shape.item, catalogue, path, changes),
    };

    Value::Array(out)
}

fn reconcile_keyed(
    items: &[Value],
    item_shape: &ObjectShape,
    catalogue: &Catalogue,
    path: &str,
    changes: &mut Changes,
) -> Vec<Value> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(catalogue.items.len());

    for (i, item) in items.iter().enumerate() {
        let key = item.get(&catalogue.key).and_then(Value::as_str);
        let Some(key) = key else {
            changes.removed.push(format!("{path}[{i}]"));
            continue;
        };

        let item_path = format!("{path}[{key}]");
        let default = match catalogue.item(key) {
            Some(default) if !seen.contains(key) => default,
            _ => {
                // Retired from the catalogue, or a duplicate.
                changes.removed.push(item_path);
                continue;
            }
        };

        seen.insert(key.to_string());
        out.push(keyed_item(item, item_shape, catalogue, key, default, &item_path, changes));
    }

    for default in &catalogue.items {
        let Some(key) = default.get(&catalogue.key).and_then(Value::as_str) else {
            continue;
        };
        if !seen.insert(key.to_string()) {
            continue;
        }

        let item_path = format!("{path}[{key}]");
        let mut scratch = Changes::default();
        out.push(keyed_item(default, item_shape, catalogue, key, default, &item_path, &mut scratch));
        changes.added.push(item_path);
    }

    out
}

fn keyed_item(
    item: &Value,
    item_shape: &ObjectShape,
    catalogue: &Catalogue,
    key: &str,
    default: &Value,
    path: &str,
    changes: &mut Changes,
) -> Value {
    let mut value = reconcile_object(item, item_shape, Some(default), path, changes);
    if let Value::Object(obj) = &mut value {
        obj.entry(catalogue.key.clone())
            .or_insert_with(|| Value::String(key.to_string()));
    }
    value
}

/// Reconciles loaded documents against one shape, remembering outcomes.
///
/// The same loaded value always resolves to the same reconciled value for
/// the lifetime of the reconciler, which keeps retired items from coming
/// back when an old document is delivered again.
#[derive(Debug, Clone)]
pub struct Reconciler {
    shape: ShapeDescriptor,
    memo: HashMap<Fingerprint, Reconciled>,
}

impl Reconciler {
    /// Create a reconciler for `shape`.
    pub fn new(shape: ShapeDescriptor) -> Self {
        Self {
            shape,
            memo: HashMap::new(),
        }
    }

    /// The shape this reconciler targets.
    pub fn shape(&self) -> &ShapeDescriptor {
        &self.shape
    }

    /// A fresh document holding every default, already reconciled.
    pub fn defaults(&mut self) -> Reconciled {
        let defaults = self.shape.default_value();
        self.reconcile(&defaults)
    }

    /// Reconcile `loaded`, reusing a previous outcome for identical input.
    pub fn reconcile(&mut self, loaded: &Value) -> Reconciled {
        let key = Fingerprint::of_value(loaded);
        if let Some(hit) = self.memo.get(&key) {
            return hit.clone();
        }

        let outcome = reconcile(loaded, &self.shape);
        if self.memo.len() >= MEMO_CAPACITY {
            self.memo.clear();
        }
        self.memo.insert(key, outcome.clone());
        outcome
    }

    /// Number of remembered outcomes.
    pub fn memo_len(&self) -> usize {
        self.memo.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn module(id: &str) -> Value {
        json!({"id": id, "title": id.to_uppercase(), "isVisible": true, "order": 0})
    }

    fn module_shape() -> ObjectShape {
        ObjectShape::new(vec![
            FieldDef::required("id", FieldType::String, json!("")),
            FieldDef::required("title", FieldType::String, json!("")),
            FieldDef::required("isVisible", FieldType::Bool, json!(true)),
            FieldDef::required("order", FieldType::Number, json!(0)),
            FieldDef::optional("customSize", FieldType::Json),
        ])
    }

    fn layout_shape(catalogue: &[&str]) -> ShapeDescriptor {
        ShapeDescriptor::new(
            1,
            vec![
                FieldDef::list(
                    "modules",
                    ListShape::keyed(
                        "id",
                        module_shape(),
                        catalogue.iter().map(|id| module(id)).collect(),
                    ),
                ),
                FieldDef::required("isLocked", FieldType::Bool, json!(false)),
                FieldDef::optional("layoutMode", FieldType::String),
            ],
        )
    }

    fn module_ids(value: &Value) -> Vec<&str> {
        value["modules"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["id"].as_str().unwrap())
            .collect()
    }

    #[test]
    fn adds_new_catalogue_items_and_drops_unknown_fields() {
        let shape = layout_shape(&["a", "b", "c"]);
        let loaded = json!({
            "modules": [module("a"), module("b")],
            "isLocked": false,
            "extra_removed_field": 1
        });

        let out = reconcile(&loaded, &shape);

        assert!(out.changed);
        assert_eq!(module_ids(&out.value), vec!["a", "b", "c"]);
        assert!(out.value.get("extra_removed_field").is_none());
        assert_eq!(out.added, vec!["modules[c]".to_string()]);
        assert_eq!(out.removed, vec!["extra_removed_field".to_string()]);
    }

    #[test]
    fn retired_catalogue_items_are_removed() {
        let shape = layout_shape(&["a", "b"]);
        let loaded = json!({
            "modules": [module("phase-progress"), module("b"), module("a")],
            "isLocked": true
        });

        let out = reconcile(&loaded, &shape);

        assert_eq!(module_ids(&out.value), vec!["b", "a"]);
        assert_eq!(out.removed, vec!["modules[phase-progress]".to_string()]);
        assert_eq!(out.value["isLocked"], json!(true));
    }

    #[test]
    fn user_order_is_preserved() {
        let shape = layout_shape(&["a", "b", "c"]);
        let loaded = json!({"modules": [module("c"), module("a"), module("b")], "isLocked": false});

        let out = reconcile(&loaded, &shape);

        assert!(!out.changed);
        assert_eq!(module_ids(&out.value), vec!["c", "a", "b"]);
        assert!(out.added.is_empty());
        assert!(out.removed.is_empty());
    }

    #[test]
    fn duplicates_keep_first_occurrence() {
        let shape = layout_shape(&["a"]);
        let mut hidden = module("a");
        hidden["isVisible"] = json!(false);
        let loaded = json!({"modules": [hidden, module("a")], "isLocked": false});

        let out = reconcile(&loaded, &shape);

        assert_eq!(module_ids(&out.value), vec!["a"]);
        assert_eq!(out.value["modules"][0]["isVisible"], json!(false));
        assert!(out.changed);
    }

    #[test]
    fn missing_item_fields_come_from_catalogue_entry() {
        let shape = layout_shape(&["a", "b"]);
        let loaded = json!({"modules": [{"id": "b"}], "isLocked": false});

        let out = reconcile(&loaded, &shape);

        assert_eq!(out.value["modules"][0], module("b"));
        assert!(out.added.contains(&"modules[b].title".to_string()));
    }

    #[test]
    fn optional_fields_are_not_filled() {
        let shape = layout_shape(&["a"]);
        let loaded = json!({"modules": [module("a")], "isLocked": false});

        let out = reconcile(&loaded, &shape);

        assert!(out.value["modules"][0].get("customSize").is_none());
        assert!(out.value.get("layoutMode").is_none());
    }

    #[test]
    fn mistyped_required_field_takes_default() {
        let shape = layout_shape(&[]);
        let out = reconcile(&json!({"modules": [], "isLocked": "yes"}), &shape);
        assert_eq!(out.value["isLocked"], json!(false));
        assert_eq!(out.added, vec!["isLocked".to_string()]);
    }

    #[test]
    fn mistyped_optional_field_is_dropped() {
        let shape = layout_shape(&[]);
        let out = reconcile(&json!({"modules": [], "isLocked": false, "layoutMode": 3}), &shape);
        assert!(out.value.get("layoutMode").is_none());
        assert_eq!(out.removed, vec!["layoutMode".to_string()]);
    }

    #[test]
    fn null_optional_field_is_kept() {
        let shape = layout_shape(&[]);
        let loaded = json!({"modules": [], "isLocked": false, "layoutMode": null});
        let out = reconcile(&loaded, &shape);
        assert_eq!(out.value["layoutMode"], Value::Null);
        assert!(!out.changed);
    }

    #[test]
    fn non_object_root_becomes_defaults() {
        let shape = layout_shape(&["a"]);

        let out = reconcile(&json!([1, 2, 3]), &shape);
        assert!(out.changed);
        assert_eq!(out.value, shape.default_value());
        assert!(out.removed.contains(&"$".to_string()));

        let out = reconcile(&Value::Null, &shape);
        assert_eq!(out.value, shape.default_value());
    }

    #[test]
    fn open_lists_are_normalized_not_filled() {
        let song = ObjectShape::new(vec![
            FieldDef::required("id", FieldType::String, json!("")),
            FieldDef::required("title", FieldType::String, json!("")),
            FieldDef::optional("notes", FieldType::String),
        ]);
        let shape = ShapeDescriptor::new(1, vec![FieldDef::list("songs", ListShape::open(song))]);

        let loaded = json!({"songs": [
            {"id": "s1", "title": "Intro", "spotifyPopularity": 90},
            "garbage",
            {"id": "s2"}
        ]});
        let out = reconcile(&loaded, &shape);

        assert_eq!(
            out.value,
            json!({"songs": [{"id": "s1", "title": "Intro"}, {"id": "s2", "title": ""}]})
        );
        assert!(out.removed.contains(&"songs[0].spotifyPopularity".to_string()));
        assert!(out.removed.contains(&"songs[1]".to_string()));
        assert!(out.added.contains(&"songs[2].title".to_string()));
    }

    #[test]
    fn nested_object_fields_reconcile() {
        let progress = ObjectShape::new(vec![
            FieldDef::required("overall", FieldType::Number, json!(0)),
            FieldDef::required("venue", FieldType::Number, json!(0)),
        ]);
        let shape = ShapeDescriptor::new(1, vec![FieldDef::object("progress", progress)]);

        let out = reconcile(&json!({"progress": {"overall": 40, "legacy": 1}}), &shape);

        assert_eq!(out.value, json!({"progress": {"overall": 40, "venue": 0}}));
        assert_eq!(out.added, vec!["progress.venue".to_string()]);
        assert_eq!(out.removed, vec!["progress.legacy".to_string()]);
    }

    #[test]
    fn reconcile_is_idempotent_on_examples() {
        let shape = layout_shape(&["a", "b", "c"]);
        let inputs = [
            json!({"modules": [module("x"), {"id": 3}, module("b")], "junk": true}),
            json!({"modules": "nope", "isLocked": null}),
            json!({}),
            json!("string root"),
        ];
        for input in inputs {
            let once = reconcile(&input, &shape);
            let twice = reconcile(&once.value, &shape);
            assert_eq!(once.value, twice.value);
            assert!(!twice.changed, "second pass changed {}", once.value);
        }
    }

    #[test]
    fn reconciler_memoizes_outcomes() {
        let mut reconciler = Reconciler::new(layout_shape(&["a", "b"]));
        let loaded = json!({"modules": [module("a")], "isLocked": false});

        let first = reconciler.reconcile(&loaded);
        let second = reconciler.reconcile(&loaded);

        assert_eq!(first, second);
        assert_eq!(reconciler.memo_len(), 1);
        assert_eq!(first.fingerprint, Fingerprint::of_value(&first.value));
    }

    #[test]
    fn reconciler_defaults_are_complete_and_unchanged() {
        let mut reconciler = Reconciler::new(layout_shape(&["a", "b"]));
        let defaults = reconciler.defaults();
        assert!(!defaults.changed);
        assert_eq!(module_ids(&defaults.value), vec!["a", "b"]);
    }

    #[test]
    fn memo_is_bounded() {
        let mut reconciler = Reconciler::new(layout_shape(&[]));
        for i in 0..(MEMO_CAPACITY * 2) {
            reconciler.reconcile(&json!({"modules": [], "isLocked": false, "n": i}));
        }
        assert!(reconciler.memo_len() <= MEMO_CAPACITY);
    }

    // Property-based tests using proptest
    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        fn arb_json() -> impl Strategy<Value = Value> {
            let leaf = prop_oneof![
                Just(Value::Null),
                any::<bool>().prop_map(Value::Bool),
                any::<i32>().prop_map(|n| json!(n)),
                prop_oneof![Just("a"), Just("b"), Just("c"), Just("zz")].prop_map(|s| json!(s)),
                "[a-z]{0,4}".prop_map(Value::String),
            ];
            leaf.prop_recursive(4, 48, 5, |inner| {
                let key = prop_oneof![
                    Just("id".to_string()),
                    Just("modules".to_string()),
                    Just("isVisible".to_string()),
                    Just("isLocked".to_string()),
                    Just("title".to_string()),
                    "[a-z]{1,3}",
                ];
                prop_oneof![
                    proptest::collection::vec(inner.clone(), 0..5).prop_map(Value::Array),
                    proptest::collection::btree_map(key, inner, 0..5)
                        .prop_map(|m| Value::Object(m.into_iter().collect())),
                ]
            })
        }

        proptest! {
            #[test]
            fn prop_reconcile_idempotent(input in arb_json()) {
                let shape = layout_shape(&["a", "b", "c"]);
                let once = reconcile(&input, &shape);
                let twice = reconcile(&once.value, &shape);

                prop_assert_eq!(&once.value, &twice.value);
                prop_assert!(!twice.changed);
                prop_assert!(twice.added.is_empty());
                prop_assert!(twice.removed.is_empty());
            }

            #[test]
            fn prop_reconcile_deterministic(input in arb_json()) {
                let shape = layout_shape(&["a", "b"]);
                let first = reconcile(&input, &shape);
                let second = reconcile(&input, &shape);
                prop_assert_eq!(first, second);
            }

            #[test]
            fn prop_catalogue_always_complete(input in arb_json()) {
                let shape = layout_shape(&["a", "b", "c"]);
                let out = reconcile(&input, &shape);
                let mut ids = module_ids(&out.value);
                ids.sort();
                prop_assert_eq!(ids, vec!["a", "b", "c"]);
            }
        }
    }
}
