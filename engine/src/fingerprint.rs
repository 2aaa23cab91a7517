//! Stable digests of synced values.
//!
//! A fingerprint answers one question: "is this value the same as that one,
//! for sync purposes?" Object keys are unordered, list items are ordered,
//! and numbers compare by value (`1` and `1.0` are the same number).
//!
//! The canonical encoding is fed straight into a BLAKE3 hasher, so no
//! intermediate string is ever built and serialization quirks (key order,
//! float formatting) cannot leak into the comparison.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::fmt;

// Type tags for the canonical encoding.
const TAG_NULL: u8 = 0;
const TAG_FALSE: u8 = 1;
const TAG_TRUE: u8 = 2;
const TAG_INT: u8 = 3;
const TAG_FLOAT: u8 = 4;
const TAG_STRING: u8 = 5;
const TAG_ARRAY: u8 = 6;
const TAG_OBJECT: u8 = 7;

/// Integral floats below this magnitude are encoded as integers.
const MAX_EXACT_FLOAT_INT: f64 = 9_007_199_254_740_992.0; // 2^53

/// An opaque digest of a value, rendered as lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint any serializable value.
    pub fn of<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        let value = serde_json::to_value(value)?;
        Ok(Self::of_value(&value))
    }

    /// Fingerprint an already-materialized JSON value.
    pub fn of_value(value: &Value) -> Self {
        let mut hasher = blake3::Hasher::new();
        write_canonical(&mut hasher, value);
        Self(hasher.finalize().to_hex().to_string())
    }

    /// The hex digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First eight hex characters, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(8)]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn write_canonical(hasher: &mut blake3::Hasher, value: &Value) {
    match value {
        Value::Null => {
            hasher.update(&[TAG_NULL]);
        }
        Value::Bool(false) => {
            hasher.update(&[TAG_FALSE]);
        }
        Value::Bool(true) => {
            hasher.update(&[TAG_TRUE]);
        }
        Value::Number(n) => write_number(hasher, n),
        Value::String(s) => write_str(hasher, s),
        Value::Array(items) => {
            hasher.update(&[TAG_ARRAY]);
            hasher.update(&(items.len() as u64).to_le_bytes());
            for item in items {
                write_canonical(hasher, item);
            }
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();

            hasher.update(&[TAG_OBJECT]);
            hasher.update(&(keys.len() as u64).to_le_bytes());
            for key in keys {
                write_str(hasher, key);
                write_canonical(hasher, &map[key.as_str()]);
            }
        }
    }
}

fn write_str(hasher: &mut blake3::Hasher, s: &str) {
    hasher.update(&[TAG_STRING]);
    hasher.update(&(s.len() as u64).to_le_bytes());
    hasher.update(s.as_bytes());
}

fn write_number(hasher: &mut blake3::Hasher, n: &Number) {
    if let Some(i) = n.as_i64() {
        write_int(hasher, i128::from(i));
    } else if let Some(u) = n.as_u64() {
        write_int(hasher, i128::from(u));
    } else if let Some(f) = n.as_f64() {
        if f.fract() == 0.0 && f.abs() < MAX_EXACT_FLOAT_INT {
            // Also folds -0.0 into 0.
            write_int(hasher, f as i128);
        } else {
            hasher.update(&[TAG_FLOAT]);
            hasher.update(&f.to_bits().to_le_bytes());
        }
    }
}

fn write_int(hasher: &mut blake3::Hasher, i: i128) {
    hasher.update(&[TAG_INT]);
    hasher.update(&i.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn equal_values_equal_fingerprints() {
        let a = json!({"modules": [{"id": "a"}], "isLocked": false});
        let b = json!({"modules": [{"id": "a"}], "isLocked": false});
        assert_eq!(Fingerprint::of_value(&a), Fingerprint::of_value(&b));
    }

    #[test]
    fn key_order_does_not_matter() {
        let a: Value = serde_json::from_str(r#"{"x": 1, "y": {"p": true, "q": null}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"y": {"q": null, "p": true}, "x": 1}"#).unwrap();
        assert_eq!(Fingerprint::of_value(&a), Fingerprint::of_value(&b));
    }

    #[test]
    fn list_order_matters() {
        let a = json!({"modules": ["a", "b"]});
        let b = json!({"modules": ["b", "a"]});
        assert_ne!(Fingerprint::of_value(&a), Fingerprint::of_value(&b));
    }

    #[test]
    fn numbers_compare_by_value() {
        assert_eq!(
            Fingerprint::of_value(&json!(1)),
            Fingerprint::of_value(&json!(1.0))
        );
        assert_eq!(
            Fingerprint::of_value(&json!(0)),
            Fingerprint::of_value(&json!(-0.0))
        );
        assert_ne!(
            Fingerprint::of_value(&json!(1)),
            Fingerprint::of_value(&json!(1.5))
        );
    }

    #[test]
    fn types_are_distinguished() {
        let values = [
            json!(null),
            json!(false),
            json!(0),
            json!("0"),
            json!([]),
            json!({}),
            json!([null]),
            json!({"": null}),
        ];
        let mut seen = std::collections::HashSet::new();
        for v in &values {
            assert!(seen.insert(Fingerprint::of_value(v)), "collision for {v}");
        }
    }

    #[test]
    fn string_boundaries_are_unambiguous() {
        let a = json!(["ab", "c"]);
        let b = json!(["a", "bc"]);
        assert_ne!(Fingerprint::of_value(&a), Fingerprint::of_value(&b));
    }

    #[test]
    fn of_serializable_matches_of_value() {
        #[derive(Serialize)]
        struct Layout {
            is_locked: bool,
            modules: Vec<&'static str>,
        }

        let typed = Layout {
            is_locked: true,
            modules: vec!["a"],
        };
        let raw = json!({"modules": ["a"], "is_locked": true});
        assert_eq!(
            Fingerprint::of(&typed).unwrap(),
            Fingerprint::of_value(&raw)
        );
    }

    #[test]
    fn renders_as_hex() {
        let fp = Fingerprint::of_value(&json!({"a": 1}));
        assert_eq!(fp.as_str().len(), 64);
        assert!(fp.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(fp.short().len(), 8);
        assert_eq!(fp.to_string(), fp.as_str());
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_insertion_order_irrelevant(
                entries in proptest::collection::btree_map("[a-z]{1,6}", any::<i64>(), 0..12)
            ) {
                let mut forward = serde_json::Map::new();
                for (k, v) in entries.iter() {
                    forward.insert(k.clone(), json!(v));
                }
                let mut backward = serde_json::Map::new();
                for (k, v) in entries.iter().rev() {
                    backward.insert(k.clone(), json!(v));
                }

                prop_assert_eq!(
                    Fingerprint::of_value(&Value::Object(forward)),
                    Fingerprint::of_value(&Value::Object(backward))
                );
            }

            #[test]
            fn prop_reversing_a_list_changes_fingerprint(
                items in proptest::collection::vec(any::<u32>(), 2..10)
            ) {
                let reversed: Vec<u32> = items.iter().rev().copied().collect();
                prop_assume!(reversed != items);
                prop_assert_ne!(
                    Fingerprint::of_value(&json!(items)),
                    Fingerprint::of_value(&json!(reversed))
                );
            }
        }
    }
}
