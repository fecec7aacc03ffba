// SPDX-License-Identifier: MIT OR Apache-2.0
//! Deterministic canonical JSON encoding and hashing.
//!
//! The regulator signs and verifies over the *canonical form* of a
//! payload: object keys sorted lexicographically by code point, no
//! insignificant whitespace, minimal JSON scalars, standard string
//! escaping. Any middleware that reorders keys would otherwise break
//! signature verification on the receiver side, so the canonical bytes
//! are both what gets hashed and exactly what goes on the wire.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Produce the canonical serialization of a JSON value.
///
/// Two structurally equal values produce byte-identical output
/// regardless of the order their object keys were inserted in.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use srm_core::canonical;
///
/// let a = canonical(&json!({"b": 1, "a": [true, null]}));
/// assert_eq!(a, r#"{"a":[true,null],"b":1}"#);
/// ```
#[must_use]
pub fn canonical(value: &Value) -> String {
    let mut out = String::new();
    write_value(value, &mut out);
    out
}

/// SHA-256 of the canonical form, as 64 lowercase hex characters.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use srm_core::canonical_hash;
///
/// let h = canonical_hash(&json!({"total": "18.38"}));
/// assert_eq!(h.len(), 64);
/// ```
#[must_use]
pub fn canonical_hash(value: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical(value).as_bytes());
    format!("{:x}", hasher.finalize())
}

fn write_value(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => write_string(s, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            // Sort keys by code point; serde_json's map may or may not
            // already be ordered depending on enabled features.
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(key, out);
                out.push(':');
                write_value(&map[key.as_str()], out);
            }
            out.push('}');
        }
    }
}

/// Standard JSON string escaping: `"` and `\` escaped, control
/// characters below U+0020 as `\n`, `\r`, `\t`, `\b`, `\f`, or `\u00XX`.
fn write_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{0008}' => out.push_str("\\b"),
            '\u{000C}' => out.push_str("\\f"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn sorts_nested_keys() {
        let v = json!({"z": {"b": 1, "a": 2}, "a": 0});
        assert_eq!(canonical(&v), r#"{"a":0,"z":{"a":2,"b":1}}"#);
    }

    #[test]
    fn no_whitespace_minimal_scalars() {
        let v = json!({"n": null, "t": true, "f": false, "i": 42, "s": "x"});
        assert_eq!(canonical(&v), r#"{"f":false,"i":42,"n":null,"s":"x","t":true}"#);
    }

    #[test]
    fn escapes_control_and_quote() {
        let v = json!({"s": "a\"b\\c\nd\u{0001}"});
        assert_eq!(canonical(&v), r#"{"s":"a\"b\\c\nd\u0001"}"#);
    }

    #[test]
    fn hash_is_64_lowercase_hex() {
        let h = canonical_hash(&json!({"a": 1}));
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn hash_changes_on_modification() {
        let a = canonical_hash(&json!({"total": "30.00"}));
        let b = canonical_hash(&json!({"total": "32.00"}));
        assert_ne!(a, b);
    }

    fn arb_json(depth: u32) -> impl Strategy<Value = serde_json::Value> {
        let leaf = prop_oneof![
            Just(serde_json::Value::Null),
            any::<bool>().prop_map(serde_json::Value::from),
            any::<i64>().prop_map(serde_json::Value::from),
            "[a-z0-9 ]{0,12}".prop_map(serde_json::Value::from),
        ];
        leaf.prop_recursive(depth, 64, 8, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..6).prop_map(serde_json::Value::from),
                prop::collection::btree_map("[a-z]{1,8}", inner, 0..6)
                    .prop_map(|m| serde_json::Value::Object(m.into_iter().collect())),
            ]
        })
    }

    proptest! {
        /// Re-parsing the canonical form and re-canonicalizing is a
        /// fixed point: structural equality implies byte equality.
        #[test]
        fn canonical_is_deterministic(v in arb_json(3)) {
            let first = canonical(&v);
            let reparsed: serde_json::Value = serde_json::from_str(&first).unwrap();
            prop_assert_eq!(first, canonical(&reparsed));
        }

        #[test]
        fn canonical_parses_back_to_equal_value(v in arb_json(3)) {
            let encoded = canonical(&v);
            let reparsed: serde_json::Value = serde_json::from_str(&encoded).unwrap();
            prop_assert_eq!(v, reparsed);
        }
    }
}
