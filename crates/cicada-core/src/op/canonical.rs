//! Canonical JSON rendering.
//!
//! Deterministic hashing requires that the same logical document always
//! serializes to the same bytes. The canonical form is compact UTF-8 JSON
//! with object keys sorted lexicographically at every nesting level and
//! arrays kept in element order.

use std::fmt;

use serde_json::Value;

/// Display adapter rendering a [`serde_json::Value`] in canonical form.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use cicada_core::op::canonical::Canonical;
///
/// let val = json!({"z": 1, "a": {"c": 3, "b": 2}});
/// assert_eq!(Canonical(&val).to_string(), r#"{"a":{"b":2,"c":3},"z":1}"#);
/// ```
pub struct Canonical<'a>(pub &'a Value);

impl fmt::Display for Canonical<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Value::Null => f.write_str("null"),
            Value::Bool(true) => f.write_str("true"),
            Value::Bool(false) => f.write_str("false"),
            Value::Number(n) => write!(f, "{n}"),
            Value::String(s) => write_escaped(s, f),
            Value::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    Canonical(item).fmt(f)?;
                }
                f.write_str("]")
            }
            Value::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort_unstable();

                f.write_str("{")?;
                for (i, key) in keys.into_iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write_escaped(key, f)?;
                    f.write_str(":")?;
                    Canonical(&map[key]).fmt(f)?;
                }
                f.write_str("}")
            }
        }
    }
}

/// Render a value to its canonical string.
#[must_use]
pub fn to_canonical_string(value: &Value) -> String {
    Canonical(value).to_string()
}

/// Write a JSON string literal with standard escaping.
fn write_escaped(s: &str, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("\"")?;
    for c in s.chars() {
        match c {
            '"' => f.write_str("\\\"")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\r' => f.write_str("\\r")?,
            '\t' => f.write_str("\\t")?,
            '\u{8}' => f.write_str("\\b")?,
            '\u{c}' => f.write_str("\\f")?,
            c if (c as u32) < 0x20 => write!(f, "\\u{:04x}", c as u32)?,
            c => write!(f, "{c}")?,
        }
    }
    f.write_str("\"")
}
