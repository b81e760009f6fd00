//! Semi-structured metadata documents and paths into them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// A metadata document: a tree of maps, lists and scalars.
pub type Document = Value;

/// A path of keys into a nested document, e.g. `["properties", "eo:platform"]`.
///
/// Numeric keys index into lists.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocPath(pub Vec<String>);

impl DocPath {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(keys.into_iter().map(Into::into).collect())
    }

    /// Parse a dotted path such as `properties.eo:platform`.
    pub fn dotted(path: &str) -> Self {
        Self::new(path.split('.').filter(|s| !s.is_empty()))
    }

    pub fn keys(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Look up the value at this path. Explicit `null`s are treated as absent.
    pub fn get<'a>(&self, doc: &'a Value) -> Option<&'a Value> {
        let mut current = doc;
        for key in &self.0 {
            current = match current {
                Value::Object(map) => map.get(key)?,
                Value::Array(items) => items.get(key.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        if current.is_null() {
            None
        } else {
            Some(current)
        }
    }

    /// Set the value at this path, creating intermediate maps as needed.
    ///
    /// Returns false when an intermediate value exists but is not a map.
    pub fn set(&self, doc: &mut Value, value: Value) -> bool {
        let Some((last, parents)) = self.0.split_last() else {
            *doc = value;
            return true;
        };

        let mut current = doc;
        for key in parents {
            if current.is_null() {
                *current = Value::Object(Map::new());
            }
            let Value::Object(map) = current else {
                return false;
            };
            current = map
                .entry(key.clone())
                .or_insert_with(|| Value::Object(Map::new()));
        }
        if current.is_null() {
            *current = Value::Object(Map::new());
        }
        match current {
            Value::Object(map) => {
                map.insert(last.clone(), value);
                true
            }
            _ => false,
        }
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

/// Recursive key/value containment: every key of `template` exists in `doc`
/// with a value that itself contains the template's value.
///
/// Scalars compare by equality (numbers numerically); lists must match
/// element-wise in length and order.
pub fn contains(doc: &Value, template: &Value) -> bool {
    match (template, doc) {
        (Value::Object(tmpl), Value::Object(map)) => tmpl.iter().all(|(key, expected)| {
            map.get(key)
                .map(|actual| contains(actual, expected))
                .unwrap_or(false)
        }),
        (Value::Array(tmpl), Value::Array(items)) => {
            tmpl.len() == items.len()
                && tmpl.iter().zip(items).all(|(t, v)| contains(v, t))
        }
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        (t, v) => t == v,
    }
}

/// Flatten a document into `(path, scalar)` leaves. Lists count as leaves.
pub fn leaves(doc: &Value) -> Vec<(DocPath, Value)> {
    fn walk(value: &Value, prefix: &mut Vec<String>, out: &mut Vec<(DocPath, Value)>) {
        match value {
            Value::Object(map) if !map.is_empty() => {
                for (key, child) in map {
                    prefix.push(key.clone());
                    walk(child, prefix, out);
                    prefix.pop();
                }
            }
            other => out.push((DocPath(prefix.clone()), other.clone())),
        }
    }

    let mut out = Vec::new();
    walk(doc, &mut Vec::new(), &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_nested_and_indexed() {
        let doc = json!({"a": {"b": [10, {"c": "x"}]}, "n": null});
        assert_eq!(DocPath::dotted("a.b.0").get(&doc), Some(&json!(10)));
        assert_eq!(DocPath::dotted("a.b.1.c").get(&doc), Some(&json!("x")));
        assert_eq!(DocPath::dotted("a.z").get(&doc), None);
        assert_eq!(DocPath::dotted("n").get(&doc), None);
    }

    #[test]
    fn test_set_creates_parents() {
        let mut doc = json!({});
        assert!(DocPath::dotted("properties.eo:platform").set(&mut doc, json!("landsat-8")));
        assert_eq!(doc, json!({"properties": {"eo:platform": "landsat-8"}}));

        let mut scalar = json!({"a": 1});
        assert!(!DocPath::dotted("a.b").set(&mut scalar, json!(2)));
    }

    #[test]
    fn test_contains() {
        let doc = json!({"product": {"name": "ls8"}, "properties": {"cloud": 3.0, "x": 1}});
        assert!(contains(&doc, &json!({"product": {"name": "ls8"}})));
        assert!(contains(&doc, &json!({"properties": {"cloud": 3}})));
        assert!(!contains(&doc, &json!({"product": {"name": "ls7"}})));
        assert!(!contains(&doc, &json!({"missing": {}})));
        assert!(contains(&doc, &json!({})));
    }

    #[test]
    fn test_leaves() {
        let doc = json!({"a": {"b": 1, "c": [1, 2]}, "d": "x"});
        let leaves = leaves(&doc);
        assert_eq!(leaves.len(), 3);
        assert!(leaves.contains(&(DocPath::dotted("a.c"), json!([1, 2]))));
    }
}
