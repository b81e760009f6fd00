//! Structural differences between two versions of a definition document.
//!
//! Used to decide whether an update to a metadata type or product is safe
//! to apply while datasets depend on it.

use std::fmt;

use serde_json::Value;

use cube_common::DocPath;

/// One differing leaf between an old and a new document.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub path: DocPath,
    pub old: Option<Value>,
    pub new: Option<Value>,
}

impl Change {
    /// True when `path` starts with `prefix`.
    pub fn under(&self, prefix: &[&str]) -> bool {
        let keys = self.path.keys();
        keys.len() >= prefix.len() && keys.iter().zip(prefix).all(|(k, p)| k == p)
    }

    pub fn is_addition(&self) -> bool {
        self.old.is_none() && self.new.is_some()
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |v: &Option<Value>| match v {
            Some(v) => v.to_string(),
            None => "<missing>".to_string(),
        };
        write!(f, "{}: {} -> {}", self.path, show(&self.old), show(&self.new))
    }
}

/// Compare two documents. Maps are walked key by key; any other differing
/// value (including lists) is reported as a single change.
pub fn diff(old: &Value, new: &Value) -> Vec<Change> {
    let mut out = Vec::new();
    walk(old, new, &mut Vec::new(), &mut out);
    out
}

fn walk(old: &Value, new: &Value, prefix: &mut Vec<String>, out: &mut Vec<Change>) {
    match (old, new) {
        (Value::Object(a), Value::Object(b)) => {
            for (key, av) in a {
                prefix.push(key.clone());
                match b.get(key) {
                    Some(bv) => walk(av, bv, prefix, out),
                    None => out.push(Change {
                        path: DocPath(prefix.clone()),
                        old: Some(av.clone()),
                        new: None,
                    }),
                }
                prefix.pop();
            }
            for (key, bv) in b {
                if !a.contains_key(key) {
                    prefix.push(key.clone());
                    out.push(Change {
                        path: DocPath(prefix.clone()),
                        old: None,
                        new: Some(bv.clone()),
                    });
                    prefix.pop();
                }
            }
        }
        (a, b) if a == b => {}
        (a, b) => out.push(Change {
            path: DocPath(prefix.clone()),
            old: Some(a.clone()),
            new: Some(b.clone()),
        }),
    }
}

/// Changes split into those that can be applied freely and those that
/// need an explicit unsafe update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateReport {
    pub safe: Vec<Change>,
    pub unsafe_changes: Vec<Change>,
}

impl UpdateReport {
    pub fn classify<F>(changes: Vec<Change>, is_safe: F) -> Self
    where
        F: Fn(&Change) -> bool,
    {
        let (safe, unsafe_changes) = changes.into_iter().partition(|c| is_safe(c));
        Self {
            safe,
            unsafe_changes,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.safe.is_empty() && self.unsafe_changes.is_empty()
    }

    pub fn is_safe(&self) -> bool {
        self.unsafe_changes.is_empty()
    }

    /// Human readable list of the unsafe changes.
    pub fn describe_unsafe(&self) -> String {
        self.unsafe_changes
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}
