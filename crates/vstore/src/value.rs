//! The dictionary value model shared by dictionaries, `StorableObject`
//! payloads, and the serializer contract.

use indexmap::IndexMap;

/// An ordered string-keyed mapping. Keys carry visibility prefixes (`.`
/// hidden, `_` computed) that the cache and root storage interpret on
/// store/serialize.
pub type Dictionary = IndexMap<String, Value>;

/// A primitive, array, or nested-dictionary value. `StorableObject`s are
/// represented by their `serialize()`d dictionary when nested inside
/// another value — there is no separate "nested object" variant, matching
/// the spec's "carries a dictionary" framing for storables.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<Value>),
    Dict(Dictionary),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&Dictionary> {
        match self {
            Value::Dict(d) => Some(d),
            _ => None,
        }
    }
}

/// Key visibility, derived purely from the leading character of the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyVisibility {
    /// `.`-prefixed: written but never surfaced outside the store.
    Hidden,
    /// `_`-prefixed: surfaced but never persisted.
    Computed,
    /// Neither: surfaced and persisted.
    Normal,
}

pub fn key_visibility(key: &str) -> KeyVisibility {
    if key.starts_with('.') {
        KeyVisibility::Hidden
    } else if key.starts_with('_') {
        KeyVisibility::Computed
    } else {
        KeyVisibility::Normal
    }
}

/// Recursively prune hidden and computed keys, for emission contexts like
/// `/.storageinfo` that must not leak internal bookkeeping.
pub fn sterilize(dict: &Dictionary) -> Dictionary {
    let mut out = Dictionary::new();
    for (k, v) in dict {
        match key_visibility(k) {
            KeyVisibility::Hidden | KeyVisibility::Computed => continue,
            KeyVisibility::Normal => {
                out.insert(k.clone(), sterilize_value(v));
            }
        }
    }
    out
}

fn sterilize_value(v: &Value) -> Value {
    match v {
        Value::Dict(d) => Value::Dict(sterilize(d)),
        Value::Array(items) => Value::Array(items.iter().map(sterilize_value).collect()),
        other => other.clone(),
    }
}

/// Drop only computed (`_`) keys, keeping hidden (`.`) ones — used when
/// persisting a dictionary to a backend: hidden keys are written, computed
/// keys are surfaced but never persisted.
pub fn strip_computed_for_persist(dict: &Dictionary) -> Dictionary {
    dict.iter()
        .filter(|(k, _)| key_visibility(k) != KeyVisibility::Computed)
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sterilize_drops_hidden_and_computed() {
        let mut d = Dictionary::new();
        d.insert("id".into(), Value::String("alpha".into()));
        d.insert(".secret".into(), Value::String("x".into()));
        d.insert("_activatedTime".into(), Value::Int(1));
        let out = sterilize(&d);
        assert_eq!(out.len(), 1);
        assert!(out.contains_key("id"));
    }

    #[test]
    fn strip_computed_keeps_hidden() {
        let mut d = Dictionary::new();
        d.insert("id".into(), Value::String("alpha".into()));
        d.insert(".secret".into(), Value::String("x".into()));
        d.insert("_activatedTime".into(), Value::Int(1));
        let out = strip_computed_for_persist(&d);
        assert_eq!(out.len(), 2);
        assert!(out.contains_key(".secret"));
        assert!(!out.contains_key("_activatedTime"));
    }
}
