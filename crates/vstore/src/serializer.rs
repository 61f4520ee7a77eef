//! Extension-dispatched serialize/deserialize over named byte streams.
//!
//! The core only needs the `serialize(name, obj, sink)` /
//! `deserialize(name, src) -> obj` contract keyed by filename extension.
//! The four recognized formats are implemented for real here (not
//! stubbed) so the round trip is genuinely exercised.

use std::io::Write;

use indexmap::IndexMap;
use serde_json::Value as JsonValue;

use crate::error::{StoreError, StoreResult};
use crate::value::{Dictionary, Value};

pub const RECOGNIZED_EXTENSIONS: &[&str] = &[".properties", ".json", ".xml", ".yaml"];

/// Pick the extension for a MIME type, defaulting to `.properties`.
pub fn extension_for_mime(mime: Option<&str>) -> &'static str {
    match mime {
        Some("application/json") => ".json",
        Some("application/xml") => ".xml",
        Some("application/yaml") => ".yaml",
        _ => ".properties",
    }
}

/// Append the extension matching `mime_type` (defaulting to `.properties`)
/// to a logical filename that has none yet.
pub fn serialized_name(base: &str, mime_type: Option<&str>) -> String {
    format!("{base}{}", extension_for_mime(mime_type))
}

/// Strip any known data extension from a filename, yielding the object
/// name it represents.
pub fn object_name(filename: &str) -> &str {
    for ext in RECOGNIZED_EXTENSIONS {
        if let Some(stripped) = filename.strip_suffix(ext) {
            return stripped;
        }
    }
    filename
}

fn extension_of(filename: &str) -> Option<&'static str> {
    RECOGNIZED_EXTENSIONS.iter().copied().find(|ext| filename.ends_with(ext))
}

/// Serialize `obj` to bytes according to the extension on `filename`.
pub fn serialize(filename: &str, obj: &Dictionary) -> StoreResult<Vec<u8>> {
    match extension_of(filename) {
        Some(".properties") => Ok(properties::write(obj)),
        Some(".json") => {
            let json = to_json(obj);
            serde_json::to_vec_pretty(&json).map_err(StoreError::from)
        }
        Some(".yaml") => {
            let json = to_json(obj);
            serde_yaml::to_string(&json)
                .map(String::into_bytes)
                .map_err(|e| StoreError::UnsupportedFormat(e.to_string()))
        }
        Some(".xml") => {
            let json = to_json(obj);
            quick_xml::se::to_string_with_root("object", &json)
                .map(String::into_bytes)
                .map_err(|e| StoreError::UnsupportedFormat(e.to_string()))
        }
        _ => Err(StoreError::UnsupportedFormat(filename.to_string())),
    }
}

/// Deserialize bytes into a dictionary according to the extension on
/// `filename`.
pub fn deserialize(filename: &str, src: &[u8]) -> StoreResult<Dictionary> {
    match extension_of(filename) {
        Some(".properties") => properties::read(src),
        Some(".json") => {
            let json: JsonValue = serde_json::from_slice(src).map_err(StoreError::from)?;
            Ok(from_json_dict(json))
        }
        Some(".yaml") => {
            let json: JsonValue = serde_yaml::from_slice(src)
                .map_err(|e| StoreError::UnsupportedFormat(e.to_string()))?;
            Ok(from_json_dict(json))
        }
        Some(".xml") => {
            let text = std::str::from_utf8(src)
                .map_err(|e| StoreError::UnsupportedFormat(e.to_string()))?;
            let json: JsonValue = quick_xml::de::from_str(text)
                .map_err(|e| StoreError::UnsupportedFormat(e.to_string()))?;
            Ok(from_json_dict(json))
        }
        _ => Err(StoreError::UnsupportedFormat(filename.to_string())),
    }
}

fn to_json(dict: &Dictionary) -> JsonValue {
    value_to_json(&Value::Dict(dict.clone()))
}

fn value_to_json(v: &Value) -> JsonValue {
    match v {
        Value::Null => JsonValue::Null,
        Value::Bool(b) => JsonValue::Bool(*b),
        Value::Int(i) => JsonValue::from(*i),
        Value::Float(f) => JsonValue::from(*f),
        Value::String(s) => JsonValue::String(s.clone()),
        Value::Array(items) => JsonValue::Array(items.iter().map(value_to_json).collect()),
        Value::Dict(d) => {
            let mut map = serde_json::Map::new();
            for (k, v) in d {
                map.insert(k.clone(), value_to_json(v));
            }
            JsonValue::Object(map)
        }
    }
}

fn from_json_dict(json: JsonValue) -> Dictionary {
    match json_to_value(json) {
        Value::Dict(d) => d,
        other => {
            let mut d = Dictionary::new();
            d.insert("value".to_string(), other);
            d
        }
    }
}

fn json_to_value(json: JsonValue) -> Value {
    match json {
        JsonValue::Null => Value::Null,
        JsonValue::Bool(b) => Value::Bool(b),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else {
                Value::Float(n.as_f64().unwrap_or(0.0))
            }
        }
        JsonValue::String(s) => Value::String(s),
        JsonValue::Array(items) => Value::Array(items.into_iter().map(json_to_value).collect()),
        JsonValue::Object(map) => {
            let mut d: IndexMap<String, Value> = IndexMap::new();
            for (k, v) in map {
                d.insert(k, json_to_value(v));
            }
            Value::Dict(d)
        }
    }
}

/// The system's own default format: flat `key=value` lines, one per entry.
/// Nested dictionaries are flattened with `.`-joined keys; arrays are
/// `,`-joined scalar lists under an `a:` value prefix. Every scalar is
/// written with a one-letter type tag (`s:`/`i:`/`f:`/`b:`/`n:`) so a
/// round trip restores the original `Value` variant rather than
/// collapsing everything to a string.
mod properties {
    use super::*;

    pub fn write(obj: &Dictionary) -> Vec<u8> {
        let mut out = Vec::new();
        write_entries(&mut out, "", obj);
        out
    }

    fn write_entries(out: &mut Vec<u8>, prefix: &str, dict: &Dictionary) {
        for (k, v) in dict {
            let key = if prefix.is_empty() { k.clone() } else { format!("{prefix}.{k}") };
            write_value(out, &key, v);
        }
    }

    fn write_value(out: &mut Vec<u8>, key: &str, v: &Value) {
        match v {
            Value::Dict(d) => write_entries(out, key, d),
            Value::Array(items) => {
                let joined = items
                    .iter()
                    .map(scalar_to_tagged)
                    .collect::<Vec<_>>()
                    .join(",");
                let _ = writeln!(out, "{key}=a:{}", escape(&joined));
            }
            other => {
                let _ = writeln!(out, "{key}={}", escape(&scalar_to_tagged(other)));
            }
        }
    }

    /// Tag a scalar with a one-letter type prefix (`s`/`i`/`f`/`b`/`n`) so
    /// `read` can restore the original `Value` variant instead of always
    /// producing a string.
    fn scalar_to_tagged(v: &Value) -> String {
        match v {
            Value::Null => "n:".to_string(),
            Value::Bool(b) => format!("b:{b}"),
            Value::Int(i) => format!("i:{i}"),
            Value::Float(f) => format!("f:{f}"),
            Value::String(s) => format!("s:{s}"),
            Value::Array(_) | Value::Dict(_) => "n:".to_string(),
        }
    }

    fn parse_tagged_scalar(s: &str) -> Value {
        match s.split_once(':') {
            Some(("s", rest)) => Value::String(rest.to_string()),
            Some(("i", rest)) => rest.parse::<i64>().map(Value::Int).unwrap_or_else(|_| Value::String(rest.to_string())),
            Some(("f", rest)) => rest.parse::<f64>().map(Value::Float).unwrap_or_else(|_| Value::String(rest.to_string())),
            Some(("b", rest)) => match rest {
                "true" => Value::Bool(true),
                "false" => Value::Bool(false),
                _ => Value::String(rest.to_string()),
            },
            Some(("n", _)) => Value::Null,
            _ => Value::String(s.to_string()),
        }
    }

    fn parse_tagged(s: &str) -> Value {
        match s.strip_prefix("a:") {
            Some(rest) if !rest.is_empty() => {
                Value::Array(rest.split(',').map(parse_tagged_scalar).collect())
            }
            Some(_) => Value::Array(Vec::new()),
            None => parse_tagged_scalar(s),
        }
    }

    fn escape(s: &str) -> String {
        s.replace('\\', "\\\\").replace('\n', "\\n")
    }

    fn unescape(s: &str) -> String {
        s.replace("\\n", "\n").replace("\\\\", "\\")
    }

    pub fn read(src: &[u8]) -> StoreResult<Dictionary> {
        let text = std::str::from_utf8(src)
            .map_err(|e| StoreError::UnsupportedFormat(e.to_string()))?;
        let mut out = Dictionary::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            insert_path(&mut out, key.trim(), parse_tagged(&unescape(value.trim())));
        }
        Ok(out)
    }

    fn insert_path(dict: &mut Dictionary, key: &str, value: Value) {
        match key.split_once('.') {
            None => {
                dict.insert(key.to_string(), value);
            }
            Some((head, rest)) => {
                let entry = dict.entry(head.to_string()).or_insert_with(|| Value::Dict(Dictionary::new()));
                if !matches!(entry, Value::Dict(_)) {
                    *entry = Value::Dict(Dictionary::new());
                }
                if let Value::Dict(sub) = entry {
                    insert_path(sub, rest, value);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Dictionary {
        let mut d = Dictionary::new();
        d.insert("id".to_string(), Value::String("alpha".to_string()));
        d.insert("count".to_string(), Value::Int(3));
        d
    }

    #[test]
    fn json_round_trips() {
        let d = sample();
        let bytes = serialize("x.json", &d).unwrap();
        let back = deserialize("x.json", &bytes).unwrap();
        assert_eq!(d, back);
    }

    #[test]
    fn yaml_round_trips() {
        let d = sample();
        let bytes = serialize("x.yaml", &d).unwrap();
        let back = deserialize("x.yaml", &bytes).unwrap();
        assert_eq!(d, back);
    }

    #[test]
    fn properties_round_trips_flat_dict() {
        let d = sample();
        let bytes = serialize("x.properties", &d).unwrap();
        let back = deserialize("x.properties", &bytes).unwrap();
        assert_eq!(d, back);
    }

    #[test]
    fn properties_round_trips_mixed_scalars_and_array() {
        let mut d = Dictionary::new();
        d.insert("name".to_string(), Value::String("alpha".to_string()));
        d.insert("count".to_string(), Value::Int(3));
        d.insert("ratio".to_string(), Value::Float(1.5));
        d.insert("enabled".to_string(), Value::Bool(true));
        d.insert("missing".to_string(), Value::Null);
        d.insert("tags".to_string(), Value::Array(vec![Value::Int(1), Value::Int(2), Value::String("x".to_string())]));

        let bytes = serialize("x.properties", &d).unwrap();
        let back = deserialize("x.properties", &bytes).unwrap();
        assert_eq!(d, back);
    }

    #[test]
    fn unsupported_extension_errors() {
        assert!(serialize("x.bin", &sample()).is_err());
        assert!(deserialize("x.bin", b"data").is_err());
    }

    #[test]
    fn object_name_strips_known_extensions() {
        assert_eq!(object_name("alpha.json"), "alpha");
        assert_eq!(object_name("alpha.properties"), "alpha");
        assert_eq!(object_name("alpha.bin"), "alpha.bin");
    }

    #[test]
    fn serialized_name_defaults_to_properties() {
        assert_eq!(serialized_name("x", None), "x.properties");
        assert_eq!(serialized_name("x", Some("application/json")), "x.json");
    }
}
