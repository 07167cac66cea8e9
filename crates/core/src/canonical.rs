//! Canonicalization of parsed spec documents.
//!
//! YAML allows any node as a mapping key; the remote store only accepts
//! string-keyed JSON. [`canonicalize`] rewrites every mapping reachable
//! through mappings so that its keys are strings, and [`to_json`] turns a
//! canonical tree into the JSON value sent over the wire.

use serde_json::Value as Json;
use serde_yaml::{Mapping, Value};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyTypeError {
    #[error("map had non-string keys: {key} at {path}")]
    NonString { path: String, key: String },
    #[error("map keys collide after string conversion: {key:?} at {path}")]
    Collision { path: String, key: String },
}

/// Rewrite `value` so every mapping level has string keys.
///
/// String keys are kept as is; number and bool keys become their YAML text
/// (`1` -> `"1"`, `true` -> `"true"`). Null, sequence, mapping and tagged keys
/// fail with [`KeyTypeError::NonString`], as do two keys that convert to the
/// same string. Sequences are returned unchanged and their elements are not
/// walked. The input is never modified; on error nothing is returned.
pub fn canonicalize(value: &Value) -> Result<Value, KeyTypeError> {
    walk(value, "$")
}

fn walk(value: &Value, path: &str) -> Result<Value, KeyTypeError> {
    match value {
        Value::Mapping(map) => canonical_mapping(map, path).map(Value::Mapping),
        other => Ok(other.clone()),
    }
}

fn canonical_mapping(map: &Mapping, path: &str) -> Result<Mapping, KeyTypeError> {
    let mut out = Mapping::with_capacity(map.len());
    for (k, v) in map.iter() {
        let key = key_string(k).ok_or_else(|| KeyTypeError::NonString { path: path.to_string(), key: describe(k) })?;
        let child = walk(v, &format!("{path}.{key}"))?;
        if out.insert(Value::String(key.clone()), child).is_some() {
            return Err(KeyTypeError::Collision { path: path.to_string(), key });
        }
    }
    Ok(out)
}

fn key_string(key: &Value) -> Option<String> {
    match key {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Sequence(_) | Value::Mapping(_) | Value::Tagged(_) => None,
    }
}

fn describe(key: &Value) -> String {
    match key {
        Value::Null => "null".to_string(),
        Value::Sequence(_) => "<sequence>".to_string(),
        Value::Mapping(_) => "<mapping>".to_string(),
        Value::Tagged(t) => format!("<tagged {}>", t.tag),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::String(s) => s.clone(),
    }
}

/// Convert a canonical tree into JSON.
///
/// Every mapping met here, including ones nested in sequences, must already
/// be string-keyed. Tags are dropped and non-finite floats become `null`.
pub fn to_json(value: &Value) -> Result<Json, KeyTypeError> {
    json_at(value, "$")
}

fn json_at(value: &Value, path: &str) -> Result<Json, KeyTypeError> {
    Ok(match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Json::from(i)
            } else if let Some(u) = n.as_u64() {
                Json::from(u)
            } else {
                n.as_f64().and_then(serde_json::Number::from_f64).map(Json::Number).unwrap_or(Json::Null)
            }
        }
        Value::String(s) => Json::String(s.clone()),
        Value::Sequence(seq) => {
            let mut out = Vec::with_capacity(seq.len());
            for (i, v) in seq.iter().enumerate() {
                out.push(json_at(v, &format!("{path}[{i}]"))?);
            }
            Json::Array(out)
        }
        Value::Mapping(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map.iter() {
                let Value::String(key) = k else {
                    return Err(KeyTypeError::NonString { path: path.to_string(), key: describe(k) });
                };
                out.insert(key.clone(), json_at(v, &format!("{path}.{key}"))?);
            }
            Json::Object(out)
        }
        Value::Tagged(t) => json_at(&t.value, path)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(s: &str) -> Value {
        serde_yaml::from_str(s).unwrap()
    }

    #[test]
    fn converts_scalar_keys_at_every_mapping_depth() {
        let v = yaml("1: one\ntrue: yes\nouter:\n  2: two\n  inner:\n    3.5: x\n");
        let c = canonicalize(&v).unwrap();
        let j = to_json(&c).unwrap();
        assert_eq!(
            j,
            serde_json::json!({ "1": "one", "true": "yes", "outer": { "2": "two", "inner": { "3.5": "x" } } })
        );
    }

    #[test]
    fn canonicalize_is_idempotent() {
        let v = yaml("a: 1\n7: [1, 2]\nb:\n  false: null\n  c: {d: e}\n");
        let once = canonicalize(&v).unwrap();
        let twice = canonicalize(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn string_keyed_input_is_unchanged() {
        let v = yaml("replicas: 3\ntemplate:\n  labels:\n    app: web\nports: [80, 443]\n");
        assert_eq!(canonicalize(&v).unwrap(), v);
    }

    #[test]
    fn non_string_key_fails_without_touching_input() {
        let v = yaml("a:\n  b:\n    ? [1, 2]\n    : bad\n");
        let before = v.clone();
        let err = canonicalize(&v).unwrap_err();
        assert_eq!(err, KeyTypeError::NonString { path: "$.a.b".into(), key: "<sequence>".into() });
        assert!(err.to_string().contains("map had non-string keys"));
        assert_eq!(v, before);
    }

    #[test]
    fn null_key_fails() {
        let v = yaml("~: x\n");
        assert!(matches!(canonicalize(&v), Err(KeyTypeError::NonString { .. })));
    }

    #[test]
    fn colliding_keys_fail() {
        let v = yaml("1: a\n\"1\": b\n");
        assert_eq!(canonicalize(&v), Err(KeyTypeError::Collision { path: "$".into(), key: "1".into() }));
    }

    #[test]
    fn scalars_and_sequences_pass_through() {
        for s in ["42", "hello", "~", "[1, {2: x}]"] {
            let v = yaml(s);
            assert_eq!(canonicalize(&v).unwrap(), v);
        }
    }

    #[test]
    fn to_json_rejects_unconverted_keys_nested_in_sequences() {
        let v = canonicalize(&yaml("items:\n  - 1: x\n")).unwrap();
        assert_eq!(to_json(&v), Err(KeyTypeError::NonString { path: "$.items[0]".into(), key: "1".into() }));
    }

    #[test]
    fn to_json_accepts_string_keyed_mappings_in_sequences() {
        let v = canonicalize(&yaml("items:\n  - name: a\n    port: 80\n")).unwrap();
        assert_eq!(to_json(&v).unwrap(), serde_json::json!({ "items": [{ "name": "a", "port": 80 }] }));
    }
}
