//! Spec documents: the YAML text users author and the text written back on read.

use serde_json::Value as Json;
use serde_yaml::Value;

use crate::config::SpecLimits;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("spec document too large (>{max} bytes)")]
    TooLarge { max: usize },
    #[error("spec document too complex (>{max} nodes)")]
    TooComplex { max: usize },
    #[error("parsing spec document: {0}")]
    Syntax(#[from] serde_yaml::Error),
}

/// Parse spec text into a YAML tree, enforcing `limits`.
/// An empty document parses to `null`.
pub fn decode_spec(text: &str, limits: &SpecLimits) -> Result<Value, DecodeError> {
    if text.len() > limits.max_bytes {
        return Err(DecodeError::TooLarge { max: limits.max_bytes });
    }
    let value: Value = serde_yaml::from_str(text)?;
    if node_budget_exceeded(&value, limits.max_nodes) {
        return Err(DecodeError::TooComplex { max: limits.max_nodes });
    }
    Ok(value)
}

/// Render a remote spec back into YAML text. A missing spec renders as "".
pub fn encode_spec(spec: &Json) -> Result<String, serde_yaml::Error> {
    if spec.is_null() {
        return Ok(String::new());
    }
    serde_yaml::to_string(spec)
}

fn node_budget_exceeded(v: &Value, max: usize) -> bool {
    // Running counter with early exit once it passes `max`
    let cap = max.saturating_add(1);
    fn walk(v: &Value, cur: &mut usize, cap: usize) {
        if *cur >= cap { return; }
        *cur += 1;
        match v {
            Value::Mapping(map) => {
                for (k, vv) in map.iter() {
                    if *cur >= cap { break; }
                    walk(k, cur, cap);
                    walk(vv, cur, cap);
                }
            }
            Value::Sequence(seq) => {
                for vv in seq.iter() {
                    if *cur >= cap { break; }
                    walk(vv, cur, cap);
                }
            }
            Value::Tagged(t) => walk(&t.value, cur, cap),
            _ => {}
        }
    }
    let mut count = 0usize;
    walk(v, &mut count, cap);
    count > max
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_and_round_trips_through_json() {
        let limits = SpecLimits::default();
        let v = decode_spec("replicas: 3\nselector:\n  app: web\n", &limits).unwrap();
        let json = multiverse_core::to_json(&v).unwrap();
        let text = encode_spec(&json).unwrap();
        assert_eq!(decode_spec(&text, &limits).unwrap(), v);
    }

    #[test]
    fn empty_document_is_null() {
        assert_eq!(decode_spec("", &SpecLimits::default()).unwrap(), Value::Null);
        assert_eq!(encode_spec(&Json::Null).unwrap(), "");
    }

    #[test]
    fn syntax_errors_are_reported() {
        let err = decode_spec("a: [1, 2\n", &SpecLimits::default()).unwrap_err();
        assert!(matches!(err, DecodeError::Syntax(_)), "err={err}");
        assert!(err.to_string().starts_with("parsing spec document"));
    }

    #[test]
    fn budgets_are_enforced() {
        let limits = SpecLimits { max_bytes: 16, max_nodes: 4 };
        assert!(matches!(decode_spec("key: a very long value indeed\n", &limits), Err(DecodeError::TooLarge { max: 16 })));
        assert!(matches!(decode_spec("[1, 2, 3, 4]", &limits), Err(DecodeError::TooComplex { max: 4 })));
        assert!(decode_spec("[1, 2]", &limits).is_ok());
        // one sequence plus three scalars sits exactly on the node limit
        assert!(decode_spec("[1, 2, 3]", &limits).is_ok());
        // exactly max_bytes long
        assert!(decode_spec("a: 1234567890123", &limits).is_ok());
    }
}
