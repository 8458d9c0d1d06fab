//! Canonical JSON encoding and the model-call fingerprint.
//!
//! The fingerprint addresses the per-theater output cache. It covers the
//! resolved model config and the normalized prompt but deliberately
//! excludes `order_id` and `run_id`, so two callers asking the same
//! question share one cache entry.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// SHA-256 of `bytes` as lowercase hex.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Serialize a JSON value canonically: object keys sorted, arrays in
/// order, no redundant whitespace. Equal values always produce equal
/// strings, regardless of key insertion order.
pub fn canonical_json(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => serde_json::to_string(s).unwrap_or_default(),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", parts.join(","))
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let parts: Vec<String> = keys
                .into_iter()
                .map(|k| {
                    let key = serde_json::to_string(k).unwrap_or_default();
                    let val = canonical_json(&map[k]);
                    format!("{key}:{val}")
                })
                .collect();
            format!("{{{}}}", parts.join(","))
        }
    }
}

/// Compute the cache fingerprint for a model call.
///
/// `overrides` is the resolved model config with `model` and
/// `profile_name` removed.
pub fn model_fingerprint(
    model_id: &str,
    profile_name: &str,
    normalized_prompt: &str,
    template_commit: Option<&str>,
    overrides: &Map<String, Value>,
) -> String {
    let input = serde_json::json!({
        "model_id": model_id,
        "profile_name": profile_name,
        "prompt": normalized_prompt,
        "template_commit": template_commit,
        "overrides": Value::Object(overrides.clone()),
    });
    sha256_hex(canonical_json(&input).as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sha256_known_vector() {
        // sha256("") and sha256("abc") reference digests.
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn canonical_json_primitives() {
        assert_eq!(canonical_json(&json!(null)), "null");
        assert_eq!(canonical_json(&json!(true)), "true");
        assert_eq!(canonical_json(&json!(42)), "42");
        assert_eq!(canonical_json(&json!("hi")), "\"hi\"");
    }

    #[test]
    fn canonical_json_sorts_object_keys() {
        let value = json!({"b": 2, "a": 1, "c": {"z": 0, "y": [1, 2]}});
        assert_eq!(
            canonical_json(&value),
            "{\"a\":1,\"b\":2,\"c\":{\"y\":[1,2],\"z\":0}}"
        );
    }

    #[test]
    fn fingerprint_ignores_override_insertion_order() {
        let mut a = Map::new();
        a.insert("temperature".to_string(), json!(0.2));
        a.insert("max_tokens".to_string(), json!(800));
        let mut b = Map::new();
        b.insert("max_tokens".to_string(), json!(800));
        b.insert("temperature".to_string(), json!(0.2));

        let fp_a = model_fingerprint("modelA", "executor_default", "hello", None, &a);
        let fp_b = model_fingerprint("modelA", "executor_default", "hello", None, &b);
        assert_eq!(fp_a, fp_b);
    }

    #[test]
    fn fingerprint_changes_with_inputs() {
        let overrides = Map::new();
        let base = model_fingerprint("modelA", "p", "hello", None, &overrides);
        assert_ne!(
            base,
            model_fingerprint("modelB", "p", "hello", None, &overrides)
        );
        assert_ne!(
            base,
            model_fingerprint("modelA", "p", "hello world", None, &overrides)
        );
        assert_ne!(
            base,
            model_fingerprint("modelA", "p", "hello", Some("abc123"), &overrides)
        );
    }

    #[test]
    fn fingerprint_is_hex_sha256() {
        let fp = model_fingerprint("m", "p", "prompt", None, &Map::new());
        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
