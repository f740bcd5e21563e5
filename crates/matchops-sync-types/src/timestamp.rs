use serde_json::Value;

/// The two timestamp fields the core knows about but never interprets
/// beyond this equality check (§4.1, §9).
const TIMESTAMP_FIELDS: [&str; 2] = ["createdAt", "updatedAt"];

/// Canonicalize a JSON value for structural comparison: object keys sorted,
/// the two timestamp fields stripped, numbers compared by their `serde_json`
/// representation (deterministic for the f64/i64 values this crate handles).
///
/// `serde_json::Value`'s own `PartialEq` already ignores key order for
/// objects (`Map` is a `BTreeMap`/`IndexMap` compared by content, not
/// insertion order with the default `preserve_order` off), so the only work
/// here is dropping the timestamp fields before delegating to it.
fn strip_timestamps(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (k, v) in map {
                if TIMESTAMP_FIELDS.contains(&k.as_str()) {
                    continue;
                }
                out.insert(k.clone(), strip_timestamps(v));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(strip_timestamps).collect()),
        other => other.clone(),
    }
}

/// Structural equality modulo `createdAt`/`updatedAt`, used by the
/// write-through wrapper's Settings/Game no-op save detection (§4.1).
///
/// Per §9's design note, a serialization/canonicalization failure must
/// default to "assume different" so correctness beats performance — this
/// function works directly on already-parsed `Value`s, so the only failure
/// mode that matters in practice is a caller passing two values that simply
/// aren't a match; there is no fallible serialization step to default on
/// here, but the rule still motivates preferring `Value` equality (which
/// cannot panic or silently coerce) over any custom hand-rolled walk.
pub fn equal_ignoring_timestamps(a: &Value, b: &Value) -> bool {
    strip_timestamps(a) == strip_timestamps(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identical_payloads_with_different_timestamps_are_equal() {
        let a = json!({"theme": "dark", "updatedAt": "T1", "createdAt": "T0"});
        let b = json!({"theme": "dark", "updatedAt": "T2", "createdAt": "T0"});
        assert!(equal_ignoring_timestamps(&a, &b));
    }

    #[test]
    fn different_payloads_are_not_equal() {
        let a = json!({"theme": "dark", "updatedAt": "T1"});
        let b = json!({"theme": "light", "updatedAt": "T1"});
        assert!(!equal_ignoring_timestamps(&a, &b));
    }

    #[test]
    fn key_order_does_not_affect_equality() {
        let a = json!({"a": 1, "b": 2, "updatedAt": "T1"});
        let b = json!({"updatedAt": "T2", "b": 2, "a": 1});
        assert!(equal_ignoring_timestamps(&a, &b));
    }

    #[test]
    fn nested_timestamps_are_stripped_too() {
        let a = json!({"roster": [{"id": "p1", "updatedAt": "T1"}]});
        let b = json!({"roster": [{"id": "p1", "updatedAt": "T9"}]});
        assert!(equal_ignoring_timestamps(&a, &b));
    }
}
