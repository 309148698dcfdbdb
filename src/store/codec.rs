//! Sanitize/restore pair for stores that cannot hold empty values.
//!
//! | Logical value | Stored form      |
//! |---------------|------------------|
//! | `null`        | `"@"`            |
//! | `[]`          | `["@"]`          |
//! | `{}`          | `{"@": true}`    |
//!
//! Both directions recurse into arrays and objects. A literal `"@"` string
//! cannot be stored and reads back as `null`.

use serde_json::{Map, Value};

const NULL_MARKER: &str = "@";

/// Converts a logical value into its stored form.
pub fn sanitize(value: &Value) -> Value {
    match value {
        Value::Null => Value::String(NULL_MARKER.to_string()),
        Value::Array(items) if items.is_empty() => {
            Value::Array(vec![Value::String(NULL_MARKER.to_string())])
        }
        Value::Object(fields) if fields.is_empty() => {
            let mut marker = Map::new();
            marker.insert(NULL_MARKER.to_string(), Value::Bool(true));
            Value::Object(marker)
        }
        Value::Array(items) => Value::Array(items.iter().map(sanitize).collect()),
        Value::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), sanitize(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Converts a stored value back into its logical form.
pub fn restore(value: &Value) -> Value {
    match value {
        Value::String(s) if s == NULL_MARKER => Value::Null,
        Value::Array(items) if is_empty_array_marker(items) => Value::Array(Vec::new()),
        Value::Object(fields) if is_empty_object_marker(fields) => Value::Object(Map::new()),
        Value::Array(items) => Value::Array(items.iter().map(restore).collect()),
        Value::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), restore(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn is_empty_array_marker(items: &[Value]) -> bool {
    items.len() == 1 && items[0].as_str() == Some(NULL_MARKER)
}

fn is_empty_object_marker(fields: &Map<String, Value>) -> bool {
    fields.len() == 1 && fields.get(NULL_MARKER) == Some(&Value::Bool(true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sanitize_markers() {
        let stored = sanitize(&json!({
            "assignedPodId": null,
            "tags": [],
            "meta": {},
            "count": 0,
        }));

        assert_eq!(stored["assignedPodId"], json!("@"));
        assert_eq!(stored["tags"], json!(["@"]));
        assert_eq!(stored["meta"], json!({"@": true}));
        assert_eq!(stored["count"], json!(0));
    }

    #[test]
    fn test_nested_values_survive_storage() {
        let original = json!({
            "state": {
                "inputs": {"requirements": "text", "refs": [], "extra": {}},
                "outputs": null,
            },
            "list": [null, [], {}, {"a": null}],
        });

        assert_eq!(restore(&sanitize(&original)), original);
    }

    #[test]
    fn test_restore_leaves_regular_values() {
        let stored = json!({"status": "pending", "items": ["a", "@b"], "flag": {"@": false}});
        assert_eq!(restore(&stored), stored);
    }
}
