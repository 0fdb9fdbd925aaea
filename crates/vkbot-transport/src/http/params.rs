//! Request parameter encoding.
//!
//! API parameters are given as a JSON object and flattened into form / query
//! pairs the way VK expects them.

use serde_json::Value;

/// Flattens a JSON object into request pairs.
///
/// - `null` values are dropped
/// - booleans become `1` / `0`
/// - arrays are joined with commas
/// - nested objects are sent as JSON text (keyboards, templates)
///
/// Non-object values produce no pairs.
pub fn encode_params(params: &Value) -> Vec<(String, String)> {
    let Some(object) = params.as_object() else {
        return Vec::new();
    };
    object
        .iter()
        .filter_map(|(key, value)| encode_value(value).map(|v| (key.clone(), v)))
        .collect()
}

fn encode_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(encode_value)
                .collect::<Vec<_>>()
                .join(","),
        ),
        Value::Object(_) => Some(value.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encode_params() {
        let mut pairs = encode_params(&json!({
            "user_ids": [1, 2, "durov"],
            "enabled": true,
            "group_id": 5,
            "reply_to": null,
            "keyboard": {"buttons": []}
        }));
        pairs.sort();
        assert_eq!(
            pairs,
            vec![
                ("enabled".to_string(), "1".to_string()),
                ("group_id".to_string(), "5".to_string()),
                ("keyboard".to_string(), r#"{"buttons":[]}"#.to_string()),
                ("user_ids".to_string(), "1,2,durov".to_string()),
            ]
        );
        assert!(encode_params(&json!([1, 2])).is_empty());
    }
}
