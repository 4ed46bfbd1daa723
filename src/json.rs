use serde_json::{Map, Value};

/// Parse environment-supplied JSON text into an object.
///
/// Empty input, invalid JSON and non-object JSON all yield an empty map;
/// parse failures are logged rather than returned.
pub fn parse_env_object(text: &str) -> Map<String, Value> {
    if text.trim().is_empty() {
        return Map::new();
    }
    match serde_json::from_str::<Value>(text) {
        Ok(value) => object_or_empty(value),
        Err(e) => {
            tracing::warn!(error = %e, "failed to parse JSON from environment, ignoring it");
            Map::new()
        }
    }
}

/// Accept an already-parsed value, keeping it only if it is an object.
pub fn object_or_empty(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        Value::String(text) => parse_env_object(&text),
        _ => Map::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tracing_test::traced_test;

    #[test]
    fn parses_objects() {
        let map = parse_env_object(r#"{"ingest-username":"u"}"#);
        assert_eq!(map.get("ingest-username"), Some(&json!("u")));
    }

    #[test]
    #[traced_test]
    fn invalid_json_is_empty_and_logged() {
        assert!(parse_env_object("{not json").is_empty());
        assert!(logs_contain("failed to parse JSON from environment"));
    }

    #[test]
    fn non_objects_are_empty() {
        assert!(parse_env_object("[1,2]").is_empty());
        assert!(parse_env_object("").is_empty());
        assert!(object_or_empty(json!(42)).is_empty());
        assert!(object_or_empty(json!(null)).is_empty());
    }

    #[test]
    fn string_values_are_parsed_again() {
        let map = object_or_empty(json!(r#"{"a":1}"#));
        assert_eq!(map.get("a"), Some(&json!(1)));
    }
}
