use serde_json::Value;

/// Returns the first balanced `[...]` in `text`, skipping brackets that
/// appear inside JSON strings.
pub fn first_json_array(text: &str) -> Option<&str> {
    let start = text.find('[')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parses the first JSON array of objects out of a model response.
/// Anything unparseable yields an empty list.
pub fn parse_object_array(text: &str) -> Vec<serde_json::Map<String, Value>> {
    let Some(raw) = first_json_array(text) else {
        return Vec::new();
    };
    match serde_json::from_str::<Vec<Value>>(raw) {
        Ok(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect(),
        Err(e) => {
            tracing::warn!("Failed to parse JSON array from model output: {}", e);
            Vec::new()
        }
    }
}

/// First non-empty string value among `keys`.
pub fn string_field(map: &serde_json::Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| map.get(*k))
        .filter_map(|v| v.as_str())
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fenced_array() {
        let text = "Here you go:\n```json\n[{\"subject\": \"A\"}]\n```";
        assert_eq!(first_json_array(text), Some("[{\"subject\": \"A\"}]"));
    }

    #[test]
    fn test_brackets_inside_strings() {
        let text = r#"[{"citation": "a ] tricky [ \"quote\" ]"}] trailing ]"#;
        let raw = first_json_array(text).unwrap();
        let parsed: Vec<Value> = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.len(), 1);
    }

    #[test]
    fn test_unbalanced_and_missing() {
        assert_eq!(first_json_array("no json here"), None);
        assert_eq!(first_json_array("[{\"a\": 1}"), None);
        assert!(parse_object_array("[1, 2").is_empty());
    }

    #[test]
    fn test_non_objects_are_skipped() {
        let items = parse_object_array("[1, {\"name\": \"x\"}, \"s\"]");
        assert_eq!(items.len(), 1);
        assert_eq!(string_field(&items[0], &["entity", "name"]), Some("x".to_string()));
    }
}
