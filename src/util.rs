//! Helpers for turning command output into JSON values.

use serde_json::{Value, json};

/// Find the first balanced `{...}` in `text`, ignoring braces inside strings.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Interpret a command's stdout as a step result.
///
/// Whole-output JSON wins, then the first embedded object, then the raw text
/// under `"output"`. Empty output is `null`.
pub fn output_to_value(stdout: &str) -> Value {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return value;
    }
    if let Some(value) = extract_json_object(trimmed)
        .and_then(|candidate| serde_json::from_str::<Value>(candidate).ok())
    {
        return value;
    }
    json!({ "output": trimmed })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_object_with_surrounding_text() {
        let text = r#"connected to db... {"tenant_id": "t-9"} done"#;
        assert_eq!(extract_json_object(text), Some(r#"{"tenant_id": "t-9"}"#));
    }

    #[test]
    fn test_extract_json_object_nested() {
        let text = r#"{"outer": {"inner": 1}}"#;
        assert_eq!(extract_json_object(text), Some(text));
    }

    #[test]
    fn test_extract_json_object_ignores_braces_in_strings() {
        let text = r#"log: {"query": "MATCH (n {id: 1}) RETURN n", "ok": true} trailing"#;
        assert_eq!(
            extract_json_object(text),
            Some(r#"{"query": "MATCH (n {id: 1}) RETURN n", "ok": true}"#)
        );
    }

    #[test]
    fn test_extract_json_object_unclosed() {
        assert_eq!(extract_json_object(r#"{"key": "value""#), None);
        assert_eq!(extract_json_object("no json here"), None);
    }

    #[test]
    fn test_output_to_value_variants() {
        assert_eq!(output_to_value("  \n"), Value::Null);
        assert_eq!(output_to_value("[1, 2]"), json!([1, 2]));
        assert_eq!(output_to_value("42"), json!(42));
        assert_eq!(
            output_to_value("created user\n{\"user_id\": 7}\n"),
            json!({"user_id": 7})
        );
        assert_eq!(output_to_value("created"), json!({"output": "created"}));
    }
}
