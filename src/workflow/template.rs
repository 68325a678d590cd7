//! `{{ path }}` placeholder rendering for step previews.

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

use crate::errors::ExecutionError;

static PLACEHOLDER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([^{}]*?)\s*\}\}").unwrap());

/// Replace every placeholder in `template` with the value at its dotted path
/// in `context`. Array elements are addressed by index (`users.0.email`).
pub fn render(template: &str, context: &Value) -> Result<String, ExecutionError> {
    let mut out = String::with_capacity(template.len());
    let mut last = 0;

    for caps in PLACEHOLDER_REGEX.captures_iter(template) {
        let (Some(whole), Some(path)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        out.push_str(&template[last..whole.start()]);
        let value = lookup(context, path.as_str()).ok_or_else(|| ExecutionError::Template {
            placeholder: path.as_str().to_string(),
        })?;
        out.push_str(&display(value));
        last = whole.end();
    }
    out.push_str(&template[last..]);
    Ok(out)
}

fn lookup<'a>(context: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return None;
    }
    path.split('.').try_fold(context, |node, segment| match node {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Object(_) | Value::Array(_) => {
            serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context() -> Value {
        json!({
            "item": {
                "id": "OPS-12",
                "environment": "UAE POC",
                "entities": {"users": [{"firstname": "Ada", "email": "ada@acme.io"}]}
            },
            "env": {"API_URL": "https://api.example.com"},
            "steps": {"fetch-tenant": {"tenant_id": 42, "name": "acme"}}
        })
    }

    #[test]
    fn test_render_strings_and_numbers() {
        let out = render(
            "Merge tenant {{ steps.fetch-tenant.tenant_id }} ({{steps.fetch-tenant.name}}) for {{ item.id }}",
            &context(),
        )
        .unwrap();
        assert_eq!(out, "Merge tenant 42 (acme) for OPS-12");
    }

    #[test]
    fn test_render_array_index_and_objects() {
        let ctx = context();
        assert_eq!(
            render("{{ item.entities.users.0.email }}", &ctx).unwrap(),
            "ada@acme.io"
        );
        let block = render("Users:\n{{ item.entities.users }}", &ctx).unwrap();
        assert!(block.starts_with("Users:\n["));
        assert!(block.contains("\"firstname\": \"Ada\""));
    }

    #[test]
    fn test_render_without_placeholders_is_identity() {
        assert_eq!(render("plain text", &context()).unwrap(), "plain text");
    }

    #[test]
    fn test_unresolved_placeholder_is_error() {
        let err = render("{{ steps.create-user.id }}", &context()).unwrap_err();
        match err {
            ExecutionError::Template { placeholder } => {
                assert_eq!(placeholder, "steps.create-user.id")
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(render("{{ }}", &context()).is_err());
    }
}
