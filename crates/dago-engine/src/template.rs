//! `{{name}}` placeholder substitution against graph state.

use serde_json::{Map, Value};

use dago_core::types::GraphState;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// Render a prompt, replacing every `{{key}}` whose key is a graph input or
/// a completed node. Non-string values are inserted as JSON text. Unknown
/// placeholders are left as written, and substituted text is never re-scanned.
pub fn render(template: &str, state: &GraphState) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find(OPEN) {
        out.push_str(&rest[..start]);
        let after = &rest[start + OPEN.len()..];
        let Some(end) = after.find(CLOSE) else {
            rest = &rest[start..];
            break;
        };

        match state.lookup(&after[..end]) {
            Some(value) => {
                out.push_str(&stringify(value));
                rest = &after[end + CLOSE.len()..];
            }
            None => {
                // Step past one brace so `{{{x}}}` still finds `{{x}}`
                out.push('{');
                rest = &rest[start + 1..];
            }
        }
    }

    out.push_str(rest);
    out
}

/// Resolve tool parameters. A string that is exactly one placeholder is
/// replaced by the typed value it names; nested objects are resolved
/// recursively; everything else is kept as is.
pub fn resolve(params: &Map<String, Value>, state: &GraphState) -> Map<String, Value> {
    params
        .iter()
        .map(|(key, value)| (key.clone(), resolve_value(value, state)))
        .collect()
}

fn resolve_value(value: &Value, state: &GraphState) -> Value {
    match value {
        Value::String(s) => match whole_placeholder(s).and_then(|name| state.lookup(name)) {
            Some(found) => found.clone(),
            None => value.clone(),
        },
        Value::Object(map) => Value::Object(resolve(map, state)),
        other => other.clone(),
    }
}

fn whole_placeholder(s: &str) -> Option<&str> {
    if s.len() > OPEN.len() + CLOSE.len() && s.starts_with(OPEN) && s.ends_with(CLOSE) {
        Some(&s[OPEN.len()..s.len() - CLOSE.len()])
    } else {
        None
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
