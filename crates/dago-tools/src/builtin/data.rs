use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::{Map, Value};

use dago_core::error::{DagoError, Result};
use dago_core::traits::Tool;

// ── JsonQueryTool ───────────────────────────────────────────────

pub struct JsonQueryTool;

#[derive(Deserialize)]
struct JsonQueryInput {
    /// A JSON value, or a string holding JSON text.
    json: Value,
    path: String,
}

impl Tool for JsonQueryTool {
    fn name(&self) -> &str {
        "json_query"
    }
    fn description(&self) -> &str {
        "Query a JSON value by dot-notation path (e.g. 'foo.bar[0].baz')."
    }
    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "json": { "description": "JSON value or JSON string to query" },
                "path": { "type": "string", "description": "Dot-notation path (e.g. 'items[0].name')" }
            },
            "required": ["json", "path"]
        })
    }
    fn execute(&self, params: Map<String, Value>) -> BoxFuture<'_, Result<Value>> {
        Box::pin(async move {
            let p: JsonQueryInput = serde_json::from_value(Value::Object(params))
                .map_err(|e| DagoError::ToolValidation(e.to_string()))?;
            let value = match p.json {
                Value::String(text) => serde_json::from_str(&text)
                    .map_err(|e| DagoError::ToolValidation(format!("Invalid JSON: {}", e)))?,
                other => other,
            };
            Ok(json_path_query(&value, &p.path))
        })
    }
}

/// Walk `path` through `value`. Missing segments yield null.
pub fn json_path_query(value: &Value, path: &str) -> Value {
    let mut current = value;
    for segment in path.split('.') {
        if segment.is_empty() {
            continue;
        }
        let (key, indices) = match segment.find('[') {
            Some(pos) => (&segment[..pos], &segment[pos..]),
            None => (segment, ""),
        };
        if !key.is_empty() {
            match current.get(key) {
                Some(v) => current = v,
                None => return Value::Null,
            }
        }
        // One or more `[n]` suffixes: items[0][1]
        for idx in indices
            .split(|c| c == '[' || c == ']')
            .filter(|s| !s.is_empty())
        {
            match idx.parse::<usize>().ok().and_then(|i| current.get(i)) {
                Some(v) => current = v,
                None => return Value::Null,
            }
        }
    }
    current.clone()
}

// ── TextTemplateTool ────────────────────────────────────────────

pub struct TextTemplateTool;

#[derive(Deserialize)]
struct TextTemplateInput {
    template: String,
    #[serde(default)]
    values: Map<String, Value>,
}

impl Tool for TextTemplateTool {
    fn name(&self) -> &str {
        "text_template"
    }
    fn description(&self) -> &str {
        "Fill {{key}} placeholders in a template from a values object."
    }
    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "template": { "type": "string" },
                "values": { "type": "object", "description": "Placeholder values" }
            },
            "required": ["template"]
        })
    }
    fn execute(&self, params: Map<String, Value>) -> BoxFuture<'_, Result<Value>> {
        Box::pin(async move {
            let p: TextTemplateInput = serde_json::from_value(Value::Object(params))
                .map_err(|e| DagoError::ToolValidation(e.to_string()))?;
            let mut out = p.template;
            for (key, value) in &p.values {
                let text = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                out = out.replace(&format!("{{{{{}}}}}", key), &text);
            }
            Ok(Value::String(out))
        })
    }
}
