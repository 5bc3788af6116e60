use std::collections::HashMap;
use std::time::Duration;

use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::{Map, Value};

use dago_core::error::{DagoError, Result};
use dago_core::traits::Tool;

// ── HttpRequestTool ─────────────────────────────────────────────

pub struct HttpRequestTool;

#[derive(Deserialize)]
struct HttpRequestInput {
    url: String,
    #[serde(default = "default_method")]
    method: String,
    #[serde(default)]
    headers: HashMap<String, String>,
    /// Strings are sent as-is; any other JSON value is sent as a JSON body.
    #[serde(default)]
    body: Option<Value>,
}

fn default_method() -> String {
    "GET".into()
}

fn execution_error(message: impl ToString) -> DagoError {
    DagoError::ToolExecution {
        tool: "http_request".into(),
        message: message.to_string(),
    }
}

impl Tool for HttpRequestTool {
    fn name(&self) -> &str {
        "http_request"
    }
    fn timeout_secs(&self) -> u64 {
        60
    }
    fn description(&self) -> &str {
        "Make an HTTP request. Returns status, headers, and body."
    }
    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "url": { "type": "string" },
                "method": { "type": "string", "description": "HTTP method (default: GET)" },
                "headers": { "type": "object", "description": "Request headers" },
                "body": { "description": "Request body (string or JSON)" }
            },
            "required": ["url"]
        })
    }
    fn execute(&self, params: Map<String, Value>) -> BoxFuture<'_, Result<Value>> {
        Box::pin(async move {
            let p: HttpRequestInput = serde_json::from_value(Value::Object(params))
                .map_err(|e| DagoError::ToolValidation(e.to_string()))?;
            let client = reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .map_err(execution_error)?;

            let method = p
                .method
                .to_uppercase()
                .parse::<reqwest::Method>()
                .map_err(|e| DagoError::ToolValidation(format!("Invalid method: {}", e)))?;

            let mut req = client.request(method, &p.url);
            for (k, v) in &p.headers {
                req = req.header(k.as_str(), v.as_str());
            }
            req = match p.body {
                Some(Value::String(text)) => req.body(text),
                Some(Value::Null) | None => req,
                Some(json) => req.json(&json),
            };

            let resp = req.send().await.map_err(execution_error)?;
            let status = resp.status().as_u16();
            let headers: Map<String, Value> = resp
                .headers()
                .iter()
                .map(|(k, v)| {
                    (
                        k.to_string(),
                        Value::String(v.to_str().unwrap_or("?").to_string()),
                    )
                })
                .collect();
            let text = resp.text().await.map_err(execution_error)?;
            let body = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));

            Ok(serde_json::json!({
                "status": status,
                "headers": headers,
                "body": body,
            }))
        })
    }
}
