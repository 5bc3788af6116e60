use futures::future::BoxFuture;
use serde_json::{Map, Value};

use dago_core::error::Result;
use dago_core::traits::Tool;

/// Returns its parameters unchanged. Handy for wiring checks.
pub struct EchoTool;

impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }
    fn description(&self) -> &str {
        "Return the given parameters unchanged."
    }
    fn input_schema(&self) -> Value {
        serde_json::json!({ "type": "object" })
    }
    fn execute(&self, params: Map<String, Value>) -> BoxFuture<'_, Result<Value>> {
        Box::pin(async move { Ok(Value::Object(params)) })
    }
}
