use futures::future::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use dago_core::error::{DagoError, Result};
use dago_core::traits::LlmClient;
use dago_core::types::*;

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// OpenAI-compatible client. Works with OpenAI, Ollama, vLLM, Groq, OpenRouter, etc.
pub struct OpenAiClient {
    http: Client,
    api_key: Option<String>,
    base_url: String,
    extra_headers: Vec<(String, String)>,
}

impl OpenAiClient {
    pub fn new(
        api_key: Option<String>,
        base_url: Option<String>,
        extra_headers: Vec<(String, String)>,
    ) -> Self {
        Self {
            http: Client::new(),
            api_key: api_key.filter(|k| !k.is_empty()),
            base_url: base_url.unwrap_or_else(|| OPENAI_API_URL.to_string()),
            extra_headers,
        }
    }
}

// Request types
#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<OaiMessage>,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<OaiTool>,
}

#[derive(Serialize, Debug, PartialEq)]
struct OaiMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct OaiTool {
    r#type: &'static str,
    function: OaiToolDef,
}

#[derive(Serialize)]
struct OaiToolDef {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

// Response types
#[derive(Deserialize, Debug)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<OaiUsage>,
}

#[derive(Deserialize, Debug)]
struct Choice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<OaiToolCall>,
}

#[derive(Deserialize, Debug)]
struct OaiToolCall {
    #[serde(default)]
    id: Option<String>,
    function: OaiFunction,
}

#[derive(Deserialize, Debug)]
struct OaiFunction {
    name: String,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Deserialize, Debug)]
struct OaiUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

fn convert_tools(tools: &[ToolDefinition]) -> Vec<OaiTool> {
    tools
        .iter()
        .map(|t| OaiTool {
            r#type: "function",
            function: OaiToolDef {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.input_schema.clone(),
            },
        })
        .collect()
}

fn convert_messages(system: &str, messages: &[ChatMessage]) -> Vec<OaiMessage> {
    let mut oai_msgs = Vec::with_capacity(messages.len() + 1);
    if !system.is_empty() {
        oai_msgs.push(OaiMessage {
            role: "system",
            content: system.to_string(),
        });
    }
    for msg in messages {
        oai_msgs.push(OaiMessage {
            role: msg.role.as_str(),
            content: msg.content.clone(),
        });
    }
    oai_msgs
}

fn parse_arguments(name: &str, arguments: Option<&str>) -> serde_json::Value {
    let raw = arguments.unwrap_or("").trim();
    if raw.is_empty() {
        return serde_json::json!({});
    }
    match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            warn!(tool = %name, error = %e, "Unparseable tool call arguments, using {{}}");
            serde_json::json!({})
        }
    }
}

fn into_response(body: ChatResponse) -> Result<LlmResponse> {
    let choice = body
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| DagoError::LlmParse("response contained no choices".into()))?;

    let tool_calls = choice
        .message
        .tool_calls
        .into_iter()
        .map(|tc| ToolCall {
            input: parse_arguments(&tc.function.name, tc.function.arguments.as_deref()),
            id: tc.id,
            name: tc.function.name,
        })
        .collect();

    let stop_reason = match choice.finish_reason.as_deref() {
        Some("stop") => Some(StopReason::EndTurn),
        Some("tool_calls") => Some(StopReason::ToolUse),
        Some("length") => Some(StopReason::MaxTokens),
        _ => None,
    };

    let usage = body
        .usage
        .map(|u| Usage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        })
        .unwrap_or_default();

    Ok(LlmResponse {
        content: choice.message.content.unwrap_or_default(),
        tool_calls,
        usage,
        stop_reason,
    })
}

impl LlmClient for OpenAiClient {
    fn generate_completion(&self, request: LlmRequest) -> BoxFuture<'_, Result<LlmResponse>> {
        Box::pin(async move {
            let body = ChatRequest {
                model: request.model.clone(),
                messages: convert_messages(&request.system, &request.messages),
                max_tokens: request.max_tokens,
                temperature: request.temperature,
                tools: convert_tools(&request.tools),
            };

            debug!(model = %body.model, url = %self.base_url, "OpenAI-compatible request");

            let mut req = self
                .http
                .post(&self.base_url)
                .header("content-type", "application/json");

            if let Some(key) = &self.api_key {
                req = req.header("authorization", format!("Bearer {}", key));
            }
            for (k, v) in &self.extra_headers {
                req = req.header(k.as_str(), v.as_str());
            }

            let response = req
                .json(&body)
                .send()
                .await
                .map_err(|e| DagoError::LlmRequest(e.to_string()))?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "unknown error".to_string());
                return Err(DagoError::LlmRequest(format!("HTTP {}: {}", status, body)));
            }

            let parsed: ChatResponse = response
                .json()
                .await
                .map_err(|e| DagoError::LlmParse(e.to_string()))?;

            into_response(parsed)
        })
    }
}
