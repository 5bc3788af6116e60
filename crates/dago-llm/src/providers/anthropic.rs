use futures::future::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use dago_core::error::{DagoError, Result};
use dago_core::traits::LlmClient;
use dago_core::types::*;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Client for the Anthropic Messages API.
pub struct AnthropicClient {
    http: Client,
    api_key: String,
    base_url: String,
}

impl AnthropicClient {
    pub fn new(api_key: impl Into<String>, base_url: Option<String>) -> Self {
        Self {
            http: Client::new(),
            api_key: api_key.into(),
            base_url: base_url.unwrap_or_else(|| ANTHROPIC_API_URL.to_string()),
        }
    }
}

// Anthropic API request types
#[derive(Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ApiTool>,
}

#[derive(Serialize, Debug, PartialEq)]
struct ApiMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct ApiTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

// Anthropic API response types
#[derive(Deserialize, Debug)]
struct AnthropicResponse {
    #[serde(default)]
    content: Vec<ContentBlockInfo>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<UsageInfo>,
}

#[derive(Deserialize, Debug)]
struct UsageInfo {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[derive(Deserialize, Debug)]
#[serde(tag = "type")]
enum ContentBlockInfo {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },
    #[serde(other)]
    Other,
}

/// Anthropic requires alternating roles and non-empty content, so empty
/// turns are dropped and consecutive same-role turns are merged.
fn convert_messages(messages: &[ChatMessage]) -> Vec<ApiMessage> {
    let mut api_msgs: Vec<ApiMessage> = Vec::new();

    for msg in messages {
        let role = match msg.role {
            Role::Assistant => "assistant",
            // System text travels in the top-level `system` field
            Role::System | Role::User => "user",
        };
        if msg.content.trim().is_empty() {
            continue;
        }
        match api_msgs.last_mut() {
            Some(last) if last.role == role => {
                last.content.push_str("\n\n");
                last.content.push_str(&msg.content);
            }
            _ => api_msgs.push(ApiMessage {
                role,
                content: msg.content.clone(),
            }),
        }
    }

    api_msgs
}

fn parse_stop_reason(reason: Option<&str>) -> Option<StopReason> {
    match reason {
        Some("end_turn") => Some(StopReason::EndTurn),
        Some("tool_use") => Some(StopReason::ToolUse),
        Some("max_tokens") => Some(StopReason::MaxTokens),
        Some("stop_sequence") => Some(StopReason::StopSequence),
        _ => None,
    }
}

fn into_response(body: AnthropicResponse) -> LlmResponse {
    let mut content = String::new();
    let mut tool_calls = Vec::new();

    for block in body.content {
        match block {
            ContentBlockInfo::Text { text } => content.push_str(&text),
            ContentBlockInfo::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                id: Some(id),
                name,
                input,
            }),
            ContentBlockInfo::Other => {}
        }
    }

    let usage = body
        .usage
        .map(|u| Usage {
            input_tokens: u.input_tokens,
            output_tokens: u.output_tokens,
        })
        .unwrap_or_default();

    LlmResponse {
        content,
        tool_calls,
        usage,
        stop_reason: parse_stop_reason(body.stop_reason.as_deref()),
    }
}

impl LlmClient for AnthropicClient {
    fn generate_completion(&self, request: LlmRequest) -> BoxFuture<'_, Result<LlmResponse>> {
        Box::pin(async move {
            let api_tools: Vec<ApiTool> = request
                .tools
                .iter()
                .map(|t| ApiTool {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    input_schema: t.input_schema.clone(),
                })
                .collect();

            let body = AnthropicRequest {
                model: request.model.clone(),
                max_tokens: request.max_tokens,
                temperature: request.temperature,
                messages: convert_messages(&request.messages),
                system: Some(request.system.clone()).filter(|s| !s.is_empty()),
                tools: api_tools,
            };

            debug!(model = %body.model, messages = body.messages.len(), "Anthropic request");

            let response = self
                .http
                .post(&self.base_url)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .header("content-type", "application/json")
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

            let parsed: AnthropicResponse = response
                .json()
                .await
                .map_err(|e| DagoError::LlmParse(e.to_string()))?;

            Ok(into_response(parsed))
        })
    }
}
