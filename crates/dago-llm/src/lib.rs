pub mod providers;
pub mod retry;

use std::sync::Arc;

use dago_core::config::ModelConfig;
use dago_core::error::{DagoError, Result};
use dago_core::traits::LlmClient;

pub use providers::anthropic::AnthropicClient;
pub use providers::openai::OpenAiClient;
pub use retry::RetryingClient;

/// Create an LLM client based on the provider name.
pub fn create_client(config: &ModelConfig) -> Result<Arc<dyn LlmClient>> {
    let client: Arc<dyn LlmClient> = match config.provider.as_str() {
        "anthropic" | "claude" => {
            let api_key = config
                .api_key
                .clone()
                .ok_or_else(|| DagoError::Config("Anthropic API key not set".into()))?;
            Arc::new(AnthropicClient::new(api_key, config.base_url.clone()))
        }
        "openai" | "gpt" => Arc::new(OpenAiClient::new(
            config.api_key.clone(),
            config.base_url.clone(),
            config.extra_headers.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        )),
        other => {
            let endpoint = providers::presets::lookup(other)
                .ok_or_else(|| DagoError::UnsupportedProvider(other.to_string()))?;
            let base_url = config
                .base_url
                .clone()
                .unwrap_or_else(|| endpoint.url.to_string());
            let headers = endpoint.headers_with(&config.extra_headers);
            Arc::new(OpenAiClient::new(config.api_key.clone(), Some(base_url), headers))
        }
    };

    match &config.retry {
        Some(retry) => Ok(Arc::new(RetryingClient::new(client, retry.clone()))),
        None => Ok(client),
    }
}
