use async_trait::async_trait;
use serde_json::json;

use crate::http;
use crate::{FinishReason, ProviderAdapter, Request, Response, Role, Usage};
use deskflow_types::DeskflowError;

const PROVIDER: &str = "anthropic";
const API_VERSION: &str = "2023-06-01";
/// The messages API requires `max_tokens`; used when the request sets none.
const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Anthropic messages-API backend.
#[derive(Debug)]
pub struct AnthropicAdapter {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl AnthropicAdapter {
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: "https://api.anthropic.com".to_string(),
        }
    }

    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url;
        self
    }

    pub fn from_env() -> Result<Self, DeskflowError> {
        let key = std::env::var("ANTHROPIC_API_KEY").map_err(|_| DeskflowError::AuthError {
            provider: PROVIDER.into(),
        })?;
        Ok(Self::new(key))
    }
}

/// System text travels in the top-level `system` field, never as a message.
fn build_request_body(request: &Request) -> serde_json::Value {
    let turns: Vec<_> = request
        .messages
        .iter()
        .filter(|m| m.role != Role::System)
        .map(|m| json!({"role": m.role.as_str(), "content": m.content}))
        .collect();

    let mut body = json!({
        "model": request.model,
        "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        "messages": turns,
    });
    let system = request.system_text();
    if !system.is_empty() {
        body["system"] = json!(system);
    }
    if let Some(temperature) = request.temperature {
        body["temperature"] = json!(temperature);
    }
    body
}

fn parse_response(body: &serde_json::Value) -> Response {
    let text: String = body["content"]
        .as_array()
        .into_iter()
        .flatten()
        .filter(|block| block["type"] == "text")
        .filter_map(|block| block["text"].as_str())
        .collect();

    let finish_reason = match body["stop_reason"].as_str() {
        Some("end_turn") | None => FinishReason::EndTurn,
        Some("max_tokens") => FinishReason::MaxTokens,
        Some("stop_sequence") => FinishReason::StopSequence,
        Some(_) => FinishReason::Other,
    };

    let input_tokens = http::tokens(&body["usage"], "input_tokens");
    let output_tokens = http::tokens(&body["usage"], "output_tokens");

    Response {
        id: body["id"].as_str().unwrap_or_default().to_string(),
        text,
        usage: Usage {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        },
        model: body["model"].as_str().unwrap_or_default().to_string(),
        finish_reason,
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    async fn complete(&self, request: &Request) -> Result<Response, DeskflowError> {
        let post = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION);
        let body = http::post_json(PROVIDER, post, &build_request_body(request)).await?;
        Ok(parse_response(&body))
    }

    fn name(&self) -> &str {
        PROVIDER
    }

    fn default_model(&self) -> &str {
        "claude-sonnet-4-5"
    }
}
