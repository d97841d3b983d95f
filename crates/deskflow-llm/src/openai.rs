use async_trait::async_trait;
use serde_json::json;

use crate::http;
use crate::{FinishReason, ProviderAdapter, Request, Response, Usage};
use deskflow_types::DeskflowError;

const PROVIDER: &str = "openai";

/// OpenAI chat-completions backend.
#[derive(Debug)]
pub struct OpenAiAdapter {
    api_key: String,
    client: reqwest::Client,
    base_url: String,
    default_model: String,
}

impl OpenAiAdapter {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            client: reqwest::Client::new(),
            base_url: "https://api.openai.com".to_string(),
            default_model: "gpt-4o".to_string(),
        }
    }

    pub fn from_env() -> Result<Self, DeskflowError> {
        let key = std::env::var("OPENAI_API_KEY").map_err(|_| DeskflowError::AuthError {
            provider: PROVIDER.into(),
        })?;
        Ok(Self::new(key))
    }

    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url;
        self
    }
}

fn build_request_body(request: &Request) -> serde_json::Value {
    let mut body = json!({
        "model": request.model,
        "messages": request
            .messages
            .iter()
            .map(|m| json!({"role": m.role.as_str(), "content": m.content}))
            .collect::<Vec<_>>(),
    });
    if let Some(max_tokens) = request.max_tokens {
        body["max_tokens"] = json!(max_tokens);
    }
    if let Some(temperature) = request.temperature {
        body["temperature"] = json!(temperature);
    }
    body
}

fn parse_response(body: &serde_json::Value) -> Result<Response, DeskflowError> {
    let Some(choice) = body["choices"].get(0) else {
        return Err(DeskflowError::ProviderError {
            provider: PROVIDER.into(),
            status: 200,
            message: "Response contained no choices".into(),
        });
    };

    let finish_reason = match choice["finish_reason"].as_str() {
        Some("length") => FinishReason::MaxTokens,
        Some("stop") | None => FinishReason::EndTurn,
        Some(_) => FinishReason::Other,
    };

    let usage = &body["usage"];
    let input_tokens = http::tokens(usage, "prompt_tokens");
    let output_tokens = http::tokens(usage, "completion_tokens");
    let total_tokens = usage["total_tokens"]
        .as_u64()
        .unwrap_or(input_tokens + output_tokens);

    Ok(Response {
        id: body["id"].as_str().unwrap_or_default().to_string(),
        text: choice["message"]["content"].as_str().unwrap_or_default().to_string(),
        usage: Usage {
            input_tokens,
            output_tokens,
            total_tokens,
        },
        model: body["model"].as_str().unwrap_or_default().to_string(),
        finish_reason,
    })
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    async fn complete(&self, request: &Request) -> Result<Response, DeskflowError> {
        let post = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key);
        let body = http::post_json(PROVIDER, post, &build_request_body(request)).await?;
        parse_response(&body)
    }

    fn name(&self) -> &str {
        PROVIDER
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }
}
