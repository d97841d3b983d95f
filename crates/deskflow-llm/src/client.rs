use std::sync::{Arc, Mutex};

use deskflow_types::DeskflowError;

use crate::{AnthropicAdapter, DynProvider, FinishReason, OpenAiAdapter, ProviderAdapter, Request, Response};

// ---------------------------------------------------------------------------
// Middleware
// ---------------------------------------------------------------------------

/// Observes every completion that goes through an [`LlmClient`].
///
/// Hooks run in registration order. They see the request as sent and the
/// response as returned; neither can be altered.
pub trait Middleware: Send + Sync {
    fn on_request(&self, _provider: &str, _request: &Request) {}
    fn on_response(&self, _provider: &str, _request: &Request, _response: &Response) {}
}

/// Structured logs for each call. Reply text goes to `debug` only.
pub struct LoggingMiddleware;

impl Middleware for LoggingMiddleware {
    fn on_request(&self, provider: &str, request: &Request) {
        tracing::info!(
            provider,
            model = %request.model,
            prompt_chars = request.messages.iter().map(|m| m.content.len()).sum::<usize>(),
            "Oracle request"
        );
    }

    fn on_response(&self, provider: &str, _request: &Request, response: &Response) {
        tracing::info!(
            provider,
            model = %response.model,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            "Oracle response"
        );
        tracing::debug!(provider, text = %response.text, "Oracle reply text");
        if response.finish_reason == FinishReason::MaxTokens {
            tracing::warn!(provider, "Oracle reply was cut off at the token limit");
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct UsageTotals {
    calls: u64,
    input: u64,
    output: u64,
}

/// Running token totals for one client. Clones share the same totals, so
/// keep one handle for reading and hand another to
/// [`LlmClient::with_middleware`].
#[derive(Clone, Default)]
pub struct TokenUsageMiddleware {
    totals: Arc<Mutex<UsageTotals>>,
}

impl TokenUsageMiddleware {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> UsageTotals {
        match self.totals.lock() {
            Ok(totals) => *totals,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub fn calls(&self) -> u64 {
        self.read().calls
    }

    pub fn total_input_tokens(&self) -> u64 {
        self.read().input
    }

    pub fn total_output_tokens(&self) -> u64 {
        self.read().output
    }
}

impl Middleware for TokenUsageMiddleware {
    fn on_response(&self, _provider: &str, _request: &Request, response: &Response) {
        let mut totals = match self.totals.lock() {
            Ok(totals) => totals,
            Err(poisoned) => poisoned.into_inner(),
        };
        totals.calls += 1;
        totals.input += response.usage.input_tokens;
        totals.output += response.usage.output_tokens;
    }
}

// ---------------------------------------------------------------------------
// Provider inference
// ---------------------------------------------------------------------------

/// Provider family implied by a model name, if any.
pub fn provider_for_model(model: &str) -> Option<&'static str> {
    const OPENAI_PREFIXES: [&str; 4] = ["gpt-", "o1", "o3", "o4"];
    if model.starts_with("claude-") {
        Some("anthropic")
    } else if OPENAI_PREFIXES.iter().any(|p| model.starts_with(p)) {
        Some("openai")
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// LlmClient
// ---------------------------------------------------------------------------

/// Routes completion requests to one of several registered providers.
///
/// Selection order: the request's explicit `provider`, then the family
/// implied by the model name, then the first provider registered.
#[derive(Default)]
pub struct LlmClient {
    providers: Vec<DynProvider>,
    middleware: Vec<Box<dyn Middleware>>,
}

impl LlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider. A later provider with the same name replaces the
    /// earlier one in place.
    pub fn register_provider(&mut self, provider: impl ProviderAdapter + 'static) {
        let provider = DynProvider::new(provider);
        match self.providers.iter_mut().find(|p| p.name() == provider.name()) {
            Some(slot) => *slot = provider,
            None => self.providers.push(provider),
        }
    }

    pub fn with_middleware(mut self, m: impl Middleware + 'static) -> Self {
        self.middleware.push(Box::new(m));
        self
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(DynProvider::name).collect()
    }

    pub async fn complete(&self, request: &Request) -> Result<Response, DeskflowError> {
        let provider = self.select(request)?;
        for m in &self.middleware {
            m.on_request(provider.name(), request);
        }
        let response = provider.complete(request).await?;
        for m in &self.middleware {
            m.on_response(provider.name(), request, &response);
        }
        Ok(response)
    }

    fn named(&self, name: &str) -> Option<&DynProvider> {
        self.providers.iter().find(|p| p.name() == name)
    }

    fn select(&self, request: &Request) -> Result<&DynProvider, DeskflowError> {
        if let Some(name) = request.provider.as_deref() {
            return self
                .named(name)
                .ok_or_else(|| DeskflowError::Other(format!("Provider '{name}' not registered")));
        }
        provider_for_model(&request.model)
            .and_then(|family| self.named(family))
            .or_else(|| self.providers.first())
            .ok_or_else(|| DeskflowError::Other("No providers registered".to_string()))
    }

    /// Register every provider whose API key is present in the environment
    /// (`OPENAI_API_KEY`, `ANTHROPIC_API_KEY`).
    pub fn from_env() -> Result<Self, DeskflowError> {
        let mut client = Self::new();
        if let Ok(openai) = OpenAiAdapter::from_env() {
            client.register_provider(openai);
        }
        if let Ok(anthropic) = AnthropicAdapter::from_env() {
            client.register_provider(anthropic);
        }
        if client.providers.is_empty() {
            return Err(DeskflowError::AuthError {
                provider: "any (set OPENAI_API_KEY or ANTHROPIC_API_KEY)".to_string(),
            });
        }
        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Usage;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Replies with a routing line naming itself, so tests can see which
    /// provider answered.
    struct Desk {
        name: &'static str,
    }

    #[async_trait]
    impl ProviderAdapter for Desk {
        async fn complete(&self, request: &Request) -> Result<Response, DeskflowError> {
            Ok(Response {
                id: format!("{}-1", self.name),
                text: format!("{} Desk || routed || neutral", self.name),
                usage: Usage {
                    input_tokens: 12,
                    output_tokens: 5,
                    total_tokens: 17,
                },
                model: request.model.clone(),
                finish_reason: FinishReason::EndTurn,
            })
        }

        fn name(&self) -> &str {
            self.name
        }

        fn default_model(&self) -> &str {
            "desk-model"
        }
    }

    fn client_with(names: &[&'static str]) -> LlmClient {
        let mut client = LlmClient::new();
        for name in names {
            client.register_provider(Desk { name });
        }
        client
    }

    fn routing_request(model: &str, provider: Option<&str>) -> Request {
        let mut req = Request::from_prompts(model, "You route leads.", "Which desk next?");
        req.provider = provider.map(String::from);
        req
    }

    #[test]
    fn model_names_imply_provider() {
        assert_eq!(provider_for_model("gpt-4o"), Some("openai"));
        assert_eq!(provider_for_model("o4-mini"), Some("openai"));
        assert_eq!(provider_for_model("claude-sonnet-4-5"), Some("anthropic"));
        assert_eq!(provider_for_model("mistral-large"), None);
    }

    #[tokio::test]
    async fn explicit_provider_wins_over_model_name() {
        let client = client_with(&["openai", "anthropic"]);
        let resp = client
            .complete(&routing_request("gpt-4o", Some("anthropic")))
            .await
            .unwrap();
        assert_eq!(resp.text, "anthropic Desk || routed || neutral");
    }

    #[tokio::test]
    async fn model_name_selects_provider() {
        let client = client_with(&["openai", "anthropic"]);
        let resp = client
            .complete(&routing_request("claude-sonnet-4-5", None))
            .await
            .unwrap();
        assert_eq!(resp.id, "anthropic-1");
    }

    #[tokio::test]
    async fn unknown_model_uses_first_registered() {
        let client = client_with(&["local", "openai"]);
        let resp = client
            .complete(&routing_request("mistral-large", None))
            .await
            .unwrap();
        assert_eq!(resp.id, "local-1");
        assert_eq!(client.provider_names(), vec!["local", "openai"]);
    }

    #[test]
    fn reregistering_replaces_in_place() {
        let mut client = client_with(&["a", "b"]);
        client.register_provider(Desk { name: "a" });
        assert_eq!(client.provider_names(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn missing_providers_are_errors() {
        let client = client_with(&["openai"]);
        let err = client
            .complete(&routing_request("gpt-4o", Some("anthropic")))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not registered"));

        let empty = LlmClient::new();
        let err = empty.complete(&routing_request("gpt-4o", None)).await.unwrap_err();
        assert!(err.to_string().contains("No providers"));
    }

    #[tokio::test]
    async fn middleware_sees_provider_and_both_phases() {
        struct Counting {
            requests: Arc<AtomicUsize>,
            responses: Arc<AtomicUsize>,
        }

        impl Middleware for Counting {
            fn on_request(&self, provider: &str, _request: &Request) {
                assert_eq!(provider, "openai");
                self.requests.fetch_add(1, Ordering::Relaxed);
            }
            fn on_response(&self, _provider: &str, _request: &Request, response: &Response) {
                assert!(response.text.contains("||"));
                self.responses.fetch_add(1, Ordering::Relaxed);
            }
        }

        let requests = Arc::new(AtomicUsize::new(0));
        let responses = Arc::new(AtomicUsize::new(0));
        let mut client = LlmClient::new().with_middleware(Counting {
            requests: requests.clone(),
            responses: responses.clone(),
        });
        client.register_provider(Desk { name: "openai" });

        client.complete(&routing_request("gpt-4o", None)).await.unwrap();
        assert_eq!(requests.load(Ordering::Relaxed), 1);
        assert_eq!(responses.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn token_usage_accumulates_across_calls() {
        let usage = TokenUsageMiddleware::new();
        let mut client = LlmClient::new()
            .with_middleware(LoggingMiddleware)
            .with_middleware(usage.clone());
        client.register_provider(Desk { name: "openai" });

        for _ in 0..3 {
            client.complete(&routing_request("gpt-4o", None)).await.unwrap();
        }
        assert_eq!(usage.calls(), 3);
        assert_eq!(usage.total_input_tokens(), 36);
        assert_eq!(usage.total_output_tokens(), 15);
    }

    #[tokio::test]
    async fn provider_failure_skips_response_hooks() {
        struct Down;

        #[async_trait]
        impl ProviderAdapter for Down {
            async fn complete(&self, _request: &Request) -> Result<Response, DeskflowError> {
                Err(DeskflowError::ProviderError {
                    provider: "down".into(),
                    status: 503,
                    message: "overloaded".into(),
                })
            }
            fn name(&self) -> &str {
                "down"
            }
            fn default_model(&self) -> &str {
                "x"
            }
        }

        let usage = TokenUsageMiddleware::new();
        let mut client = LlmClient::new().with_middleware(usage.clone());
        client.register_provider(Down);
        let err = client.complete(&routing_request("x", None)).await.unwrap_err();
        assert!(err.is_transport());
        assert_eq!(usage.calls(), 0);
    }
}
