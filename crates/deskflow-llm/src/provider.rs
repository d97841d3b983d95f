use async_trait::async_trait;
use deskflow_types::DeskflowError;

use crate::{Request, Response};

/// A vendor backend able to answer one completion request.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    async fn complete(&self, request: &Request) -> Result<Response, DeskflowError>;

    /// Registry key, also used as the `provider` label in errors.
    fn name(&self) -> &str;

    /// Model used when a request leaves the model empty.
    fn default_model(&self) -> &str;
}

/// Owned, type-erased provider as stored by the client.
pub struct DynProvider(Box<dyn ProviderAdapter>);

impl DynProvider {
    pub fn new(provider: impl ProviderAdapter + 'static) -> Self {
        Self(Box::new(provider))
    }

    /// Complete `request`, filling in the provider's default model if the
    /// request names none.
    pub async fn complete(&self, request: &Request) -> Result<Response, DeskflowError> {
        if request.model.is_empty() {
            let mut request = request.clone();
            request.model = self.0.default_model().to_string();
            return self.0.complete(&request).await;
        }
        self.0.complete(request).await
    }

    pub fn name(&self) -> &str {
        self.0.name()
    }

    pub fn default_model(&self) -> &str {
        self.0.default_model()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FinishReason, Usage};

    /// Answers every routing question with the same stage, echoing the model.
    struct FixedRoute;

    #[async_trait]
    impl ProviderAdapter for FixedRoute {
        async fn complete(&self, request: &Request) -> Result<Response, DeskflowError> {
            Ok(Response {
                id: "route-1".into(),
                text: "Review || looks complete || positive".into(),
                usage: Usage::default(),
                model: request.model.clone(),
                finish_reason: FinishReason::EndTurn,
            })
        }

        fn name(&self) -> &str {
            "fixed"
        }

        fn default_model(&self) -> &str {
            "fixed-small"
        }
    }

    #[tokio::test]
    async fn empty_model_uses_provider_default() {
        let provider = DynProvider::new(FixedRoute);
        let resp = provider
            .complete(&Request::from_prompts("", "advisor", "where next?"))
            .await
            .unwrap();
        assert_eq!(resp.model, "fixed-small");
        assert!(resp.text.starts_with("Review ||"));
    }

    #[tokio::test]
    async fn explicit_model_is_kept() {
        let provider = DynProvider::new(FixedRoute);
        let resp = provider
            .complete(&Request::from_prompts("fixed-large", "advisor", "where next?"))
            .await
            .unwrap();
        assert_eq!(resp.model, "fixed-large");
        assert_eq!(provider.name(), "fixed");
    }
}
