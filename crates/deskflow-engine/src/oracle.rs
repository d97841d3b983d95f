//! The generative-model collaborator.
//!
//! The engine only needs `complete(system, user) -> text`. [`LlmOracle`]
//! fulfils it through the multi-provider [`LlmClient`] with a hard timeout;
//! [`OfflineOracle`] fails every call so runs without credentials exercise
//! the fallback path.

use std::sync::Arc;

use async_trait::async_trait;

use deskflow_llm::{provider_for_model, LlmClient, Request};
use deskflow_types::{DeskflowError, Result};

use crate::config::OracleSettings;

#[async_trait]
pub trait TransitionOracle: Send + Sync {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String>;
}

// ---------------------------------------------------------------------------
// LlmOracle
// ---------------------------------------------------------------------------

pub struct LlmOracle {
    client: Arc<LlmClient>,
    settings: OracleSettings,
}

impl LlmOracle {
    pub fn new(client: Arc<LlmClient>, settings: OracleSettings) -> Self {
        Self { client, settings }
    }

    pub fn settings(&self) -> &OracleSettings {
        &self.settings
    }

    fn provider_label(&self) -> String {
        self.settings
            .provider
            .clone()
            .or_else(|| provider_for_model(&self.settings.model).map(String::from))
            .unwrap_or_else(|| "llm".to_string())
    }
}

#[async_trait]
impl TransitionOracle for LlmOracle {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        let mut request = Request::from_prompts(&self.settings.model, system_prompt, user_prompt);
        request.provider = self.settings.provider.clone();
        request.temperature = self.settings.temperature;
        request.max_tokens = self.settings.max_tokens;

        let timeout = self.settings.timeout;
        let response = tokio::time::timeout(timeout, self.client.complete(&request))
            .await
            .map_err(|_| DeskflowError::RequestTimeout {
                provider: self.provider_label(),
                timeout_ms: millis(timeout),
            })??;

        Ok(response.text)
    }
}

/// Whole milliseconds in `d`, saturating at `u64::MAX`.
fn millis(d: std::time::Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

// ---------------------------------------------------------------------------
// OfflineOracle
// ---------------------------------------------------------------------------

/// Oracle for dry runs: every call fails with a transport error.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineOracle;

#[async_trait]
impl TransitionOracle for OfflineOracle {
    async fn complete(&self, _system_prompt: &str, _user_prompt: &str) -> Result<String> {
        Err(DeskflowError::ProviderError {
            provider: "offline".into(),
            status: 0,
            message: "no model configured (dry run)".into(),
        })
    }
}
