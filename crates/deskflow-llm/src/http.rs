//! HTTP plumbing shared by the vendor adapters.

use deskflow_types::DeskflowError;
use serde_json::Value;

/// Default wait suggested to callers when a 429 carries no hint.
const DEFAULT_RETRY_AFTER_MS: u64 = 1000;

/// Send a prepared JSON POST and return the decoded success body.
///
/// Network failures report status 0. Non-2xx statuses go through
/// [`status_error`].
pub(crate) async fn post_json(
    provider: &str,
    request: reqwest::RequestBuilder,
    body: &Value,
) -> Result<Value, DeskflowError> {
    let transport = |e: reqwest::Error| DeskflowError::ProviderError {
        provider: provider.to_string(),
        status: 0,
        message: e.to_string(),
    };

    let response = request.json(body).send().await.map_err(transport)?;
    let status = response.status().as_u16();
    let text = response.text().await.map_err(transport)?;

    if !(200..300).contains(&status) {
        return Err(status_error(provider, status, &text));
    }

    serde_json::from_str(&text).map_err(|e| DeskflowError::ProviderError {
        provider: provider.to_string(),
        status,
        message: format!("response body is not JSON: {e}"),
    })
}

/// Classify a failed HTTP exchange. Both vendors wrap details as
/// `{"error": {"message": ..., "retry_after": seconds}}`.
pub(crate) fn status_error(provider: &str, status: u16, body: &str) -> DeskflowError {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let detail = parsed.as_ref().map(|v| &v["error"]);

    match status {
        401 | 403 => DeskflowError::AuthError {
            provider: provider.to_string(),
        },
        429 => DeskflowError::RateLimited {
            provider: provider.to_string(),
            retry_after_ms: detail
                .and_then(|e| e["retry_after"].as_f64())
                .map_or(DEFAULT_RETRY_AFTER_MS, |secs| (secs * 1000.0) as u64),
        },
        _ => DeskflowError::ProviderError {
            provider: provider.to_string(),
            status,
            message: detail
                .and_then(|e| e["message"].as_str())
                .map_or_else(|| body.to_string(), String::from),
        },
    }
}

/// Read a token count, treating a missing field as zero.
pub(crate) fn tokens(usage: &Value, field: &str) -> u64 {
    usage[field].as_u64().unwrap_or(0)
}
