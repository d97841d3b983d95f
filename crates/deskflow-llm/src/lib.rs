//! Vendor-neutral text completion client.
//!
//! Provides the `ProviderAdapter` trait, the `DynProvider` wrapper, a
//! middleware chain, and `LlmClient` for routing requests to a registered
//! provider. Only single-shot, non-streaming text completion is supported.

mod anthropic;
mod client;
mod http;
mod openai;
mod provider;
mod types;

pub use anthropic::AnthropicAdapter;
pub use client::*;
pub use openai::OpenAiAdapter;
pub use provider::*;
pub use types::*;
