//! LLM provider client and invocation layer for Dexter.
//!
//! The provider speaks the OpenAI chat completions protocol; the
//! [`LlmInvoker`] adds the default system prompt, structured-output and
//! tool binding, and retry on transient connection failures.

pub mod invoker;
pub mod openai_compat;
pub mod prompts;
pub mod retry;

pub use invoker::{LlmCall, LlmInvoker, LlmOutput, OutputSchema};
pub use openai_compat::OpenAiCompatProvider;
pub use prompts::DEFAULT_SYSTEM_PROMPT;
pub use retry::RetryPolicy;

use dexter_config::AppConfig;
use dexter_core::Provider;
use std::sync::Arc;
use tokio::runtime::Handle;

/// Build the configured provider.
///
/// A missing API key is not an error here; the first request reports it.
pub fn build_provider(config: &AppConfig) -> Arc<dyn Provider> {
    let api_key = config.api_key.clone().unwrap_or_default();
    let provider = match &config.api_base {
        Some(base) => OpenAiCompatProvider::new("openai", base, api_key),
        None => OpenAiCompatProvider::openai(api_key),
    };
    Arc::new(provider)
}

/// Build the shared invoker from configuration on the given runtime.
pub fn build_from_config(config: &AppConfig, runtime: Handle) -> Arc<LlmInvoker> {
    if !config.has_api_key() {
        tracing::warn!("OPENAI_API_KEY is not set; LLM calls will fail until it is");
    }
    Arc::new(LlmInvoker::new(build_provider(config), config, runtime))
}
