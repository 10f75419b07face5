/*!
 * Provider implementations for LLM backends.
 *
 * Every backend satisfies the two-method `LlmClient` contract:
 * - Ollama: local host, escalating timeouts, no pacing
 * - Gemini: remote API with minimum spacing and adaptive throttle
 * - Mock: scripted client for tests and dry runs
 */

use async_trait::async_trait;
use std::time::Duration;

use crate::app_config::{Config, TranslationProvider};
use crate::errors::ProviderError;

pub mod gemini;
pub mod mock;
pub mod ollama;

pub use gemini::{GeminiClient, ThrottleState};
pub use mock::{MockClient, MockReply};
pub use ollama::OllamaClient;

/// Common contract for all LLM backends
///
/// Calls are issued strictly one at a time by the pipeline; implementations
/// may hold pacing state that assumes sequential use.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Model identifier to use for `generate`
    async fn resolve_model(&self) -> Result<String, ProviderError>;

    /// Generate a completion for `prompt`
    async fn generate(&self, prompt: &str, model: &str) -> Result<String, ProviderError>;
}

#[async_trait]
impl<T: LlmClient + ?Sized> LlmClient for Box<T> {
    async fn resolve_model(&self) -> Result<String, ProviderError> {
        (**self).resolve_model().await
    }

    async fn generate(&self, prompt: &str, model: &str) -> Result<String, ProviderError> {
        (**self).generate(prompt, model).await
    }
}

/// Build the client for the configured provider
pub fn build_client(config: &Config) -> anyhow::Result<Box<dyn LlmClient>> {
    let provider = config.translation.active_provider_or_default();
    let common = &config.translation.common;
    Ok(match config.translation.provider {
        TranslationProvider::Ollama => Box::new(OllamaClient::from_config(&provider, common)?),
        TranslationProvider::Gemini => Box::new(GeminiClient::from_config(&provider, common)?),
    })
}

/// Backoff for a zero-based attempt; the last value repeats
pub fn backoff_for(backoff: &[Duration], attempt: usize) -> Duration {
    backoff
        .get(attempt)
        .or_else(|| backoff.last())
        .copied()
        .unwrap_or(Duration::ZERO)
}

/// Classify a transport error
pub(crate) fn map_reqwest_error(error: reqwest::Error) -> ProviderError {
    if error.is_timeout() {
        ProviderError::Timeout(error.to_string())
    } else if error.is_connect() || error.is_request() {
        ProviderError::ConnectionError(error.to_string())
    } else if error.is_decode() {
        ProviderError::ParseError(error.to_string())
    } else {
        ProviderError::RequestFailed(error.to_string())
    }
}

/// Strip a trailing slash so paths can be appended
pub(crate) fn trim_base_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}
