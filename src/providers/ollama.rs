use async_trait::async_trait;
use log::{debug, warn};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::app_config::{ProviderConfig, TranslationCommonConfig};
use crate::errors::ProviderError;
use crate::providers::{backoff_for, map_reqwest_error, trim_base_url, LlmClient};

/// Timeout multipliers per attempt; later attempts reuse the last one
const TIMEOUT_STEPS: [f64; 3] = [1.0, 1.5, 2.0];

/// Ollama client for a local host
///
/// Each attempt gets a longer timeout than the previous one. Only timeouts
/// and connection failures are retried, after a fixed backoff; any other
/// failure goes straight back to the caller.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    /// Base URL of the Ollama API
    base_url: String,
    /// HTTP client for making requests
    client: Client,
    /// Configured model, empty to use the first installed one
    model: String,
    temperature: f32,
    context_window: u32,
    max_output_tokens: u32,
    base_timeout: Duration,
    max_attempts: u32,
    backoff: Vec<Duration>,
}

/// Generate request for the Ollama API
#[derive(Debug, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Model name to use for generation
    model: String,
    /// Prompt to generate from
    prompt: String,
    /// Whether to stream the response
    stream: bool,
    /// Additional model parameters
    options: GenerationOptions,
}

/// Generation options for the Ollama API
#[derive(Debug, Serialize, Deserialize)]
pub struct GenerationOptions {
    temperature: f32,
    /// Context window size
    num_ctx: u32,
    /// Maximum number of tokens to generate
    num_predict: u32,
}

/// Generation response from the Ollama API
#[derive(Debug, Serialize, Deserialize)]
pub struct GenerationResponse {
    /// Generated text
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub done: bool,
}

/// Installed models listing
#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Debug, Deserialize)]
struct ModelTag {
    name: String,
}

impl OllamaClient {
    /// Create a client for `base_url` with default generation settings
    pub fn new(base_url: impl Into<String>) -> Result<Self, ProviderError> {
        Self::from_config(
            &ProviderConfig {
                endpoint: base_url.into(),
                ..ProviderConfig::new(crate::app_config::TranslationProvider::Ollama)
            },
            &TranslationCommonConfig::default(),
        )
    }

    /// Create a client from provider and common settings
    ///
    /// Uses HTTP/1.1 with keep-alive, which is what Ollama serves.
    pub fn from_config(provider: &ProviderConfig, common: &TranslationCommonConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .http1_only()
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .build()
            .map_err(|e| ProviderError::RequestFailed(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: trim_base_url(&provider.endpoint),
            client,
            model: provider.model.trim().to_string(),
            temperature: common.temperature,
            context_window: provider.context_window,
            max_output_tokens: provider.max_output_tokens,
            base_timeout: Duration::from_secs(provider.timeout_secs.max(1)),
            max_attempts: common.retry_count.max(1),
            backoff: common.backoff(),
        })
    }

    /// Override the base timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.base_timeout = timeout;
        self
    }

    /// Override the backoff sequence
    pub fn with_backoff(mut self, backoff: Vec<Duration>) -> Self {
        self.backoff = backoff;
        self
    }

    /// Per-attempt timeouts: base, 1.5x base, then 2x base for the rest
    pub fn attempt_timeouts(&self) -> Vec<Duration> {
        (0..self.max_attempts as usize)
            .map(|attempt| {
                let factor = TIMEOUT_STEPS[attempt.min(TIMEOUT_STEPS.len() - 1)];
                self.base_timeout.mul_f64(factor)
            })
            .collect()
    }

    fn request(&self, prompt: &str, model: &str) -> GenerationRequest {
        GenerationRequest {
            model: model.to_string(),
            prompt: prompt.to_string(),
            stream: false,
            options: GenerationOptions {
                temperature: self.temperature,
                num_ctx: self.context_window,
                num_predict: self.max_output_tokens,
            },
        }
    }

    async fn send_once(&self, request: &GenerationRequest, timeout: Duration) -> Result<String, ProviderError> {
        let url = format!("{}/api/generate", self.base_url);
        let response = self
            .client
            .post(&url)
            .timeout(timeout)
            .json(request)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to get error response text".to_string());
            return Err(ProviderError::ApiError {
                status_code: status.as_u16(),
                message,
                retry_after: None,
            });
        }

        let body = response.text().await.map_err(map_reqwest_error)?;
        let parsed: GenerationResponse = serde_json::from_str(&body).map_err(|e| {
            ProviderError::ParseError(format!(
                "{} (first 200 chars: {})",
                e,
                body.chars().take(200).collect::<String>()
            ))
        })?;
        Ok(parsed.response)
    }
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn resolve_model(&self) -> Result<String, ProviderError> {
        if !self.model.is_empty() {
            return Ok(self.model.clone());
        }

        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&url)
            .timeout(self.base_timeout)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        if !response.status().is_success() {
            return Err(ProviderError::ApiError {
                status_code: response.status().as_u16(),
                message: "model listing failed".to_string(),
                retry_after: None,
            });
        }
        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))?;

        tags.models
            .into_iter()
            .map(|m| m.name)
            .find(|name| !name.is_empty())
            .ok_or_else(|| ProviderError::ModelUnavailable("no models installed on the Ollama host".to_string()))
    }

    async fn generate(&self, prompt: &str, model: &str) -> Result<String, ProviderError> {
        let request = self.request(prompt, model);
        let timeouts = self.attempt_timeouts();
        let mut last_error = None;

        for (attempt, timeout) in timeouts.iter().enumerate() {
            debug!(
                "Ollama generate attempt {}/{} (timeout {:?})",
                attempt + 1,
                timeouts.len(),
                timeout
            );
            match self.send_once(&request, *timeout).await {
                Ok(text) => return Ok(text),
                Err(e @ (ProviderError::Timeout(_) | ProviderError::ConnectionError(_))) => {
                    if attempt + 1 < timeouts.len() {
                        let wait = backoff_for(&self.backoff, attempt);
                        warn!(
                            "Ollama request failed ({}), retrying in {:?} ({}/{})",
                            e,
                            wait,
                            attempt + 1,
                            timeouts.len()
                        );
                        tokio::time::sleep(wait).await;
                    }
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| ProviderError::RequestFailed("no attempts were made".to_string())))
    }
}
