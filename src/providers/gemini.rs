use async_trait::async_trait;
use log::{debug, warn};
use parking_lot::Mutex;
use reqwest::{header, Client, Response};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::app_config::{ProviderConfig, TranslationCommonConfig, TranslationProvider};
use crate::errors::ProviderError;
use crate::providers::{backoff_for, map_reqwest_error, trim_base_url, LlmClient};

const GENERATE_METHOD: &str = "generateContent";

/// Longest wait honoured from a Retry-After hint
const MAX_RETRY_WAIT: Duration = Duration::from_secs(600);

/// Adaptive pacing state for a remote API
///
/// `next_allowed` is the earliest instant the next request may start;
/// `extra` is added on top of the fixed minimum interval and grows on
/// transient failures, shrinking again on success.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThrottleState {
    pub next_allowed: Option<Instant>,
    pub extra: Duration,
}

impl ThrottleState {
    pub fn new() -> Self {
        Self::default()
    }

    /// How long to wait before a request may start at `now`
    pub fn wait_time(&self, now: Instant) -> Duration {
        self.next_allowed
            .map(|at| at.saturating_duration_since(now))
            .unwrap_or(Duration::ZERO)
    }

    /// Record a request starting at `now`
    pub fn mark_request(&mut self, now: Instant, min_interval: Duration) {
        self.next_allowed = Some(now + min_interval + self.extra);
    }

    /// Grow the extra delay by `step`, capped at `cap`
    pub fn bump(&mut self, step: Duration, cap: Duration) {
        self.extra = (self.extra + step).min(cap);
    }

    /// Shrink the extra delay by `step`
    pub fn decay(&mut self, step: Duration) {
        self.extra = self.extra.saturating_sub(step);
    }
}

/// Gemini client for the Generative Language API
#[derive(Debug, Clone)]
pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
    /// Configured model, empty to pick the first generateContent-capable one
    model: String,
    temperature: f32,
    max_output_tokens: u32,
    timeout: Duration,
    max_attempts: u32,
    backoff: Vec<Duration>,
    min_interval: Duration,
    throttle_step: Duration,
    max_extra_throttle: Duration,
    throttle: Arc<Mutex<ThrottleState>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelsResponse {
    #[serde(default)]
    models: Vec<ModelInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelInfo {
    name: String,
    #[serde(default)]
    supported_generation_methods: Vec<String>,
}

impl GeminiClient {
    /// Create a client with default settings
    pub fn new(api_key: impl Into<String>, endpoint: impl Into<String>) -> Result<Self, ProviderError> {
        let mut provider = ProviderConfig::new(TranslationProvider::Gemini);
        provider.api_key = api_key.into();
        let endpoint = endpoint.into();
        if !endpoint.is_empty() {
            provider.endpoint = endpoint;
        }
        Self::from_config(&provider, &TranslationCommonConfig::default())
    }

    /// Create a client from provider and common settings
    pub fn from_config(provider: &ProviderConfig, common: &TranslationCommonConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .build()
            .map_err(|e| ProviderError::RequestFailed(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key: provider.api_key.clone(),
            base_url: trim_base_url(&provider.endpoint),
            model: provider.model.trim().to_string(),
            temperature: common.temperature,
            max_output_tokens: provider.max_output_tokens,
            timeout: Duration::from_secs(provider.timeout_secs.max(1)),
            max_attempts: common.retry_count.max(1),
            backoff: common.backoff(),
            min_interval: Duration::from_millis(provider.min_interval_ms),
            throttle_step: Duration::from_millis(provider.throttle_step_ms),
            max_extra_throttle: Duration::from_millis(provider.max_extra_throttle_ms),
            throttle: Arc::new(Mutex::new(ThrottleState::new())),
        })
    }

    /// Override the backoff sequence
    pub fn with_backoff(mut self, backoff: Vec<Duration>) -> Self {
        self.backoff = backoff;
        self
    }

    fn model_path(model: &str) -> String {
        if model.starts_with("models/") {
            model.to_string()
        } else {
            format!("models/{}", model)
        }
    }

    fn request(&self, prompt: &str) -> GenerateContentRequest {
        GenerateContentRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part { text: Some(prompt.to_string()) }],
            }],
            generation_config: GenerationConfig {
                temperature: self.temperature,
                max_output_tokens: self.max_output_tokens,
            },
        }
    }

    /// Sleep until the throttle allows a request, then claim the slot
    async fn pace(&self) {
        let wait = self.throttle.lock().wait_time(Instant::now());
        if !wait.is_zero() {
            debug!("Gemini pacing: waiting {:?}", wait);
            tokio::time::sleep(wait).await;
        }
        self.throttle.lock().mark_request(Instant::now(), self.min_interval);
    }

    async fn send_once(&self, request: &GenerateContentRequest, model: &str) -> Result<String, ProviderError> {
        let url = format!("{}/v1beta/{}:{}", self.base_url, Self::model_path(model), GENERATE_METHOD);
        let response = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-goog-api-key", &self.api_key)
            .json(request)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let response = error_for_status(response).await?;
        let body: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))?;

        Ok(extract_text(&body))
    }
}

/// Concatenate the text parts of the first candidate
fn extract_text(response: &GenerateContentResponse) -> String {
    response
        .candidates
        .first()
        .and_then(|c| c.content.as_ref())
        .map(|content| {
            content
                .parts
                .iter()
                .filter_map(|p| p.text.as_deref())
                .collect::<String>()
        })
        .unwrap_or_default()
}

/// Map a non-success response to an API error carrying any Retry-After hint
async fn error_for_status(response: Response) -> Result<Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_retry_after);
    let message = response
        .text()
        .await
        .unwrap_or_else(|_| "Failed to get error response text".to_string());

    Err(ProviderError::ApiError {
        status_code: status.as_u16(),
        message,
        retry_after,
    })
}

/// Retry-After as seconds: either a number or an HTTP date
pub fn parse_retry_after(value: &str) -> Option<f64> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<f64>() {
        return (seconds.is_finite() && seconds >= 0.0).then_some(seconds);
    }

    let at = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    let delta = at.with_timezone(&chrono::Utc) - chrono::Utc::now();
    Some((delta.num_milliseconds().max(0) as f64) / 1000.0)
}

fn retry_after_of(error: &ProviderError) -> Option<Duration> {
    match error {
        ProviderError::ApiError { retry_after: Some(secs), .. } => Some(
            Duration::try_from_secs_f64(*secs)
                .map(|wait| wait.min(MAX_RETRY_WAIT))
                .unwrap_or(MAX_RETRY_WAIT),
        ),
        _ => None,
    }
}

#[async_trait]
impl LlmClient for GeminiClient {
    async fn resolve_model(&self) -> Result<String, ProviderError> {
        if !self.model.is_empty() {
            return Ok(Self::model_path(&self.model));
        }

        let url = format!("{}/v1beta/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let response = error_for_status(response).await?;
        let listing: ModelsResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))?;

        listing
            .models
            .into_iter()
            .find(|m| m.supported_generation_methods.iter().any(|g| g == GENERATE_METHOD))
            .map(|m| Self::model_path(&m.name))
            .ok_or_else(|| ProviderError::ModelUnavailable(format!("no model supports {}", GENERATE_METHOD)))
    }

    async fn generate(&self, prompt: &str, model: &str) -> Result<String, ProviderError> {
        let request = self.request(prompt);
        let attempts = self.max_attempts as usize;
        let mut last_error = None;

        for attempt in 0..attempts {
            self.pace().await;

            match self.send_once(&request, model).await {
                Ok(text) => {
                    self.throttle.lock().decay(self.throttle_step);
                    return Ok(text);
                }
                Err(e) if e.is_transient() => {
                    let extra = {
                        let mut throttle = self.throttle.lock();
                        throttle.bump(self.throttle_step, self.max_extra_throttle);
                        throttle.extra
                    };
                    if attempt + 1 >= attempts {
                        return Err(e);
                    }
                    let mut wait = backoff_for(&self.backoff, attempt);
                    if let Some(hint) = retry_after_of(&e) {
                        wait = wait.max(hint);
                    }
                    warn!(
                        "Gemini transient error ({}), retry {}/{} in {:?} (extra throttle {:?})",
                        e,
                        attempt + 1,
                        attempts,
                        wait,
                        extra
                    );
                    tokio::time::sleep(wait).await;
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| ProviderError::RequestFailed("no attempts were made".to_string())))
    }
}
