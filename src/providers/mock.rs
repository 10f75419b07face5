/*!
 * Scripted LLM client for tests and dry runs.
 *
 * By default the client "translates" every `<seg>` of the last batch in the
 * prompt by prefixing its inner markup. Scripted replies are consumed first,
 * one per request:
 * - `MockReply::Translate` - answer the batch as usual
 * - `MockReply::Raw(text)` - return `text` verbatim (malformed output, partial batches)
 * - `MockReply::Fail(error)` - fail the request
 */

use async_trait::async_trait;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::errors::ProviderError;
use crate::providers::LlmClient;

/// Prefix whose letters pass the Polish language guard
pub const DEFAULT_PREFIX: &str = "Przekład: ";

static SEG_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?s)<seg\s+id="([^"]+)"\s*>(.*?)</seg>"#).unwrap());

/// One scripted reply
#[derive(Debug, Clone)]
pub enum MockReply {
    Translate,
    Raw(String),
    Fail(ProviderError),
}

/// Mock client for testing the translation pipeline
#[derive(Debug, Clone)]
pub struct MockClient {
    model: String,
    prefix: String,
    script: Arc<Mutex<VecDeque<MockReply>>>,
    /// Successful requests allowed before every request fails
    fail_after: Option<usize>,
    request_count: Arc<AtomicUsize>,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl Default for MockClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockClient {
    /// A client that translates everything
    pub fn new() -> Self {
        Self {
            model: "mock-model".to_string(),
            prefix: DEFAULT_PREFIX.to_string(),
            script: Arc::new(Mutex::new(VecDeque::new())),
            fail_after: None,
            request_count: Arc::new(AtomicUsize::new(0)),
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A client whose replies are taken from `replies` before the default behaviour
    pub fn scripted(replies: impl IntoIterator<Item = MockReply>) -> Self {
        let client = Self::new();
        client.script.lock().extend(replies);
        client
    }

    /// A client that translates `n` requests and fails every one after that
    pub fn failing_after(n: usize) -> Self {
        Self {
            fail_after: Some(n),
            ..Self::new()
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Queue more replies
    pub fn push_reply(&self, reply: MockReply) {
        self.script.lock().push_back(reply);
    }

    /// Number of `generate` calls so far
    pub fn request_count(&self) -> usize {
        self.request_count.load(Ordering::SeqCst)
    }

    /// Every prompt received, in order
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }

    /// Answer the last `<batch>` of `prompt` with every segment prefixed
    pub fn translate_batch(&self, prompt: &str) -> String {
        let batch = prompt.rfind("<batch").map(|pos| &prompt[pos..]).unwrap_or(prompt);
        let mut out = String::from("<batch>");
        for caps in SEG_REGEX.captures_iter(batch) {
            out.push_str(&format!("<seg id=\"{}\">{}{}</seg>", &caps[1], self.prefix, &caps[2]));
        }
        out.push_str("</batch>");
        out
    }
}

#[async_trait]
impl LlmClient for MockClient {
    async fn resolve_model(&self) -> Result<String, ProviderError> {
        Ok(self.model.clone())
    }

    async fn generate(&self, prompt: &str, _model: &str) -> Result<String, ProviderError> {
        let count = self.request_count.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().push(prompt.to_string());

        if let Some(limit) = self.fail_after {
            if count >= limit {
                return Err(ProviderError::ConnectionError(format!(
                    "mock connection refused after {} requests",
                    limit
                )));
            }
        }

        let reply = self.script.lock().pop_front().unwrap_or(MockReply::Translate);
        match reply {
            MockReply::Translate => Ok(self.translate_batch(prompt)),
            MockReply::Raw(text) => Ok(text),
            MockReply::Fail(error) => Err(error),
        }
    }
}
