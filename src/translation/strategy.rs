/*!
 * Batch-then-split-then-per-segment translation.
 *
 * Work is an explicit stack of `(segments, depth)` items processed in
 * document order. A failed batch is either bisected (remote policy, on an
 * oversized payload or a transient error while depth remains) or broken
 * into single-segment items. Segments missing from a parsed response are
 * retried one by one. Single segments are retried on transient failures up
 * to the configured attempt count; after that they are reported as failed.
 */

use log::{debug, warn};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::app_config::{Config, TranslationProvider};
use crate::database::SegmentLedger;
use crate::document::segments::safe_chapter_path;
use crate::document::Segment;
use crate::errors::TranslationError;
use crate::providers::LlmClient;
use crate::translation::prompts::PromptBuilder;
use crate::translation::response::parse_batch_response;

/// How a failed batch is recovered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderPolicy {
    /// Low-latency host: fall back to per-segment calls at once
    Local,
    /// Rate-limited API: bisect before falling back
    Remote,
}

impl ProviderPolicy {
    pub fn for_provider(provider: TranslationProvider) -> Self {
        if provider.is_remote() {
            Self::Remote
        } else {
            Self::Local
        }
    }
}

/// Strategy tuning
#[derive(Debug, Clone)]
pub struct StrategySettings {
    pub policy: ProviderPolicy,
    pub max_split_depth: usize,
    /// Attempts per single segment
    pub segment_attempts: usize,
    /// Minimum spacing between provider calls
    pub request_interval: Duration,
    pub debug_dir: Option<PathBuf>,
    /// Provider name recorded in the ledger
    pub provider_name: String,
}

impl StrategySettings {
    pub fn from_config(config: &Config) -> Self {
        let common = &config.translation.common;
        Self {
            policy: ProviderPolicy::for_provider(config.translation.provider),
            max_split_depth: common.max_split_depth,
            segment_attempts: (common.retry_count as usize).max(1),
            request_interval: Duration::from_millis(common.request_interval_ms),
            debug_dir: config.document.debug_dir.clone(),
            provider_name: config.translation.provider.to_lowercase_string(),
        }
    }
}

/// Result of translating one batch
#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// Segment id to translated inner markup
    pub translations: HashMap<String, String>,
    /// Segments that failed every fallback, with the last reason
    pub failures: Vec<(String, String)>,
}

impl BatchOutcome {
    /// First failure as a pipeline error
    pub fn into_result(self) -> Result<HashMap<String, String>, TranslationError> {
        match self.failures.into_iter().next() {
            Some((segment_id, reason)) => Err(TranslationError::SegmentFailed { segment_id, reason }),
            None => Ok(self.translations),
        }
    }
}

struct WorkItem {
    segments: Vec<Segment>,
    depth: usize,
    attempt: usize,
}

/// Drives one client through the fallback chain
pub struct BatchStrategy<'a, C: LlmClient + ?Sized> {
    client: &'a C,
    model: String,
    prompts: &'a PromptBuilder,
    ledger: Option<&'a SegmentLedger>,
    settings: StrategySettings,
    calls: usize,
    dumps: usize,
    last_call: Option<Instant>,
}

impl<'a, C: LlmClient + ?Sized> BatchStrategy<'a, C> {
    pub fn new(
        client: &'a C,
        model: impl Into<String>,
        prompts: &'a PromptBuilder,
        ledger: Option<&'a SegmentLedger>,
        settings: StrategySettings,
    ) -> Self {
        Self {
            client,
            model: model.into(),
            prompts,
            ledger,
            settings,
            calls: 0,
            dumps: 0,
            last_call: None,
        }
    }

    /// Provider calls issued so far
    pub fn calls(&self) -> usize {
        self.calls
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Translate `batch`; `forced` uses the amplified language instruction
    ///
    /// Only ledger failures are returned as errors; untranslatable segments
    /// are listed in the outcome.
    pub async fn translate(
        &mut self,
        chapter: &str,
        batch: &[Segment],
        forced: bool,
    ) -> Result<BatchOutcome, TranslationError> {
        let mut outcome = BatchOutcome::default();
        let mut stack = vec![WorkItem { segments: batch.to_vec(), depth: 0, attempt: 0 }];

        while let Some(item) = stack.pop() {
            if item.segments.is_empty() {
                continue;
            }

            if let Some(ledger) = self.ledger {
                for segment in &item.segments {
                    ledger
                        .mark_processing(&segment.id, chapter, &self.settings.provider_name, &self.model)
                        .await?;
                }
            }

            match self.call(chapter, &item.segments, forced).await {
                Ok(mut mapping) => {
                    let lone_id = (item.segments.len() == 1).then(|| item.segments[0].id.clone());
                    if let Some(id) = lone_id.filter(|id| mapping.len() == 1 && !mapping.contains_key(id)) {
                        // A lone segment answered under a mangled id is still its answer
                        let only = mapping.drain().map(|(_, v)| v).next().unwrap_or_default();
                        mapping.insert(id, only);
                    }

                    let mut missing = Vec::new();
                    for segment in item.segments {
                        match mapping.remove(&segment.id) {
                            Some(translation) => {
                                outcome.translations.insert(segment.id, translation);
                            }
                            None => missing.push(segment),
                        }
                    }
                    if missing.is_empty() {
                        continue;
                    }

                    debug!(
                        "{}: {} segments missing from response, retrying individually",
                        chapter,
                        missing.len()
                    );
                    let lone = missing.len() == 1;
                    for segment in missing.into_iter().rev() {
                        let attempt = if lone { item.attempt + 1 } else { 0 };
                        let retry = WorkItem { segments: vec![segment], depth: item.depth, attempt };
                        self.requeue_single(&mut stack, &mut outcome, chapter, retry, "segment missing from response")
                            .await?;
                    }
                }
                Err(error) => {
                    let reason = error.to_string();
                    if let Some(ledger) = self.ledger {
                        for segment in &item.segments {
                            ledger.mark_error(&segment.id, chapter, &reason).await?;
                        }
                    }

                    if item.segments.len() == 1 {
                        let segment = item.segments.into_iter().next();
                        if let Some(segment) = segment {
                            if error.is_transient() {
                                let retry = WorkItem { segments: vec![segment], depth: item.depth, attempt: item.attempt + 1 };
                                self.requeue_single(&mut stack, &mut outcome, chapter, retry, &reason).await?;
                            } else {
                                warn!("{}: segment {} failed: {}", chapter, segment.id, reason);
                                outcome.failures.push((segment.id, reason));
                            }
                        }
                        continue;
                    }

                    if self.should_bisect(&error, item.depth) {
                        let mut left = item.segments;
                        let right = left.split_off(left.len() / 2);
                        warn!(
                            "{}: batch of {} failed at depth {} ({}), splitting",
                            chapter,
                            left.len() + right.len(),
                            item.depth,
                            reason
                        );
                        stack.push(WorkItem { segments: right, depth: item.depth + 1, attempt: 0 });
                        stack.push(WorkItem { segments: left, depth: item.depth + 1, attempt: 0 });
                    } else {
                        warn!(
                            "{}: batch of {} failed ({}), falling back to per-segment calls",
                            chapter,
                            item.segments.len(),
                            reason
                        );
                        for segment in item.segments.into_iter().rev() {
                            stack.push(WorkItem { segments: vec![segment], depth: item.depth, attempt: 0 });
                        }
                    }
                }
            }
        }

        Ok(outcome)
    }

    fn should_bisect(&self, error: &TranslationError, depth: usize) -> bool {
        match self.settings.policy {
            ProviderPolicy::Local => false,
            ProviderPolicy::Remote => {
                error.is_payload_too_large() || (error.is_transient() && depth < self.settings.max_split_depth)
            }
        }
    }

    /// Queue a single-segment item again, or record it as failed once attempts run out
    async fn requeue_single(
        &self,
        stack: &mut Vec<WorkItem>,
        outcome: &mut BatchOutcome,
        chapter: &str,
        item: WorkItem,
        reason: &str,
    ) -> Result<(), TranslationError> {
        if item.attempt < self.settings.segment_attempts {
            stack.push(item);
            return Ok(());
        }
        for segment in item.segments {
            warn!("{}: segment {} failed after {} attempts: {}", chapter, segment.id, item.attempt, reason);
            if let Some(ledger) = self.ledger {
                ledger.mark_error(&segment.id, chapter, reason).await?;
            }
            outcome.failures.push((segment.id, reason.to_string()));
        }
        Ok(())
    }

    async fn call(
        &mut self,
        chapter: &str,
        segments: &[Segment],
        forced: bool,
    ) -> Result<HashMap<String, String>, TranslationError> {
        self.pace().await;

        let prompt = if forced {
            self.prompts.build_forced(segments)
        } else {
            self.prompts.build(segments)
        };
        self.calls += 1;
        debug!("{}: provider call #{} with {} segments", chapter, self.calls, segments.len());

        let raw = match self.client.generate(&prompt, &self.model).await {
            Ok(raw) => raw,
            Err(e) => {
                self.dump(chapter, &prompt, &format!("ERROR: {}", e));
                return Err(e.into());
            }
        };
        parse_batch_response(&raw).inspect_err(|_| self.dump(chapter, &prompt, &raw))
    }

    async fn pace(&mut self) {
        if let Some(last) = self.last_call {
            let elapsed = last.elapsed();
            if elapsed < self.settings.request_interval {
                tokio::time::sleep(self.settings.request_interval - elapsed).await;
            }
        }
        self.last_call = Some(Instant::now());
    }

    fn dump(&mut self, chapter: &str, prompt: &str, response: &str) {
        let Some(dir) = self.settings.debug_dir.clone() else {
            return;
        };
        self.dumps += 1;
        let prefix = safe_chapter_path(chapter).replace(['/', '.'], "_");
        if let Err(e) = write_dump(&dir, &format!("{}_{}", prefix, self.dumps), prompt, response) {
            warn!("Failed to write debug dump to {:?}: {}", dir, e);
        }
    }
}

fn write_dump(dir: &Path, stem: &str, prompt: &str, response: &str) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    std::fs::write(dir.join(format!("{}_prompt.txt", stem)), prompt)?;
    std::fs::write(dir.join(format!("{}_response.txt", stem)), response)?;
    Ok(())
}
