/*!
 * End-to-end EPUB translation run.
 *
 * Chapters are processed strictly in spine order and batches strictly in
 * chapter order, one provider call at a time. For every segment the stores
 * are consulted before any call: the ledger, then the reuse cache, then the
 * translation memory. A cache entry recorded for an older version of the
 * same block is only reused when diff-aware mode is off. New translations
 * pass the language guard (with one forced retry), get the target
 * language's quotation marks, and are written through to all three stores
 * as soon as their batch completes, so an interrupted run loses at most one
 * batch.
 *
 * Chapters are scanned once up front to count and register segments, then
 * parsed again one at a time when their turn comes.
 */

use log::{debug, info, warn};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::app_config::Config;
use crate::database::memory::source_hash;
use crate::database::{
    DatabaseConnection, LedgerScope, LedgerStatus, MemoryRecord, SeedEntry, SegmentLedger, TranslationMemory,
};
use crate::document::entities::EntityStats;
use crate::document::markup::{fragment_plain_text, normalize_fragment};
use crate::document::{write_epub_atomic, ChapterDocument, EpubArchive, ExtractionRules, Segment};
use crate::errors::TranslationError;
use crate::file_utils::FileManager;
use crate::providers::LlmClient;
use crate::translation::batch::{build_batches, BatchLimits};
use crate::translation::cache::{CacheHit, ReuseCache};
use crate::translation::checkpoint::CheckpointRecord;
use crate::translation::context::ContextWindow;
use crate::translation::progress::ProgressReporter;
use crate::translation::prompts::PromptBuilder;
use crate::translation::quotes::{normalize_quotes, QuoteProfile};
use crate::translation::strategy::{BatchStrategy, StrategySettings};
use crate::validation::LanguageGuard;

/// Where a reused translation came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReuseSource {
    Ledger,
    Cache,
    Memory,
}

/// Counters of one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub segments_total: usize,
    pub reused_ledger: usize,
    pub reused_cache: usize,
    pub reused_memory: usize,
    pub translated: usize,
    /// Segments retranslated because their block changed since the cached translation
    pub changed: usize,
    /// Translations whose quotation marks were rewritten
    pub quotes_normalized: usize,
    pub provider_calls: usize,
    pub chapters_translated: usize,
    pub chapters_skipped: usize,
    /// Chapters taken as done from a checkpoint
    pub chapters_from_checkpoint: usize,
    pub resumed: bool,
    pub output_path: PathBuf,
}

impl RunSummary {
    pub fn reused(&self) -> usize {
        self.reused_ledger + self.reused_cache + self.reused_memory
    }

    fn count_reuse(&mut self, source: ReuseSource) {
        match source {
            ReuseSource::Ledger => self.reused_ledger += 1,
            ReuseSource::Cache => self.reused_cache += 1,
            ReuseSource::Memory => self.reused_memory += 1,
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Output: {}", self.output_path.display())?;
        writeln!(
            f,
            "Segments: {} total, {} translated, {} reused (ledger {}, cache {}, memory {})",
            self.segments_total,
            self.translated,
            self.reused(),
            self.reused_ledger,
            self.reused_cache,
            self.reused_memory
        )?;
        writeln!(
            f,
            "Changed since last run: {}, quotes normalized in {}",
            self.changed, self.quotes_normalized
        )?;
        writeln!(f, "Provider calls: {}", self.provider_calls)?;
        write!(
            f,
            "Chapters: {} translated, {} skipped, {} from checkpoint{}",
            self.chapters_translated,
            self.chapters_skipped,
            self.chapters_from_checkpoint,
            if self.resumed { " (resumed)" } else { "" }
        )
    }
}

/// Persistent reuse stores; each one is optional
#[derive(Debug, Default)]
pub struct StateStores {
    pub cache: Option<ReuseCache>,
    pub ledger: Option<SegmentLedger>,
    pub memory: Option<TranslationMemory>,
}

impl StateStores {
    /// No persistence at all
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Open the stores enabled in `config`
    pub async fn open(config: &Config) -> anyhow::Result<Self> {
        let storage = &config.storage;
        let cache = match &storage.cache_path {
            Some(path) => Some(ReuseCache::open(path)?),
            None => None,
        };

        if !storage.use_ledger && !storage.use_memory {
            return Ok(Self { cache, ledger: None, memory: None });
        }

        let db = DatabaseConnection::open(storage.database_path.as_deref())?;
        let ledger = if storage.use_ledger {
            let scope = LedgerScope::new(storage.project_id, storage.run_step.clone());
            let stale_after = Duration::from_secs(storage.stale_processing_secs);
            Some(SegmentLedger::open(db.clone(), scope, stale_after).await?)
        } else {
            None
        };
        let memory = storage.use_memory.then(|| {
            let common = &config.translation.common;
            TranslationMemory::new(db, common.tm_fuzzy_threshold, common.tm_filter_language_pair)
        });

        Ok(Self { cache, ledger, memory })
    }
}

/// A chapter read and parsed for translation
struct PreparedChapter {
    path: String,
    document: ChapterDocument,
    entities_before: EntityStats,
}

/// Translation pipeline over one client
pub struct TranslationPipeline<'a, C: LlmClient + ?Sized> {
    config: Config,
    client: &'a C,
    cache: Option<ReuseCache>,
    ledger: Option<SegmentLedger>,
    memory: Option<TranslationMemory>,
    guard: Option<LanguageGuard>,
    prompts: PromptBuilder,
    rules: ExtractionRules,
    context: ContextWindow,
    quotes: Option<QuoteProfile>,
    progress: ProgressReporter,
    last_summary: Option<RunSummary>,
}

impl<'a, C: LlmClient + ?Sized> TranslationPipeline<'a, C> {
    pub fn new(config: Config, client: &'a C, stores: StateStores) -> anyhow::Result<Self> {
        let prompts = PromptBuilder::new(
            config.translation.common.load_prompt()?,
            &config.source_language,
            &config.target_language,
        );
        let guard = if config.translation.common.language_guard {
            Some(LanguageGuard::from_file(
                &config.source_language,
                &config.target_language,
                config.validation.profiles_path.as_deref(),
            )?)
        } else {
            None
        };
        let rules = ExtractionRules::new(
            config.document.block_tags.as_slice(),
            config.document.excluded_ancestors.as_slice(),
        );
        let common = &config.translation.common;
        let context = ContextWindow::new(
            common.context_neighbors,
            common.context_neighbor_max_chars,
            common.context_segment_max_chars,
        );
        let quotes = common
            .quote_normalization
            .then(|| QuoteProfile::for_language(&config.target_language));

        Ok(Self {
            config,
            client,
            cache: stores.cache,
            ledger: stores.ledger,
            memory: stores.memory,
            guard,
            prompts,
            rules,
            context,
            quotes,
            progress: ProgressReporter::stdout(),
            last_summary: None,
        })
    }

    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = progress;
        self
    }

    pub fn cache(&self) -> Option<&ReuseCache> {
        self.cache.as_ref()
    }

    pub fn ledger(&self) -> Option<&SegmentLedger> {
        self.ledger.as_ref()
    }

    pub fn memory(&self) -> Option<&TranslationMemory> {
        self.memory.as_ref()
    }

    /// Counters of the latest run, also kept when it failed
    pub fn last_summary(&self) -> Option<&RunSummary> {
        self.last_summary.as_ref()
    }

    /// Translate the configured input into the configured output
    pub async fn run(&mut self) -> Result<RunSummary, TranslationError> {
        let mut summary = RunSummary {
            output_path: self.config.document.output_path.clone(),
            ..RunSummary::default()
        };
        let result = self.execute(&mut summary).await;
        self.last_summary = Some(summary.clone());
        result.map(|()| summary)
    }

    async fn execute(&mut self, summary: &mut RunSummary) -> Result<(), TranslationError> {
        let input = self.config.document.input_path.clone();
        let output = self.config.document.output_path.clone();
        let checkpoint_path = self.config.document.resolved_checkpoint_path();
        let wip_path = self.config.document.wip_path();

        let model = self.client.resolve_model().await?;
        info!("Translating {:?} -> {:?} with model {}", input, output, model);

        let (mut epub, source_path, mut checkpoint) = open_source(&input, &output, &wip_path, &checkpoint_path)?;
        summary.resumed = source_path != input;

        let chapter_paths = epub.content_documents();
        checkpoint.spine_total_files = chapter_paths.len();

        let mut pending_chapters = Vec::new();
        let mut entries: Vec<SeedEntry> = Vec::new();
        for path in &chapter_paths {
            if checkpoint.is_completed(path) {
                summary.chapters_from_checkpoint += 1;
                continue;
            }
            match prepare_chapter(&mut epub, path, &self.rules) {
                Ok(chapter) => {
                    summary.segments_total += chapter.document.segments.len();
                    entries.extend(chapter.document.segments.iter().map(|segment| SeedEntry {
                        segment_id: segment.id.clone(),
                        chapter_path: chapter.path.clone(),
                        source_hash: source_hash(&segment.inner),
                    }));
                    pending_chapters.push(chapter.path);
                }
                Err(e) => {
                    warn!("Skipping chapter {}: {}", path, e);
                    summary.chapters_skipped += 1;
                }
            }
        }
        self.progress.set_total(summary.segments_total);

        if let Some(ledger) = &self.ledger {
            if summary.resumed {
                // Completed chapters were read translated, so their ids are not in view
                ledger.ensure_pending_many(entries).await?;
            } else {
                ledger.seed_from_document(entries).await?;
            }
        }

        let limits = BatchLimits::new(
            self.config.translation.common.batch_max_chars,
            self.config.translation.common.batch_max_segments,
        );
        let checkpoint_every = self.config.document.checkpoint_every;
        let diff_aware = self.config.translation.common.diff_aware;
        let quotes = self.quotes;
        let mut strategy = BatchStrategy::new(
            self.client,
            model.clone(),
            &self.prompts,
            self.ledger.as_ref(),
            StrategySettings::from_config(&self.config),
        );
        let mut writer = RunWriter {
            cache: self.cache.as_mut(),
            ledger: self.ledger.as_ref(),
            memory: self.memory.as_ref(),
            provider: self.config.translation.provider.to_lowercase_string(),
            model: model.clone(),
            source_language: self.config.source_language.clone(),
            target_language: self.config.target_language.clone(),
        };

        let mut replacements: HashMap<String, Vec<u8>> = HashMap::new();
        let mut chapters_done = 0usize;

        for path in pending_chapters {
            let mut chapter = prepare_chapter(&mut epub, &path, &self.rules)?;
            let ledger_rows = match &self.ledger {
                Some(ledger) => ledger.load_chapter_states(&chapter.path).await?,
                None => HashMap::new(),
            };

            let mut translations: HashMap<String, String> = HashMap::new();
            let mut pending: Vec<Segment> = Vec::new();
            let mut reused = 0usize;

            for segment in &chapter.document.segments {
                let from_ledger = ledger_rows
                    .get(&segment.id)
                    .filter(|row| row.status == LedgerStatus::Completed)
                    .and_then(|row| row.translated_inner.clone())
                    .map(|t| (t, ReuseSource::Ledger));
                let mut candidate = from_ledger;
                if candidate.is_none() {
                    match writer.cache.as_deref().and_then(|cache| cache.lookup(&segment.id)) {
                        Some((_, CacheHit::Prefix)) if diff_aware => {
                            debug!("{} changed since its cached translation", segment.id);
                            summary.changed += 1;
                        }
                        Some((t, _)) => candidate = Some((t.to_string(), ReuseSource::Cache)),
                        None => {}
                    }
                }
                if candidate.is_none() {
                    if let Some(memory) = writer.memory {
                        candidate = memory
                            .lookup(&segment.inner, &writer.source_language, &writer.target_language)
                            .await?
                            .map(|hit| (hit.target_text, ReuseSource::Memory));
                    }
                }

                match candidate.filter(|(t, _)| reusable(t, self.guard.as_ref())) {
                    Some((translation, source)) => {
                        debug!("Reusing {} from {:?}", segment.id, source);
                        summary.count_reuse(source);
                        let translation = normalize_translation(translation, quotes, summary);
                        writer.persist(&chapter.path, segment, &translation).await?;
                        translations.insert(segment.id.clone(), translation);
                        reused += 1;
                    }
                    None => pending.push(segment.clone()),
                }
            }
            if reused > 0 {
                self.progress.advance(reused, &chapter.path, "reused");
            }
            self.context.attach_hints(&chapter.document.segments, &mut pending);

            let batches = build_batches(&pending, limits);
            let batch_count = batches.len();
            for (index, batch) in batches.into_iter().enumerate() {
                let outcome = strategy.translate(&chapter.path, &batch, false).await;
                summary.provider_calls = strategy.calls();
                let outcome = outcome?;
                let mut failures = outcome.failures;
                let mut accepted = normalize_all(outcome.translations, quotes, summary);

                if let Some(guard) = &self.guard {
                    let rejected: Vec<Segment> = batch
                        .iter()
                        .filter(|s| {
                            accepted
                                .get(&s.id)
                                .is_some_and(|t| !guard.looks_like_target(&fragment_plain_text(t)))
                        })
                        .cloned()
                        .collect();
                    if !rejected.is_empty() {
                        warn!(
                            "{}: {} segments still look like the source language, retrying with a forced instruction",
                            chapter.path,
                            rejected.len()
                        );
                        for segment in &rejected {
                            accepted.remove(&segment.id);
                        }
                        let forced = strategy.translate(&chapter.path, &rejected, true).await;
                        summary.provider_calls = strategy.calls();
                        let forced = forced?;
                        failures.extend(forced.failures);
                        let forced_translations = normalize_all(forced.translations, quotes, summary);
                        for segment in &rejected {
                            match forced_translations.get(&segment.id) {
                                Some(t) if guard.looks_like_target(&fragment_plain_text(t)) => {
                                    accepted.insert(segment.id.clone(), t.clone());
                                }
                                Some(_) => {
                                    if let Some(ledger) = writer.ledger {
                                        ledger
                                            .mark_error(&segment.id, &chapter.path, "output not in target language")
                                            .await?;
                                    }
                                    // Persist what passed before failing the run
                                    for s in batch.iter().filter(|s| accepted.contains_key(&s.id)) {
                                        writer.persist(&chapter.path, s, &accepted[&s.id]).await?;
                                    }
                                    return Err(TranslationError::LanguageGuard {
                                        segment_id: segment.id.clone(),
                                        target_language: guard.target_language().to_string(),
                                    });
                                }
                                None => {}
                            }
                        }
                    }
                }

                for segment in batch.iter().filter(|s| accepted.contains_key(&s.id)) {
                    writer.persist(&chapter.path, segment, &accepted[&segment.id]).await?;
                }
                summary.translated += accepted.len();
                self.progress.advance(
                    accepted.len(),
                    &chapter.path,
                    &format!("batch {}/{}", index + 1, batch_count),
                );

                if let Some((segment_id, reason)) = failures.into_iter().next() {
                    return Err(TranslationError::SegmentFailed { segment_id, reason });
                }
                translations.extend(accepted);
            }

            for segment in &chapter.document.segments.clone() {
                if let Some(translation) = translations.get(&segment.id) {
                    chapter.document.apply(segment, translation)?;
                }
            }
            let bytes = chapter.document.to_bytes()?;
            report_entity_drift(&chapter.path, chapter.entities_before, &bytes);

            replacements.insert(chapter.path.clone(), bytes);
            checkpoint.mark_completed(&chapter.path);
            checkpoint.processed_files = checkpoint.completed_chapters.len();
            summary.chapters_translated += 1;
            chapters_done += 1;
            info!("Chapter {} done ({} segments)", chapter.path, chapter.document.segments.len());

            if checkpoint_every > 0 && chapters_done % checkpoint_every == 0 {
                write_epub_atomic(&source_path, &wip_path, &replacements, None)?;
                checkpoint.save(&checkpoint_path)?;
            }
        }

        drop(epub);
        write_epub_atomic(&source_path, &output, &replacements, Some(self.config.document.backup_keep))?;
        FileManager::remove_if_exists(&checkpoint_path)?;
        FileManager::remove_if_exists(&wip_path)?;

        info!(
            "Finished {:?}: {} translated, {} reused, {} changed, {} provider calls",
            output,
            summary.translated,
            summary.reused(),
            summary.changed,
            summary.provider_calls
        );
        if let Some(ledger) = &self.ledger {
            let counts = ledger.scope_counts().await?;
            info!(
                "Ledger scope: {} completed, {} pending, {} processing, {} errors",
                counts.completed, counts.pending, counts.processing, counts.error
            );
        }
        Ok(())
    }
}

/// Apply the target language's quotation marks, counting changed translations
fn normalize_translation(translation: String, quotes: Option<QuoteProfile>, summary: &mut RunSummary) -> String {
    let Some(profile) = quotes else {
        return translation;
    };
    let normalized = normalize_quotes(&translation, profile);
    if normalized.replacements() == 0 {
        return translation;
    }
    summary.quotes_normalized += 1;
    normalized.text
}

fn normalize_all(
    translations: HashMap<String, String>,
    quotes: Option<QuoteProfile>,
    summary: &mut RunSummary,
) -> HashMap<String, String> {
    translations
        .into_iter()
        .map(|(id, t)| (id, normalize_translation(t, quotes, summary)))
        .collect()
}

/// Write-through target for accepted translations
struct RunWriter<'s> {
    cache: Option<&'s mut ReuseCache>,
    ledger: Option<&'s SegmentLedger>,
    memory: Option<&'s TranslationMemory>,
    provider: String,
    model: String,
    source_language: String,
    target_language: String,
}

impl RunWriter<'_> {
    async fn persist(&mut self, chapter: &str, segment: &Segment, translation: &str) -> Result<(), TranslationError> {
        if let Some(cache) = self.cache.as_deref_mut() {
            cache.insert(&segment.id, translation)?;
        }
        if let Some(ledger) = self.ledger {
            ledger
                .mark_completed(&segment.id, chapter, translation, &self.provider, &self.model)
                .await?;
        }
        if let Some(memory) = self.memory {
            memory
                .add(MemoryRecord {
                    source_text: segment.inner.clone(),
                    target_text: translation.to_string(),
                    source_lang: self.source_language.clone(),
                    target_lang: self.target_language.clone(),
                    score: 1.0,
                })
                .await?;
        }
        Ok(())
    }
}

/// Open the input, or the partial snapshot of a matching checkpoint
fn open_source(
    input: &Path,
    output: &Path,
    wip: &Path,
    checkpoint_path: &Path,
) -> Result<(EpubArchive, PathBuf, CheckpointRecord), TranslationError> {
    if let Some(record) = CheckpointRecord::load(checkpoint_path) {
        if record.matches(input, output) {
            match EpubArchive::open(&record.wip_epub) {
                Ok(epub) => {
                    info!(
                        "Resuming from {:?}: {} chapters already complete",
                        record.wip_epub,
                        record.completed_chapters.len()
                    );
                    let source = record.wip_epub.clone();
                    return Ok((epub, source, record));
                }
                Err(e) => warn!("Ignoring unreadable snapshot {:?}: {}", record.wip_epub, e),
            }
        } else {
            info!("Checkpoint {:?} belongs to another run, starting fresh", checkpoint_path);
        }
    }

    let epub = EpubArchive::open(input)?;
    Ok((epub, input.to_path_buf(), CheckpointRecord::new(input, output, wip, 0)))
}

fn prepare_chapter(
    epub: &mut EpubArchive,
    path: &str,
    rules: &ExtractionRules,
) -> Result<PreparedChapter, TranslationError> {
    let bytes = epub.read_entry(path)?;
    let entities_before = EntityStats::collect(&String::from_utf8_lossy(&bytes));
    let document = ChapterDocument::parse(path, &bytes, rules)?;
    Ok(PreparedChapter { path: path.to_string(), document, entities_before })
}

/// Whether a stored translation may be applied as is
fn reusable(translation: &str, guard: Option<&LanguageGuard>) -> bool {
    if translation.trim().is_empty() || normalize_fragment(translation).is_err() {
        return false;
    }
    guard.is_none_or(|g| g.looks_like_target(&fragment_plain_text(translation)))
}

fn report_entity_drift(chapter: &str, before: EntityStats, after_bytes: &[u8]) {
    let after = EntityStats::collect(&String::from_utf8_lossy(after_bytes));
    if after.soft_hyphens != before.soft_hyphens {
        warn!(
            "{}: soft hyphen count changed from {} to {}",
            chapter, before.soft_hyphens, after.soft_hyphens
        );
    }
    if after.non_breaking_spaces != before.non_breaking_spaces {
        warn!(
            "{}: no-break space count changed from {} to {}",
            chapter, before.non_breaking_spaces, after.non_breaking_spaces
        );
    }
}
