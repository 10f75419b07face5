/*!
 * End-to-end translation runs against the scripted mock client
 */

use anyhow::Result;
use std::path::{Path, PathBuf};

use crate::common::{self, run_pipeline, test_config, xhtml, EpubBuilder};
use epubtrans::database::LedgerStatus;
use epubtrans::document::{ChapterDocument, ExtractionRules};
use epubtrans::providers::{MockClient, MockReply};
use epubtrans::translation::{ProgressReporter, RunSummary, StateStores, TranslationPipeline};
use epubtrans::validation::{DocumentValidator, Verdict};
use epubtrans::TranslationError;

const STORED: &str = "The old lighthouse keeper climbed the stairs every evening to light the lamp.";
const EDITED: &str = "The old lighthouse keeper still climbed the stairs every evening to light the lamp.";

fn chapter_one() -> String {
    xhtml(
        "Chapter One",
        "<h1>Chapter One</h1>\
         <p>It was a <em>cold</em> morning in <b>early <i>March</i></b>.</p>\
         <p>Nobody answered the door.</p>",
    )
}

fn chapter_two() -> String {
    xhtml(
        "Chapter Two",
        "<h1>Chapter Two</h1><p>The train left at noon.</p><script>var x = \"keep me\";</script>",
    )
}

fn two_chapter_book(dir: &Path) -> Result<PathBuf> {
    EpubBuilder::new()
        .chapter("ch1.xhtml", chapter_one())
        .chapter("ch2.xhtml", chapter_two())
        .build(&dir.join("book.epub"))
}

fn segment_ids(chapter_path: &str, document: &str) -> Result<Vec<String>> {
    let rules = ExtractionRules::new(&["p", "h1"], &["head", "script"]);
    let chapter = ChapterDocument::parse(chapter_path, document.as_bytes(), &rules)?;
    Ok(chapter.segments.into_iter().map(|s| s.id).collect())
}

/// Test that a full run translates every segment and leaves the rest untouched
#[tokio::test]
async fn test_run_shouldTranslateEveryChapterAndKeepOtherEntries() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let input = two_chapter_book(temp_dir.path())?;
    let output = temp_dir.path().join("book.pl.epub");
    let config = test_config(temp_dir.path(), &input, &output);
    let client = MockClient::new();

    let summary = run_pipeline(&config, &client).await?;

    assert_eq!(summary.segments_total, 5);
    assert_eq!(summary.translated, 5);
    assert_eq!(summary.chapters_translated, 2);
    assert_eq!(summary.provider_calls, 2);
    assert_eq!(client.request_count(), 2);
    assert!(!summary.resumed);

    let ch1 = common::read_entry_string(&output, "OEBPS/ch1.xhtml")?;
    assert!(ch1.contains("<h1>Przekład: Chapter One</h1>"));
    assert!(ch1.contains("<p>Przekład: It was a <em>cold</em> morning in <b>early <i>March</i></b>.</p>"));
    assert!(ch1.contains("<title>Chapter One</title>"));
    let ch2 = common::read_entry_string(&output, "OEBPS/ch2.xhtml")?;
    assert!(ch2.contains("<script>var x = \"keep me\";</script>"));

    let before = common::read_entries(&input)?;
    let after = common::read_entries(&output)?;
    for name in ["mimetype", "META-INF/container.xml", "OEBPS/content.opf", "OEBPS/style.css"] {
        assert_eq!(before[name], after[name], "{} changed", name);
    }

    assert!(!config.document.resolved_checkpoint_path().exists());
    assert!(!config.document.wip_path().exists());
    Ok(())
}

/// Test that a second run with cache and ledger makes no calls and writes the same book
#[tokio::test]
async fn test_run_twiceWithStores_shouldBeIdempotent() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let input = two_chapter_book(temp_dir.path())?;
    let output = temp_dir.path().join("book.pl.epub");
    let mut config = test_config(temp_dir.path(), &input, &output);
    config.storage.cache_path = Some(temp_dir.path().join("cache.jsonl"));
    config.storage.use_ledger = true;

    let first = run_pipeline(&config, &MockClient::new()).await?;
    assert_eq!(first.translated, 5);
    let first_output = common::read_entries(&output)?;

    let client = MockClient::new();
    let second = run_pipeline(&config, &client).await?;

    assert_eq!(client.request_count(), 0);
    assert_eq!(second.translated, 0);
    assert_eq!(second.reused(), 5);
    assert_eq!(second.reused_ledger, 5);
    assert_eq!(common::read_entries(&output)?, first_output);
    Ok(())
}

/// Test that the reuse cache alone is enough to skip the provider
#[tokio::test]
async fn test_run_withCacheOnly_shouldReuseFromCache() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let input = two_chapter_book(temp_dir.path())?;
    let output = temp_dir.path().join("book.pl.epub");
    let mut config = test_config(temp_dir.path(), &input, &output);
    config.storage.cache_path = Some(temp_dir.path().join("cache.jsonl"));

    run_pipeline(&config, &MockClient::new()).await?;
    let client = MockClient::new();
    let second = run_pipeline(&config, &client).await?;

    assert_eq!(client.request_count(), 0);
    assert_eq!(second.reused_cache, 5);
    Ok(())
}

/// Test that a malformed reply is retried per segment and recorded in the ledger
#[tokio::test]
async fn test_run_withMalformedThenValid_shouldCompleteAndCountAttempts() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let input = EpubBuilder::new()
        .chapter("ch1.xhtml", chapter_one())
        .build(&temp_dir.path().join("book.epub"))?;
    let output = temp_dir.path().join("book.pl.epub");
    let mut config = test_config(temp_dir.path(), &input, &output);
    config.storage.use_ledger = true;

    let client = MockClient::scripted([MockReply::Raw("Sorry, I cannot help with that.".to_string())]);
    let stores = StateStores::open(&config).await?;
    let mut pipeline = TranslationPipeline::new(config.clone(), &client, stores)?.with_progress(ProgressReporter::silent());
    let summary = pipeline.run().await?;

    assert_eq!(summary.translated, 3);
    // One malformed batch call, then one call per segment
    assert_eq!(client.request_count(), 4);

    let ledger = pipeline.ledger().expect("ledger enabled");
    for id in segment_ids("OEBPS/ch1.xhtml", &chapter_one())? {
        let row = ledger.get(&id).await?.expect("row seeded");
        assert_eq!(row.status, LedgerStatus::Completed, "{}", id);
        assert!(row.attempt_count >= 2, "{} has {} attempts", id, row.attempt_count);
        assert!(row.translated_inner.unwrap_or_default().starts_with("Przekład: "));
    }
    let counts = ledger.scope_counts().await?;
    assert_eq!(counts.completed, 3);
    assert_eq!(counts.error, 0);
    Ok(())
}

/// Test that an edited sentence reuses the stored translation of its near twin
#[tokio::test]
async fn test_run_withEditedSentence_shouldReuseFromMemory() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let first_input = EpubBuilder::new()
        .chapter("ch1.xhtml", xhtml("One", &format!("<p>{}</p>", STORED)))
        .build(&temp_dir.path().join("first.epub"))?;
    let mut config = test_config(temp_dir.path(), &first_input, &temp_dir.path().join("first.pl.epub"));
    config.storage.use_memory = true;
    run_pipeline(&config, &MockClient::new()).await?;

    let second_input = EpubBuilder::new()
        .chapter(
            "ch1.xhtml",
            xhtml("One", &format!("<p>{}</p><p>A completely different line.</p>", EDITED)),
        )
        .build(&temp_dir.path().join("second.epub"))?;
    let second_output = temp_dir.path().join("second.pl.epub");
    config.document.input_path = second_input;
    config.document.output_path = second_output.clone();

    let client = MockClient::new();
    let summary = run_pipeline(&config, &client).await?;

    assert_eq!(summary.reused_memory, 1);
    assert_eq!(summary.translated, 1);
    assert_eq!(client.request_count(), 1);
    assert!(!client.prompts()[0].contains("still climbed"));

    let chapter = common::read_entry_string(&second_output, "OEBPS/ch1.xhtml")?;
    assert!(chapter.contains(&format!("<p>Przekład: {}</p>", STORED)));
    Ok(())
}

/// Test that output stuck in the source language fails the run after one forced retry
#[tokio::test]
async fn test_run_withUntranslatedOutput_shouldFailLanguageGuard() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let input = EpubBuilder::new()
        .chapter(
            "ch1.xhtml",
            xhtml(
                "One",
                "<p>It was the best of times and the worst of times, and they had everything before them.</p>",
            ),
        )
        .build(&temp_dir.path().join("book.epub"))?;
    let output = temp_dir.path().join("book.pl.epub");
    let config = test_config(temp_dir.path(), &input, &output);
    let client = MockClient::new().with_prefix("");

    let stores = StateStores::open(&config).await?;
    let mut pipeline = TranslationPipeline::new(config.clone(), &client, stores)?.with_progress(ProgressReporter::silent());
    let error = pipeline.run().await.unwrap_err();

    assert!(matches!(error, TranslationError::LanguageGuard { ref target_language, .. } if target_language == "pl"));
    assert_eq!(client.request_count(), 2);
    let summary = pipeline.last_summary().expect("summary kept after failure");
    assert_eq!(summary.provider_calls, 2);
    assert_eq!(summary.translated, 0);
    assert!(client.prompts()[1].contains("CRITICAL"));
    assert!(!output.exists());
    Ok(())
}

/// Test that a chapter that cannot be parsed is skipped and copied unchanged
#[tokio::test]
async fn test_run_withUnparseableChapter_shouldSkipIt() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let broken: Vec<u8> = b"<html><body><p>Hi<!-- never closed".to_vec();
    let input = EpubBuilder::new()
        .chapter("ch1.xhtml", chapter_one())
        .missing_chapter("ch2.xhtml")
        .entry("OEBPS/ch2.xhtml", broken.clone(), false)
        .build(&temp_dir.path().join("book.epub"))?;
    let output = temp_dir.path().join("book.pl.epub");
    let config = test_config(temp_dir.path(), &input, &output);

    let summary = run_pipeline(&config, &MockClient::new()).await?;

    assert_eq!(summary.chapters_skipped, 1);
    assert_eq!(summary.chapters_translated, 1);
    assert_eq!(common::read_entries(&output)?["OEBPS/ch2.xhtml"], broken);
    Ok(())
}

/// Test that a bare ampersand in a reply is escaped and the book still validates
#[tokio::test]
async fn test_run_withBareAmpersandInReply_shouldWriteWellFormedChapter() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let document = xhtml("One", "<p>Tom and Jerry came home together late in the evening.</p>");
    let input = EpubBuilder::new()
        .chapter("ch1.xhtml", document.clone())
        .build(&temp_dir.path().join("book.epub"))?;
    let output = temp_dir.path().join("book.pl.epub");
    let config = test_config(temp_dir.path(), &input, &output);
    let id = segment_ids("OEBPS/ch1.xhtml", &document)?.remove(0);
    let client = MockClient::scripted([MockReply::Raw(format!(
        "<batch><seg id=\"{}\">Tom & Jerry wrócili razem do domu późnym wieczorem.</seg></batch>",
        id
    ))]);

    let summary = run_pipeline(&config, &client).await?;

    assert_eq!(summary.translated, 1);
    let chapter = common::read_entry_string(&output, "OEBPS/ch1.xhtml")?;
    assert!(chapter.contains("<p>Tom &amp; Jerry wrócili razem do domu późnym wieczorem.</p>"));
    let report = DocumentValidator::from_config(&config)?.validate(&output);
    assert_eq!(report.verdict, Verdict::Pass, "{}", report);
    Ok(())
}

/// Runs a book whose only paragraph changed since the cached run
async fn rerun_after_edit(diff_aware: bool) -> Result<(RunSummary, usize, String)> {
    let temp_dir = common::create_temp_dir()?;
    let first = EpubBuilder::new()
        .chapter("ch1.xhtml", xhtml("One", &format!("<p>{}</p>", STORED)))
        .build(&temp_dir.path().join("first.epub"))?;
    let mut config = test_config(temp_dir.path(), &first, &temp_dir.path().join("first.pl.epub"));
    config.storage.cache_path = Some(temp_dir.path().join("cache.jsonl"));
    config.translation.common.diff_aware = diff_aware;
    run_pipeline(&config, &MockClient::new()).await?;

    let second = EpubBuilder::new()
        .chapter("ch1.xhtml", xhtml("One", &format!("<p>{}</p>", EDITED)))
        .build(&temp_dir.path().join("second.epub"))?;
    let second_output = temp_dir.path().join("second.pl.epub");
    config.document.input_path = second;
    config.document.output_path = second_output.clone();

    let client = MockClient::new().with_prefix("Nowość: ");
    let summary = run_pipeline(&config, &client).await?;
    let chapter = common::read_entry_string(&second_output, "OEBPS/ch1.xhtml")?;
    Ok((summary, client.request_count(), chapter))
}

/// Test that a block edited since the cached run is retranslated in diff-aware mode
#[tokio::test]
async fn test_run_withEditedBlockAndDiffAware_shouldRetranslateIt() -> Result<()> {
    let (summary, requests, chapter) = rerun_after_edit(true).await?;

    assert_eq!(requests, 1);
    assert_eq!(summary.changed, 1);
    assert_eq!(summary.reused_cache, 0);
    assert!(chapter.contains(&format!("<p>Nowość: {}</p>", EDITED)));
    Ok(())
}

/// Test that without diff-aware mode the older cached translation is kept
#[tokio::test]
async fn test_run_withEditedBlockWithoutDiffAware_shouldReuseCachedVersion() -> Result<()> {
    let (summary, requests, chapter) = rerun_after_edit(false).await?;

    assert_eq!(requests, 0);
    assert_eq!(summary.changed, 0);
    assert_eq!(summary.reused_cache, 1);
    assert!(chapter.contains(&format!("<p>Przekład: {}</p>", STORED)));
    Ok(())
}

/// Test that straight quotes in a reply come out as Polish quotation marks
#[tokio::test]
async fn test_run_withStraightQuotesInReply_shouldUseTargetQuotes() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let document = xhtml("One", "<p>\"Yes,\" he said, and <em>didn't</em> look back.</p>");
    let input = EpubBuilder::new()
        .chapter("ch1.xhtml", document.clone())
        .build(&temp_dir.path().join("book.epub"))?;
    let output = temp_dir.path().join("book.pl.epub");
    let config = test_config(temp_dir.path(), &input, &output);
    let id = segment_ids("OEBPS/ch1.xhtml", &document)?.remove(0);
    let client = MockClient::scripted([MockReply::Raw(format!(
        "<batch><seg id=\"{}\">\"Tak\" - powiedział i <em>nie</em> obejrzał się.</seg></batch>",
        id
    ))]);

    let summary = run_pipeline(&config, &client).await?;

    assert_eq!(summary.quotes_normalized, 1);
    let chapter = common::read_entry_string(&output, "OEBPS/ch1.xhtml")?;
    assert!(chapter.contains("<p>\u{201e}Tak\u{201d} - powiedział i <em>nie</em> obejrzał się.</p>"));
    Ok(())
}

/// Test that a windows-1250 chapter is decoded, translated and written back as UTF-8
#[tokio::test]
async fn test_run_withWindows1250Chapter_shouldWriteUtf8() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let mut legacy = b"<?xml version=\"1.0\" encoding=\"windows-1250\"?>\n\
        <html xmlns=\"http://www.w3.org/1999/xhtml\"><head><title>One</title></head><body><p>The caf"
        .to_vec();
    legacy.push(0xe9);
    legacy.extend_from_slice(b" was closed.</p></body></html>");
    let input = EpubBuilder::new()
        .missing_chapter("ch1.xhtml")
        .entry("OEBPS/ch1.xhtml", legacy, false)
        .build(&temp_dir.path().join("book.epub"))?;
    let output = temp_dir.path().join("book.pl.epub");
    let config = test_config(temp_dir.path(), &input, &output);

    let summary = run_pipeline(&config, &MockClient::new()).await?;

    assert_eq!(summary.chapters_translated, 1);
    assert_eq!(summary.chapters_skipped, 0);
    let chapter = common::read_entry_string(&output, "OEBPS/ch1.xhtml")?;
    assert!(chapter.starts_with("<?xml version=\"1.0\" encoding=\"utf-8\"?>"));
    assert!(chapter.contains("<p>Przekład: The café was closed.</p>"));
    Ok(())
}

/// Test that a context window puts neighbour text into the prompt but not into the batch
#[tokio::test]
async fn test_run_withContextWindow_shouldSendNeighbourHints() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let input = EpubBuilder::new()
        .chapter(
            "ch1.xhtml",
            xhtml("One", "<p>Anna opened the door.</p><p>She smiled at him.</p><p>Then it rained.</p>"),
        )
        .build(&temp_dir.path().join("book.epub"))?;
    let output = temp_dir.path().join("book.pl.epub");
    let mut config = test_config(temp_dir.path(), &input, &output);
    config.translation.common.batch_max_segments = 1;
    config.translation.common.context_neighbors = 1;
    let client = MockClient::new();

    let summary = run_pipeline(&config, &client).await?;

    assert_eq!(summary.translated, 3);
    let prompts = client.prompts();
    assert_eq!(prompts.len(), 3);
    let middle = &prompts[1];
    let hints = middle.find("Context hints (neighbour segments):").expect("hints present");
    let batch = middle.rfind("<batch").expect("batch present");
    assert!(hints < batch);
    assert!(middle[hints..batch].contains("prev: Anna opened the door."));
    assert!(middle[hints..batch].contains("next: Then it rained."));
    assert!(!middle[batch..].contains("Anna"));

    let chapter = common::read_entry_string(&output, "OEBPS/ch1.xhtml")?;
    assert!(chapter.contains("<p>Przekład: She smiled at him.</p>"));
    Ok(())
}
