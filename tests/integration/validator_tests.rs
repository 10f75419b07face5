/*!
 * Standalone validator over built and translated documents
 */

use anyhow::Result;
use std::path::Path;

use crate::common::{self, run_pipeline, test_config, xhtml, EpubBuilder};
use epubtrans::app_config::Config;
use epubtrans::providers::MockClient;
use epubtrans::validation::{DocumentValidator, Verdict};

const POLISH: [&str; 3] = [
    "Było zimno, a ona nie chciała już wychodzić z domu tego wieczoru.",
    "Pociąg odjechał w południe, ale nikt na niego nie czekał na stacji.",
    "Stary latarnik wspinał się po schodach każdego wieczoru, by zapalić lampę.",
];
const ENGLISH: &str = "It was the best of times and the worst of times, and they had everything before them.";

fn validator() -> Result<DocumentValidator> {
    DocumentValidator::from_config(&Config::default())
}

fn paragraphs(lines: &[&str]) -> String {
    lines.iter().map(|l| format!("<p>{}</p>", l)).collect()
}

fn build(dir: &Path, name: &str, builder: EpubBuilder) -> Result<std::path::PathBuf> {
    builder.build(&dir.join(name))
}

/// Test that a fully translated book passes
#[test]
fn test_validate_withTranslatedBook_shouldPass() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let path = build(
        temp_dir.path(),
        "pl.epub",
        EpubBuilder::new()
            .chapter("ch1.xhtml", xhtml("Rozdział", &paragraphs(&POLISH[..2])))
            .chapter("ch2.xhtml", xhtml("Rozdział", &paragraphs(&POLISH[2..]))),
    )?;

    let report = validator()?.validate(&path);

    assert_eq!(report.verdict, Verdict::Pass, "{}", report);
    assert_eq!(report.checked_segments, 3);
    assert!(report.hard_errors.is_empty());
    Ok(())
}

/// Test that one stray source paragraph among several only warns
#[test]
fn test_validate_withFewUntranslatedSegments_shouldWarn() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let mut lines = POLISH.to_vec();
    lines.push(ENGLISH);
    let path = build(
        temp_dir.path(),
        "mixed.epub",
        EpubBuilder::new().chapter("ch1.xhtml", xhtml("Rozdział", &paragraphs(&lines))),
    )?;

    let report = validator()?.validate(&path);

    assert_eq!(report.verdict, Verdict::PassWithWarnings, "{}", report);
    assert_eq!(report.suspicious.len(), 1);
    assert_eq!(report.suspicious[0].chapter, "OEBPS/ch1.xhtml");
    assert!(report.suspicious[0].excerpt.starts_with("It was the best"));
    assert!((report.ratio - 0.25).abs() < 1e-9);
    Ok(())
}

/// Test that an untranslated chapter fails on the suspicious ratio
#[test]
fn test_validate_withUntranslatedChapter_shouldFail() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let path = build(
        temp_dir.path(),
        "en.epub",
        EpubBuilder::new()
            .chapter("ch1.xhtml", xhtml("One", &paragraphs(&POLISH[..1])))
            .chapter("ch2.xhtml", xhtml("Two", &paragraphs(&[ENGLISH, ENGLISH]))),
    )?;

    let report = validator()?.validate(&path);

    assert_eq!(report.verdict, Verdict::Fail);
    assert!(report.hard_errors.is_empty());
    assert_eq!(report.suspicious.len(), 2);
    assert!(report.to_string().starts_with("Verdict: FAIL"));
    Ok(())
}

/// Test that a spine file missing from the archive is a hard error
#[test]
fn test_validate_withMissingSpineFile_shouldFail() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let path = build(
        temp_dir.path(),
        "missing.epub",
        EpubBuilder::new()
            .chapter("ch1.xhtml", xhtml("One", &paragraphs(&POLISH)))
            .missing_chapter("ch2.xhtml"),
    )?;

    let report = validator()?.validate(&path);

    assert_eq!(report.verdict, Verdict::Fail);
    assert_eq!(report.hard_errors.len(), 1);
    assert!(report.hard_errors[0].contains("OEBPS/ch2.xhtml"));
    assert_eq!(report.checked_segments, 3);
    Ok(())
}

/// Test that a chapter with broken markup is a hard error
#[test]
fn test_validate_withMalformedChapter_shouldFail() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let broken = format!(
        "<?xml version=\"1.0\"?><html><body><p>{}</p><div><p>{}</body></html>",
        POLISH[0], POLISH[1]
    );
    let path = build(
        temp_dir.path(),
        "broken.epub",
        EpubBuilder::new().chapter("ch1.xhtml", broken),
    )?;

    let report = validator()?.validate(&path);

    assert_eq!(report.verdict, Verdict::Fail);
    assert!(report.hard_errors.iter().any(|e| e.contains("OEBPS/ch1.xhtml")));
    Ok(())
}

/// Test that an entry whose bytes no longer match its CRC is a hard error
#[test]
fn test_validate_withCorruptEntry_shouldFail() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let marker = b"INTEGRITY-MARKER-INTEGRITY-MARKER";
    let path = build(
        temp_dir.path(),
        "corrupt.epub",
        EpubBuilder::new()
            .chapter("ch1.xhtml", xhtml("One", &paragraphs(&POLISH)))
            .entry("OEBPS/notes.txt", marker.to_vec(), true),
    )?;

    let mut bytes = std::fs::read(&path)?;
    let offset = bytes
        .windows(marker.len())
        .position(|w| w == marker)
        .expect("stored entry is uncompressed");
    bytes[offset] = b'X';
    std::fs::write(&path, bytes)?;

    let report = validator()?.validate(&path);

    assert_eq!(report.verdict, Verdict::Fail);
    assert!(report.hard_errors.iter().any(|e| e.contains("Corrupt archive entry")));
    Ok(())
}

/// Test that a file that is not an archive is reported rather than raised
#[test]
fn test_validate_withNonArchive_shouldFail() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let path = common::create_test_file(temp_dir.path(), "fake.epub", "not a zip")?;

    let report = validator()?.validate(&path);

    assert_eq!(report.verdict, Verdict::Fail);
    assert_eq!(report.hard_errors.len(), 1);
    Ok(())
}

/// Test that the output of a translation run validates cleanly
#[tokio::test]
async fn test_validate_afterPipelineRun_shouldPass() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let input = build(
        temp_dir.path(),
        "book.epub",
        EpubBuilder::new().chapter("ch1.xhtml", xhtml("One", &paragraphs(&[ENGLISH, ENGLISH]))),
    )?;
    let output = temp_dir.path().join("book.pl.epub");
    let config = test_config(temp_dir.path(), &input, &output);

    assert_eq!(validator()?.validate(&input).verdict, Verdict::Fail);
    run_pipeline(&config, &MockClient::new()).await?;

    let report = validator()?.validate(&output);
    assert_eq!(report.verdict, Verdict::Pass, "{}", report);
    assert_eq!(report.checked_segments, 2);
    Ok(())
}
