/*!
 * Tests for container reading, segment extraction and chapter round trips
 */

use anyhow::Result;
use std::collections::HashMap;

use crate::common::{self, xhtml, EpubBuilder};
use epubtrans::app_config::Config;
use epubtrans::document::entities::EntityStats;
use epubtrans::document::{write_epub_atomic, ChapterDocument, EpubArchive, ExtractionRules};

fn default_rules() -> ExtractionRules {
    let config = Config::default();
    ExtractionRules::new(
        config.document.block_tags.as_slice(),
        config.document.excluded_ancestors.as_slice(),
    )
}

const NESTED: &str = "<p>She said <em>very <strong>quietly</strong></em> that \
    <a href=\"notes.xhtml#n1\" class=\"noteref\">it</a> was over.<br/>Then left.</p>";

/// Test that the spine is read in order with paths resolved against the package
#[test]
fn test_open_shouldResolveSpineInReadingOrder() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let path = EpubBuilder::new()
        .chapter("text/b.xhtml", xhtml("B", "<p>Second file, first in spine.</p>"))
        .chapter("text/a.xhtml", xhtml("A", "<p>Another paragraph.</p>"))
        .build(&temp_dir.path().join("book.epub"))?;

    let epub = EpubArchive::open(&path)?;
    assert_eq!(epub.opf_path(), "OEBPS/content.opf");
    assert_eq!(epub.content_documents(), vec!["OEBPS/text/b.xhtml", "OEBPS/text/a.xhtml"]);
    assert!(epub.has_entry("OEBPS/style.css"));
    assert!(!epub.content_documents().iter().any(|p| p.ends_with(".css")));
    Ok(())
}

/// Test that a spine entry without a file is still listed with its path
#[test]
fn test_spineItems_withMissingFile_shouldKeepPath() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let path = EpubBuilder::new()
        .chapter("one.xhtml", xhtml("One", "<p>Present.</p>"))
        .missing_chapter("two.xhtml")
        .build(&temp_dir.path().join("book.epub"))?;

    let epub = EpubArchive::open(&path)?;
    let items = epub.spine_items();
    assert_eq!(items.len(), 2);
    assert_eq!(items[1].path.as_deref(), Some("OEBPS/two.xhtml"));
    assert!(!epub.has_entry("OEBPS/two.xhtml"));
    Ok(())
}

/// Test that extraction skips excluded ancestors and letterless blocks
#[test]
fn test_extract_withDefaultRules_shouldSkipExcludedContent() -> Result<()> {
    let document = xhtml(
        "Title text",
        "<h2>Part I</h2><p>1.</p><p>   </p>\
         <svg xmlns=\"http://www.w3.org/2000/svg\"><text><p>Inside svg</p></text></svg>\
         <blockquote><p>Quoted line.</p></blockquote><figure><figcaption>A map.</figcaption></figure>",
    );
    let chapter = ChapterDocument::parse("OEBPS/c.xhtml", document.as_bytes(), &default_rules())?;
    let inners: Vec<&str> = chapter.segments.iter().map(|s| s.inner.as_str()).collect();

    // blockquote is outermost, so its paragraph travels with it
    assert_eq!(inners, vec!["Part I", "<p>Quoted line.</p>", "A map."]);
    Ok(())
}

/// Test that two parses of the same bytes give the same identifiers
#[test]
fn test_segmentIds_acrossParses_shouldBeStable() -> Result<()> {
    let document = xhtml("T", &NESTED.repeat(3));
    let first = ChapterDocument::parse("OEBPS/ch 1.xhtml", document.as_bytes(), &default_rules())?;
    let second = ChapterDocument::parse("OEBPS/ch 1.xhtml", document.as_bytes(), &default_rules())?;

    let ids = |c: &ChapterDocument| c.segments.iter().map(|s| s.id.clone()).collect::<Vec<_>>();
    assert_eq!(ids(&first), ids(&second));
    assert_eq!(first.segments.len(), 3);
    // Same text at different positions still gets distinct ids
    assert_ne!(first.segments[0].id, first.segments[1].id);
    assert!(first.segments[0].id.starts_with("OEBPS/ch_1.xhtml__000000__"));
    Ok(())
}

/// Test that nested inline markup survives extraction and replacement
#[test]
fn test_apply_withNestedInlineTags_shouldRoundTrip() -> Result<()> {
    let document = xhtml("T", NESTED);
    let mut chapter = ChapterDocument::parse("OEBPS/c.xhtml", document.as_bytes(), &default_rules())?;
    let segment = chapter.segments[0].clone();
    assert!(segment.inner.starts_with("She said <em>very <strong>quietly</strong></em> that <a "));
    assert!(segment.inner.contains("<br/>"));
    assert_eq!(segment.plain, "She said very quietly that it was over.Then left.");

    let translated = "Powiedziała <em>bardzo <strong>cicho</strong></em>, że \
        <a href=\"notes.xhtml#n1\" class=\"noteref\">to</a> koniec.<br/>Potem wyszła.";
    chapter.apply(&segment, translated)?;
    let bytes = chapter.to_bytes()?;

    let reparsed = ChapterDocument::parse("OEBPS/c.xhtml", &bytes, &default_rules())?;
    assert_eq!(reparsed.segments.len(), 1);
    assert_eq!(reparsed.segments[0].inner, translated);
    assert!(String::from_utf8(bytes)?.contains("<title>T</title>"));
    Ok(())
}

/// Test that an untouched chapter serializes back to the same bytes
#[test]
fn test_toBytes_withoutChanges_shouldPreserveSource() -> Result<()> {
    let document = xhtml("T", "<p>Non&#160;breaking and soft&#173;hyphen.</p><hr/><p>Two &amp; three.</p>");
    let chapter = ChapterDocument::parse("OEBPS/c.xhtml", document.as_bytes(), &default_rules())?;
    let bytes = chapter.to_bytes()?;

    assert_eq!(String::from_utf8(bytes.clone())?, document);
    let stats = EntityStats::collect(&String::from_utf8(bytes)?);
    assert_eq!(stats.non_breaking_spaces, 1);
    assert_eq!(stats.soft_hyphens, 1);
    Ok(())
}

/// Test that rewriting a fixture keeps every other entry byte-identical
#[test]
fn test_writeEpubAtomic_onFixture_shouldOnlyChangeReplacedChapter() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let source = EpubBuilder::new()
        .chapter("a.xhtml", xhtml("A", "<p>First.</p>"))
        .chapter("b.xhtml", xhtml("B", "<p>Second.</p>"))
        .build(&temp_dir.path().join("book.epub"))?;
    let destination = temp_dir.path().join("out").join("book.pl.epub");

    let replaced = xhtml("A", "<p>Pierwszy.</p>");
    let mut replacements = HashMap::new();
    replacements.insert("OEBPS/a.xhtml".to_string(), replaced.clone().into_bytes());
    write_epub_atomic(&source, &destination, &replacements, Some(2))?;

    let before = common::read_entries(&source)?;
    let after = common::read_entries(&destination)?;
    assert_eq!(before.keys().collect::<Vec<_>>(), after.keys().collect::<Vec<_>>());
    for (name, bytes) in &before {
        if name == "OEBPS/a.xhtml" {
            assert_eq!(after[name], replaced.as_bytes());
        } else {
            assert_eq!(&after[name], bytes, "{} changed", name);
        }
    }

    let mut archive = zip::ZipArchive::new(std::fs::File::open(&destination)?)?;
    let first = archive.by_index(0)?;
    assert_eq!(first.name(), "mimetype");
    assert_eq!(first.compression(), zip::CompressionMethod::Stored);
    Ok(())
}

/// Test that HTML-style void tags in a chapter neither swallow later blocks nor gain end tags
#[test]
fn test_chapterParse_withHtmlVoidTags_shouldKeepBlocksSeparate() -> Result<()> {
    let source = xhtml("Void", "<p>one<br>two</p><p>three<img src=\"a.png\" alt=\"\"></p><hr>");
    let mut chapter = ChapterDocument::parse("c.xhtml", source.as_bytes(), &default_rules())?;

    let inners: Vec<&str> = chapter.segments.iter().map(|s| s.inner.as_str()).collect();
    assert_eq!(inners, vec!["one<br>two", "three<img src=\"a.png\" alt=\"\">"]);
    assert_eq!(String::from_utf8(chapter.to_bytes()?)?, source);

    let first = chapter.segments[0].clone();
    chapter.apply(&first, "jeden<br>dwa")?;
    let out = String::from_utf8(chapter.to_bytes()?)?;
    assert!(out.contains("<p>jeden<br/>dwa</p><p>three<img src=\"a.png\" alt=\"\"></p><hr></body>"));
    Ok(())
}
