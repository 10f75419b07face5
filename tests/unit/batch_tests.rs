/*!
 * Tests for batch building over extracted chapter segments
 */

use anyhow::Result;

use epubtrans::document::{ChapterDocument, ExtractionRules, Segment};
use epubtrans::translation::{build_batches, BatchLimits};

fn chapter_segments() -> Result<Vec<Segment>> {
    let mut body = String::new();
    for i in 0..40 {
        let words = "word ".repeat(1 + (i * 7) % 23);
        body.push_str(&format!("<p>Paragraph {} has <em>{}</em>text.</p>", i, words));
    }
    let document = format!("<html><head><title>t</title></head><body>{}</body></html>", body);
    let rules = ExtractionRules::new(&["p"], &["head"]);
    Ok(ChapterDocument::parse("OEBPS/long.xhtml", document.as_bytes(), &rules)?.segments)
}

/// Test that every limit pair keeps order, loses nothing and respects both limits
#[test]
fn test_buildBatches_overManyLimits_shouldRespectLimitsAndOrder() -> Result<()> {
    let segments = chapter_segments()?;
    assert_eq!(segments.len(), 40);

    for max_chars in [1, 50, 120, 400, 5_000] {
        for max_segments in [1, 2, 5, 17, 100] {
            let batches = build_batches(&segments, BatchLimits::new(max_chars, max_segments));

            let flattened: Vec<&str> = batches.iter().flatten().map(|s| s.id.as_str()).collect();
            let expected: Vec<&str> = segments.iter().map(|s| s.id.as_str()).collect();
            assert_eq!(flattened, expected, "limits {}/{}", max_chars, max_segments);

            for batch in &batches {
                assert!(!batch.is_empty());
                assert!(batch.len() <= max_segments);
                let size: usize = batch.iter().map(|s| s.size()).sum();
                assert!(
                    batch.len() == 1 || size <= max_chars,
                    "batch of {} segments has {} chars over limit {}",
                    batch.len(),
                    size,
                    max_chars
                );
            }
        }
    }
    Ok(())
}

/// Test that a batch is only closed when the next segment would not fit
#[test]
fn test_buildBatches_shouldPackGreedily() -> Result<()> {
    let segments = chapter_segments()?;
    let limits = BatchLimits::new(400, 6);
    let batches = build_batches(&segments, limits);

    for pair in batches.windows(2) {
        let size: usize = pair[0].iter().map(|s| s.size()).sum();
        let next = pair[1][0].size();
        assert!(pair[0].len() == limits.max_segments || size + next > limits.max_chars);
    }
    Ok(())
}

/// Test that an empty chapter yields no batches
#[test]
fn test_buildBatches_withNoSegments_shouldBeEmpty() {
    assert!(build_batches(&[], BatchLimits::new(100, 5)).is_empty());
}
