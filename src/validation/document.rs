/*!
 * Standalone audit of a produced EPUB.
 *
 * Hard errors are structural: corrupt archive entries, an unusable package,
 * spine members that are missing, chapters that fail a strict parse.
 * Suspicious segments are those the language guard does not accept as
 * target-language text.
 */

use log::{debug, info, warn};
use std::fmt;
use std::path::Path;

use crate::app_config::{Config, ValidationConfig};
use crate::document::encoding::decode_markup;
use crate::document::markup::MarkupTree;
use crate::document::segments::extract_segments;
use crate::document::{EpubArchive, ExtractionRules};
use crate::validation::language_guard::LanguageGuard;

/// Characters of a suspicious segment kept in the report
const EXCERPT_CHARS: usize = 120;

/// Overall classification of a document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    PassWithWarnings,
    Fail,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pass => write!(f, "PASS"),
            Self::PassWithWarnings => write!(f, "PASS_WITH_WARNINGS"),
            Self::Fail => write!(f, "FAIL"),
        }
    }
}

/// A segment that does not look like the target language
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuspiciousSegment {
    pub chapter: String,
    pub segment_id: String,
    pub excerpt: String,
}

#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub hard_errors: Vec<String>,
    pub checked_segments: usize,
    pub suspicious: Vec<SuspiciousSegment>,
    pub ratio: f64,
    pub verdict: Verdict,
}

impl ValidationReport {
    fn empty() -> Self {
        Self {
            hard_errors: Vec::new(),
            checked_segments: 0,
            suspicious: Vec::new(),
            ratio: 0.0,
            verdict: Verdict::Pass,
        }
    }

    fn finish(&mut self, max_suspicious_ratio: f64) {
        self.ratio = if self.checked_segments == 0 {
            0.0
        } else {
            self.suspicious.len() as f64 / self.checked_segments as f64
        };
        self.verdict = if !self.hard_errors.is_empty() || self.ratio > max_suspicious_ratio {
            Verdict::Fail
        } else if !self.suspicious.is_empty() {
            Verdict::PassWithWarnings
        } else {
            Verdict::Pass
        };
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Verdict: {}", self.verdict)?;
        writeln!(
            f,
            "Segments checked: {}, suspicious: {} ({:.1}%)",
            self.checked_segments,
            self.suspicious.len(),
            self.ratio * 100.0
        )?;
        for error in &self.hard_errors {
            writeln!(f, "ERROR: {}", error)?;
        }
        for segment in &self.suspicious {
            writeln!(f, "SUSPICIOUS {} [{}]: {}", segment.chapter, segment.segment_id, segment.excerpt)?;
        }
        Ok(())
    }
}

/// Validator for one language pair and extraction rule set
#[derive(Debug, Clone)]
pub struct DocumentValidator {
    guard: LanguageGuard,
    rules: ExtractionRules,
    min_chars: usize,
    max_suspicious_ratio: f64,
}

impl DocumentValidator {
    pub fn new(guard: LanguageGuard, rules: ExtractionRules, config: &ValidationConfig) -> Self {
        Self {
            guard,
            rules,
            min_chars: config.min_chars,
            max_suspicious_ratio: config.max_suspicious_ratio,
        }
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let guard = LanguageGuard::from_file(
            &config.source_language,
            &config.target_language,
            config.validation.profiles_path.as_deref(),
        )?;
        let rules = ExtractionRules::new(
            config.document.block_tags.as_slice(),
            config.document.excluded_ancestors.as_slice(),
        );
        Ok(Self::new(guard, rules, &config.validation))
    }

    /// Audit the EPUB at `path`
    pub fn validate(&self, path: &Path) -> ValidationReport {
        let mut report = ValidationReport::empty();

        let mut epub = match EpubArchive::open(path) {
            Ok(epub) => epub,
            Err(e) => {
                report.hard_errors.push(format!("Cannot open {:?}: {}", path, e));
                report.finish(self.max_suspicious_ratio);
                return report;
            }
        };

        for index in 0..epub.len() {
            if let Err(e) = epub.read_index(index) {
                report.hard_errors.push(format!("Corrupt archive entry #{}: {}", index, e));
            }
        }

        for item in epub.spine_items() {
            let Some(chapter) = item.path.clone() else {
                report
                    .hard_errors
                    .push(format!("Spine item '{}' has no manifest entry", item.idref));
                continue;
            };
            if !epub.has_entry(&chapter) {
                report.hard_errors.push(format!("Spine file missing from archive: {}", chapter));
                continue;
            }
            if !item.is_content_document() {
                continue;
            }
            self.check_chapter(&mut epub, &chapter, &mut report);
        }

        report.finish(self.max_suspicious_ratio);
        info!(
            "Validated {:?}: {} ({} segments, {} suspicious, {} hard errors)",
            path,
            report.verdict,
            report.checked_segments,
            report.suspicious.len(),
            report.hard_errors.len()
        );
        report
    }

    fn check_chapter(&self, epub: &mut EpubArchive, chapter: &str, report: &mut ValidationReport) {
        let bytes = match epub.read_entry(chapter) {
            Ok(bytes) => bytes,
            Err(e) => {
                report.hard_errors.push(format!("Cannot read {}: {}", chapter, e));
                return;
            }
        };
        let source = decode_markup(&bytes).text;
        let tree = match MarkupTree::parse_strict(&source) {
            Ok(tree) => tree,
            Err(e) => {
                report.hard_errors.push(format!("{} does not parse: {}", chapter, e));
                return;
            }
        };
        let segments = match extract_segments(&tree, chapter, &self.rules) {
            Ok(segments) => segments,
            Err(e) => {
                report.hard_errors.push(format!("{}: {}", chapter, e));
                return;
            }
        };

        for segment in segments {
            let significant = segment.plain.chars().filter(|c| !c.is_whitespace()).count();
            if significant < self.min_chars {
                continue;
            }
            report.checked_segments += 1;
            if !self.guard.looks_like_target(&segment.plain) {
                warn!("Suspicious segment {} in {}", segment.id, chapter);
                report.suspicious.push(SuspiciousSegment {
                    chapter: chapter.to_string(),
                    segment_id: segment.id,
                    excerpt: segment.plain.chars().take(EXCERPT_CHARS).collect(),
                });
            }
        }
        debug!("Checked chapter {}", chapter);
    }
}
