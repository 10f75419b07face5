/*!
 * Neighbour context for prompts.
 *
 * With a context window of N, each pending segment carries a short hint
 * made of the plain text of up to N segments before and after it in the
 * chapter. The hints go into the prompt as disambiguation material only.
 */

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

use crate::document::Segment;

/// Upper bound on the notes section of one prompt
pub const BATCH_NOTES_MAX_CHARS: usize = 7000;

const MIN_NEIGHBOR_CHARS: usize = 24;
const MIN_SEGMENT_HINT_CHARS: usize = 80;
const MIN_BATCH_NOTES_CHARS: usize = 200;

static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// How much neighbour text each hint carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextWindow {
    /// Segments taken on each side; 0 disables hints
    pub size: usize,
    pub neighbor_max_chars: usize,
    pub per_segment_max_chars: usize,
}

impl ContextWindow {
    pub fn new(size: usize, neighbor_max_chars: usize, per_segment_max_chars: usize) -> Self {
        Self {
            size,
            neighbor_max_chars: neighbor_max_chars.max(MIN_NEIGHBOR_CHARS),
            per_segment_max_chars: per_segment_max_chars.max(MIN_SEGMENT_HINT_CHARS),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.size > 0
    }

    /// Fill `context_hint` of every pending segment from its chapter neighbours
    pub fn attach_hints(&self, chapter: &[Segment], pending: &mut [Segment]) {
        if !self.is_enabled() || chapter.is_empty() {
            return;
        }
        let positions: HashMap<&str, usize> = chapter
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id.as_str(), i))
            .collect();

        for segment in pending.iter_mut() {
            let Some(&position) = positions.get(segment.id.as_str()) else {
                continue;
            };
            let before = &chapter[position.saturating_sub(self.size)..position];
            let after = &chapter[(position + 1).min(chapter.len())..(position + 1 + self.size).min(chapter.len())];

            let mut lines = vec![format!("[seg id={}]", segment.id)];
            let before = self.join_neighbors(before);
            if !before.is_empty() {
                lines.push(format!("prev: {}", before));
            }
            let after = self.join_neighbors(after);
            if !after.is_empty() {
                lines.push(format!("next: {}", after));
            }
            if lines.len() == 1 {
                continue;
            }
            segment.context_hint = truncate_chars(&lines.join("\n"), self.per_segment_max_chars);
        }
    }

    fn join_neighbors(&self, neighbors: &[Segment]) -> String {
        neighbors
            .iter()
            .map(|s| compact(&s.plain, self.neighbor_max_chars))
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join(" || ")
    }
}

/// Hints of a batch joined into one notes block, empty when there are none
pub fn batch_notes(segments: &[Segment], max_chars: usize) -> String {
    let blocks: Vec<&str> = segments
        .iter()
        .map(|s| s.context_hint.trim())
        .filter(|hint| !hint.is_empty())
        .collect();
    if blocks.is_empty() {
        return String::new();
    }
    truncate_chars(&blocks.join("\n\n"), max_chars.max(MIN_BATCH_NOTES_CHARS))
}

fn compact(text: &str, max_chars: usize) -> String {
    let collapsed = WHITESPACE_RUN.replace_all(text.trim(), " ");
    truncate_chars(&collapsed, max_chars)
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{}...", head.trim_end())
}
