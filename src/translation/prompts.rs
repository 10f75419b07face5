/*!
 * Prompt construction and the batch wire format.
 *
 * A prompt is the base instructions, a language instruction for the
 * configured pair, and a `<batch>` element holding one `<seg id="...">`
 * child per segment. Named entities in segment markup are rewritten as
 * numeric references so the provider sees well-formed XML. Segments that
 * carry neighbour hints add a context section ahead of the batch.
 */

use crate::document::entities;
use crate::document::Segment;
use crate::language_utils;
use crate::translation::context::{batch_notes, BATCH_NOTES_MAX_CHARS};

pub const BATCH_NAMESPACE: &str = "http://www.w3.org/1999/xhtml";

/// Builds prompts for one language pair
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    base_prompt: String,
    source_language: String,
    target_language: String,
}

impl PromptBuilder {
    pub fn new(base_prompt: impl Into<String>, source_language: &str, target_language: &str) -> Self {
        Self {
            base_prompt: base_prompt.into(),
            source_language: source_language.trim().to_string(),
            target_language: target_language.trim().to_string(),
        }
    }

    pub fn target_language(&self) -> &str {
        &self.target_language
    }

    /// Language instruction for the configured pair
    pub fn language_instruction(&self) -> String {
        let source = language_utils::prompt_label(&self.source_language);
        let target = language_utils::prompt_label(&self.target_language);
        let target_name = language_utils::get_language_name(&self.target_language)
            .unwrap_or_else(|_| self.target_language.clone());
        format!(
            "Translate faithfully from {} to {}. Output only {}. Keep all XML tags, attributes and segment ids unchanged.",
            source, target, target_name
        )
    }

    /// Prompt for a batch
    pub fn build(&self, segments: &[Segment]) -> String {
        self.assemble(segments, None)
    }

    /// Prompt for a retry after output was rejected as still in the source language
    pub fn build_forced(&self, segments: &[Segment]) -> String {
        let target_name = language_utils::get_language_name(&self.target_language)
            .unwrap_or_else(|_| self.target_language.clone());
        let critical = format!(
            "CRITICAL: the previous answer was not in {name}. Every <seg> MUST be fully translated into {name} ({code}). \
Do not copy the source text. Do not answer in any other language.",
            name = target_name,
            code = self.target_language
        );
        self.assemble(segments, Some(&critical))
    }

    fn assemble(&self, segments: &[Segment], extra: Option<&str>) -> String {
        let mut prompt = String::with_capacity(self.base_prompt.len() + segments.iter().map(Segment::size).sum::<usize>() + 256);
        prompt.push_str(self.base_prompt.trim_end());
        prompt.push_str("\n\n");
        prompt.push_str(&self.language_instruction());
        prompt.push('\n');
        if let Some(extra) = extra {
            prompt.push_str(extra);
            prompt.push('\n');
        }
        let notes = batch_notes(segments, BATCH_NOTES_MAX_CHARS);
        if !notes.is_empty() {
            prompt.push_str("\nContext hints (neighbour segments):\n");
            prompt.push_str("- Use this only for coherence and disambiguation (pronouns, gender, references).\n");
            prompt.push_str("- Do NOT translate, copy or return the context section.\n");
            prompt.push_str(&notes);
            prompt.push('\n');
        }
        prompt.push('\n');
        prompt.push_str(&batch_markup(segments));
        prompt
    }
}

/// `<batch>` element for `segments`
pub fn batch_markup(segments: &[Segment]) -> String {
    let mut out = format!("<batch xmlns=\"{}\">\n", BATCH_NAMESPACE);
    for segment in segments {
        out.push_str(&format!(
            "<seg id=\"{}\">{}</seg>\n",
            segment.id,
            entities::named_to_numeric(&segment.inner)
        ));
    }
    out.push_str("</batch>");
    out
}
