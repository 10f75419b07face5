/*!
 * Provider response parsing.
 *
 * Responses are sanitized (code fences and a leading label removed), the
 * `<batch>` wrapper is located case-insensitively, stray `&` and `<` are
 * escaped, named entities are made numeric, and the result is parsed with
 * the lenient markup tree. The
 * outcome maps segment ids to translated inner markup.
 */

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, HashSet};

use crate::document::entities;
use crate::document::MarkupTree;
use crate::errors::TranslationError;

static FENCE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\s*```[A-Za-z0-9_-]*\s*$").unwrap());
static LABEL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^\s*(translation|translated text|output)\s*:\s*").unwrap());

/// Remove code fences and a leading label
pub fn sanitize(raw: &str) -> String {
    let without_fences = FENCE_RE.replace_all(raw, "");
    LABEL_RE.replace(without_fences.trim(), "").trim().to_string()
}

/// Slice from the first `<batch` to the end of the last `</batch>`
///
/// A missing end tag keeps the rest of the text; the lenient parser closes it.
pub fn locate_batch(text: &str) -> Option<&str> {
    let lower = text.to_ascii_lowercase();
    let start = lower.find("<batch")?;
    let end = lower
        .rfind("</batch>")
        .filter(|end| *end > start)
        .map(|end| end + "</batch>".len())
        .unwrap_or(text.len());
    Some(&text[start..end])
}

/// Parse a response into `segment id -> translated inner markup`
pub fn parse_batch_response(raw: &str) -> Result<HashMap<String, String>, TranslationError> {
    let cleaned = sanitize(raw);
    let batch = locate_batch(&cleaned)
        .ok_or_else(|| TranslationError::MalformedResponse("no <batch> element in response".to_string()))?;

    let escaped = entities::escape_stray_markup(batch);
    let tree = MarkupTree::parse(&entities::named_to_numeric(&escaped))
        .map_err(|e| TranslationError::MalformedResponse(e.to_string()))?;

    let seg_tags: HashSet<String> = ["seg".to_string()].into_iter().collect();
    let mut mapping = HashMap::new();
    for node in tree.find_outermost(&seg_tags, &HashSet::new()) {
        let Some(id) = tree.attribute(node, "id") else {
            continue;
        };
        let inner = tree
            .inner_markup(node)
            .map_err(|e| TranslationError::MalformedResponse(e.to_string()))?;
        let inner = inner.trim();
        if inner.is_empty() {
            continue;
        }
        mapping.insert(id.trim().to_string(), inner.to_string());
    }

    if mapping.is_empty() {
        return Err(TranslationError::MalformedResponse(
            "response batch contains no usable segments".to_string(),
        ));
    }
    Ok(mapping)
}
