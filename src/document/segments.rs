/*!
 * Segment extraction.
 *
 * A segment is the outermost block-level element (paragraph, heading, list
 * item, ...) outside excluded ancestors whose text contains at least one
 * letter. Its identifier is derived from the chapter path, its ordinal among
 * all matched block elements, and a hash of its whitespace-normalized inner
 * markup, so re-extracting identical bytes yields identical identifiers.
 */

use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::HashSet;

use crate::document::encoding::{self, DecodedMarkup};
use crate::document::markup::{MarkupTree, NodeId};
use crate::errors::DocumentError;

/// Hex characters of the content hash kept in an identifier
pub const ID_HASH_WIDTH: usize = 10;

static UNSAFE_PATH_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-zA-Z0-9_\-./]").unwrap());
static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// One translatable unit of a chapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Position among the chapter's block elements
    pub ordinal: usize,
    /// Owning element in the chapter tree
    pub node: NodeId,
    pub id: String,
    /// Inner markup with inline tags
    pub inner: String,
    pub plain: String,
    /// Neighbour text shown to the provider; empty unless a context window is set
    pub context_hint: String,
}

impl Segment {
    /// `<chapter>__<ordinal>` part of the identifier
    pub fn id_prefix(&self) -> &str {
        id_prefix(&self.id)
    }

    /// Character count used for batch sizing
    pub fn size(&self) -> usize {
        self.inner.chars().count()
    }
}

/// Identifier without its trailing content hash
pub fn id_prefix(id: &str) -> &str {
    id.rsplit_once("__").map(|(prefix, _)| prefix).unwrap_or(id)
}

/// Chapter path with characters unsafe for identifiers replaced
pub fn safe_chapter_path(chapter_path: &str) -> String {
    UNSAFE_PATH_CHARS.replace_all(chapter_path, "_").into_owned()
}

/// Trimmed inner markup with whitespace runs collapsed to one space
pub fn normalize_inner(inner: &str) -> String {
    WHITESPACE_RUN.replace_all(inner.trim(), " ").into_owned()
}

/// Deterministic segment identifier
pub fn segment_id(chapter_path: &str, ordinal: usize, inner: &str) -> String {
    let digest = Sha256::digest(normalize_inner(inner).as_bytes());
    let hash: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    format!(
        "{}__{:06}__{}",
        safe_chapter_path(chapter_path),
        ordinal,
        &hash[..ID_HASH_WIDTH]
    )
}

/// Tag-name sets driving extraction
#[derive(Debug, Clone)]
pub struct ExtractionRules {
    pub block_tags: HashSet<String>,
    pub excluded_ancestors: HashSet<String>,
}

impl ExtractionRules {
    pub fn new<S: AsRef<str>>(block_tags: &[S], excluded_ancestors: &[S]) -> Self {
        let lower = |items: &[S]| -> HashSet<String> {
            items.iter().map(|s| s.as_ref().trim().to_ascii_lowercase()).collect()
        };
        Self {
            block_tags: lower(block_tags),
            excluded_ancestors: lower(excluded_ancestors),
        }
    }
}

/// A parsed chapter together with its segments
#[derive(Debug, Clone)]
pub struct ChapterDocument {
    pub path: String,
    pub tree: MarkupTree,
    pub segments: Vec<Segment>,
    /// Encoding the chapter bytes were read in
    pub encoding: &'static encoding_rs::Encoding,
}

impl ChapterDocument {
    /// Decode chapter bytes, parse them leniently and extract segments
    pub fn parse(path: &str, bytes: &[u8], rules: &ExtractionRules) -> Result<Self, DocumentError> {
        let DecodedMarkup { text, encoding } = encoding::decode_markup(bytes);
        if encoding != encoding_rs::UTF_8 {
            debug!("{} decoded as {}", path, encoding.name());
        }
        let tree = MarkupTree::parse(&text)?;
        let segments = extract_segments(&tree, path, rules)?;
        debug!("Extracted {} segments from {}", segments.len(), path);
        Ok(Self { path: path.to_string(), tree, segments, encoding })
    }

    /// Replace a segment's inner markup in the tree
    pub fn apply(&mut self, segment: &Segment, translated_inner: &str) -> Result<(), DocumentError> {
        self.tree.replace_inner(segment.node, translated_inner)
    }

    /// UTF-8 bytes of the chapter
    pub fn to_bytes(&self) -> Result<Vec<u8>, DocumentError> {
        let markup = self.tree.to_markup()?;
        if self.encoding == encoding_rs::UTF_8 {
            return Ok(markup.into_bytes());
        }
        Ok(encoding::declare_utf8(&markup).into_bytes())
    }
}

/// Ordered segments of a chapter tree
pub fn extract_segments(
    tree: &MarkupTree,
    chapter_path: &str,
    rules: &ExtractionRules,
) -> Result<Vec<Segment>, DocumentError> {
    let mut segments = Vec::new();

    for (ordinal, node) in tree
        .find_outermost(&rules.block_tags, &rules.excluded_ancestors)
        .into_iter()
        .enumerate()
    {
        let plain = tree.plain_text(node);
        if !plain.chars().any(char::is_alphabetic) {
            continue;
        }
        let inner = tree.inner_markup(node)?;
        if inner.trim().is_empty() {
            continue;
        }
        segments.push(Segment {
            ordinal,
            node,
            id: segment_id(chapter_path, ordinal, &inner),
            inner,
            plain,
            context_hint: String::new(),
        });
    }

    Ok(segments)
}
