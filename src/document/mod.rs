/*!
 * EPUB document handling.
 *
 * - `container`: zip container, package document, manifest and spine
 * - `encoding`: byte decoding for chapters in legacy encodings
 * - `markup`: owned markup tree with lenient and strict parsing
 * - `entities`: HTML named entity table and decoding
 * - `segments`: translatable segment extraction and identifiers
 * - `writer`: atomic output writing with backup rotation
 */

pub mod container;
pub mod encoding;
pub mod entities;
pub mod markup;
pub mod segments;
pub mod writer;

pub use container::{EpubArchive, SpineItem};
pub use markup::MarkupTree;
pub use segments::{ChapterDocument, ExtractionRules, Segment};
pub use writer::write_epub_atomic;
