/*!
 * Language-correctness checks.
 *
 * - `language_guard`: per-segment heuristic used by the pipeline
 * - `document`: standalone audit of a produced EPUB
 */

pub mod document;
pub mod language_guard;

pub use document::{DocumentValidator, SuspiciousSegment, ValidationReport, Verdict};
pub use language_guard::{LanguageGuard, LanguageProfile};
