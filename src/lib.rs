/*!
 * # epubtrans - EPUB translation through LLM backends
 *
 * Translates the chapters of an EPUB through a local (Ollama) or remote
 * (Gemini) model while keeping markup intact, and survives interruption:
 * every finished batch is persisted and a run resumes where it stopped.
 *
 * ## Architecture
 *
 * - `app_config`: JSON configuration with per-field defaults
 * - `document`: EPUB container, markup tree, segment extraction, atomic writer
 * - `providers`: the `LlmClient` contract and its Ollama, Gemini and mock clients
 * - `translation`: batching, prompts, response parsing, fallback strategy,
 *   reuse cache, checkpoints, progress and the pipeline itself
 * - `database`: SQLite segment ledger and translation memory
 * - `validation`: language guard and standalone document validator
 * - `file_utils`, `language_utils`: file system and ISO 639 helpers
 * - `errors`: typed errors per layer
 */

#![allow(clippy::uninlined_format_args)]

pub mod app_config;
pub mod database;
pub mod document;
pub mod errors;
pub mod file_utils;
pub mod language_utils;
pub mod providers;
pub mod translation;
pub mod validation;

pub use app_config::Config;
pub use errors::{DocumentError, ProviderError, TranslationError};
pub use language_utils::{get_language_name, language_codes_match, normalize_to_part2t};
pub use providers::{build_client, LlmClient};
pub use translation::{RunSummary, StateStores, TranslationPipeline};
pub use validation::{DocumentValidator, ValidationReport, Verdict};
