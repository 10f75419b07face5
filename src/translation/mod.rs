/*!
 * Translation of extracted segments through an LLM backend.
 *
 * - `batch`: groups segments under character and count limits
 * - `prompts`: prompt text and the `<batch>` wire format
 * - `context`: neighbour hints shown alongside a batch
 * - `quotes`: target-language quotation marks and apostrophes
 * - `response`: sanitizing and parsing provider output
 * - `strategy`: batch, split and per-segment fallback
 * - `cache`: append-only reuse cache
 * - `checkpoint`: resumable run record
 * - `progress`: machine-readable progress lines
 * - `pipeline`: the end-to-end run
 */

pub mod batch;
pub mod cache;
pub mod checkpoint;
pub mod context;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod quotes;
pub mod response;
pub mod strategy;

pub use batch::{build_batches, BatchLimits};
pub use cache::{CacheHit, ReuseCache};
pub use checkpoint::CheckpointRecord;
pub use pipeline::{ReuseSource, RunSummary, StateStores, TranslationPipeline};
pub use progress::ProgressReporter;
pub use prompts::PromptBuilder;
pub use strategy::{BatchOutcome, BatchStrategy, ProviderPolicy, StrategySettings};
