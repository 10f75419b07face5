/*!
 * SQLite persistence for resumable runs.
 *
 * - `ledger`: per-segment state machine scoped by project and pipeline step
 * - `memory`: fuzzy translation memory shared across documents
 */

pub mod connection;
pub mod ledger;
pub mod memory;
pub mod models;
pub mod schema;

pub use connection::DatabaseConnection;
pub use ledger::{SeedEntry, SegmentLedger};
pub use memory::TranslationMemory;
pub use models::{LedgerRow, LedgerScope, LedgerStatus, MemoryMatch, MemoryRecord, ScopeCounts};
