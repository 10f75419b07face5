/*!
 * Database entity models.
 *
 * These structures map directly to database tables and provide
 * type-safe access to persisted data.
 */

use serde::{Deserialize, Serialize};
use std::fmt;

/// State of one segment in the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerStatus {
    /// Known but not yet attempted
    Pending,
    /// A provider call is in flight
    Processing,
    /// Translated and stored
    Completed,
    /// Last attempt failed
    Error,
}

impl LedgerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerStatus::Pending => "PENDING",
            LedgerStatus::Processing => "PROCESSING",
            LedgerStatus::Completed => "COMPLETED",
            LedgerStatus::Error => "ERROR",
        }
    }
}

impl fmt::Display for LedgerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for LedgerStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PENDING" => Ok(LedgerStatus::Pending),
            "PROCESSING" => Ok(LedgerStatus::Processing),
            "COMPLETED" => Ok(LedgerStatus::Completed),
            "ERROR" => Ok(LedgerStatus::Error),
            _ => Err(anyhow::anyhow!("Invalid ledger status: {}", s)),
        }
    }
}

/// Ledger scope: one project and pipeline step
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LedgerScope {
    pub project_id: i64,
    pub run_step: String,
}

impl LedgerScope {
    pub fn new(project_id: i64, run_step: impl Into<String>) -> Self {
        Self {
            project_id,
            run_step: run_step.into(),
        }
    }
}

/// Ledger row record
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerRow {
    pub segment_id: String,
    pub chapter_path: String,
    pub status: LedgerStatus,
    pub source_hash: Option<String>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub translated_inner: Option<String>,
    pub error_message: Option<String>,
    pub attempt_count: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// Row counts per status for a scope
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScopeCounts {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub error: usize,
}

impl ScopeCounts {
    pub fn total(&self) -> usize {
        self.pending + self.processing + self.completed + self.error
    }
}

impl fmt::Display for ScopeCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pending {}, processing {}, completed {}, error {}",
            self.pending, self.processing, self.completed, self.error
        )
    }
}

/// Translation memory record
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryRecord {
    pub source_text: String,
    pub target_text: String,
    pub source_lang: String,
    pub target_lang: String,
    pub score: f64,
}

/// Translation memory lookup result
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryMatch {
    pub target_text: String,
    pub source_text: String,
    /// 1.0 for an exact normalized match
    pub similarity: f64,
}
