/*!
 * Idempotent per-segment ledger.
 *
 * One row per `(project, step, segment id)`. Every write is an upsert on
 * that key, so repeating a write after a crash is harmless. Rows left in
 * `PROCESSING` by a killed run are returned to `PENDING` when the ledger is
 * opened.
 */

use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use log::{debug, info};
use rusqlite::{params, OptionalExtension, Row};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::time::Duration;

use super::connection::DatabaseConnection;
use super::models::{LedgerRow, LedgerScope, LedgerStatus, ScopeCounts};

/// Longest stored error message, in characters
pub const MAX_ERROR_CHARS: usize = 2000;

/// Lower bound for the staleness threshold
pub const MIN_STALE_AGE: Duration = Duration::from_secs(60);

const ROW_COLUMNS: &str = "segment_id, chapter_path, status, source_hash, provider, model, \
     translated_inner, error_message, attempt_count, created_at, updated_at";

/// A segment to register before a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedEntry {
    pub segment_id: String,
    pub chapter_path: String,
    pub source_hash: String,
}

/// UTC timestamp with a fixed width so text comparison orders correctly
pub fn timestamp_now() -> String {
    format_timestamp(Utc::now())
}

fn format_timestamp(at: chrono::DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((pos, _)) => text[..pos].to_string(),
        None => text.to_string(),
    }
}

fn map_row(row: &Row<'_>) -> rusqlite::Result<LedgerRow> {
    let status: String = row.get(2)?;
    Ok(LedgerRow {
        segment_id: row.get(0)?,
        chapter_path: row.get(1)?,
        status: LedgerStatus::from_str(&status).unwrap_or(LedgerStatus::Pending),
        source_hash: row.get(3)?,
        provider: row.get(4)?,
        model: row.get(5)?,
        translated_inner: row.get(6)?,
        error_message: row.get(7)?,
        attempt_count: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

/// Segment ledger bound to one scope
#[derive(Debug, Clone)]
pub struct SegmentLedger {
    db: DatabaseConnection,
    scope: LedgerScope,
}

impl SegmentLedger {
    /// Bind to `scope` and recover rows left `PROCESSING` for longer than `stale_after`
    pub async fn open(db: DatabaseConnection, scope: LedgerScope, stale_after: Duration) -> Result<Self> {
        let ledger = Self { db, scope };
        let reset = ledger.reset_stale_processing(stale_after).await?;
        if reset > 0 {
            info!(
                "Ledger: reset {} stale PROCESSING rows to PENDING (project {}, step {})",
                reset, ledger.scope.project_id, ledger.scope.run_step
            );
        }
        Ok(ledger)
    }

    pub fn scope(&self) -> &LedgerScope {
        &self.scope
    }

    /// Return `PROCESSING` rows older than `max_age` to `PENDING`
    pub async fn reset_stale_processing(&self, max_age: Duration) -> Result<usize> {
        let max_age = max_age.max(MIN_STALE_AGE);
        let age = ChronoDuration::from_std(max_age)?;
        let cutoff = format_timestamp(Utc::now() - age);
        let now = timestamp_now();
        let scope = self.scope.clone();

        self.db
            .execute_async(move |conn| {
                let changed = conn.execute(
                    "UPDATE segment_ledger SET status = 'PENDING', updated_at = ?1
                     WHERE project_id = ?2 AND run_step = ?3 AND status = 'PROCESSING' AND updated_at < ?4",
                    params![now, scope.project_id, scope.run_step, cutoff],
                )?;
                Ok(changed)
            })
            .await
    }

    /// Insert a `PENDING` row unless one exists
    pub async fn ensure_pending(&self, segment_id: &str, chapter_path: &str, source_hash: &str) -> Result<()> {
        self.ensure_pending_many(vec![SeedEntry {
            segment_id: segment_id.to_string(),
            chapter_path: chapter_path.to_string(),
            source_hash: source_hash.to_string(),
        }])
        .await
        .map(|_| ())
    }

    /// Insert `PENDING` rows for entries not yet known; returns how many were added
    pub async fn ensure_pending_many(&self, entries: Vec<SeedEntry>) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }
        let scope = self.scope.clone();
        let now = timestamp_now();

        self.db
            .transaction_async(move |tx| {
                let mut stmt = tx.prepare(
                    "INSERT INTO segment_ledger
                        (project_id, run_step, segment_id, chapter_path, status, source_hash, attempt_count, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, 'PENDING', ?5, 0, ?6, ?6)
                     ON CONFLICT(project_id, run_step, segment_id) DO NOTHING",
                )?;
                let mut inserted = 0;
                for entry in &entries {
                    inserted += stmt.execute(params![
                        scope.project_id,
                        scope.run_step,
                        entry.segment_id,
                        entry.chapter_path,
                        entry.source_hash,
                        now,
                    ])?;
                }
                Ok(inserted)
            })
            .await
    }

    /// Register every segment of a document and drop rows for ids no longer present
    ///
    /// Returns `(inserted, pruned)`.
    pub async fn seed_from_document(&self, entries: Vec<SeedEntry>) -> Result<(usize, usize)> {
        let keep: HashSet<String> = entries.iter().map(|e| e.segment_id.clone()).collect();
        let inserted = self.ensure_pending_many(entries).await?;
        let pruned = self.prune_scope_to_segment_ids(keep).await?;
        debug!("Ledger seeded: {} new rows, {} pruned", inserted, pruned);
        Ok((inserted, pruned))
    }

    /// Move a segment to `PROCESSING` and count the attempt
    pub async fn mark_processing(
        &self,
        segment_id: &str,
        chapter_path: &str,
        provider: &str,
        model: &str,
    ) -> Result<()> {
        let scope = self.scope.clone();
        let (segment_id, chapter_path, provider, model) =
            (segment_id.to_string(), chapter_path.to_string(), provider.to_string(), model.to_string());
        let now = timestamp_now();

        self.db
            .execute_async(move |conn| {
                conn.execute(
                    "INSERT INTO segment_ledger
                        (project_id, run_step, segment_id, chapter_path, status, provider, model, attempt_count, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, 'PROCESSING', ?5, ?6, 1, ?7, ?7)
                     ON CONFLICT(project_id, run_step, segment_id) DO UPDATE SET
                        status = 'PROCESSING',
                        provider = excluded.provider,
                        model = excluded.model,
                        attempt_count = segment_ledger.attempt_count + 1,
                        updated_at = excluded.updated_at",
                    params![scope.project_id, scope.run_step, segment_id, chapter_path, provider, model, now],
                )?;
                Ok(())
            })
            .await
    }

    /// Store a translation and move the segment to `COMPLETED`
    pub async fn mark_completed(
        &self,
        segment_id: &str,
        chapter_path: &str,
        translated_inner: &str,
        provider: &str,
        model: &str,
    ) -> Result<()> {
        let scope = self.scope.clone();
        let (segment_id, chapter_path, translated_inner, provider, model) = (
            segment_id.to_string(),
            chapter_path.to_string(),
            translated_inner.to_string(),
            provider.to_string(),
            model.to_string(),
        );
        let now = timestamp_now();

        self.db
            .execute_async(move |conn| {
                conn.execute(
                    "INSERT INTO segment_ledger
                        (project_id, run_step, segment_id, chapter_path, status, provider, model, translated_inner, attempt_count, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, 'COMPLETED', ?5, ?6, ?7, 0, ?8, ?8)
                     ON CONFLICT(project_id, run_step, segment_id) DO UPDATE SET
                        status = 'COMPLETED',
                        provider = excluded.provider,
                        model = excluded.model,
                        translated_inner = excluded.translated_inner,
                        error_message = NULL,
                        updated_at = excluded.updated_at",
                    params![
                        scope.project_id,
                        scope.run_step,
                        segment_id,
                        chapter_path,
                        provider,
                        model,
                        translated_inner,
                        now
                    ],
                )?;
                Ok(())
            })
            .await
    }

    /// Record a failed attempt
    pub async fn mark_error(&self, segment_id: &str, chapter_path: &str, message: &str) -> Result<()> {
        let scope = self.scope.clone();
        let (segment_id, chapter_path) = (segment_id.to_string(), chapter_path.to_string());
        let message = truncate_chars(message, MAX_ERROR_CHARS);
        let now = timestamp_now();

        self.db
            .execute_async(move |conn| {
                conn.execute(
                    "INSERT INTO segment_ledger
                        (project_id, run_step, segment_id, chapter_path, status, error_message, attempt_count, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, 'ERROR', ?5, 0, ?6, ?6)
                     ON CONFLICT(project_id, run_step, segment_id) DO UPDATE SET
                        status = 'ERROR',
                        error_message = excluded.error_message,
                        updated_at = excluded.updated_at",
                    params![scope.project_id, scope.run_step, segment_id, chapter_path, message, now],
                )?;
                Ok(())
            })
            .await
    }

    /// Row for one segment
    pub async fn get(&self, segment_id: &str) -> Result<Option<LedgerRow>> {
        let scope = self.scope.clone();
        let segment_id = segment_id.to_string();

        self.db
            .execute_async(move |conn| {
                let row = conn
                    .query_row(
                        &format!(
                            "SELECT {} FROM segment_ledger WHERE project_id = ?1 AND run_step = ?2 AND segment_id = ?3",
                            ROW_COLUMNS
                        ),
                        params![scope.project_id, scope.run_step, segment_id],
                        map_row,
                    )
                    .optional()?;
                Ok(row)
            })
            .await
    }

    /// Rows of one chapter keyed by segment id
    pub async fn load_chapter_states(&self, chapter_path: &str) -> Result<HashMap<String, LedgerRow>> {
        let scope = self.scope.clone();
        let chapter_path = chapter_path.to_string();

        self.db
            .execute_async(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM segment_ledger WHERE project_id = ?1 AND run_step = ?2 AND chapter_path = ?3",
                    ROW_COLUMNS
                ))?;
                let rows = stmt
                    .query_map(params![scope.project_id, scope.run_step, chapter_path], map_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows.into_iter().map(|r| (r.segment_id.clone(), r)).collect())
            })
            .await
    }

    /// Delete rows of the scope whose id is not in `keep`
    pub async fn prune_scope_to_segment_ids(&self, keep: HashSet<String>) -> Result<usize> {
        let scope = self.scope.clone();

        self.db
            .transaction_async(move |tx| {
                let existing: Vec<String> = {
                    let mut stmt =
                        tx.prepare("SELECT segment_id FROM segment_ledger WHERE project_id = ?1 AND run_step = ?2")?;
                    let ids = stmt
                        .query_map(params![scope.project_id, scope.run_step], |row| row.get(0))?
                        .collect::<rusqlite::Result<Vec<String>>>()?;
                    ids
                };

                let mut delete = tx.prepare(
                    "DELETE FROM segment_ledger WHERE project_id = ?1 AND run_step = ?2 AND segment_id = ?3",
                )?;
                let mut removed = 0;
                for id in existing.iter().filter(|id| !keep.contains(*id)) {
                    removed += delete.execute(params![scope.project_id, scope.run_step, id])?;
                }
                Ok(removed)
            })
            .await
    }

    /// Row counts per status
    pub async fn scope_counts(&self) -> Result<ScopeCounts> {
        let scope = self.scope.clone();

        self.db
            .execute_async(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT status, COUNT(*) FROM segment_ledger WHERE project_id = ?1 AND run_step = ?2 GROUP BY status",
                )?;
                let pairs = stmt
                    .query_map(params![scope.project_id, scope.run_step], |row| {
                        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;

                let mut counts = ScopeCounts::default();
                for (status, count) in pairs {
                    let count = count.max(0) as usize;
                    match LedgerStatus::from_str(&status) {
                        Ok(LedgerStatus::Pending) => counts.pending += count,
                        Ok(LedgerStatus::Processing) => counts.processing += count,
                        Ok(LedgerStatus::Completed) => counts.completed += count,
                        Ok(LedgerStatus::Error) => counts.error += count,
                        Err(_) => {}
                    }
                }
                Ok(counts)
            })
            .await
    }
}
