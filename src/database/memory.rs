/*!
 * Fuzzy translation memory.
 *
 * Entries are keyed by a hash of the normalized source text (trimmed,
 * whitespace collapsed, lower-cased). Lookup tries the exact hash first and
 * then scores a bounded set of recent candidates of similar length with a
 * normalized Levenshtein similarity.
 */

use anyhow::Result;
use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::{params, OptionalExtension};
use sha2::{Digest, Sha256};

use super::connection::DatabaseConnection;
use super::ledger::timestamp_now;
use super::models::{MemoryMatch, MemoryRecord};

/// Most candidates scored per fuzzy lookup
pub const MAX_FUZZY_CANDIDATES: usize = 2000;

/// Smallest length window, in characters
pub const MIN_LENGTH_WINDOW: usize = 40;

/// Length window as a share of the query length
pub const LENGTH_WINDOW_RATIO: f64 = 0.35;

static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Text form used for hashing and scoring
pub fn normalize_source(text: &str) -> String {
    WHITESPACE_RUN.replace_all(text.trim(), " ").to_lowercase()
}

/// SHA-256 hex of the normalized text
pub fn source_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_source(text).as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Normalized Levenshtein similarity in `0.0..=1.0`
pub fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let distance = levenshtein_distance(&a, &b);
    1.0 - distance as f64 / a.len().max(b.len()) as f64
}

fn levenshtein_distance(a: &[char], b: &[char]) -> usize {
    // Two-row dynamic programming
    let mut prev_row: Vec<usize> = (0..=b.len()).collect();
    let mut curr_row: Vec<usize> = vec![0; b.len() + 1];

    for i in 1..=a.len() {
        curr_row[0] = i;
        for j in 1..=b.len() {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            curr_row[j] = (prev_row[j] + 1)
                .min(curr_row[j - 1] + 1)
                .min(prev_row[j - 1] + cost);
        }
        std::mem::swap(&mut prev_row, &mut curr_row);
    }

    prev_row[b.len()]
}

/// Length window around `len` characters
pub fn length_window(len: usize) -> usize {
    MIN_LENGTH_WINDOW.max((len as f64 * LENGTH_WINDOW_RATIO).round() as usize)
}

/// Translation memory over the shared database
#[derive(Debug, Clone)]
pub struct TranslationMemory {
    db: DatabaseConnection,
    fuzzy_threshold: f64,
    filter_language_pair: bool,
}

impl TranslationMemory {
    pub fn new(db: DatabaseConnection, fuzzy_threshold: f64, filter_language_pair: bool) -> Self {
        Self {
            db,
            fuzzy_threshold: fuzzy_threshold.clamp(0.0, 1.0),
            filter_language_pair,
        }
    }

    pub fn fuzzy_threshold(&self) -> f64 {
        self.fuzzy_threshold
    }

    /// Store a source/target pair; identical pairs are stored once
    pub async fn add(&self, record: MemoryRecord) -> Result<bool> {
        if record.source_text.trim().is_empty() || record.target_text.trim().is_empty() {
            return Ok(false);
        }
        let hash = source_hash(&record.source_text);
        let source_len = normalize_source(&record.source_text).chars().count() as i64;
        let now = timestamp_now();

        self.db
            .execute_async(move |conn| {
                let exists: Option<i64> = conn
                    .query_row(
                        "SELECT id FROM tm_segments
                         WHERE source_hash = ?1 AND source_lang = ?2 AND target_lang = ?3 AND target_text = ?4
                         LIMIT 1",
                        params![hash, record.source_lang, record.target_lang, record.target_text],
                        |row| row.get(0),
                    )
                    .optional()?;
                if exists.is_some() {
                    return Ok(false);
                }

                conn.execute(
                    "INSERT INTO tm_segments
                        (source_hash, source_text, target_text, source_lang, target_lang, source_len, score, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        hash,
                        record.source_text,
                        record.target_text,
                        record.source_lang,
                        record.target_lang,
                        source_len,
                        record.score,
                        now
                    ],
                )?;
                Ok(true)
            })
            .await
    }

    /// Best stored translation for `source_text`, if any reaches the threshold
    pub async fn lookup(&self, source_text: &str, source_lang: &str, target_lang: &str) -> Result<Option<MemoryMatch>> {
        let normalized = normalize_source(source_text);
        if normalized.is_empty() {
            return Ok(None);
        }
        let hash = source_hash(source_text);
        let len = normalized.chars().count();
        let window = length_window(len);
        let min_len = len.saturating_sub(window) as i64;
        let max_len = (len + window) as i64;
        let threshold = self.fuzzy_threshold;
        let filter = self.filter_language_pair && !source_lang.is_empty() && !target_lang.is_empty();
        let (source_lang, target_lang) = (source_lang.to_string(), target_lang.to_string());

        self.db
            .execute_async(move |conn| {
                let lang_clause = if filter { " AND source_lang = ?2 AND target_lang = ?3" } else { "" };

                let exact_sql = format!(
                    "SELECT target_text, source_text FROM tm_segments WHERE source_hash = ?1{}
                     ORDER BY score DESC, id DESC LIMIT 1",
                    lang_clause
                );
                let exact = if filter {
                    conn.query_row(&exact_sql, params![hash, source_lang, target_lang], |row| {
                        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                    })
                    .optional()?
                } else {
                    conn.query_row(&exact_sql, params![hash], |row| {
                        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                    })
                    .optional()?
                };
                if let Some((target_text, source_text)) = exact {
                    return Ok(Some(MemoryMatch { target_text, source_text, similarity: 1.0 }));
                }

                let fuzzy_sql = format!(
                    "SELECT target_text, source_text FROM tm_segments
                     WHERE source_len BETWEEN ?4 AND ?5{}
                     ORDER BY id DESC LIMIT {}",
                    lang_clause, MAX_FUZZY_CANDIDATES
                );
                let mut stmt = conn.prepare(&fuzzy_sql)?;
                let map = |row: &rusqlite::Row<'_>| -> rusqlite::Result<(String, String)> {
                    Ok((row.get(0)?, row.get(1)?))
                };
                let candidates = if filter {
                    stmt.query_map(params![hash, source_lang, target_lang, min_len, max_len], map)?
                        .collect::<rusqlite::Result<Vec<_>>>()?
                } else {
                    stmt.query_map(params![hash, "", "", min_len, max_len], map)?
                        .collect::<rusqlite::Result<Vec<_>>>()?
                };

                let mut best: Option<MemoryMatch> = None;
                for (target_text, source_text) in candidates {
                    let score = similarity(&normalized, &normalize_source(&source_text));
                    if score >= threshold && best.as_ref().map_or(true, |b| score > b.similarity) {
                        best = Some(MemoryMatch { target_text, source_text, similarity: score });
                    }
                }
                if let Some(found) = &best {
                    debug!("TM fuzzy hit at {:.3}", found.similarity);
                }
                Ok(best)
            })
            .await
    }
}
