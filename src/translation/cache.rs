/*!
 * Append-only reuse cache.
 *
 * One JSON object per line, `{"id": ..., "translation": ...}`. The whole
 * file is loaded at start into two maps: by full segment id, and by id
 * prefix (chapter and ordinal) for segments whose content changed slightly.
 * Later lines win. Every insert is appended and flushed immediately.
 */

use anyhow::{Context, Result};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::document::segments::id_prefix;

/// One cache line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub id: String,
    pub translation: String,
}

/// How a cached translation was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheHit {
    Exact,
    Prefix,
}

/// Segment-id keyed reuse cache
#[derive(Debug, Default)]
pub struct ReuseCache {
    path: Option<PathBuf>,
    file: Option<File>,
    exact: HashMap<String, String>,
    by_prefix: HashMap<String, String>,
}

impl ReuseCache {
    /// Cache that is kept in memory only
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load `path` (created if missing) and open it for appending
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create cache directory: {:?}", parent))?;
        }

        let mut cache = Self {
            path: Some(path.clone()),
            ..Self::default()
        };

        let mut needs_newline = false;
        if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read cache file: {:?}", path))?;
            needs_newline = !content.is_empty() && !content.ends_with('\n');
            let mut skipped = 0usize;
            for line in content.lines().filter(|l| !l.trim().is_empty()) {
                match serde_json::from_str::<CacheEntry>(line) {
                    Ok(entry) => cache.remember(entry.id, entry.translation),
                    Err(_) => skipped += 1,
                }
            }
            if skipped > 0 {
                warn!("Cache {:?}: skipped {} unreadable lines", path, skipped);
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open cache file for append: {:?}", path))?;
        if needs_newline {
            // Terminate a line cut short by an interrupted write
            writeln!(file).context("Failed to repair cache file")?;
        }
        cache.file = Some(file);
        debug!("Cache {:?}: {} entries loaded", path, cache.exact.len());
        Ok(cache)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn len(&self) -> usize {
        self.exact.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty()
    }

    fn remember(&mut self, id: String, translation: String) {
        self.by_prefix.insert(id_prefix(&id).to_string(), translation.clone());
        self.exact.insert(id, translation);
    }

    /// Translation stored under exactly `id`
    pub fn get_exact(&self, id: &str) -> Option<&str> {
        self.exact.get(id).map(String::as_str)
    }

    /// Translation stored for the same chapter and ordinal
    pub fn get_by_prefix(&self, id: &str) -> Option<&str> {
        self.by_prefix.get(id_prefix(id)).map(String::as_str)
    }

    /// Exact lookup, then prefix fallback
    pub fn lookup(&self, id: &str) -> Option<(&str, CacheHit)> {
        self.get_exact(id)
            .map(|t| (t, CacheHit::Exact))
            .or_else(|| self.get_by_prefix(id).map(|t| (t, CacheHit::Prefix)))
    }

    /// Record a translation; unchanged entries are not appended again
    pub fn insert(&mut self, id: &str, translation: &str) -> Result<()> {
        if self.get_exact(id) == Some(translation) {
            return Ok(());
        }

        if let Some(file) = self.file.as_mut() {
            let line = serde_json::to_string(&CacheEntry {
                id: id.to_string(),
                translation: translation.to_string(),
            })?;
            writeln!(file, "{}", line).context("Failed to append to cache file")?;
            file.flush().context("Failed to flush cache file")?;
        }

        self.remember(id.to_string(), translation.to_string());
        Ok(())
    }
}
