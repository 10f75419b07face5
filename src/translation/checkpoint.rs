/*!
 * Checkpoint record for resumable runs.
 */

use anyhow::{Context, Result};
use chrono::Utc;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::file_utils::FileManager;

pub const CHECKPOINT_VERSION: u32 = 1;

/// Durable marker of fully translated chapters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub version: u32,
    pub input_epub: PathBuf,
    pub output_epub: PathBuf,
    /// Partial snapshot the run resumes from
    pub wip_epub: PathBuf,
    pub completed_chapters: BTreeSet<String>,
    pub processed_files: usize,
    pub spine_total_files: usize,
    pub updated_at: String,
}

impl CheckpointRecord {
    pub fn new(input_epub: &Path, output_epub: &Path, wip_epub: &Path, spine_total_files: usize) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            input_epub: input_epub.to_path_buf(),
            output_epub: output_epub.to_path_buf(),
            wip_epub: wip_epub.to_path_buf(),
            completed_chapters: BTreeSet::new(),
            processed_files: 0,
            spine_total_files,
            updated_at: Utc::now().to_rfc3339(),
        }
    }

    /// Load a checkpoint; unreadable or foreign-version files yield None
    pub fn load(path: &Path) -> Option<Self> {
        let content = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str::<CheckpointRecord>(&content) {
            Ok(record) if record.version == CHECKPOINT_VERSION => Some(record),
            Ok(record) => {
                warn!("Ignoring checkpoint {:?} with version {}", path, record.version);
                None
            }
            Err(e) => {
                warn!("Ignoring unreadable checkpoint {:?}: {}", path, e);
                None
            }
        }
    }

    /// Whether this checkpoint belongs to a run over the same files
    pub fn matches(&self, input_epub: &Path, output_epub: &Path) -> bool {
        self.input_epub == input_epub && self.output_epub == output_epub && self.wip_epub.exists()
    }

    pub fn is_completed(&self, chapter_path: &str) -> bool {
        self.completed_chapters.contains(chapter_path)
    }

    pub fn mark_completed(&mut self, chapter_path: &str) {
        self.completed_chapters.insert(chapter_path.to_string());
    }

    /// Write atomically, refreshing `updated_at`
    pub fn save(&mut self, path: &Path) -> Result<()> {
        self.updated_at = Utc::now().to_rfc3339();
        let json = serde_json::to_vec_pretty(self).context("Failed to serialize checkpoint")?;
        FileManager::write_atomic(path, &json)?;
        debug!(
            "Checkpoint saved: {}/{} files, {} chapters complete",
            self.processed_files,
            self.spine_total_files,
            self.completed_chapters.len()
        );
        Ok(())
    }
}
