use anyhow::{Context, Result};
use chrono::Local;
use log::{debug, warn};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

// @module: File and directory utilities

// @struct: File operations utility
pub struct FileManager;

impl FileManager {
    // @checks: File existence
    pub fn file_exists<P: AsRef<Path>>(path: P) -> bool {
        path.as_ref().exists() && path.as_ref().is_file()
    }

    // @creates: Directory and parents if needed
    pub fn ensure_dir<P: AsRef<Path>>(path: P) -> Result<()> {
        let path = path.as_ref();
        if !path.as_os_str().is_empty() && !path.exists() {
            fs::create_dir_all(path)
                .with_context(|| format!("Failed to create directory: {:?}", path))?;
        }
        Ok(())
    }

    // @returns: Directory that holds `path`, `.` for bare file names
    pub fn parent_dir(path: &Path) -> PathBuf {
        match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    /// Write bytes through a temp file in the same directory, then rename into place
    pub fn write_atomic<P: AsRef<Path>>(path: P, content: &[u8]) -> Result<()> {
        let path = path.as_ref();
        let dir = Self::parent_dir(path);
        Self::ensure_dir(&dir)?;

        let mut tmp = tempfile::Builder::new()
            .prefix(".epubtrans-")
            .suffix(".tmp")
            .tempfile_in(&dir)
            .with_context(|| format!("Failed to create temp file in {:?}", dir))?;
        tmp.write_all(content)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path)
            .map_err(|e| e.error)
            .with_context(|| format!("Failed to move temp file onto {:?}", path))?;
        Ok(())
    }

    /// Remove a file, ignoring a missing one
    pub fn remove_if_exists<P: AsRef<Path>>(path: P) -> Result<()> {
        let path = path.as_ref();
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {:?}", path)),
        }
    }

    // @generates: `<stem>.bak-<timestamp><.ext>` beside the file
    pub fn backup_path(path: &Path, timestamp: &str) -> PathBuf {
        let (stem, suffix) = Self::stem_and_suffix(path);
        path.with_file_name(format!("{}.bak-{}{}", stem, timestamp, suffix))
    }

    fn stem_and_suffix(path: &Path) -> (String, String) {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let suffix = path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        (stem, suffix)
    }

    /// Copy an existing file into a timestamped backup and prune old backups
    ///
    /// Returns the backup path, or None when there was nothing to back up.
    pub fn rotate_backup<P: AsRef<Path>>(path: P, keep: usize) -> Result<Option<PathBuf>> {
        let path = path.as_ref();
        if keep == 0 || !Self::file_exists(path) {
            return Ok(None);
        }

        let timestamp = Local::now().format("%Y%m%d-%H%M%S-%3f").to_string();
        let mut backup = Self::backup_path(path, &timestamp);
        let mut counter = 1;
        while backup.exists() {
            backup = Self::backup_path(path, &format!("{}-{}", timestamp, counter));
            counter += 1;
        }

        fs::copy(path, &backup)
            .with_context(|| format!("Failed to back up {:?} to {:?}", path, backup))?;
        debug!("Backed up {:?} to {:?}", path, backup);

        for stale in Self::list_backups(path)?.into_iter().skip(keep) {
            if let Err(e) = fs::remove_file(&stale) {
                warn!("Failed to prune old backup {:?}: {}", stale, e);
            }
        }

        Ok(Some(backup))
    }

    /// Existing backups of `path`, newest first
    pub fn list_backups(path: &Path) -> Result<Vec<PathBuf>> {
        let dir = Self::parent_dir(path);
        let (stem, suffix) = Self::stem_and_suffix(path);
        let prefix = format!("{}.bak-", stem);

        let mut backups = Vec::new();
        for entry in WalkDir::new(&dir).min_depth(1).max_depth(1) {
            let entry = entry.context("Failed to read directory entry")?;
            let name = entry.file_name().to_string_lossy().to_string();
            if entry.file_type().is_file() && name.starts_with(&prefix) && name.ends_with(&suffix) {
                backups.push(entry.path().to_path_buf());
            }
        }

        // Timestamps sort lexicographically
        backups.sort();
        backups.reverse();
        Ok(backups)
    }
}
