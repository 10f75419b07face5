/*!
 * Crash-safe EPUB output.
 *
 * The output container is rebuilt from the source container: `mimetype`
 * comes first and stored, untouched entries are raw-copied with their
 * compressed bytes, and replaced chapters are deflated with the original
 * timestamps. Everything goes to a temp file in the destination directory
 * which is renamed over the destination once complete.
 */

use log::{debug, info};
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::errors::DocumentError;
use crate::file_utils::FileManager;

pub const MIMETYPE_ENTRY: &str = "mimetype";

/// Rewrite `source` into `destination`, substituting `replacements`
///
/// With `backup_keep` set, an existing destination is first copied to a
/// timestamped backup and older backups beyond the limit are pruned.
pub fn write_epub_atomic(
    source: &Path,
    destination: &Path,
    replacements: &HashMap<String, Vec<u8>>,
    backup_keep: Option<usize>,
) -> Result<PathBuf, DocumentError> {
    let mut archive = ZipArchive::new(File::open(source)?)?;

    let dir = FileManager::parent_dir(destination);
    std::fs::create_dir_all(&dir)?;
    let mut tmp = tempfile::Builder::new()
        .prefix(".epubtrans-")
        .suffix(".tmp")
        .tempfile_in(&dir)?;

    {
        let mut zip = ZipWriter::new(tmp.as_file_mut());

        let mimetype_index = (0..archive.len())
            .find(|i| matches!(archive.by_index_raw(*i), Ok(f) if f.name() == MIMETYPE_ENTRY));
        if let Some(index) = mimetype_index {
            let mut content = Vec::new();
            archive.by_index(index)?.read_to_end(&mut content)?;
            let options = FileOptions::default().compression_method(CompressionMethod::Stored);
            zip.start_file(MIMETYPE_ENTRY, options)?;
            zip.write_all(&content)?;
        }

        for index in 0..archive.len() {
            if Some(index) == mimetype_index {
                continue;
            }
            let entry = archive.by_index_raw(index)?;
            match replacements.get(entry.name()) {
                Some(bytes) => {
                    let name = entry.name().to_string();
                    let options = FileOptions::default()
                        .compression_method(CompressionMethod::Deflated)
                        .last_modified_time(entry.last_modified());
                    drop(entry);
                    zip.start_file(name, options)?;
                    zip.write_all(bytes)?;
                }
                None => zip.raw_copy_file(entry)?,
            }
        }

        zip.finish()?;
    }

    tmp.as_file().sync_all()?;

    if let Some(keep) = backup_keep {
        if let Some(backup) = FileManager::rotate_backup(destination, keep)
            .map_err(|e| DocumentError::Io(std::io::Error::other(format!("{:#}", e))))?
        {
            info!("Previous output backed up to {:?}", backup);
        }
    }

    tmp.persist(destination).map_err(|e| DocumentError::Io(e.error))?;
    debug!(
        "Wrote {:?} ({} replaced entries)",
        destination,
        replacements.len()
    );
    Ok(destination.to_path_buf())
}
