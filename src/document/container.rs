/*!
 * EPUB container access.
 *
 * Resolves the package document from `META-INF/container.xml`, reads its
 * manifest and spine, and exposes entry bytes by archive path.
 */

use log::{debug, warn};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use url::Url;
use zip::ZipArchive;

use crate::document::encoding::decode_markup;
use crate::document::entities;
use crate::document::markup::start_attribute;
use crate::errors::DocumentError;

pub const CONTAINER_PATH: &str = "META-INF/container.xml";

/// Largest buffer reserved up front when reading an entry
const MAX_PREALLOC: usize = 16 * 1024 * 1024;

/// Media types treated as translatable chapters
pub const CONTENT_MEDIA_TYPES: [&str; 2] = ["application/xhtml+xml", "text/html"];

/// Manifest entry of the package document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestItem {
    pub href: String,
    pub media_type: String,
}

/// Spine entry resolved to an archive path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpineItem {
    pub idref: String,
    /// Archive path, None when the idref has no manifest entry
    pub path: Option<String>,
    pub media_type: String,
}

impl SpineItem {
    pub fn is_content_document(&self) -> bool {
        let media_type = self.media_type.to_ascii_lowercase();
        CONTENT_MEDIA_TYPES.iter().any(|t| media_type.starts_with(t))
    }
}

/// An opened EPUB file
pub struct EpubArchive {
    path: PathBuf,
    archive: ZipArchive<File>,
    opf_path: String,
    manifest: HashMap<String, ManifestItem>,
    spine: Vec<String>,
}

impl std::fmt::Debug for EpubArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EpubArchive")
            .field("path", &self.path)
            .field("opf_path", &self.opf_path)
            .field("spine_len", &self.spine.len())
            .finish()
    }
}

impl EpubArchive {
    /// Open an EPUB and read its package structure
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DocumentError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let archive = ZipArchive::new(file)?;

        let mut epub = Self {
            path,
            archive,
            opf_path: String::new(),
            manifest: HashMap::new(),
            spine: Vec::new(),
        };

        let container = epub.read_text(CONTAINER_PATH)?;
        epub.opf_path = parse_rootfile_path(&container)?;

        let opf = epub.read_text(&epub.opf_path.clone())?;
        let (manifest, spine) = parse_package(&opf)?;
        debug!(
            "Opened {:?}: package {}, {} manifest items, {} spine entries",
            epub.path,
            epub.opf_path,
            manifest.len(),
            spine.len()
        );
        epub.manifest = manifest;
        epub.spine = spine;
        Ok(epub)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn opf_path(&self) -> &str {
        &self.opf_path
    }

    pub fn manifest(&self) -> &HashMap<String, ManifestItem> {
        &self.manifest
    }

    /// Spine in reading order
    pub fn spine_items(&self) -> Vec<SpineItem> {
        self.spine
            .iter()
            .map(|idref| match self.manifest.get(idref) {
                Some(item) => SpineItem {
                    idref: idref.clone(),
                    path: Some(resolve_href(&self.opf_path, &item.href)),
                    media_type: item.media_type.clone(),
                },
                None => {
                    warn!("Spine itemref '{}' has no manifest entry", idref);
                    SpineItem { idref: idref.clone(), path: None, media_type: String::new() }
                }
            })
            .collect()
    }

    /// Archive paths of translatable spine documents in reading order
    pub fn content_documents(&self) -> Vec<String> {
        self.spine_items()
            .into_iter()
            .filter(|item| item.is_content_document())
            .filter_map(|item| item.path)
            .collect()
    }

    /// Number of entries in the archive
    pub fn len(&self) -> usize {
        self.archive.len()
    }

    pub fn is_empty(&self) -> bool {
        self.archive.len() == 0
    }

    pub fn has_entry(&self, name: &str) -> bool {
        self.archive.file_names().any(|n| n == name)
    }

    /// Read an entry fully; the CRC is verified on read
    pub fn read_entry(&mut self, name: &str) -> Result<Vec<u8>, DocumentError> {
        let mut file = self.archive.by_name(name).map_err(|e| match e {
            zip::result::ZipError::FileNotFound => DocumentError::MissingEntry(name.to_string()),
            other => DocumentError::from(other),
        })?;
        let mut bytes = Vec::with_capacity(prealloc_len(file.size()));
        file.read_to_end(&mut bytes)?;
        Ok(bytes)
    }

    /// Read an entry by archive index; returns its name and bytes
    pub fn read_index(&mut self, index: usize) -> Result<(String, Vec<u8>), DocumentError> {
        let mut file = self.archive.by_index(index)?;
        let name = file.name().to_string();
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        Ok((name, bytes))
    }

    fn read_text(&mut self, name: &str) -> Result<String, DocumentError> {
        let bytes = self.read_entry(name)?;
        Ok(decode_markup(&bytes).text)
    }
}

/// Declared sizes come from the archive and are not trusted
fn prealloc_len(declared: u64) -> usize {
    usize::try_from(declared).map_or(MAX_PREALLOC, |len| len.min(MAX_PREALLOC))
}

/// `full-path` of the first rootfile in container.xml
pub fn parse_rootfile_path(container_xml: &str) -> Result<String, DocumentError> {
    let mut reader = Reader::from_str(container_xml);
    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"rootfile" => {
                if let Some(path) = start_attribute(&e, "full-path").filter(|p| !p.is_empty()) {
                    return Ok(path);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Err(DocumentError::Structure("container.xml has no rootfile full-path".to_string()))
}

/// Manifest map and spine idrefs of a package document
pub fn parse_package(opf: &str) -> Result<(HashMap<String, ManifestItem>, Vec<String>), DocumentError> {
    let mut reader = Reader::from_str(opf);
    let mut manifest = HashMap::new();
    let mut spine = Vec::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) => match e.local_name().as_ref() {
                b"item" => {
                    let id = start_attribute(&e, "id");
                    let href = start_attribute(&e, "href");
                    if let (Some(id), Some(href)) = (id, href) {
                        let media_type = start_attribute(&e, "media-type").unwrap_or_default();
                        manifest.insert(id, ManifestItem { href, media_type });
                    }
                }
                b"itemref" => {
                    if let Some(idref) = start_attribute(&e, "idref") {
                        spine.push(idref);
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    if spine.is_empty() {
        return Err(DocumentError::Structure("package document has an empty spine".to_string()));
    }
    Ok((manifest, spine))
}

/// Resolve a manifest href against the package document's directory
///
/// Fragments are dropped and percent-escapes decoded.
pub fn resolve_href(opf_path: &str, href: &str) -> String {
    let opf_dir = match opf_path.rfind('/') {
        Some(pos) => &opf_path[..=pos],
        None => "",
    };

    let resolved = Url::parse("epub:///")
        .and_then(|root| root.join(opf_dir))
        .and_then(|base| base.join(href))
        .map(|mut url| {
            url.set_fragment(None);
            url.set_query(None);
            url.path().trim_start_matches('/').to_string()
        });

    match resolved {
        Ok(path) => percent_decode(&path),
        Err(_) => {
            let joined = format!("{}{}", opf_dir, href);
            joined.split('#').next().unwrap_or_default().to_string()
        }
    }
}

fn percent_decode(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(value) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(value);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    entities::decode(&String::from_utf8_lossy(&out))
}
