/*!
 * Common test utilities for the epubtrans test suite
 */

#![allow(dead_code)]

use anyhow::Result;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use zip::write::FileOptions;
use zip::CompressionMethod;

use epubtrans::app_config::{Config, TranslationProvider};
use epubtrans::translation::{ProgressReporter, RunSummary, StateStores, TranslationPipeline};
use epubtrans::LlmClient;

/// Routes crate logs to the test harness; `RUST_LOG=debug` shows them
pub fn init_test_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Creates a temporary directory for test files
pub fn create_temp_dir() -> Result<TempDir> {
    Ok(TempDir::new()?)
}

/// Creates a test file with the given content in the specified directory
pub fn create_test_file(dir: &Path, filename: &str, content: &str) -> Result<PathBuf> {
    let file_path = dir.join(filename);
    if let Some(parent) = file_path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&file_path, content)?;
    Ok(file_path)
}

/// Wraps body markup in a minimal XHTML document
pub fn xhtml(title: &str, body: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n\
         <html xmlns=\"http://www.w3.org/1999/xhtml\"><head><title>{}</title></head>\n\
         <body>{}</body></html>",
        title, body
    )
}

/// Builder for small EPUB fixtures
///
/// Chapters live under `OEBPS/` and are listed in manifest and spine in the
/// order they were added. A stylesheet is always included so tests can check
/// that non-content entries survive untouched.
#[derive(Debug, Default)]
pub struct EpubBuilder {
    chapters: Vec<(String, String)>,
    extra: Vec<(String, Vec<u8>, bool)>,
    spine_only: Vec<String>,
}

pub const STYLESHEET: &str = "body { font-family: serif; }\np { text-indent: 1em; }\n";

impl EpubBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a chapter file `OEBPS/<name>` with the given document
    pub fn chapter(mut self, name: &str, document: impl Into<String>) -> Self {
        self.chapters.push((name.to_string(), document.into()));
        self
    }

    /// Adds an arbitrary entry; `stored` skips compression
    pub fn entry(mut self, name: &str, bytes: impl Into<Vec<u8>>, stored: bool) -> Self {
        self.extra.push((name.to_string(), bytes.into(), stored));
        self
    }

    /// Lists `OEBPS/<name>` in manifest and spine without writing the file
    pub fn missing_chapter(mut self, name: &str) -> Self {
        self.spine_only.push(name.to_string());
        self
    }

    fn package_document(&self) -> String {
        let mut manifest = String::from(
            "<item id=\"css\" href=\"style.css\" media-type=\"text/css\"/>\n",
        );
        let mut spine = String::new();
        let names = self
            .chapters
            .iter()
            .map(|(name, _)| name.as_str())
            .chain(self.spine_only.iter().map(String::as_str));
        for (index, name) in names.enumerate() {
            manifest.push_str(&format!(
                "<item id=\"ch{}\" href=\"{}\" media-type=\"application/xhtml+xml\"/>\n",
                index, name
            ));
            spine.push_str(&format!("<itemref idref=\"ch{}\"/>\n", index));
        }
        format!(
            "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n\
             <package xmlns=\"http://www.idpf.org/2007/opf\" version=\"3.0\" unique-identifier=\"id\">\n\
             <metadata xmlns:dc=\"http://purl.org/dc/elements/1.1/\"><dc:title>Fixture</dc:title></metadata>\n\
             <manifest>\n{}</manifest>\n<spine>\n{}</spine>\n</package>\n",
            manifest, spine
        )
    }

    /// Writes the archive to `path`
    pub fn build(&self, path: &Path) -> Result<PathBuf> {
        let file = File::create(path)?;
        let mut zip = zip::ZipWriter::new(file);
        let stored = FileOptions::default().compression_method(CompressionMethod::Stored);
        let deflated = FileOptions::default().compression_method(CompressionMethod::Deflated);

        zip.start_file("mimetype", stored)?;
        zip.write_all(b"application/epub+zip")?;

        zip.start_file("META-INF/container.xml", deflated)?;
        zip.write_all(
            b"<?xml version=\"1.0\"?>\n<container version=\"1.0\" xmlns=\"urn:oasis:names:tc:opendocument:xmlns:container\">\
              <rootfiles><rootfile full-path=\"OEBPS/content.opf\" media-type=\"application/oebps-package+xml\"/></rootfiles></container>",
        )?;

        zip.start_file("OEBPS/content.opf", deflated)?;
        zip.write_all(self.package_document().as_bytes())?;

        zip.start_file("OEBPS/style.css", deflated)?;
        zip.write_all(STYLESHEET.as_bytes())?;

        for (name, document) in &self.chapters {
            zip.start_file(format!("OEBPS/{}", name), deflated)?;
            zip.write_all(document.as_bytes())?;
        }
        for (name, bytes, is_stored) in &self.extra {
            zip.start_file(name.as_str(), if *is_stored { stored } else { deflated })?;
            zip.write_all(bytes)?;
        }

        zip.finish()?;
        Ok(path.to_path_buf())
    }
}

/// Reads every entry of an archive, keyed by name
pub fn read_entries(path: &Path) -> Result<BTreeMap<String, Vec<u8>>> {
    let mut archive = zip::ZipArchive::new(File::open(path)?)?;
    let mut entries = BTreeMap::new();
    for index in 0..archive.len() {
        let mut file = archive.by_index(index)?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        entries.insert(file.name().to_string(), bytes);
    }
    Ok(entries)
}

/// Reads one entry of an archive as UTF-8
pub fn read_entry_string(path: &Path, name: &str) -> Result<String> {
    let entries = read_entries(path)?;
    let bytes = entries
        .get(name)
        .ok_or_else(|| anyhow::anyhow!("entry {} not found in {:?}", name, path))?;
    Ok(String::from_utf8(bytes.clone())?)
}

/// A config for running the pipeline inside `dir` with every store disabled
pub fn test_config(dir: &Path, input: &Path, output: &Path) -> Config {
    let mut config = Config::default();
    config.source_language = "en".to_string();
    config.target_language = "pl".to_string();
    config.translation.provider = TranslationProvider::Ollama;
    config.translation.common.backoff_secs = vec![0];
    config.document.input_path = input.to_path_buf();
    config.document.output_path = output.to_path_buf();
    config.document.checkpoint_every = 1;
    config.storage.cache_path = None;
    config.storage.database_path = Some(dir.join("state.db"));
    config.storage.use_ledger = false;
    config.storage.use_memory = false;
    config
}

/// Runs the pipeline once with silent progress
pub async fn run_pipeline<C: LlmClient + ?Sized>(config: &Config, client: &C) -> Result<RunSummary> {
    init_test_logging();
    let stores = StateStores::open(config).await?;
    let mut pipeline = TranslationPipeline::new(config.clone(), client, stores)?.with_progress(ProgressReporter::silent());
    Ok(pipeline.run().await?)
}

/// A request seen by `MockHttpServer`
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
    pub received_at: Instant,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).unwrap_or(serde_json::Value::Null)
    }
}

/// A canned HTTP response
#[derive(Debug, Clone)]
pub struct CannedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl CannedResponse {
    pub fn json(status: u16, body: impl Into<String>) -> Self {
        Self { status, headers: Vec::new(), body: body.into() }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    fn to_http(&self) -> String {
        let reason = match self.status {
            200 => "OK",
            400 => "Bad Request",
            403 => "Forbidden",
            404 => "Not Found",
            413 => "Payload Too Large",
            429 => "Too Many Requests",
            500 => "Internal Server Error",
            503 => "Service Unavailable",
            _ => "Unknown",
        };
        let mut out = format!(
            "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n",
            self.status,
            reason,
            self.body.len()
        );
        for (name, value) in &self.headers {
            out.push_str(&format!("{}: {}\r\n", name, value));
        }
        out.push_str("\r\n");
        out.push_str(&self.body);
        out
    }
}

/// One-connection-per-request HTTP server answering from a fixed script
pub struct MockHttpServer {
    pub base_url: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockHttpServer {
    /// Binds to a free local port and serves `responses` in order
    pub async fn start(responses: Vec<CannedResponse>) -> Result<Self> {
        init_test_logging();
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let base_url = format!("http://{}", listener.local_addr()?);
        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&requests);

        tokio::spawn(async move {
            for response in responses {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                if let Some(request) = read_request(&mut socket).await {
                    if let Ok(mut log) = recorded.lock() {
                        log.push(request);
                    }
                }
                let _ = socket.write_all(response.to_http().as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        Ok(Self { base_url, requests })
    }

    /// Requests received so far
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

async fn read_request(socket: &mut TcpStream) -> Option<RecordedRequest> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buffer.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buffer.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };
    let received_at = Instant::now();

    let head = String::from_utf8_lossy(&buffer[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let path = request_line.next()?.to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();

    let content_length = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);
    while buffer.len() < header_end + content_length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..n]);
    }
    let body_end = buffer.len().min(header_end + content_length);
    let body = String::from_utf8_lossy(&buffer[header_end..body_end]).to_string();

    Some(RecordedRequest { method, path, headers, body, received_at })
}
