use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::default::Default;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application configuration module
/// This module handles the application configuration including loading,
/// validating and saving configuration settings.
/// Represents the application configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    /// Source language code (ISO)
    pub source_language: String,

    /// Target language code (ISO)
    pub target_language: String,

    /// Translation config
    #[serde(default)]
    pub translation: TranslationConfig,

    /// Input/output document settings
    #[serde(default)]
    pub document: DocumentConfig,

    /// Cache, ledger and translation memory locations
    #[serde(default)]
    pub storage: StorageConfig,

    /// Standalone validator thresholds
    #[serde(default)]
    pub validation: ValidationConfig,

    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,
}

/// Translation provider type
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TranslationProvider {
    // @provider: Ollama (local host)
    #[default]
    Ollama,
    // @provider: Google Gemini (remote, rate limited)
    Gemini,
}

impl TranslationProvider {
    // @returns: Lowercase provider identifier
    pub fn to_lowercase_string(&self) -> String {
        match self {
            Self::Ollama => "ollama".to_string(),
            Self::Gemini => "gemini".to_string(),
        }
    }

    // @returns: Whether the provider runs on a rate-limited remote API
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Gemini)
    }
}

// Implement Display trait for TranslationProvider
impl std::fmt::Display for TranslationProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_lowercase_string())
    }
}

// Implement FromStr trait for TranslationProvider
impl std::str::FromStr for TranslationProvider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "gemini" | "google" => Ok(Self::Gemini),
            _ => Err(anyhow!("Invalid provider type: {}", s)),
        }
    }
}

/// Provider configuration wrapper
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProviderConfig {
    // @field: Provider type identifier
    #[serde(rename = "type")]
    pub provider_type: String,

    // @field: Model name, empty to resolve from the model listing
    #[serde(default = "String::new")]
    pub model: String,

    // @field: API key
    #[serde(default = "String::new")]
    pub api_key: String,

    // @field: Service URL
    #[serde(default = "String::new")]
    pub endpoint: String,

    // @field: Base timeout seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    // @field: Context window (local provider)
    #[serde(default = "default_context_window")]
    pub context_window: u32,

    // @field: Max output tokens
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,

    // @field: Minimum spacing between requests in milliseconds
    #[serde(default)]
    pub min_interval_ms: u64,

    // @field: Adaptive throttle step in milliseconds
    #[serde(default = "default_throttle_step_ms")]
    pub throttle_step_ms: u64,

    // @field: Adaptive throttle ceiling in milliseconds
    #[serde(default = "default_max_extra_throttle_ms")]
    pub max_extra_throttle_ms: u64,
}

impl ProviderConfig {
    // @param provider_type: Provider enum
    // @returns: Provider config with defaults
    pub fn new(provider_type: TranslationProvider) -> Self {
        match provider_type {
            TranslationProvider::Ollama => Self {
                provider_type: "ollama".to_string(),
                model: String::new(),
                api_key: String::new(),
                endpoint: default_ollama_endpoint(),
                timeout_secs: default_timeout_secs(),
                context_window: default_context_window(),
                max_output_tokens: default_max_output_tokens(),
                min_interval_ms: 0,
                throttle_step_ms: default_throttle_step_ms(),
                max_extra_throttle_ms: default_max_extra_throttle_ms(),
            },
            TranslationProvider::Gemini => Self {
                provider_type: "gemini".to_string(),
                model: String::new(),
                api_key: String::new(),
                endpoint: default_gemini_endpoint(),
                timeout_secs: default_timeout_secs(),
                context_window: default_context_window(),
                max_output_tokens: default_max_output_tokens(),
                min_interval_ms: default_gemini_min_interval_ms(),
                throttle_step_ms: default_throttle_step_ms(),
                max_extra_throttle_ms: default_max_extra_throttle_ms(),
            },
        }
    }
}

/// Translation service configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TranslationConfig {
    /// Translation provider to use
    #[serde(default)]
    pub provider: TranslationProvider,

    /// Available translation providers
    #[serde(default)]
    pub available_providers: Vec<ProviderConfig>,

    /// Common translation settings
    #[serde(default)]
    pub common: TranslationCommonConfig,
}

/// Common translation settings applicable to all providers
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TranslationCommonConfig {
    /// Optional file holding the base prompt; overrides `system_prompt`
    #[serde(default)]
    pub prompt_path: Option<PathBuf>,

    /// Base prompt sent ahead of every batch
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Temperature parameter for text generation (0.0 to 1.0)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum inner-markup characters per batch
    #[serde(default = "default_batch_max_chars")]
    pub batch_max_chars: usize,

    /// Maximum segments per batch
    #[serde(default = "default_batch_max_segments")]
    pub batch_max_segments: usize,

    /// Pause between consecutive provider calls in milliseconds
    #[serde(default)]
    pub request_interval_ms: u64,

    /// Attempts per provider call
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,

    /// Backoff sequence in seconds; the last value repeats
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: Vec<u64>,

    /// Bisection depth budget for the remote policy
    #[serde(default = "default_max_split_depth")]
    pub max_split_depth: usize,

    /// Reject output that still looks like the source language
    #[serde(default = "default_true")]
    pub language_guard: bool,

    /// Minimum similarity for a translation-memory hit
    #[serde(default = "default_tm_fuzzy_threshold")]
    pub tm_fuzzy_threshold: f64,

    /// Restrict translation-memory lookups to the configured language pair
    #[serde(default = "default_true")]
    pub tm_filter_language_pair: bool,

    /// Rewrite quotes and apostrophes with the target language's typography
    #[serde(default = "default_true")]
    pub quote_normalization: bool,

    /// Retranslate segments whose only cache match is an older version of the same block
    #[serde(default = "default_true")]
    pub diff_aware: bool,

    /// Neighbour segments on each side shown to the provider as context (0 = off)
    #[serde(default)]
    pub context_neighbors: usize,

    /// Characters kept from each neighbour
    #[serde(default = "default_context_neighbor_max_chars")]
    pub context_neighbor_max_chars: usize,

    /// Characters kept from one segment's whole hint
    #[serde(default = "default_context_segment_max_chars")]
    pub context_segment_max_chars: usize,
}

impl Default for TranslationCommonConfig {
    fn default() -> Self {
        Self {
            prompt_path: None,
            system_prompt: default_system_prompt(),
            temperature: default_temperature(),
            batch_max_chars: default_batch_max_chars(),
            batch_max_segments: default_batch_max_segments(),
            request_interval_ms: 0,
            retry_count: default_retry_count(),
            backoff_secs: default_backoff_secs(),
            max_split_depth: default_max_split_depth(),
            language_guard: true,
            tm_fuzzy_threshold: default_tm_fuzzy_threshold(),
            tm_filter_language_pair: true,
            quote_normalization: true,
            diff_aware: true,
            context_neighbors: 0,
            context_neighbor_max_chars: default_context_neighbor_max_chars(),
            context_segment_max_chars: default_context_segment_max_chars(),
        }
    }
}

impl TranslationCommonConfig {
    /// Backoff sequence as durations
    pub fn backoff(&self) -> Vec<Duration> {
        self.backoff_secs.iter().map(|s| Duration::from_secs(*s)).collect()
    }

    /// Base prompt, read from `prompt_path` when set
    pub fn load_prompt(&self) -> Result<String> {
        match &self.prompt_path {
            Some(path) => std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read prompt file: {:?}", path)),
            None => Ok(self.system_prompt.clone()),
        }
    }
}

/// Input/output document settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DocumentConfig {
    /// EPUB to translate
    #[serde(default)]
    pub input_path: PathBuf,

    /// Where the translated EPUB is written
    #[serde(default)]
    pub output_path: PathBuf,

    /// Block-level tags that become segments
    #[serde(default = "default_block_tags")]
    pub block_tags: Vec<String>,

    /// Ancestors whose content is never translated
    #[serde(default = "default_excluded_ancestors")]
    pub excluded_ancestors: Vec<String>,

    /// Snapshot every N spine entries; 0 disables snapshots
    #[serde(default = "default_checkpoint_every")]
    pub checkpoint_every: usize,

    /// Checkpoint record location, defaults next to the output
    #[serde(default)]
    pub checkpoint_path: Option<PathBuf>,

    /// Number of timestamped output backups to keep
    #[serde(default = "default_backup_keep")]
    pub backup_keep: usize,

    /// Where failing prompt/response pairs are dumped
    #[serde(default)]
    pub debug_dir: Option<PathBuf>,
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            input_path: PathBuf::new(),
            output_path: PathBuf::new(),
            block_tags: default_block_tags(),
            excluded_ancestors: default_excluded_ancestors(),
            checkpoint_every: default_checkpoint_every(),
            checkpoint_path: None,
            backup_keep: default_backup_keep(),
            debug_dir: None,
        }
    }
}

impl DocumentConfig {
    /// `<stem>.checkpoint.json` next to the output unless configured
    pub fn resolved_checkpoint_path(&self) -> PathBuf {
        self.checkpoint_path
            .clone()
            .unwrap_or_else(|| sibling_with_suffix(&self.output_path, ".checkpoint.json"))
    }

    /// `<stem>.wip.epub` next to the output
    pub fn wip_path(&self) -> PathBuf {
        sibling_with_suffix(&self.output_path, ".wip.epub")
    }
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "output".to_string());
    path.with_file_name(format!("{}{}", stem, suffix))
}

/// Persistent state locations
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StorageConfig {
    /// Append-only JSONL reuse cache; disabled when unset
    #[serde(default)]
    pub cache_path: Option<PathBuf>,

    /// SQLite file for the ledger and translation memory
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// Project scope for ledger rows
    #[serde(default = "default_project_id")]
    pub project_id: i64,

    /// Pipeline step scope for ledger rows
    #[serde(default = "default_run_step")]
    pub run_step: String,

    /// PROCESSING rows older than this are reset at start-up
    #[serde(default = "default_stale_processing_secs")]
    pub stale_processing_secs: u64,

    #[serde(default = "default_true")]
    pub use_ledger: bool,

    #[serde(default = "default_true")]
    pub use_memory: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            cache_path: None,
            database_path: None,
            project_id: default_project_id(),
            run_step: default_run_step(),
            stale_processing_secs: default_stale_processing_secs(),
            use_ledger: true,
            use_memory: true,
        }
    }
}

/// Standalone validator settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ValidationConfig {
    /// Segments shorter than this (non-whitespace chars) are not checked
    #[serde(default = "default_min_chars")]
    pub min_chars: usize,

    /// Suspicious-segment ratio above which the document fails
    #[serde(default = "default_max_suspicious_ratio")]
    pub max_suspicious_ratio: f64,

    /// JSON file overriding the built-in language profiles
    #[serde(default)]
    pub profiles_path: Option<PathBuf>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_chars: default_min_chars(),
            max_suspicious_ratio: default_max_suspicious_ratio(),
            profiles_path: None,
        }
    }
}

/// Log verbosity level
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn to_level_filter(&self) -> log::LevelFilter {
        match self {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_context_window() -> u32 {
    8192
}

fn default_max_output_tokens() -> u32 {
    2048
}

fn default_throttle_step_ms() -> u64 {
    500
}

fn default_max_extra_throttle_ms() -> u64 {
    10_000
}

fn default_gemini_min_interval_ms() -> u64 {
    1000
}

fn default_temperature() -> f32 {
    0.1
}

fn default_batch_max_chars() -> usize {
    12_000
}

fn default_batch_max_segments() -> usize {
    6
}

fn default_retry_count() -> u32 {
    3
}

fn default_backoff_secs() -> Vec<u64> {
    vec![5, 15, 30]
}

fn default_max_split_depth() -> usize {
    6
}

fn default_true() -> bool {
    true
}

fn default_tm_fuzzy_threshold() -> f64 {
    0.92
}

fn default_context_neighbor_max_chars() -> usize {
    180
}

fn default_context_segment_max_chars() -> usize {
    1200
}

fn default_checkpoint_every() -> usize {
    1
}

fn default_backup_keep() -> usize {
    5
}

fn default_project_id() -> i64 {
    1
}

fn default_run_step() -> String {
    "translate".to_string()
}

fn default_stale_processing_secs() -> u64 {
    6 * 60 * 60
}

fn default_min_chars() -> usize {
    40
}

fn default_max_suspicious_ratio() -> f64 {
    0.35
}

fn default_block_tags() -> Vec<String> {
    ["p", "li", "h1", "h2", "h3", "h4", "h5", "h6", "blockquote", "dd", "dt", "figcaption", "caption"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_excluded_ancestors() -> Vec<String> {
    ["head", "script", "style", "svg", "math"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_ollama_endpoint() -> String {
    "http://127.0.0.1:11434".to_string()
}

fn default_gemini_endpoint() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

fn default_system_prompt() -> String {
    "You translate the content of an e-book. You receive an XML <batch> with <seg id=\"...\"> children. \
Translate only human-readable text inside each <seg>. Keep every tag, attribute and id exactly as given, \
keep entities and inline markup in place, and return only the <batch> element with the same segments."
        .to_string()
}

impl Config {
    /// Load a configuration file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open config file: {:?}", path))?;
        let config: Config = serde_json::from_reader(std::io::BufReader::new(file))
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        Ok(config)
    }

    /// Validate the configuration for consistency and required values
    pub fn validate(&self) -> Result<()> {
        // Validate languages
        let _source_name = crate::language_utils::get_language_name(&self.source_language)?;
        let _target_name = crate::language_utils::get_language_name(&self.target_language)?;

        if self.translation.provider == TranslationProvider::Gemini
            && self.translation.get_api_key().is_empty()
        {
            return Err(anyhow!("Translation API key is required for Gemini provider"));
        }

        let endpoint = self.translation.get_endpoint();
        url::Url::parse(&endpoint).with_context(|| format!("Invalid provider endpoint: {}", endpoint))?;

        let common = &self.translation.common;
        if common.batch_max_chars == 0 || common.batch_max_segments == 0 {
            return Err(anyhow!("Batch limits must be positive"));
        }
        if common.retry_count == 0 {
            return Err(anyhow!("retry_count must be at least 1"));
        }
        if !(0.0..=1.0).contains(&common.tm_fuzzy_threshold) {
            return Err(anyhow!(
                "tm_fuzzy_threshold must be within 0.0..=1.0, got {}",
                common.tm_fuzzy_threshold
            ));
        }
        if !(0.0..=1.0).contains(&self.validation.max_suspicious_ratio) {
            return Err(anyhow!("max_suspicious_ratio must be within 0.0..=1.0"));
        }

        Ok(())
    }

    /// Validate the document paths needed by a translation run
    pub fn validate_paths(&self) -> Result<()> {
        if self.document.input_path.as_os_str().is_empty() {
            return Err(anyhow!("document.input_path is required"));
        }
        if self.document.output_path.as_os_str().is_empty() {
            return Err(anyhow!("document.output_path is required"));
        }
        if self.document.input_path == self.document.output_path {
            return Err(anyhow!("Input and output documents must differ"));
        }
        Ok(())
    }
}

/// Default implementation for Config
impl Default for Config {
    fn default() -> Self {
        Config {
            source_language: "en".to_string(),
            target_language: "pl".to_string(),
            translation: TranslationConfig::default(),
            document: DocumentConfig::default(),
            storage: StorageConfig::default(),
            validation: ValidationConfig::default(),
            log_level: LogLevel::default(),
        }
    }
}

impl TranslationConfig {
    /// Get the active provider configuration from the available_providers array
    pub fn get_active_provider_config(&self) -> Option<&ProviderConfig> {
        self.get_provider_config(&self.provider)
    }

    /// Get a specific provider configuration by type
    pub fn get_provider_config(&self, provider_type: &TranslationProvider) -> Option<&ProviderConfig> {
        let provider_str = provider_type.to_lowercase_string();
        self.available_providers.iter().find(|p| p.provider_type == provider_str)
    }

    /// Active provider configuration, falling back to provider defaults
    pub fn active_provider_or_default(&self) -> ProviderConfig {
        self.get_active_provider_config()
            .cloned()
            .unwrap_or_else(|| ProviderConfig::new(self.provider))
    }

    /// Get the API key for the active provider
    pub fn get_api_key(&self) -> String {
        self.get_active_provider_config()
            .map(|p| p.api_key.clone())
            .unwrap_or_default()
    }

    /// Get the endpoint for the active provider
    pub fn get_endpoint(&self) -> String {
        if let Some(provider_config) = self.get_active_provider_config() {
            if !provider_config.endpoint.is_empty() {
                return provider_config.endpoint.clone();
            }
        }

        match self.provider {
            TranslationProvider::Ollama => default_ollama_endpoint(),
            TranslationProvider::Gemini => default_gemini_endpoint(),
        }
    }
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            provider: TranslationProvider::default(),
            available_providers: vec![
                ProviderConfig::new(TranslationProvider::Ollama),
                ProviderConfig::new(TranslationProvider::Gemini),
            ],
            common: TranslationCommonConfig::default(),
        }
    }
}
