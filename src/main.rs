#![allow(clippy::uninlined_format_args)]

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::{error, info, warn, Level, LevelFilter, Log, Metadata, Record, SetLoggerError};
use std::io::Write;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use epubtrans::app_config::{self, Config, ProviderConfig, TranslationProvider};
use epubtrans::providers::build_client;
use epubtrans::translation::{ProgressReporter, StateStores, TranslationPipeline};
use epubtrans::validation::{DocumentValidator, Verdict};

/// CLI wrapper for TranslationProvider
#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliTranslationProvider {
    Ollama,
    Gemini,
}

impl From<CliTranslationProvider> for TranslationProvider {
    fn from(cli_provider: CliTranslationProvider) -> Self {
        match cli_provider {
            CliTranslationProvider::Ollama => TranslationProvider::Ollama,
            CliTranslationProvider::Gemini => TranslationProvider::Gemini,
        }
    }
}

/// CLI wrapper for LogLevel
#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliLogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<CliLogLevel> for app_config::LogLevel {
    fn from(cli_level: CliLogLevel) -> Self {
        match cli_level {
            CliLogLevel::Error => app_config::LogLevel::Error,
            CliLogLevel::Warn => app_config::LogLevel::Warn,
            CliLogLevel::Info => app_config::LogLevel::Info,
            CliLogLevel::Debug => app_config::LogLevel::Debug,
            CliLogLevel::Trace => app_config::LogLevel::Trace,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Translate an EPUB
    Translate(TranslateArgs),

    /// Audit translated EPUBs for structural errors and untranslated text
    Validate(ValidateArgs),
}

#[derive(Parser, Debug)]
struct TranslateArgs {
    /// EPUB to translate, overrides document.input_path
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Output EPUB, overrides document.output_path
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Translation provider to use
    #[arg(short, long, value_enum)]
    provider: Option<CliTranslationProvider>,

    /// Model name to use for translation
    #[arg(short, long)]
    model: Option<String>,

    /// Source language code (e.g., 'en')
    #[arg(short, long)]
    source_language: Option<String>,

    /// Target language code (e.g., 'pl')
    #[arg(short, long)]
    target_language: Option<String>,

    /// Do not print GLOBAL progress lines
    #[arg(long)]
    quiet_progress: bool,
}

#[derive(Parser, Debug)]
struct ValidateArgs {
    /// EPUB file, or a directory searched recursively for EPUBs
    #[arg(value_name = "PATH")]
    path: PathBuf,

    /// Source language code
    #[arg(short, long)]
    source_language: Option<String>,

    /// Target language code
    #[arg(short, long)]
    target_language: Option<String>,
}

/// epubtrans - EPUB translation through local or remote LLMs
#[derive(Parser, Debug)]
#[command(name = "epubtrans")]
#[command(version)]
#[command(about = "Resumable EPUB translation through LLM backends")]
#[command(long_about = "epubtrans translates the chapters of an EPUB with an Ollama or Gemini model,
keeping markup intact. Interrupted runs resume from their checkpoint.

EXAMPLES:
    epubtrans translate -i book.epub -o book.pl.epub -t pl
    epubtrans -c conf.json translate -p gemini -m gemini-1.5-flash
    epubtrans validate book.pl.epub -s en -t pl
    epubtrans validate ./translated/

CONFIGURATION:
    Configuration is read from conf.json by default. If the file does not exist,
    a default one is created.")]
struct CommandLineOptions {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, default_value = "conf.json", global = true)]
    config_path: PathBuf,

    /// Set logging level
    #[arg(short, long, value_enum, global = true)]
    log_level: Option<CliLogLevel>,
}

// @struct: Custom logger implementation
struct CustomLogger {
    level: LevelFilter,
}

impl CustomLogger {
    // @creates: New logger with specified level
    fn new(level: LevelFilter) -> Self {
        CustomLogger { level }
    }

    // @initializes: Global logger
    fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
        log::set_boxed_logger(Box::new(CustomLogger::new(LevelFilter::Trace)))?;
        log::set_max_level(level);
        Ok(())
    }

    // @returns: ANSI colour and tag for a level
    fn style_for_level(level: Level) -> (&'static str, &'static str) {
        match level {
            Level::Error => ("\x1B[1;31m", "ERROR"),
            Level::Warn => ("\x1B[1;33m", "WARN "),
            Level::Info => ("\x1B[1;32m", "INFO "),
            Level::Debug => ("\x1B[1;36m", "DEBUG"),
            Level::Trace => ("\x1B[1;35m", "TRACE"),
        }
    }
}

impl Log for CustomLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level && metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let now = chrono::Local::now().format("%H:%M:%S.%3f");
            let (colour, tag) = Self::style_for_level(record.level());
            let mut stderr = std::io::stderr();
            let _ = writeln!(stderr, "{}{} {} {}\x1B[0m", colour, now, tag, record.args());
        }
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    CustomLogger::init(LevelFilter::Info)?;

    let cli = CommandLineOptions::parse();
    if let Some(level) = cli.log_level {
        log::set_max_level(app_config::LogLevel::from(level).to_level_filter());
    }

    let config = load_or_create_config(&cli.config_path)?;
    if cli.log_level.is_none() {
        log::set_max_level(config.log_level.to_level_filter());
    }

    let result = match cli.command {
        Commands::Translate(args) => run_translate(config, args).await,
        Commands::Validate(args) => run_validate(config, args),
    };
    if let Err(e) = &result {
        error!("{:#}", e);
    }
    result
}

fn load_or_create_config(path: &Path) -> Result<Config> {
    if path.exists() {
        return Config::from_file(path);
    }

    warn!("Config file not found at {:?}, creating default config.", path);
    let config = Config::default();
    let json = serde_json::to_string_pretty(&config).context("Failed to serialize default config to JSON")?;
    std::fs::write(path, json).with_context(|| format!("Failed to write default config to {:?}", path))?;
    Ok(config)
}

async fn run_translate(mut config: Config, args: TranslateArgs) -> Result<()> {
    if let Some(input) = args.input {
        config.document.input_path = input;
    }
    if let Some(output) = args.output {
        config.document.output_path = output;
    }
    if let Some(provider) = args.provider {
        config.translation.provider = provider.into();
    }
    if let Some(model) = args.model {
        let provider = config.translation.provider;
        let provider_str = provider.to_lowercase_string();
        match config
            .translation
            .available_providers
            .iter_mut()
            .find(|p| p.provider_type == provider_str)
        {
            Some(provider_config) => provider_config.model = model,
            None => {
                let mut provider_config = ProviderConfig::new(provider);
                provider_config.model = model;
                config.translation.available_providers.push(provider_config);
            }
        }
    }
    if let Some(source) = args.source_language {
        config.source_language = source;
    }
    if let Some(target) = args.target_language {
        config.target_language = target;
    }

    config.validate().context("Configuration validation failed")?;
    config.validate_paths().context("Configuration validation failed")?;

    let client = build_client(&config)?;
    let stores = StateStores::open(&config).await?;
    let progress = if args.quiet_progress {
        ProgressReporter::silent()
    } else {
        ProgressReporter::stdout()
    };

    let mut pipeline = TranslationPipeline::new(config, client.as_ref(), stores)?.with_progress(progress);
    let summary = pipeline.run().await?;
    info!("{}", summary);
    Ok(())
}

fn run_validate(mut config: Config, args: ValidateArgs) -> Result<()> {
    if let Some(source) = args.source_language {
        config.source_language = source;
    }
    if let Some(target) = args.target_language {
        config.target_language = target;
    }

    let validator = DocumentValidator::from_config(&config)?;
    let targets = collect_epubs(&args.path)?;
    if targets.is_empty() {
        return Err(anyhow!("No EPUB files found under {:?}", args.path));
    }

    let mut failed = 0usize;
    for path in &targets {
        let report = validator.validate(path);
        println!("== {}", path.display());
        print!("{}", report);
        if report.verdict == Verdict::Fail {
            failed += 1;
        }
    }

    if failed > 0 {
        return Err(anyhow!("{} of {} documents failed validation", failed, targets.len()));
    }
    Ok(())
}

fn collect_epubs(path: &Path) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    if !path.is_dir() {
        return Err(anyhow!("Path does not exist: {:?}", path));
    }

    let mut found: Vec<PathBuf> = WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|e| e.into_path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("epub")))
        .collect();
    found.sort();
    Ok(found)
}
