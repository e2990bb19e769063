// Module-specific lints configuration
#![allow(clippy::uninlined_format_args)]

use anyhow::{anyhow, Context, Result};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, error, info, warn, Level, LevelFilter, Log, Metadata, Record, SetLoggerError};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use subrelay::app_config::{self, Config, TranslationProvider};
use subrelay::database::{DatabaseConnection, Repository};
use subrelay::progress::ArtifactStore;
use subrelay::providers::local::FileSource;
use subrelay::{JobController, JobPhase, JobRequest, JobResponse, SubtitleCollection};

// @const: Finished job records older than this are removed at startup
const OLD_JOB_RETENTION_DAYS: i64 = 30;

/// CLI Wrapper for TranslationProvider to implement ValueEnum
#[derive(Debug, Clone, ValueEnum)]
enum CliTranslationProvider {
    Gemini,
    Mock,
}

impl From<CliTranslationProvider> for TranslationProvider {
    fn from(cli_provider: CliTranslationProvider) -> Self {
        match cli_provider {
            CliTranslationProvider::Gemini => TranslationProvider::Gemini,
            CliTranslationProvider::Mock => TranslationProvider::Mock,
        }
    }
}

/// CLI Wrapper for LogLevel to implement ValueEnum
#[derive(Debug, Clone, ValueEnum)]
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
    /// Translate a local SRT file
    Translate(TranslateArgs),

    /// Show persisted jobs for a title
    Status(StatusArgs),

    /// Generate shell completions for subrelay
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Options shared by every command that reads the configuration
#[derive(Parser, Debug)]
struct CommonArgs {
    /// Configuration file path
    #[arg(short, long, default_value = "conf.json", env = "SUBRELAY_CONFIG")]
    config_path: PathBuf,

    /// Set logging level
    #[arg(short, long, value_enum)]
    log_level: Option<CliLogLevel>,
}

#[derive(Parser, Debug)]
struct TranslateArgs {
    /// SRT file to translate
    #[arg(value_name = "FILE")]
    input_file: PathBuf,

    /// Target language code (e.g., 'nl', 'fr', 'deu')
    #[arg(short, long)]
    target_language: Option<String>,

    /// Source language code of the input file
    #[arg(short, long)]
    source_language: Option<String>,

    /// Playback position in seconds to translate around first
    #[arg(long, value_name = "SECONDS")]
    seek: Option<u64>,

    /// Translation provider to use
    #[arg(short, long, value_enum)]
    provider: Option<CliTranslationProvider>,

    /// Job identifier, defaults to the file name
    #[arg(long)]
    content_id: Option<String>,

    /// Output file, defaults to `<input>.<lang>.srt` next to the input
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Parser, Debug)]
struct StatusArgs {
    /// Job identifier as used with `translate --content-id`
    #[arg(value_name = "CONTENT_ID")]
    content_id: String,

    /// Target language code
    #[arg(short, long)]
    target_language: Option<String>,

    #[command(flatten)]
    common: CommonArgs,
}

/// subrelay - rate-limited progressive subtitle translation
#[derive(Parser, Debug)]
#[command(name = "subrelay")]
#[command(version)]
#[command(about = "Rate-limited progressive subtitle translation")]
#[command(long_about = "subrelay translates subtitle files through a remote language model while
respecting its request and token quotas. Progress is persisted, so an interrupted
job resumes where it stopped.

EXAMPLES:
    subrelay translate movie.srt                 # Translate using default config
    subrelay translate -t fr movie.srt           # Translate to French
    subrelay translate --seek 1800 movie.srt     # Start around the 30 minute mark
    subrelay translate -p mock movie.srt         # Dry run with the mock translator
    subrelay status movie -t nl                  # Show job progress
    subrelay completions bash > subrelay.bash    # Generate bash completions

CONFIGURATION:
    Configuration is stored in conf.json by default. You can specify a different
    config file with --config-path. If the config file doesn't exist, a default one
    will be created automatically.")]
struct CommandLineOptions {
    #[command(subcommand)]
    command: Commands,
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

    // @returns: Emoji and ANSI color for log level
    fn decoration(level: Level) -> (&'static str, &'static str) {
        match level {
            Level::Error => ("❌", "1;31"),
            Level::Warn => ("🚧", "1;33"),
            Level::Info => (" ", "1;32"),
            Level::Debug => ("🔍", "1;36"),
            Level::Trace => ("📋", "1;35"),
        }
    }
}

impl Log for CustomLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level && metadata.target().starts_with("subrelay")
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let now = chrono::Local::now().format("%H:%M:%S.%3f");
            let (emoji, color) = Self::decoration(record.level());
            let _ = writeln!(std::io::stderr(), "\x1B[{}m{} {} {}\x1B[0m", color, now, emoji, record.args());
        }
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize the logger once with info level by default
    // The level is updated after loading the config
    CustomLogger::init(LevelFilter::Info)?;

    let cli = CommandLineOptions::parse();

    match cli.command {
        Commands::Completions { shell } => {
            let mut cmd = CommandLineOptions::command();
            generate(shell, &mut cmd, "subrelay", &mut std::io::stdout());
            Ok(())
        }
        Commands::Translate(args) => run_translate(args).await,
        Commands::Status(args) => run_status(args).await,
    }
}

/// Load the configuration and apply the log level
fn load_config(common: &CommonArgs) -> Result<Config> {
    if let Some(level) = &common.log_level {
        log::set_max_level(app_config::LogLevel::from(level.clone()).to_level_filter());
    }

    let (mut config, created) = Config::load_or_create(&common.config_path)?;
    if created {
        warn!(
            "Config file not found at '{}', created a default config.",
            common.config_path.display()
        );
    }

    match &common.log_level {
        Some(level) => config.log_level = level.clone().into(),
        None => log::set_max_level(config.log_level.to_level_filter()),
    }
    Ok(config)
}

async fn run_translate(options: TranslateArgs) -> Result<()> {
    let mut config = load_config(&options.common)?;

    if let Some(provider) = &options.provider {
        config.translation.provider = provider.clone().into();
    }
    if let Some(source_language) = &options.source_language {
        config.source_language = source_language.clone();
    }
    if let Some(target_language) = &options.target_language {
        config.target_language = target_language.clone();
    }
    config.validate().context("Configuration validation failed")?;

    if !options.input_file.is_file() {
        return Err(anyhow!("Input file does not exist: {:?}", options.input_file));
    }

    let data_dir = config.storage.resolve_data_dir()?;
    let removed = ArtifactStore::in_data_dir(&data_dir)
        .cleanup_stale_placeholders(config.pipeline.staleness_threshold())?;
    if removed > 0 {
        info!("Removed {} stale placeholder files", removed);
    }

    let source = Arc::new(FileSource::new(&options.input_file, config.source_language.clone()));
    let controller = JobController::from_config(config.clone(), Some(source)).await?;
    match controller.store().repository().delete_old_jobs(OLD_JOB_RETENTION_DAYS).await {
        Ok(0) => {}
        Ok(n) => debug!("Removed {} old job records", n),
        Err(e) => warn!("Failed to remove old job records: {:#}", e),
    }

    let shutdown = CancellationToken::new();
    let sweeper = controller
        .cache()
        .spawn_sweeper(Duration::from_secs(config.cache.sweep_interval_secs), shutdown.clone());

    let content_id = options.content_id.clone().unwrap_or_else(|| file_stem(&options.input_file));
    let mut request = JobRequest::movie(content_id, config.target_language.clone());
    request.seek_offset_secs = options.seek;
    let output_path = options
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(&options.input_file, &config.target_language));

    info!(
        "🚀 subrelay: {} ({}) {} -> {}",
        config.translation.provider.display_name(),
        config.translation.get_model(),
        config.source_language,
        config.target_language
    );

    let result = translate_to_file(&controller, &request, &output_path).await;
    shutdown.cancel();
    let _ = sweeper.await;
    result
}

async fn translate_to_file(controller: &JobController, request: &JobRequest, output_path: &Path) -> Result<()> {
    let start_time = std::time::Instant::now();
    let key = request.job_key();

    let document = match controller.handle_request(request).await? {
        JobResponse::Completed { source, .. } if request.seek_offset_secs.is_some() => {
            // The seek only orders the work; the output keeps the original timing
            info!("Translation already available ({:?})", source);
            match controller.handle_request(&request.clone().without_seek()).await? {
                JobResponse::Completed { document, .. } => (*document).clone(),
                _ => return Err(anyhow!("Translation of {} is no longer available", key)),
            }
        }
        JobResponse::Completed { document, source } => {
            info!("Translation already available ({:?})", source);
            (*document).clone()
        }
        JobResponse::NoSource => return Err(anyhow!("No subtitles to translate in the input file")),
        JobResponse::RetryLater { retry_after, .. } => {
            return Err(anyhow!(
                "Daily translation limit reached, retry in {}m",
                retry_after.as_secs().div_ceil(60)
            ));
        }
        JobResponse::InProgress { .. } | JobResponse::Started { .. } => {
            follow_progress(controller, request).await?;
            let text = controller
                .store()
                .read_output(&key)?
                .ok_or_else(|| anyhow!("Job {} completed without an output file", key))?;
            SubtitleCollection::parse_srt_string(&text, &key.target_language)?
        }
    };

    write_output(output_path, &document)?;
    info!(
        "Success: {:?} ({} entries in {:.1}s)",
        output_path,
        document.len(),
        start_time.elapsed().as_secs_f64()
    );
    Ok(())
}

/// Show a progress bar until the job settles; Ctrl-C cancels the job
async fn follow_progress(controller: &JobController, request: &JobRequest) -> Result<()> {
    let key = request.job_key();
    let total = controller.status(&key).map(|s| s.state.total_count).unwrap_or(0);

    let progress_bar = ProgressBar::new(total as u64);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} entries ({percent}%) {msg}")
        .or_else(|_| ProgressStyle::default_bar().template("{spinner} [{elapsed_precise}] [{bar:40}] {pos}/{len} ({percent}%) {msg}"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    progress_bar.set_style(style.progress_chars("█▓▒░"));
    progress_bar.enable_steady_tick(Duration::from_millis(120));

    let mut ticker = tokio::time::interval(Duration::from_millis(250));
    let snapshot = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                progress_bar.abandon_with_message("cancelled");
                controller.cancel(&key).await?;
                return Err(anyhow!("Translation cancelled"));
            }
            _ = ticker.tick() => {
                let Some(snapshot) = controller.status(&key) else {
                    return Err(anyhow!("Job {} disappeared", key));
                };
                progress_bar.set_position(snapshot.state.processed_count as u64);
                progress_bar.set_message(snapshot.state.phase.to_string());
                if snapshot.state.phase.is_terminal() && !controller.queue().is_running(&key) {
                    break snapshot;
                }
            }
        }
    };

    match snapshot.state.phase {
        JobPhase::Complete => {
            progress_bar.finish_with_message("done");
            Ok(())
        }
        phase => {
            progress_bar.abandon_with_message(phase.to_string());
            let reason = controller
                .store()
                .repository()
                .get_job(&key.storage_key())
                .await?
                .and_then(|job| job.error_message)
                .unwrap_or_else(|| phase.to_string());
            error!("Translation of {} stopped: {}", key, reason);
            Err(anyhow!("Translation {}: {}", phase, reason))
        }
    }
}

async fn run_status(options: StatusArgs) -> Result<()> {
    let config = load_config(&options.common)?;
    let target_language = options.target_language.unwrap_or_else(|| config.target_language.clone());
    let target_language = subrelay::normalize_to_part1_or_part2t(&target_language)?;

    let data_dir = config.storage.resolve_data_dir()?;
    let db = DatabaseConnection::in_data_dir(&data_dir)?;
    let repo = Repository::new(db.clone());

    let jobs = repo.find_jobs(&options.content_id, &target_language).await?;
    if jobs.is_empty() {
        println!("No jobs for {} ({})", options.content_id, target_language);
        return Ok(());
    }
    for job in jobs {
        println!(
            "{:<32} {:<10} {:>5}/{:<5} {:>5.1}%  updated {}{}",
            job.job_key,
            job.phase.as_str(),
            job.processed_count,
            job.total_count,
            job.progress_percent(),
            job.updated_at,
            job.error_message.map(|e| format!("  ({})", e)).unwrap_or_default()
        );
    }
    println!("{}", db.stats().await?);
    Ok(())
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "subtitle".to_string())
}

fn default_output_path(input: &Path, target_language: &str) -> PathBuf {
    let parent = input.parent().unwrap_or(Path::new("."));
    parent.join(format!("{}.{}.srt", file_stem(input), target_language.to_lowercase()))
}

fn write_output(path: &Path, document: &SubtitleCollection) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(path, document.to_srt_string()).with_context(|| format!("Failed to write {}", path.display()))
}
