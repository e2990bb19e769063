use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::default::Default;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application configuration module
/// This module handles loading, validating and saving the JSON configuration.
/// Every field carries a serde default so partial files stay valid.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    /// Source language code (ISO)
    #[serde(default = "default_source_language")]
    pub source_language: String,

    /// Target language code (ISO)
    #[serde(default = "default_target_language")]
    pub target_language: String,

    /// Translation backend config
    #[serde(default)]
    pub translation: TranslationConfig,

    /// Throughput ceilings of the translation backend
    #[serde(default)]
    pub rate_limits: RateLimitConfig,

    /// Batch sizing strategy
    #[serde(default)]
    pub batching: BatchingConfig,

    /// Worker pool and job lifecycle settings
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Result cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Persistence locations
    #[serde(default)]
    pub storage: StorageConfig,

    /// Subtitle source settings
    #[serde(default)]
    pub source: SourceConfig,

    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,
}

/// Translation provider type
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TranslationProvider {
    // @provider: Google Gemini generateContent API
    #[default]
    Gemini,
    // @provider: In-process simulator with latency and failure rate
    Mock,
}

impl TranslationProvider {
    // @returns: Capitalized provider name
    pub fn display_name(&self) -> &str {
        match self {
            Self::Gemini => "Gemini",
            Self::Mock => "Mock",
        }
    }

    // @returns: Lowercase provider identifier
    pub fn to_lowercase_string(&self) -> String {
        match self {
            Self::Gemini => "gemini".to_string(),
            Self::Mock => "mock".to_string(),
        }
    }
}

impl std::fmt::Display for TranslationProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_lowercase_string())
    }
}

impl std::str::FromStr for TranslationProvider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "gemini" => Ok(Self::Gemini),
            "mock" => Ok(Self::Mock),
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

    // @field: Model name
    #[serde(default = "String::new")]
    pub model: String,

    // @field: API key
    #[serde(default = "String::new")]
    pub api_key: String,

    // @field: Service URL
    #[serde(default = "String::new")]
    pub endpoint: String,

    // @field: Timeout seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl ProviderConfig {
    // @param provider_type: Provider enum
    // @returns: Provider config with defaults
    pub fn new(provider_type: TranslationProvider) -> Self {
        match provider_type {
            TranslationProvider::Gemini => Self {
                provider_type: "gemini".to_string(),
                model: default_gemini_model(),
                api_key: String::new(),
                endpoint: default_gemini_endpoint(),
                timeout_secs: default_timeout_secs(),
            },
            TranslationProvider::Mock => Self {
                provider_type: "mock".to_string(),
                model: "mock".to_string(),
                api_key: String::new(),
                endpoint: String::new(),
                timeout_secs: default_timeout_secs(),
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

    /// Simulator settings for the mock provider
    #[serde(default)]
    pub mock: MockTranslatorConfig,
}

/// Common translation settings applicable to all providers
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TranslationCommonConfig {
    /// Retry count for transient failures of one batch
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,

    /// Base backoff in milliseconds, doubled on each retry
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Temperature parameter for text generation (0.0 to 1.0)
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for TranslationCommonConfig {
    fn default() -> Self {
        Self {
            retry_count: default_retry_count(),
            retry_backoff_ms: default_retry_backoff_ms(),
            temperature: default_temperature(),
        }
    }
}

/// Mock translator behaviour
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct MockTranslatorConfig {
    /// Simulated latency per call in milliseconds
    #[serde(default)]
    pub latency_ms: u64,

    /// Probability in [0, 1] that a call fails with a transient error
    #[serde(default)]
    pub failure_rate: f64,
}

/// Remote throughput ceilings
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RateLimitConfig {
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,

    #[serde(default = "default_tokens_per_minute")]
    pub tokens_per_minute: u64,

    #[serde(default = "default_requests_per_day")]
    pub requests_per_day: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: default_requests_per_minute(),
            tokens_per_minute: default_tokens_per_minute(),
            requests_per_day: default_requests_per_day(),
        }
    }
}

/// Token estimate constants and batch phase budgets
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BatchingConfig {
    /// Estimated tokens per character
    #[serde(default = "default_per_character_tokens")]
    pub per_character_tokens: f64,

    /// Fixed prompt overhead added once per batch
    #[serde(default = "default_overhead_tokens")]
    pub overhead_tokens: u64,

    /// Number of quick feedback batches
    #[serde(default = "default_starting_batch_count")]
    pub starting_batch_count: usize,

    #[serde(default = "default_starting_target_tokens")]
    pub starting_target_tokens: u64,

    /// Entries on each side of the seek anchor translated first
    #[serde(default = "default_priority_window")]
    pub priority_window: usize,

    /// Entries on each side of the seek anchor translated second
    #[serde(default = "default_context_window")]
    pub context_window: usize,

    /// Token target for priority and context batches
    #[serde(default = "default_window_target_tokens")]
    pub window_target_tokens: u64,

    #[serde(default = "default_sequential_initial_tokens")]
    pub sequential_initial_tokens: u64,

    #[serde(default = "default_sequential_max_tokens")]
    pub sequential_max_tokens: u64,

    #[serde(default = "default_sequential_growth_factor")]
    pub sequential_growth_factor: u64,

    /// Hard cap on entries in one batch
    #[serde(default = "default_max_entries_per_batch")]
    pub max_entries_per_batch: usize,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            per_character_tokens: default_per_character_tokens(),
            overhead_tokens: default_overhead_tokens(),
            starting_batch_count: default_starting_batch_count(),
            starting_target_tokens: default_starting_target_tokens(),
            priority_window: default_priority_window(),
            context_window: default_context_window(),
            window_target_tokens: default_window_target_tokens(),
            sequential_initial_tokens: default_sequential_initial_tokens(),
            sequential_max_tokens: default_sequential_max_tokens(),
            sequential_growth_factor: default_sequential_growth_factor(),
            max_entries_per_batch: default_max_entries_per_batch(),
        }
    }
}

/// Worker pool and job lifecycle
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Jobs translated in parallel
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    /// Batches of one job with a network call in flight (results stay ordered)
    #[serde(default = "default_in_flight_batches")]
    pub in_flight_batches: usize,

    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,

    /// Age after which an unfinished job may be superseded
    #[serde(default = "default_staleness_threshold_secs")]
    pub staleness_threshold_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent_jobs(),
            in_flight_batches: default_in_flight_batches(),
            job_timeout_secs: default_job_timeout_secs(),
            staleness_threshold_secs: default_staleness_threshold_secs(),
        }
    }
}

impl PipelineConfig {
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn staleness_threshold(&self) -> Duration {
        Duration::from_secs(self.staleness_threshold_secs)
    }
}

/// Result cache policy, also used for response cache directives
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,

    #[serde(default = "default_stale_while_revalidate_secs")]
    pub stale_while_revalidate_secs: u64,

    #[serde(default = "default_stale_if_error_secs")]
    pub stale_if_error_secs: u64,

    /// Max age advertised for in-progress placeholders
    #[serde(default = "default_progress_max_age_secs")]
    pub progress_max_age_secs: u64,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: default_cache_ttl_secs(),
            stale_while_revalidate_secs: default_stale_while_revalidate_secs(),
            stale_if_error_secs: default_stale_if_error_secs(),
            progress_max_age_secs: default_progress_max_age_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

/// Where the database and subtitle artifacts live
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct StorageConfig {
    /// Data directory, platform data dir when unset
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

impl StorageConfig {
    /// Resolve the data directory
    pub fn resolve_data_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.data_dir {
            return Ok(dir.clone());
        }
        let base_dir = dirs::data_local_dir()
            .or_else(dirs::data_dir)
            .or_else(|| dirs::home_dir().map(|h| h.join(".local").join("share")))
            .ok_or_else(|| anyhow!("Could not determine data directory"))?;
        Ok(base_dir.join("subrelay"))
    }
}

/// Subtitle source provider settings
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SourceConfig {
    #[serde(default = "default_source_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Serve a target-language subtitle untouched when the source already has one
    #[serde(default = "default_true")]
    pub passthrough_target_language: bool,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            endpoint: default_source_endpoint(),
            timeout_secs: default_timeout_secs(),
            passthrough_target_language: true,
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

fn default_source_language() -> String {
    "en".to_string()
}

fn default_target_language() -> String {
    "nl".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_retry_count() -> u32 {
    3 // Default to 3 retries
}

fn default_retry_backoff_ms() -> u64 {
    1000 // 1 second base backoff time, doubled on each retry
}

fn default_temperature() -> f32 {
    0.3
}

fn default_true() -> bool {
    true
}

fn default_gemini_endpoint() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_gemini_model() -> String {
    "gemini-1.5-flash".to_string()
}

fn default_source_endpoint() -> String {
    "https://opensubtitles-v3.strem.io".to_string()
}

// Free tier of gemini-1.5-flash
fn default_requests_per_minute() -> u32 {
    15
}

fn default_tokens_per_minute() -> u64 {
    1_000_000
}

fn default_requests_per_day() -> u32 {
    1500
}

fn default_per_character_tokens() -> f64 {
    1.5
}

fn default_overhead_tokens() -> u64 {
    50
}

fn default_starting_batch_count() -> usize {
    5
}

fn default_starting_target_tokens() -> u64 {
    1000
}

fn default_priority_window() -> usize {
    30
}

fn default_context_window() -> usize {
    100
}

fn default_window_target_tokens() -> u64 {
    5000
}

fn default_sequential_initial_tokens() -> u64 {
    20_000
}

fn default_sequential_max_tokens() -> u64 {
    100_000
}

fn default_sequential_growth_factor() -> u64 {
    2
}

fn default_max_entries_per_batch() -> usize {
    100
}

fn default_max_concurrent_jobs() -> usize {
    1
}

fn default_in_flight_batches() -> usize {
    1
}

fn default_job_timeout_secs() -> u64 {
    3600
}

fn default_staleness_threshold_secs() -> u64 {
    300
}

fn default_cache_ttl_secs() -> u64 {
    24 * 60 * 60
}

fn default_stale_while_revalidate_secs() -> u64 {
    4 * 60 * 60
}

fn default_stale_if_error_secs() -> u64 {
    7 * 24 * 60 * 60
}

fn default_progress_max_age_secs() -> u64 {
    30
}

fn default_sweep_interval_secs() -> u64 {
    600
}

impl Config {
    /// Load a config file, writing a default one when it does not exist yet
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<(Self, bool)> {
        let path = path.as_ref();
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to open config file: {}", path.display()))?;
            let config: Config = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
            return Ok((config, false));
        }

        let config = Config::default();
        let config_json = serde_json::to_string_pretty(&config)
            .context("Failed to serialize default config to JSON")?;
        std::fs::write(path, config_json)
            .with_context(|| format!("Failed to write default config to file: {}", path.display()))?;
        Ok((config, true))
    }

    /// Validate the configuration for consistency and required values
    pub fn validate(&self) -> Result<()> {
        crate::language_utils::get_language_name(&self.source_language)?;
        crate::language_utils::get_language_name(&self.target_language)?;

        if self.translation.provider == TranslationProvider::Gemini
            && self.translation.get_api_key().is_empty()
        {
            return Err(anyhow!("Translation API key is required for Gemini provider"));
        }

        let limits = &self.rate_limits;
        if limits.requests_per_minute == 0 || limits.tokens_per_minute == 0 || limits.requests_per_day == 0 {
            return Err(anyhow!("Rate limits must all be greater than zero"));
        }

        let batching = &self.batching;
        if batching.per_character_tokens <= 0.0 {
            return Err(anyhow!("per_character_tokens must be positive"));
        }
        if batching.max_entries_per_batch == 0 {
            return Err(anyhow!("max_entries_per_batch must be at least 1"));
        }
        if batching.sequential_initial_tokens > batching.sequential_max_tokens {
            return Err(anyhow!(
                "sequential_initial_tokens ({}) exceeds sequential_max_tokens ({})",
                batching.sequential_initial_tokens,
                batching.sequential_max_tokens
            ));
        }
        if batching.context_window < batching.priority_window {
            return Err(anyhow!("context_window must not be smaller than priority_window"));
        }

        if self.pipeline.max_concurrent_jobs == 0 || self.pipeline.in_flight_batches == 0 {
            return Err(anyhow!("Pipeline concurrency must be at least 1"));
        }

        let rate = self.translation.mock.failure_rate;
        if !(0.0..=1.0).contains(&rate) {
            return Err(anyhow!("Mock failure_rate must be within [0, 1], got {}", rate));
        }

        Ok(())
    }
}

/// Default implementation for Config
impl Default for Config {
    fn default() -> Self {
        Config {
            source_language: default_source_language(),
            target_language: default_target_language(),
            translation: TranslationConfig::default(),
            rate_limits: RateLimitConfig::default(),
            batching: BatchingConfig::default(),
            pipeline: PipelineConfig::default(),
            cache: CacheConfig::default(),
            storage: StorageConfig::default(),
            source: SourceConfig::default(),
            log_level: LogLevel::default(),
        }
    }
}

impl TranslationConfig {
    /// Get the active provider configuration from the available_providers array
    pub fn get_active_provider_config(&self) -> Option<&ProviderConfig> {
        let provider_str = self.provider.to_lowercase_string();
        self.available_providers.iter()
            .find(|p| p.provider_type == provider_str)
    }

    /// Get the model for the active provider
    pub fn get_model(&self) -> String {
        if let Some(provider_config) = self.get_active_provider_config() {
            if !provider_config.model.is_empty() {
                return provider_config.model.clone();
            }
        }
        match self.provider {
            TranslationProvider::Gemini => default_gemini_model(),
            TranslationProvider::Mock => "mock".to_string(),
        }
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
            TranslationProvider::Gemini => default_gemini_endpoint(),
            TranslationProvider::Mock => String::new(),
        }
    }

    /// Get the request timeout for the active provider
    pub fn get_timeout(&self) -> Duration {
        let secs = self.get_active_provider_config()
            .map(|p| p.timeout_secs)
            .unwrap_or_else(default_timeout_secs);
        Duration::from_secs(secs)
    }
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            provider: TranslationProvider::default(),
            available_providers: vec![
                ProviderConfig::new(TranslationProvider::Gemini),
                ProviderConfig::new(TranslationProvider::Mock),
            ],
            common: TranslationCommonConfig::default(),
            mock: MockTranslatorConfig::default(),
        }
    }
}
