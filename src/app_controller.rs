use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::app_config::{CacheConfig, Config};
use crate::database::{DatabaseConnection, Repository};
use crate::errors::TranslationError;
use crate::language_utils;
use crate::progress::{
    placeholder_document, ArtifactStore, JobFailure, JobKey, JobPhase, JobSnapshot, ProgressState, ProgressStore,
};
use crate::providers::opensubtitles::OpenSubtitlesSource;
use crate::providers::{create_translator, SourceCandidate, SourceProvider, SourceQuery, Translator};
use crate::subtitle_processor::SubtitleCollection;
use crate::translation::{
    BatchScheduler, BatchTranslator, CacheKey, CacheStatus, JobQueue, PipelineReport, RateLimiter, ResultCache,
    TranslationJob,
};

// @module: Request controller tying cache, store, source and worker pool together

/// Inbound request for translated subtitles
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    // @field: "movie" or "series"
    pub content_type: String,
    pub content_id: String,
    pub season: Option<u32>,
    pub episode: Option<u32>,
    pub target_language: String,
    // @field: Playback position to translate around first; not part of the job key
    pub seek_offset_secs: Option<u64>,
    pub video_hash: Option<String>,
}

impl JobRequest {
    pub fn movie(content_id: impl Into<String>, target_language: impl Into<String>) -> Self {
        Self {
            content_type: "movie".to_string(),
            content_id: content_id.into(),
            season: None,
            episode: None,
            target_language: target_language.into(),
            seek_offset_secs: None,
            video_hash: None,
        }
    }

    pub fn episode(content_id: impl Into<String>, season: u32, episode: u32, target_language: impl Into<String>) -> Self {
        Self {
            content_type: "series".to_string(),
            season: Some(season),
            episode: Some(episode),
            ..Self::movie(content_id, target_language)
        }
    }

    pub fn with_seek(mut self, seconds: u64) -> Self {
        self.seek_offset_secs = Some(seconds);
        self
    }

    pub fn with_video_hash(mut self, hash: impl Into<String>) -> Self {
        self.video_hash = Some(hash.into());
        self
    }

    pub fn without_seek(mut self) -> Self {
        self.seek_offset_secs = None;
        self
    }

    // Start positions of zero need no shift
    fn shift_secs(&self) -> Option<u64> {
        self.seek_offset_secs.filter(|secs| *secs > 0)
    }

    pub fn job_key(&self) -> JobKey {
        JobKey::new(self.content_id.clone(), self.season, self.episode, self.target_language.clone())
    }

    // @returns: Cache key; episodes of one series never share an entry
    pub fn cache_key(&self) -> CacheKey {
        let content_id = match (self.season, self.episode) {
            (Some(season), Some(episode)) => format!("{}:{}:{}", self.content_id, season, episode),
            _ => self.content_id.clone(),
        };
        CacheKey::new(content_id, self.target_language.clone(), self.video_hash.clone())
    }

    pub fn source_query(&self) -> SourceQuery {
        SourceQuery {
            content_type: self.content_type.clone(),
            content_id: self.content_id.clone(),
            season: self.season,
            episode: self.episode,
        }
    }
}

/// Where a completed document came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultSource {
    Cache,
    Store,
    // @field: The source already offered the target language
    Passthrough,
}

/// Answer to a `JobRequest`
#[derive(Debug, Clone)]
pub enum JobResponse {
    Completed {
        document: Arc<SubtitleCollection>,
        source: ResultSource,
    },
    InProgress {
        placeholder: SubtitleCollection,
        progress: ProgressState,
    },
    Started {
        placeholder: SubtitleCollection,
    },
    // @field: The last run hit the daily quota; nothing restarts before the day rolls over
    RetryLater {
        placeholder: SubtitleCollection,
        retry_after: Duration,
    },
    NoSource,
}

impl JobResponse {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    /// The document to serve, if any
    pub fn document(&self) -> Option<&SubtitleCollection> {
        match self {
            Self::Completed { document, .. } => Some(document),
            Self::InProgress { placeholder, .. }
            | Self::Started { placeholder }
            | Self::RetryLater { placeholder, .. } => Some(placeholder),
            Self::NoSource => None,
        }
    }

    /// HTTP cache directives for this response
    pub fn cache_directives(&self, config: &CacheConfig) -> CacheDirectives {
        let max_age = match self {
            Self::Completed { .. } => config.ttl_secs,
            _ => config.progress_max_age_secs,
        };
        CacheDirectives {
            max_age: Duration::from_secs(max_age),
            stale_while_revalidate: Duration::from_secs(config.stale_while_revalidate_secs),
            stale_if_error: Duration::from_secs(config.stale_if_error_secs),
        }
    }
}

/// Response caching hints
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheDirectives {
    pub max_age: Duration,
    pub stale_while_revalidate: Duration,
    pub stale_if_error: Duration,
}

impl CacheDirectives {
    /// Render as a `Cache-Control` header value
    pub fn header_value(&self) -> String {
        format!(
            "public, max-age={}, stale-while-revalidate={}, stale-if-error={}",
            self.max_age.as_secs(),
            self.stale_while_revalidate.as_secs(),
            self.stale_if_error.as_secs()
        )
    }
}

impl fmt::Display for CacheDirectives {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.header_value())
    }
}

/// Main controller for translation job requests
#[derive(Debug)]
pub struct JobController {
    // @field: App configuration
    config: Config,
    source: Arc<dyn SourceProvider>,
    scheduler: BatchScheduler,
    pipeline: BatchTranslator,
    store: Arc<ProgressStore>,
    cache: ResultCache,
    queue: JobQueue,
    limiter: Arc<RateLimiter>,
}

impl JobController {
    // @method: Wire a controller from its collaborators
    pub fn new(
        config: Config,
        translator: Arc<dyn Translator>,
        source: Arc<dyn SourceProvider>,
        store: Arc<ProgressStore>,
        cache: ResultCache,
    ) -> Self {
        let limiter = Arc::new(RateLimiter::new(config.rate_limits.clone()));
        Self::with_limiter(config, translator, source, store, cache, limiter)
    }

    // @method: Same as `new` with an existing rate limiter shared across controllers
    pub fn with_limiter(
        config: Config,
        translator: Arc<dyn Translator>,
        source: Arc<dyn SourceProvider>,
        store: Arc<ProgressStore>,
        cache: ResultCache,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        let pipeline = BatchTranslator::new(translator, limiter.clone(), store.clone(), &config);
        Self {
            scheduler: BatchScheduler::new(config.batching.clone()),
            queue: JobQueue::from_config(&config.pipeline),
            pipeline,
            store,
            cache,
            limiter,
            source,
            config,
        }
    }

    /// Build the controller with on-disk storage and the configured providers
    pub async fn from_config(config: Config, source: Option<Arc<dyn SourceProvider>>) -> Result<Self> {
        let data_dir = config.storage.resolve_data_dir()?;
        let db = DatabaseConnection::in_data_dir(&data_dir)
            .with_context(|| format!("Failed to open database in {}", data_dir.display()))?;
        let repo = Repository::new(db);
        let store = Arc::new(ProgressStore::new(repo.clone(), ArtifactStore::in_data_dir(&data_dir)));

        let cache = ResultCache::with_repository(&config.cache, repo);
        if let Err(e) = cache.warm().await {
            warn!("Failed to load cached translations: {:#}", e);
        }

        let translator = create_translator(&config)?;
        let source = match source {
            Some(source) => source,
            None => Arc::new(OpenSubtitlesSource::new(
                config.source.endpoint.clone(),
                Duration::from_secs(config.source.timeout_secs),
            )?),
        };
        Ok(Self::new(config, translator, source, store, cache))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<ProgressStore> {
        &self.store
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Cache directives for a response of this controller
    pub fn directives(&self, response: &JobResponse) -> CacheDirectives {
        response.cache_directives(&self.config.cache)
    }

    /// Handle one request: serve a finished result, report progress, or start a job
    pub async fn handle_request(&self, request: &JobRequest) -> Result<JobResponse> {
        let mut request = request.clone();
        request.target_language = language_utils::normalize_to_part1_or_part2t(&request.target_language)
            .with_context(|| format!("Unsupported target language: {}", request.target_language))?;
        let key = request.job_key();

        if let Some(response) = self.completed_response(&request, &key).await? {
            return Ok(response);
        }

        if let Some(snapshot) = self.store.snapshot(&key) {
            if !snapshot.state.phase.is_terminal() {
                if self.queue.is_waiting(&key) {
                    return Ok(queued(&snapshot.state));
                }
                if self.is_stale(&key, &snapshot) {
                    info!("Job {} looks stale, superseding it", key);
                    self.cancel(&key).await?;
                } else {
                    return Ok(in_progress(&snapshot.state));
                }
            } else if let Some(response) = self.retry_later(&key, &snapshot).await {
                return Ok(response);
            }
        }

        let candidates = self
            .source
            .search(&request.source_query())
            .await
            .with_context(|| format!("Subtitle search failed for {}", request.content_id))?;
        if candidates.is_empty() {
            info!("No subtitles found for {}", key);
            return Ok(JobResponse::NoSource);
        }

        if self.config.source.passthrough_target_language {
            if let Some(candidate) = candidates
                .iter()
                .find(|c| language_utils::language_codes_match(&c.language, &request.target_language))
            {
                info!("Source already offers {} for {}, serving it as is", request.target_language, key);
                let document = self.fetch_document(candidate, &request.target_language).await?;
                let entry = self.cache.set(request.cache_key(), document).await?;
                return Ok(JobResponse::Completed {
                    document: self.shift_for_request(&request, &key, entry.document, false),
                    source: ResultSource::Passthrough,
                });
            }
        }

        let candidate = self.select_candidate(&candidates);
        let source_language = if candidate.language.is_empty() {
            self.config.source_language.clone()
        } else {
            language_utils::normalize_to_part1_or_part2t(&candidate.language)
                .unwrap_or_else(|_| self.config.source_language.clone())
        };
        let document = self.fetch_document(candidate, &source_language).await?;

        self.start_job(&request, key, document).await
    }

    // Cache first, then a final artifact left by an earlier run
    async fn completed_response(&self, request: &JobRequest, key: &JobKey) -> Result<Option<JobResponse>> {
        let store = self.store.clone();
        let refresh_key = key.clone();
        let refresh = move || async move { load_final(&store, &refresh_key) };

        match self.cache.get_or_refresh(&request.cache_key(), refresh).await {
            Ok(Some(cached)) => {
                let source = match cached.status {
                    CacheStatus::Refreshed => ResultSource::Store,
                    _ => ResultSource::Cache,
                };
                debug!("Serving {} from {:?} ({:?})", key, source, cached.status);
                return Ok(Some(JobResponse::Completed {
                    document: self.shift_for_request(request, key, cached.entry.document, true),
                    source,
                }));
            }
            Ok(None) => {}
            Err(e) => warn!("Cache refresh for {} failed: {:#}", key, e),
        }

        if self.cache.is_enabled() {
            return Ok(None);
        }
        Ok(load_final(&self.store, key)?.map(|document| JobResponse::Completed {
            document: self.shift_for_request(request, key, Arc::new(document), true),
            source: ResultSource::Store,
        }))
    }

    // A start position moves the whole finished document; the shifted copy is kept next to the final one
    fn shift_for_request(
        &self,
        request: &JobRequest,
        key: &JobKey,
        document: Arc<SubtitleCollection>,
        persist: bool,
    ) -> Arc<SubtitleCollection> {
        let Some(offset_secs) = request.shift_secs() else {
            return document;
        };
        let shifted = document.shifted(offset_secs * 1000);
        let artifacts = self.store.artifacts();
        if persist && !artifacts.offset_path(key, offset_secs).is_file() {
            if let Err(e) = artifacts.write_offset(key, offset_secs, &shifted) {
                warn!("Failed to store {} shifted by {}s: {:#}", key, offset_secs, e);
            }
        }
        debug!(
            "Shifted {} by {}s ({} of {} entries left)",
            key,
            offset_secs,
            shifted.len(),
            document.len()
        );
        Arc::new(shifted)
    }

    // A run that ran out of daily quota stays failed until the limiter's day rolls over
    async fn retry_later(&self, key: &JobKey, snapshot: &JobSnapshot) -> Option<JobResponse> {
        let quota_failure = snapshot.state.phase == JobPhase::Failed
            && snapshot.state.failure.as_ref().is_some_and(|f| f.quota_exhausted);
        if !quota_failure || !self.limiter.daily_quota_exhausted().await {
            return None;
        }
        let retry_after = self.limiter.day_resets_in().await;
        debug!("Job {} waits for the daily quota, retry in {}s", key, retry_after.as_secs());
        Some(JobResponse::RetryLater {
            placeholder: placeholder_document(&snapshot.state.placeholder_message()),
            retry_after,
        })
    }

    fn is_stale(&self, key: &JobKey, snapshot: &JobSnapshot) -> bool {
        let threshold = self.config.pipeline.staleness_threshold();
        let age = self.store.placeholder_age(key).unwrap_or_else(|| {
            (chrono::Utc::now() - snapshot.state.last_updated_at)
                .to_std()
                .unwrap_or(Duration::ZERO)
        });
        age > threshold
    }

    // Prefer the configured source language, otherwise take what is there
    fn select_candidate<'a>(&self, candidates: &'a [SourceCandidate]) -> &'a SourceCandidate {
        let wanted = &self.config.source_language;
        match candidates
            .iter()
            .find(|c| language_codes_match_or_equal(&c.language, wanted))
        {
            Some(candidate) => candidate,
            None => {
                let first = &candidates[0];
                warn!(
                    "No {} subtitles available, using {} subtitles ({})",
                    wanted, first.language, first.id
                );
                first
            }
        }
    }

    async fn fetch_document(&self, candidate: &SourceCandidate, language: &str) -> Result<SubtitleCollection> {
        let bytes = self
            .source
            .download(candidate)
            .await
            .with_context(|| format!("Failed to download subtitle {}", candidate.id))?;
        let document = SubtitleCollection::parse_srt_bytes(&bytes, language)
            .with_context(|| format!("Failed to parse subtitle {}", candidate.id))?;
        debug!("Fetched subtitle {} with {} entries", candidate.id, document.len());
        Ok(document)
    }

    async fn start_job(&self, request: &JobRequest, key: JobKey, document: SubtitleCollection) -> Result<JobResponse> {
        let claim = self.store.get_or_create(&key, &document).await?;
        if !claim.created {
            return Ok(in_progress(&claim.state));
        }

        let snapshot = self
            .store
            .snapshot(&key)
            .with_context(|| format!("Job {} vanished right after creation", key))?;
        let pending = snapshot.pending_document();
        let anchor = BatchScheduler::anchor_for_offset(&pending, request.seek_offset_secs.map(|s| s * 1000));
        let batches = self.scheduler.plan(&pending, anchor);
        info!(
            "Job {} planned {} batches for {} pending entries{}",
            key,
            batches.len(),
            pending.len(),
            anchor.map(|a| format!(" around entry {}", a + 1)).unwrap_or_default()
        );

        let job = TranslationJob {
            key,
            run_id: claim.run_id.clone(),
        };
        let cancel = self.queue.register(&job.key, &job.run_id);
        let queue = self.queue.clone();
        let pipeline = self.pipeline.clone();
        let store = self.store.clone();
        let cache = self.cache.clone();
        let cache_key = request.cache_key();

        let _worker: JoinHandle<()> = tokio::spawn(async move {
            // The staleness clock starts once the run holds a slot
            let run = async {
                store.touch_placeholder(&job.key, &job.run_id);
                pipeline.run(&job, batches, cancel.clone()).await
            };
            let outcome = queue.execute(&job.key, &job.run_id, &cancel, run).await;
            queue.finish(&job.key, &job.run_id);
            settle(&store, &cache, cache_key, &job, outcome).await;
        });

        Ok(JobResponse::Started {
            placeholder: placeholder_document(&claim.state.placeholder_message()),
        })
    }

    /// Cancel the active job for `key`, if any
    pub async fn cancel(&self, key: &JobKey) -> Result<bool> {
        let signalled = self.queue.cancel(key);
        let cancelled = self.store.cancel(key).await?;
        Ok(signalled || cancelled)
    }

    /// Current in-memory state of a job
    pub fn status(&self, key: &JobKey) -> Option<Arc<JobSnapshot>> {
        self.store.snapshot(key)
    }

    /// Poll until the job for `key` reached a terminal phase
    pub async fn wait_until_settled(&self, key: &JobKey, poll: Duration) -> Option<Arc<JobSnapshot>> {
        loop {
            let snapshot = self.store.snapshot(key)?;
            if snapshot.state.phase.is_terminal() && !self.queue.is_running(key) {
                return Some(snapshot);
            }
            tokio::time::sleep(poll).await;
        }
    }
}

fn in_progress(state: &ProgressState) -> JobResponse {
    JobResponse::InProgress {
        placeholder: placeholder_document(&state.placeholder_message()),
        progress: state.clone(),
    }
}

fn queued(state: &ProgressState) -> JobResponse {
    JobResponse::InProgress {
        placeholder: placeholder_document(&format!(
            "Queued, waiting for a translation slot...\n{}",
            state.placeholder_message()
        )),
        progress: state.clone(),
    }
}

fn language_codes_match_or_equal(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b) || language_utils::language_codes_match(a, b)
}

fn load_final(store: &ProgressStore, key: &JobKey) -> Result<Option<SubtitleCollection>> {
    match store.read_output(key)? {
        Some(text) => Ok(Some(SubtitleCollection::parse_srt_string(&text, &key.target_language)?)),
        None => Ok(None),
    }
}

// Record how a run ended
async fn settle(
    store: &ProgressStore,
    cache: &ResultCache,
    cache_key: CacheKey,
    job: &TranslationJob,
    outcome: Result<PipelineReport, TranslationError>,
) {
    match outcome {
        Ok(report) => match store.complete(&job.key, &job.run_id).await {
            Ok(document) => {
                info!(
                    "Job {} finished: {} entries, {} batches fell back",
                    job.key, report.processed_entries, report.fallback_batches
                );
                if let Err(e) = cache.set(cache_key, document).await {
                    warn!("Failed to cache result of {}: {:#}", job.key, e);
                }
            }
            Err(e) => error!("Failed to complete job {}: {:#}", job.key, e),
        },
        Err(TranslationError::Cancelled) => {
            let still_current = store
                .snapshot(&job.key)
                .is_some_and(|s| s.run_id == job.run_id && !s.state.phase.is_terminal());
            if still_current {
                if let Err(e) = store.cancel(&job.key).await {
                    warn!("Failed to mark job {} cancelled: {:#}", job.key, e);
                }
            }
            debug!("Job {} run {} stopped", job.key, job.short_id());
        }
        Err(e) => {
            if let Err(store_err) = store.fail(&job.key, &job.run_id, JobFailure::from(&e)).await {
                warn!("Failed to mark job {} failed: {:#}", job.key, store_err);
            }
        }
    }
}
