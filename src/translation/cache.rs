/*!
 * Translated document caching.
 *
 * Completed documents are kept in memory keyed by content, target language
 * and video hash, and written through to SQLite when a repository is
 * attached. Entries move through three age windows:
 * - fresh until `ttl`
 * - servable while a background refresh runs until `ttl + stale_while_revalidate`
 * - servable only when a refresh fails until `ttl + stale_if_error`
 *
 * A single periodic sweep drops entries past every window.
 */

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc};
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::app_config::CacheConfig;
use crate::database::Repository;
use crate::database::models::CacheRecord;
use crate::subtitle_processor::SubtitleCollection;

/// Cache key: content, target language and optional video hash
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub content_id: String,
    pub target_language: String,
    pub video_hash: Option<String>,
}

impl CacheKey {
    pub fn new(content_id: impl Into<String>, target_language: impl Into<String>, video_hash: Option<String>) -> Self {
        Self {
            content_id: content_id.into(),
            target_language: target_language.into().to_lowercase(),
            video_hash: video_hash.filter(|h| !h.is_empty()),
        }
    }

    pub fn storage_key(&self) -> String {
        format!(
            "{}:{}:{}",
            self.content_id,
            self.target_language,
            self.video_hash.as_deref().unwrap_or("")
        )
    }
}

/// One cached translated document
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub document: Arc<SubtitleCollection>,
    pub source_language: String,
    pub created_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(document: SubtitleCollection) -> Self {
        Self::created_at(document, Utc::now())
    }

    pub fn created_at(document: SubtitleCollection, created_at: DateTime<Utc>) -> Self {
        Self {
            source_language: document.source_language.clone(),
            document: Arc::new(document),
            created_at,
        }
    }

    fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.created_at).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Result of a plain lookup
#[derive(Debug, Clone)]
pub enum CacheLookup {
    Fresh(CacheEntry),
    // @field: Past the TTL but inside the stale-while-revalidate window
    Stale(CacheEntry),
    Miss,
}

/// How `get_or_refresh` produced its entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Fresh,
    /// Served stale while a background refresh runs
    Stale,
    /// Loaded from the refresh source just now
    Refreshed,
    /// Served stale because the refresh failed
    StaleOnError,
}

#[derive(Debug, Clone)]
pub struct Cached {
    pub entry: CacheEntry,
    pub status: CacheStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Freshness {
    Fresh,
    Revalidate,
    ErrorOnly,
    Expired,
}

/// Age windows derived from the cache configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    pub ttl: Duration,
    pub stale_while_revalidate: Duration,
    pub stale_if_error: Duration,
}

impl CachePolicy {
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            ttl: Duration::from_secs(config.ttl_secs),
            stale_while_revalidate: Duration::from_secs(config.stale_while_revalidate_secs),
            stale_if_error: Duration::from_secs(config.stale_if_error_secs),
        }
    }

    /// Age after which an entry is of no use at all
    pub fn retention(&self) -> Duration {
        self.ttl + self.stale_while_revalidate.max(self.stale_if_error)
    }

    fn classify(&self, age: Duration) -> Freshness {
        if age < self.ttl {
            Freshness::Fresh
        } else if age < self.ttl + self.stale_while_revalidate {
            Freshness::Revalidate
        } else if age < self.ttl + self.stale_if_error {
            Freshness::ErrorOnly
        } else {
            Freshness::Expired
        }
    }
}

struct CacheInner {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    // @field: Keys with a background refresh in flight
    refreshing: Mutex<HashSet<CacheKey>>,
    policy: CachePolicy,
    enabled: bool,
    repo: Option<Repository>,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

/// Result cache shared by the request controller; clones share state
#[derive(Clone)]
pub struct ResultCache {
    inner: Arc<CacheInner>,
}

impl std::fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCache")
            .field("entries", &self.len())
            .field("policy", &self.inner.policy)
            .field("enabled", &self.inner.enabled)
            .finish()
    }
}

impl ResultCache {
    /// In-memory cache
    pub fn new(config: &CacheConfig) -> Self {
        Self::build(config, None)
    }

    /// Cache that writes through to `repo`
    pub fn with_repository(config: &CacheConfig, repo: Repository) -> Self {
        Self::build(config, Some(repo))
    }

    fn build(config: &CacheConfig, repo: Option<Repository>) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                entries: RwLock::new(HashMap::new()),
                refreshing: Mutex::new(HashSet::new()),
                policy: CachePolicy::from_config(config),
                enabled: config.enabled,
                repo,
                hits: AtomicUsize::new(0),
                misses: AtomicUsize::new(0),
            }),
        }
    }

    pub fn policy(&self) -> CachePolicy {
        self.inner.policy
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled
    }

    pub fn len(&self) -> usize {
        self.inner.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.read().is_empty()
    }

    /// (hits, misses, hit rate)
    pub fn stats(&self) -> (usize, usize, f64) {
        let hits = self.inner.hits.load(Ordering::Relaxed);
        let misses = self.inner.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 { hits as f64 / total as f64 } else { 0.0 };
        (hits, misses, hit_rate)
    }

    /// Load persisted entries that are still inside the retention window
    pub async fn warm(&self) -> Result<usize> {
        let Some(repo) = &self.inner.repo else {
            return Ok(0);
        };
        if !self.inner.enabled {
            return Ok(0);
        }
        let cutoff = Utc::now() - chrono::Duration::from_std(self.inner.policy.retention())?;
        let records = repo.load_cache(cutoff.timestamp()).await?;

        let mut loaded = 0;
        let mut entries = self.inner.entries.write();
        for record in records {
            let document = match SubtitleCollection::parse_srt_string(&record.document, &record.source_language) {
                Ok(document) => document,
                Err(e) => {
                    warn!("Skipping unreadable cache entry {}: {}", record.cache_key, e);
                    continue;
                }
            };
            let created_at = Utc.timestamp_opt(record.created_at, 0).single().unwrap_or_else(Utc::now);
            let video_hash = Some(record.video_hash).filter(|h| !h.is_empty());
            let key = CacheKey::new(record.content_id, record.target_language, video_hash);
            entries.insert(key, CacheEntry::created_at(document, created_at));
            loaded += 1;
        }
        info!("Loaded {} cached translations", loaded);
        Ok(loaded)
    }

    pub fn get(&self, key: &CacheKey) -> CacheLookup {
        if !self.inner.enabled {
            return CacheLookup::Miss;
        }
        let entry = self.inner.entries.read().get(key).cloned();
        let lookup = match entry {
            Some(entry) => match self.inner.policy.classify(entry.age(Utc::now())) {
                Freshness::Fresh => CacheLookup::Fresh(entry),
                Freshness::Revalidate => CacheLookup::Stale(entry),
                Freshness::ErrorOnly | Freshness::Expired => CacheLookup::Miss,
            },
            None => CacheLookup::Miss,
        };
        match lookup {
            CacheLookup::Miss => self.inner.misses.fetch_add(1, Ordering::Relaxed),
            _ => self.inner.hits.fetch_add(1, Ordering::Relaxed),
        };
        lookup
    }

    /// Store a document created now
    pub async fn set(&self, key: CacheKey, document: SubtitleCollection) -> Result<CacheEntry> {
        let entry = CacheEntry::new(document);
        self.put(key, entry.clone()).await?;
        Ok(entry)
    }

    /// Store an entry as is, keeping its creation time
    pub async fn put(&self, key: CacheKey, entry: CacheEntry) -> Result<()> {
        if !self.inner.enabled {
            return Ok(());
        }
        if let Some(repo) = &self.inner.repo {
            repo.put_cache(&CacheRecord {
                cache_key: key.storage_key(),
                content_id: key.content_id.clone(),
                target_language: key.target_language.clone(),
                video_hash: key.video_hash.clone().unwrap_or_default(),
                source_language: entry.source_language.clone(),
                document: entry.document.to_srt_string(),
                created_at: entry.created_at.timestamp(),
            })
            .await?;
        }
        debug!("Cached translation for {}", key.storage_key());
        self.inner.entries.write().insert(key, entry);
        Ok(())
    }

    pub async fn invalidate(&self, key: &CacheKey) -> Result<bool> {
        let removed = self.inner.entries.write().remove(key).is_some();
        if let Some(repo) = &self.inner.repo {
            repo.delete_cache(&key.storage_key()).await?;
        }
        Ok(removed)
    }

    /// Look up `key`, calling `refresh` when the entry is missing or stale.
    ///
    /// `refresh` yields `None` when its source has nothing for the key.
    /// Stale entries inside the revalidate window are served immediately and
    /// refreshed once in the background. Older entries are refreshed inline
    /// and served only if that refresh fails.
    pub async fn get_or_refresh<F, Fut>(&self, key: &CacheKey, refresh: F) -> Result<Option<Cached>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Option<SubtitleCollection>>> + Send + 'static,
    {
        if !self.inner.enabled {
            return Ok(None);
        }
        let existing = self.inner.entries.read().get(key).cloned();
        let freshness = existing
            .as_ref()
            .map(|e| self.inner.policy.classify(e.age(Utc::now())))
            .unwrap_or(Freshness::Expired);

        match (existing, freshness) {
            (Some(entry), Freshness::Fresh) => {
                self.inner.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(Cached { entry, status: CacheStatus::Fresh }))
            }
            (Some(entry), Freshness::Revalidate) => {
                self.inner.hits.fetch_add(1, Ordering::Relaxed);
                self.spawn_revalidation(key.clone(), refresh);
                Ok(Some(Cached { entry, status: CacheStatus::Stale }))
            }
            (existing, freshness) => {
                self.inner.misses.fetch_add(1, Ordering::Relaxed);
                let fallback = existing.filter(|_| freshness == Freshness::ErrorOnly);
                match refresh().await {
                    Ok(Some(document)) => {
                        let entry = self.set(key.clone(), document).await?;
                        Ok(Some(Cached { entry, status: CacheStatus::Refreshed }))
                    }
                    Ok(None) => Ok(None),
                    Err(e) => match fallback {
                        Some(entry) => {
                            warn!("Refresh of {} failed, serving stale copy: {:#}", key.storage_key(), e);
                            Ok(Some(Cached { entry, status: CacheStatus::StaleOnError }))
                        }
                        None => Err(e),
                    },
                }
            }
        }
    }

    fn spawn_revalidation<F, Fut>(&self, key: CacheKey, refresh: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Option<SubtitleCollection>>> + Send + 'static,
    {
        if !self.inner.refreshing.lock().insert(key.clone()) {
            debug!("Refresh of {} already running", key.storage_key());
            return;
        }
        let cache = self.clone();
        tokio::spawn(async move {
            match refresh().await {
                Ok(Some(document)) => {
                    if let Err(e) = cache.set(key.clone(), document).await {
                        warn!("Failed to store refreshed {}: {:#}", key.storage_key(), e);
                    }
                }
                Ok(None) => debug!("Refresh source has nothing for {}", key.storage_key()),
                Err(e) => warn!("Background refresh of {} failed: {:#}", key.storage_key(), e),
            }
            cache.inner.refreshing.lock().remove(&key);
        });
    }

    /// Whether a background refresh for `key` is running
    pub fn is_refreshing(&self, key: &CacheKey) -> bool {
        self.inner.refreshing.lock().contains(key)
    }

    /// Drop entries past the retention window, in memory and on disk
    pub async fn sweep(&self) -> Result<usize> {
        let retention = self.inner.policy.retention();
        let now = Utc::now();
        let removed = {
            let mut entries = self.inner.entries.write();
            let before = entries.len();
            entries.retain(|_, entry| entry.age(now) < retention);
            before - entries.len()
        };
        if let Some(repo) = &self.inner.repo {
            let cutoff = now - chrono::Duration::from_std(retention)?;
            repo.delete_cache_before(cutoff.timestamp()).await?;
        }
        if removed > 0 {
            debug!("Cache sweep removed {} entries", removed);
        }
        Ok(removed)
    }

    /// Run `sweep` every `interval` until `shutdown` fires
    pub fn spawn_sweeper(&self, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = cache.sweep().await {
                            warn!("Cache sweep failed: {:#}", e);
                        }
                    }
                }
            }
        })
    }
}
