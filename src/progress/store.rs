/*!
 * Progress and result store.
 *
 * Tracks every active job in memory, persists each applied batch to SQLite
 * and keeps the placeholder artifact in step with the progress. Readers get
 * `Arc<JobSnapshot>` values that are swapped, never mutated, so a poll never
 * observes half of a batch.
 */

use anyhow::{anyhow, Result};
use log::{debug, info, warn};
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::database::models::JobEntryRecord;
use crate::database::repository::{new_job_record, Repository};
use crate::subtitle_processor::{SubtitleCollection, SubtitleEntry};

use super::artifacts::ArtifactStore;
use super::models::{JobFailure, JobKey, JobPhase, JobSnapshot, ProgressState};

/// Outcome of `get_or_create`
#[derive(Debug, Clone)]
pub struct JobClaim {
    pub state: ProgressState,
    /// True when this call started the run and must schedule it
    pub created: bool,
    pub run_id: String,
}

/// Store for job progress, partial results and artifacts
#[derive(Debug)]
pub struct ProgressStore {
    repo: Repository,
    artifacts: ArtifactStore,
    jobs: RwLock<HashMap<JobKey, Arc<JobSnapshot>>>,
}

impl ProgressStore {
    pub fn new(repo: Repository, artifacts: ArtifactStore) -> Self {
        Self {
            repo,
            artifacts,
            jobs: RwLock::new(HashMap::new()),
        }
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    /// SHA-256 over entry positions, timings and text
    pub fn source_hash(document: &SubtitleCollection) -> String {
        let mut hasher = Sha256::new();
        for entry in &document.entries {
            hasher.update(entry.seq_num.to_le_bytes());
            hasher.update(entry.start_time_ms.to_le_bytes());
            hasher.update(entry.end_time_ms.to_le_bytes());
            hasher.update(entry.text().as_bytes());
            hasher.update([0u8]);
        }
        format!("{:x}", hasher.finalize())
    }

    /// Return the active job for `key`, or start a run for `document`.
    ///
    /// The active-job check and the claim happen under one write lock, so
    /// concurrent callers for the same key create at most one run. A new run
    /// resumes from persisted entries when the source document is unchanged.
    pub async fn get_or_create(&self, key: &JobKey, document: &SubtitleCollection) -> Result<JobClaim> {
        let source_hash = Self::source_hash(document);
        let run_id = Uuid::new_v4().to_string();

        {
            let mut jobs = self.jobs.write();
            if let Some(existing) = jobs.get(key) {
                if !existing.state.phase.is_terminal() {
                    return Ok(JobClaim {
                        state: existing.state.clone(),
                        created: false,
                        run_id: existing.run_id.clone(),
                    });
                }
            }
            let claim = JobSnapshot::new(key.clone(), run_id.clone(), source_hash.clone(), document.clone());
            jobs.insert(key.clone(), Arc::new(claim));
        }

        match self.initialise_run(key, &run_id, &source_hash, document).await {
            Ok(state) => Ok(JobClaim { state, created: true, run_id }),
            Err(e) => {
                let mut jobs = self.jobs.write();
                if jobs.get(key).is_some_and(|s| s.run_id == run_id) {
                    jobs.remove(key);
                }
                Err(e)
            }
        }
    }

    async fn initialise_run(
        &self,
        key: &JobKey,
        run_id: &str,
        source_hash: &str,
        document: &SubtitleCollection,
    ) -> Result<ProgressState> {
        let storage_key = key.storage_key();
        let base = JobSnapshot::new(key.clone(), run_id.to_string(), source_hash.to_string(), document.clone());

        let snapshot = match self.repo.get_job(&storage_key).await? {
            Some(record) if record.source_hash == source_hash => {
                // Fallback rows hold source text; translate them again
                let entries: Vec<SubtitleEntry> = self
                    .repo
                    .get_job_entries(&storage_key)
                    .await?
                    .into_iter()
                    .filter(|r| !r.fallback)
                    .map(|r| {
                        SubtitleEntry::from_text(
                            r.seq_num as usize,
                            r.start_time_ms as u64,
                            r.end_time_ms as u64,
                            &r.translated_text,
                        )
                    })
                    .collect();
                self.repo.resume_job(&storage_key, run_id, JobPhase::Starting).await?;
                let resumed = base.merged(&entries, JobPhase::Starting);
                info!(
                    "Resuming job {} run {} ({}/{} entries already translated)",
                    key,
                    &run_id[..8],
                    resumed.state.processed_count,
                    resumed.state.total_count
                );
                resumed
            }
            _ => {
                let record = new_job_record(
                    storage_key,
                    run_id.to_string(),
                    key.content_id.clone(),
                    key.season,
                    key.episode,
                    key.target_language.clone(),
                    document.source_language.clone(),
                    source_hash.to_string(),
                    document.len() as i64,
                );
                self.repo.start_job(&record).await?;
                info!("Created job {} run {} ({} entries)", key, &run_id[..8], document.len());
                base
            }
        };

        let state = snapshot.state.clone();
        self.swap(key, run_id, snapshot)?;
        self.write_placeholder(key, &state);
        Ok(state)
    }

    fn current(&self, key: &JobKey, run_id: &str) -> Result<Arc<JobSnapshot>> {
        let jobs = self.jobs.read();
        match jobs.get(key) {
            Some(snapshot) if snapshot.run_id == run_id => Ok(snapshot.clone()),
            Some(_) => Err(anyhow!("Job {} was superseded by a newer run", key)),
            None => Err(anyhow!("Job {} is not active", key)),
        }
    }

    // Finished runs are frozen: a late writer cannot revive a cancelled job
    fn swap(&self, key: &JobKey, run_id: &str, next: JobSnapshot) -> Result<Arc<JobSnapshot>> {
        let mut jobs = self.jobs.write();
        match jobs.get(key) {
            Some(snapshot) if snapshot.run_id == run_id && !snapshot.state.phase.is_terminal() => {
                let next = Arc::new(next);
                jobs.insert(key.clone(), next.clone());
                Ok(next)
            }
            Some(snapshot) if snapshot.run_id == run_id => {
                Err(anyhow!("Job {} already finished as {}", key, snapshot.state.phase))
            }
            _ => Err(anyhow!("Job {} was superseded by a newer run", key)),
        }
    }

    // Progress display must never fail a batch
    fn write_placeholder(&self, key: &JobKey, state: &ProgressState) {
        if let Err(e) = self.artifacts.write_placeholder(key, &state.placeholder_message()) {
            warn!("Failed to update placeholder for {}: {:#}", key, e);
        }
    }

    /// Merge translated entries into the job and persist them in one transaction
    pub async fn apply_partial(
        &self,
        key: &JobKey,
        run_id: &str,
        entries: &[SubtitleEntry],
        phase: JobPhase,
        fallback: bool,
    ) -> Result<ProgressState> {
        let current = self.current(key, run_id)?;
        if current.state.phase.is_terminal() {
            return Err(anyhow!("Job {} already finished as {}", key, current.state.phase));
        }
        let next = current.merged(entries, phase);

        let storage_key = key.storage_key();
        let records = entries
            .iter()
            .map(|e| JobEntryRecord {
                job_key: storage_key.clone(),
                seq_num: e.seq_num as i64,
                start_time_ms: e.start_time_ms as i64,
                end_time_ms: e.end_time_ms as i64,
                translated_text: e.text(),
                fallback,
            })
            .collect();
        self.repo
            .apply_batch(&storage_key, run_id, records, next.state.processed_count as i64, phase)
            .await?;

        let state = next.state.clone();
        self.swap(key, run_id, next)?;
        self.write_placeholder(key, &state);
        debug!(
            "Job {} progress {}/{} ({})",
            key, state.processed_count, state.total_count, state.phase
        );
        Ok(state)
    }

    /// Write the final artifact and mark the job complete
    pub async fn complete(&self, key: &JobKey, run_id: &str) -> Result<SubtitleCollection> {
        let current = self.current(key, run_id)?;
        if current.state.phase.is_terminal() {
            return Err(anyhow!("Job {} already finished as {}", key, current.state.phase));
        }
        let document = (*current.document).clone();

        let path = self.artifacts.write_final(key, &document)?;
        self.artifacts.remove_placeholder(key)?;
        if let Err(e) = self.artifacts.remove_offsets(key) {
            warn!("Failed to remove shifted copies of {}: {:#}", key, e);
        }
        if !self.repo.finish_job(&key.storage_key(), run_id, JobPhase::Complete, None).await? {
            return Err(anyhow!("Job {} was superseded by a newer run", key));
        }
        self.swap(key, run_id, current.with_phase(JobPhase::Complete))?;

        info!("Job {} complete, wrote {}", key, path.display());
        Ok(document)
    }

    /// Mark a run failed and put the failure into its placeholder
    pub async fn fail(&self, key: &JobKey, run_id: &str, failure: JobFailure) -> Result<()> {
        let current = self.current(key, run_id)?;
        if current.state.phase.is_terminal() {
            return Ok(());
        }
        self.repo
            .finish_job(&key.storage_key(), run_id, JobPhase::Failed, Some(failure.reason.clone()))
            .await?;
        let next = current.failed(failure);
        let state = next.state.clone();
        self.swap(key, run_id, next)?;
        self.write_placeholder(key, &state);
        warn!("Job {} failed: {}", key, state.failure.as_ref().map(|f| f.reason.as_str()).unwrap_or_default());
        Ok(())
    }

    /// Rewrite the placeholder of a live run without changing its progress
    pub fn touch_placeholder(&self, key: &JobKey, run_id: &str) {
        if let Ok(current) = self.current(key, run_id) {
            if !current.state.phase.is_terminal() {
                self.write_placeholder(key, &current.state);
            }
        }
    }

    /// Cancel whatever run is active for `key`
    pub async fn cancel(&self, key: &JobKey) -> Result<bool> {
        let current = match self.snapshot(key) {
            Some(snapshot) if !snapshot.state.phase.is_terminal() => snapshot,
            _ => return Ok(false),
        };
        self.swap(key, &current.run_id, current.with_phase(JobPhase::Cancelled))?;
        self.repo
            .finish_job(&key.storage_key(), &current.run_id, JobPhase::Cancelled, None)
            .await?;
        info!("Job {} run {} cancelled", key, &current.run_id[..8]);
        Ok(true)
    }

    pub fn snapshot(&self, key: &JobKey) -> Option<Arc<JobSnapshot>> {
        self.jobs.read().get(key).cloned()
    }

    /// Whether a run for `key` is still making progress
    pub fn is_active(&self, key: &JobKey) -> bool {
        self.snapshot(key).is_some_and(|s| !s.state.phase.is_terminal())
    }

    pub fn is_complete(&self, key: &JobKey) -> bool {
        self.snapshot(key).is_some_and(|s| s.state.is_complete()) || self.artifacts.has_final(key)
    }

    pub fn read_placeholder(&self, key: &JobKey) -> Result<Option<String>> {
        self.artifacts.read_placeholder(key)
    }

    pub fn read_output(&self, key: &JobKey) -> Result<Option<String>> {
        self.artifacts.read_final(key)
    }

    pub fn placeholder_age(&self, key: &JobKey) -> Option<Duration> {
        self.artifacts.placeholder_age(key)
    }
}
