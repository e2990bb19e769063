/*!
 * Progress models.
 *
 * `JobKey` identifies a translation job, `ProgressState` is what pollers
 * see, and `JobSnapshot` is the immutable view the store swaps in after
 * every batch.
 */

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::errors::TranslationError;
use crate::subtitle_processor::{SubtitleCollection, SubtitleEntry};
use crate::translation::scheduler::BatchPhase;

pub use crate::database::models::JobPhase;

/// Identity of a translation job
///
/// The seek offset is not part of the key: requests for the same episode at
/// different positions share one job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobKey {
    pub content_id: String,
    pub season: Option<u32>,
    pub episode: Option<u32>,
    pub target_language: String,
}

impl JobKey {
    pub fn new(content_id: impl Into<String>, season: Option<u32>, episode: Option<u32>, target_language: impl Into<String>) -> Self {
        Self {
            content_id: content_id.into(),
            season,
            episode,
            target_language: target_language.into().trim().to_lowercase(),
        }
    }

    // @returns: Stable key used as the jobs table primary key
    pub fn storage_key(&self) -> String {
        let part = |v: Option<u32>| v.map(|n| n.to_string()).unwrap_or_default();
        format!(
            "{}:{}:{}:{}",
            self.content_id,
            part(self.season),
            part(self.episode),
            self.target_language
        )
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.season, self.episode) {
            (Some(s), Some(e)) => write!(f, "{} S{:02}E{:02} [{}]", self.content_id, s, e, self.target_language),
            _ => write!(f, "{} [{}]", self.content_id, self.target_language),
        }
    }
}

impl From<BatchPhase> for JobPhase {
    fn from(phase: BatchPhase) -> Self {
        match phase {
            BatchPhase::Starting => JobPhase::Starting,
            BatchPhase::Priority => JobPhase::Priority,
            BatchPhase::Context => JobPhase::Context,
            BatchPhase::Sequential => JobPhase::Sequential,
        }
    }
}

/// Why a run stopped without finishing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub reason: String,
    // @field: The backend's daily quota ran out; retrying before the day rolls over is pointless
    pub quota_exhausted: bool,
}

impl JobFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            quota_exhausted: false,
        }
    }
}

impl From<&TranslationError> for JobFailure {
    fn from(error: &TranslationError) -> Self {
        Self {
            reason: error.to_string(),
            quota_exhausted: matches!(error, TranslationError::DailyLimitExceeded { .. }),
        }
    }
}

/// Progress of one job as reported to pollers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressState {
    pub processed_count: usize,
    pub total_count: usize,
    pub phase: JobPhase,
    pub last_updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<JobFailure>,
}

impl ProgressState {
    pub fn new(total_count: usize) -> Self {
        Self {
            processed_count: 0,
            total_count,
            phase: JobPhase::Starting,
            last_updated_at: Utc::now(),
            failure: None,
        }
    }

    /// Rounded completion percentage
    pub fn percent(&self) -> u32 {
        if self.total_count == 0 {
            return 100;
        }
        ((self.processed_count as f64 / self.total_count as f64) * 100.0).round() as u32
    }

    pub fn is_complete(&self) -> bool {
        self.phase == JobPhase::Complete
    }

    /// Text shown in the placeholder subtitle while the job runs
    pub fn placeholder_message(&self) -> String {
        if let Some(failure) = &self.failure {
            let headline = if failure.quota_exhausted {
                "Daily translation limit reached.\nPlease try again later."
            } else {
                "Translation error occurred. Please try again."
            };
            return format!(
                "{}\n({}/{} subtitles translated)",
                headline, self.processed_count, self.total_count
            );
        }

        let progress = format!(
            "Translating subtitles... {}% complete\n({}/{} subtitles translated)\nPlease wait or refresh to check progress.",
            self.percent(),
            self.processed_count,
            self.total_count
        );
        // The starting headline is the progress line itself
        match phase_headline(self.phase) {
            Some(headline) => format!("{}\n{}", headline, progress),
            None => progress,
        }
    }
}

fn phase_headline(phase: JobPhase) -> Option<&'static str> {
    match phase {
        JobPhase::Priority => Some("Translating subtitles around your start point..."),
        JobPhase::Context => Some("Translating nearby subtitles..."),
        JobPhase::Sequential => Some("Translating remaining subtitles..."),
        _ => None,
    }
}

/// Immutable view of a job, replaced wholesale on every update
#[derive(Debug, Clone)]
pub struct JobSnapshot {
    pub key: JobKey,
    // @field: Changes whenever the job restarts; stale writers are rejected
    pub run_id: String,
    pub source_hash: String,
    pub state: ProgressState,
    // @field: Source document with translated entries merged in
    pub document: Arc<SubtitleCollection>,
    // @field: Parallel to document.entries
    pub done: Arc<Vec<bool>>,
    pub(crate) positions: Arc<HashMap<usize, usize>>,
}

impl JobSnapshot {
    pub(crate) fn new(key: JobKey, run_id: String, source_hash: String, document: SubtitleCollection) -> Self {
        let positions = document
            .entries
            .iter()
            .enumerate()
            .map(|(idx, e)| (e.seq_num, idx))
            .collect::<HashMap<_, _>>();
        let total = document.len();
        Self {
            key,
            run_id,
            source_hash,
            state: ProgressState::new(total),
            done: Arc::new(vec![false; total]),
            document: Arc::new(document),
            positions: Arc::new(positions),
        }
    }

    /// New snapshot with `entries` merged at their sequence numbers
    pub(crate) fn merged(&self, entries: &[SubtitleEntry], phase: JobPhase) -> Self {
        let mut document = (*self.document).clone();
        let mut done = (*self.done).clone();
        for entry in entries {
            if let Some(&idx) = self.positions.get(&entry.seq_num) {
                document.entries[idx] = entry.clone();
                done[idx] = true;
            }
        }
        let processed_count = done.iter().filter(|d| **d).count();

        Self {
            key: self.key.clone(),
            run_id: self.run_id.clone(),
            source_hash: self.source_hash.clone(),
            state: ProgressState {
                processed_count,
                total_count: done.len(),
                phase,
                last_updated_at: Utc::now(),
                failure: None,
            },
            document: Arc::new(document),
            done: Arc::new(done),
            positions: self.positions.clone(),
        }
    }

    pub(crate) fn with_phase(&self, phase: JobPhase) -> Self {
        let mut next = self.clone();
        next.state.phase = phase;
        next.state.last_updated_at = Utc::now();
        next
    }

    pub(crate) fn failed(&self, failure: JobFailure) -> Self {
        let mut next = self.with_phase(JobPhase::Failed);
        next.state.failure = Some(failure);
        next
    }

    /// Entries still waiting for a translation, in document order
    pub fn pending_document(&self) -> SubtitleCollection {
        let entries = self
            .document
            .entries
            .iter()
            .zip(self.done.iter())
            .filter(|(_, done)| !**done)
            .map(|(entry, _)| entry.clone())
            .collect();
        let mut pending = SubtitleCollection::from_entries(entries, self.document.source_language.clone());
        pending.encoding = self.document.encoding;
        pending
    }
}
