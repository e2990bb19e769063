/*!
 * Database entity models.
 *
 * These structures map directly to database tables and provide
 * type-safe access to persisted data.
 */

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle phase of a translation job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    /// Quick feedback batches
    Starting,
    /// Entries around the seek anchor
    Priority,
    /// Entries near the priority window
    Context,
    /// Everything else, front to back
    Sequential,
    Complete,
    Failed,
    Cancelled,
}

impl JobPhase {
    /// Whether the job will make no further progress
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobPhase::Starting => "starting",
            JobPhase::Priority => "priority",
            JobPhase::Context => "context",
            JobPhase::Sequential => "sequential",
            JobPhase::Complete => "complete",
            JobPhase::Failed => "failed",
            JobPhase::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobPhase {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "starting" => Ok(JobPhase::Starting),
            "priority" => Ok(JobPhase::Priority),
            "context" => Ok(JobPhase::Context),
            "sequential" => Ok(JobPhase::Sequential),
            "complete" => Ok(JobPhase::Complete),
            "failed" => Ok(JobPhase::Failed),
            "cancelled" => Ok(JobPhase::Cancelled),
            _ => Err(anyhow::anyhow!("Invalid job phase: {}", s)),
        }
    }
}

/// Job record from the jobs table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    /// Storage form of the job key
    pub job_key: String,
    /// Identifier of the current run, changes when a job restarts
    pub run_id: String,
    pub content_id: String,
    pub season: Option<u32>,
    pub episode: Option<u32>,
    pub target_language: String,
    pub source_language: String,
    /// SHA-256 of the decoded source document
    pub source_hash: String,
    pub total_count: i64,
    pub processed_count: i64,
    pub phase: JobPhase,
    pub error_message: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub completed_at: Option<String>,
}

impl JobRecord {
    /// Get the progress percentage (0-100)
    pub fn progress_percent(&self) -> f64 {
        if self.total_count == 0 {
            return 100.0;
        }
        (self.processed_count as f64 / self.total_count as f64) * 100.0
    }
}

/// Translated entry record from the job_entries table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEntryRecord {
    pub job_key: String,
    pub seq_num: i64,
    pub start_time_ms: i64,
    pub end_time_ms: i64,
    pub translated_text: String,
    /// Original text kept after retries ran out
    pub fallback: bool,
}

/// Persisted result cache entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub cache_key: String,
    pub content_id: String,
    pub target_language: String,
    pub video_hash: String,
    pub source_language: String,
    /// Encoded SRT document
    pub document: String,
    /// Unix seconds
    pub created_at: i64,
}
