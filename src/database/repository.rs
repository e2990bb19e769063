/*!
 * Repository layer for database operations.
 *
 * This module provides a high-level API for all database operations,
 * abstracting away the SQL details and providing type-safe access.
 */

use anyhow::{anyhow, Result};
use chrono::Utc;
use log::debug;
use rusqlite::{params, Connection, OptionalExtension, Row};
use sha2::{Digest, Sha256};

use super::connection::DatabaseConnection;
use super::models::{CacheRecord, JobEntryRecord, JobPhase, JobRecord};

const JOB_COLUMNS: &str = "job_key, run_id, content_id, season, episode, target_language, source_language, \
     source_hash, total_count, processed_count, phase, error_message, created_at, updated_at, completed_at";

const TERMINAL_PHASES: &str = "'complete', 'failed', 'cancelled'";

/// Repository for database operations
#[derive(Clone, Debug)]
pub struct Repository {
    db: DatabaseConnection,
}

impl Repository {
    /// Create a new repository with the given database connection
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Create a repository with an in-memory database (for testing)
    pub fn new_in_memory() -> Result<Self> {
        Ok(Self::new(DatabaseConnection::new_in_memory()?))
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Compute SHA256 hash of text
    pub fn hash_text(text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    fn now() -> String {
        Utc::now().to_rfc3339()
    }

    // =========================================================================
    // Job Operations
    // =========================================================================

    /// Start a fresh run for a job key, dropping anything a previous run stored
    pub async fn start_job(&self, job: &JobRecord) -> Result<()> {
        let job = job.clone();

        self.db
            .transaction_async(move |tx| {
                tx.execute("DELETE FROM job_entries WHERE job_key = ?1", [&job.job_key])?;
                tx.execute("DELETE FROM jobs WHERE job_key = ?1", [&job.job_key])?;
                tx.execute(
                    &format!(
                        "INSERT INTO jobs ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                        JOB_COLUMNS
                    ),
                    params![
                        job.job_key,
                        job.run_id,
                        job.content_id,
                        job.season,
                        job.episode,
                        job.target_language,
                        job.source_language,
                        job.source_hash,
                        job.total_count,
                        job.processed_count,
                        job.phase.to_string(),
                        job.error_message,
                        job.created_at,
                        job.updated_at,
                        job.completed_at,
                    ],
                )?;
                Ok(())
            })
            .await
    }

    /// Get a job by key
    pub async fn get_job(&self, job_key: &str) -> Result<Option<JobRecord>> {
        let job_key = job_key.to_string();

        self.db
            .execute_async(move |conn| {
                Ok(conn
                    .query_row(
                        &format!("SELECT {} FROM jobs WHERE job_key = ?1", JOB_COLUMNS),
                        [&job_key],
                        job_from_row,
                    )
                    .optional()?)
            })
            .await
    }

    /// List jobs for one title and language, newest first
    pub async fn find_jobs(&self, content_id: &str, target_language: &str) -> Result<Vec<JobRecord>> {
        let content_id = content_id.to_string();
        let target_language = target_language.to_string();

        self.db
            .execute_async(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM jobs WHERE content_id = ?1 AND target_language = ?2 ORDER BY updated_at DESC",
                    JOB_COLUMNS
                ))?;
                let jobs = stmt
                    .query_map(params![content_id, target_language], job_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(jobs)
            })
            .await
    }

    /// Hand an existing job record over to a new run
    pub async fn resume_job(&self, job_key: &str, run_id: &str, phase: JobPhase) -> Result<()> {
        let job_key = job_key.to_string();
        let run_id = run_id.to_string();

        self.db
            .execute_async(move |conn| {
                conn.execute(
                    "UPDATE jobs SET run_id = ?1, phase = ?2, error_message = NULL, completed_at = NULL, updated_at = ?3
                     WHERE job_key = ?4",
                    params![run_id, phase.to_string(), Self::now(), job_key],
                )?;
                Ok(())
            })
            .await
    }

    /// Persist one batch of translated entries and the new progress atomically.
    ///
    /// Only the run that owns the job row may write, and only while the job
    /// has not finished. Anything else fails and leaves the row untouched.
    pub async fn apply_batch(
        &self,
        job_key: &str,
        run_id: &str,
        entries: Vec<JobEntryRecord>,
        processed_count: i64,
        phase: JobPhase,
    ) -> Result<()> {
        let job_key = job_key.to_string();
        let run_id = run_id.to_string();

        self.db
            .transaction_async(move |tx| {
                let updated = tx.execute(
                    &format!(
                        "UPDATE jobs SET processed_count = ?1, phase = ?2, updated_at = ?3
                         WHERE job_key = ?4 AND run_id = ?5 AND phase NOT IN ({})",
                        TERMINAL_PHASES
                    ),
                    params![processed_count, phase.to_string(), Self::now(), job_key, run_id],
                )?;
                if updated == 0 {
                    return Err(anyhow!("Job {} is no longer owned by run {}", job_key, run_id));
                }
                {
                    let mut stmt = tx.prepare(
                        r#"
                        INSERT INTO job_entries (job_key, seq_num, start_time_ms, end_time_ms, translated_text, fallback)
                        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                        ON CONFLICT(job_key, seq_num) DO UPDATE SET
                            translated_text = excluded.translated_text,
                            fallback = excluded.fallback
                        "#,
                    )?;
                    for entry in &entries {
                        stmt.execute(params![
                            job_key,
                            entry.seq_num,
                            entry.start_time_ms,
                            entry.end_time_ms,
                            entry.translated_text,
                            entry.fallback,
                        ])?;
                    }
                }
                Ok(())
            })
            .await
    }

    /// Move the run's job to a terminal phase; returns false if the run no longer owns it
    pub async fn finish_job(
        &self,
        job_key: &str,
        run_id: &str,
        phase: JobPhase,
        error_message: Option<String>,
    ) -> Result<bool> {
        let job_key = job_key.to_string();
        let run_id = run_id.to_string();

        self.db
            .execute_async(move |conn| {
                let now = Self::now();
                let updated = conn.execute(
                    &format!(
                        "UPDATE jobs SET phase = ?1, error_message = ?2, updated_at = ?3, completed_at = ?3
                         WHERE job_key = ?4 AND run_id = ?5 AND phase NOT IN ({})",
                        TERMINAL_PHASES
                    ),
                    params![phase.to_string(), error_message, now, job_key, run_id],
                )?;
                Ok(updated > 0)
            })
            .await
    }

    /// Delete jobs older than the specified number of days
    pub async fn delete_old_jobs(&self, days: i64) -> Result<i64> {
        let cutoff = (Utc::now() - chrono::Duration::days(days)).to_rfc3339();

        self.db
            .execute_async(move |conn| {
                let deleted = conn.execute("DELETE FROM jobs WHERE updated_at < ?1", [&cutoff])?;
                debug!("Deleted {} jobs older than {}", deleted, cutoff);
                Ok(deleted as i64)
            })
            .await
    }

    // =========================================================================
    // Job Entry Operations
    // =========================================================================

    /// Get the translated entries of a job ordered by sequence number
    pub async fn get_job_entries(&self, job_key: &str) -> Result<Vec<JobEntryRecord>> {
        let job_key = job_key.to_string();

        self.db
            .execute_async(move |conn| Self::get_job_entries_sync(conn, &job_key))
            .await
    }

    fn get_job_entries_sync(conn: &Connection, job_key: &str) -> Result<Vec<JobEntryRecord>> {
        let mut stmt = conn.prepare(
            r#"
            SELECT job_key, seq_num, start_time_ms, end_time_ms, translated_text, fallback
            FROM job_entries WHERE job_key = ?1 ORDER BY seq_num
            "#,
        )?;
        let entries = stmt
            .query_map([job_key], |row| {
                Ok(JobEntryRecord {
                    job_key: row.get(0)?,
                    seq_num: row.get(1)?,
                    start_time_ms: row.get(2)?,
                    end_time_ms: row.get(3)?,
                    translated_text: row.get(4)?,
                    fallback: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    // =========================================================================
    // Cache Operations
    // =========================================================================

    /// Insert or replace a cache entry
    pub async fn put_cache(&self, record: &CacheRecord) -> Result<()> {
        let record = record.clone();

        self.db
            .execute_async(move |conn| {
                conn.execute(
                    r#"
                    INSERT OR REPLACE INTO result_cache
                        (cache_key, content_id, target_language, video_hash, source_language, document, created_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                    "#,
                    params![
                        record.cache_key,
                        record.content_id,
                        record.target_language,
                        record.video_hash,
                        record.source_language,
                        record.document,
                        record.created_at,
                    ],
                )?;
                Ok(())
            })
            .await
    }

    /// Load every persisted cache entry created at or after `min_created_at`
    pub async fn load_cache(&self, min_created_at: i64) -> Result<Vec<CacheRecord>> {
        self.db
            .execute_async(move |conn| {
                let mut stmt = conn.prepare(
                    r#"
                    SELECT cache_key, content_id, target_language, video_hash, source_language, document, created_at
                    FROM result_cache WHERE created_at >= ?1
                    "#,
                )?;
                let records = stmt
                    .query_map([min_created_at], |row| {
                        Ok(CacheRecord {
                            cache_key: row.get(0)?,
                            content_id: row.get(1)?,
                            target_language: row.get(2)?,
                            video_hash: row.get(3)?,
                            source_language: row.get(4)?,
                            document: row.get(5)?,
                            created_at: row.get(6)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(records)
            })
            .await
    }

    pub async fn delete_cache(&self, cache_key: &str) -> Result<()> {
        let cache_key = cache_key.to_string();

        self.db
            .execute_async(move |conn| {
                conn.execute("DELETE FROM result_cache WHERE cache_key = ?1", [&cache_key])?;
                Ok(())
            })
            .await
    }

    /// Remove cache entries created before `cutoff` (unix seconds)
    pub async fn delete_cache_before(&self, cutoff: i64) -> Result<i64> {
        self.db
            .execute_async(move |conn| {
                let deleted = conn.execute("DELETE FROM result_cache WHERE created_at < ?1", [cutoff])?;
                Ok(deleted as i64)
            })
            .await
    }
}

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<JobRecord> {
    Ok(JobRecord {
        job_key: row.get(0)?,
        run_id: row.get(1)?,
        content_id: row.get(2)?,
        season: row.get(3)?,
        episode: row.get(4)?,
        target_language: row.get(5)?,
        source_language: row.get(6)?,
        source_hash: row.get(7)?,
        total_count: row.get(8)?,
        processed_count: row.get(9)?,
        phase: row.get::<_, String>(10)?.parse().unwrap_or(JobPhase::Failed),
        error_message: row.get(11)?,
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
        completed_at: row.get(14)?,
    })
}

/// Build a fresh job record stamped with the current time
#[allow(clippy::too_many_arguments)]
pub fn new_job_record(
    job_key: String,
    run_id: String,
    content_id: String,
    season: Option<u32>,
    episode: Option<u32>,
    target_language: String,
    source_language: String,
    source_hash: String,
    total_count: i64,
) -> JobRecord {
    let now = Utc::now().to_rfc3339();
    JobRecord {
        job_key,
        run_id,
        content_id,
        season,
        episode,
        target_language,
        source_language,
        source_hash,
        total_count,
        processed_count: 0,
        phase: JobPhase::Starting,
        error_message: None,
        created_at: now.clone(),
        updated_at: now,
        completed_at: None,
    }
}
