/*!
 * Batch translation pipeline.
 *
 * A producer task feeds the scheduled batches of one job into a bounded
 * channel. The consumer side keeps up to `in_flight_batches` translator calls
 * running and applies their results to the progress store strictly in batch
 * order.
 */

use futures::stream::{self, StreamExt};
use log::{debug, info, warn};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::app_config::Config;
use crate::errors::TranslationError;
use crate::progress::{JobKey, JobPhase, ProgressStore};
use crate::providers::Translator;
use crate::subtitle_processor::SubtitleEntry;

use super::rate_limit::RateLimiter;
use super::scheduler::{Batch, BatchPhase};

/// The job a pipeline run belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationJob {
    pub key: JobKey,
    pub run_id: String,
}

impl TranslationJob {
    pub fn target_language(&self) -> &str {
        &self.key.target_language
    }

    // @returns: First 8 chars of the run id for log lines
    pub fn short_id(&self) -> &str {
        &self.run_id[..self.run_id.len().min(8)]
    }
}

/// Counters of one pipeline run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineReport {
    pub translated_batches: usize,
    pub fallback_batches: usize,
    pub processed_entries: usize,
    // @field: Translator calls including retries
    pub calls: usize,
}

/// Result of one batch after retries
#[derive(Debug)]
struct BatchResult {
    index: usize,
    phase: BatchPhase,
    entries: Vec<SubtitleEntry>,
    fallback: bool,
    calls: usize,
}

/// Batch translator for processing the batches of one job
#[derive(Debug, Clone)]
pub struct BatchTranslator {
    translator: Arc<dyn Translator>,
    limiter: Arc<RateLimiter>,
    store: Arc<ProgressStore>,
    retry_count: u32,
    retry_backoff: Duration,
    in_flight_batches: usize,
}

impl BatchTranslator {
    pub fn new(
        translator: Arc<dyn Translator>,
        limiter: Arc<RateLimiter>,
        store: Arc<ProgressStore>,
        config: &Config,
    ) -> Self {
        Self {
            translator,
            limiter,
            store,
            retry_count: config.translation.common.retry_count,
            retry_backoff: Duration::from_millis(config.translation.common.retry_backoff_ms),
            in_flight_batches: config.pipeline.in_flight_batches.max(1),
        }
    }

    /// Translate and apply every batch of `job` in order.
    ///
    /// Transient failures are retried and then degrade to the source text.
    /// Permanent backend errors, the daily limit and cancellation end the run.
    pub async fn run(
        &self,
        job: &TranslationJob,
        batches: Vec<Batch>,
        cancel: CancellationToken,
    ) -> Result<PipelineReport, TranslationError> {
        let total_batches = batches.len();
        let started = Instant::now();
        info!(
            "Job {} run {}: translating {} batches with {}",
            job.key,
            job.short_id(),
            total_batches,
            self.translator.name()
        );

        let (tx, rx) = mpsc::channel::<Batch>(self.in_flight_batches * 2);
        let producer_cancel = cancel.clone();
        let producer = tokio::spawn(async move {
            for batch in batches {
                tokio::select! {
                    _ = producer_cancel.cancelled() => break,
                    sent = tx.send(batch) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        let results = stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|batch| (batch, rx)) })
            .map(|batch| self.translate_batch(batch, job.target_language(), &cancel))
            .buffered(self.in_flight_batches);
        futures::pin_mut!(results);

        let mut report = PipelineReport::default();
        let outcome = loop {
            let Some(result) = results.next().await else {
                break Ok(());
            };
            let result = match result {
                Ok(result) => result,
                Err(e) => break Err(e),
            };

            if let Err(e) = self
                .store
                .apply_partial(&job.key, &job.run_id, &result.entries, JobPhase::from(result.phase), result.fallback)
                .await
            {
                break Err(TranslationError::Store(format!("{:#}", e)));
            }

            report.calls += result.calls;
            report.processed_entries += result.entries.len();
            if result.fallback {
                report.fallback_batches += 1;
            } else {
                report.translated_batches += 1;
            }
            debug!(
                "Job {}: batch {}/{} applied ({} entries, {})",
                job.short_id(),
                result.index + 1,
                total_batches,
                result.entries.len(),
                result.phase
            );
        };

        drop(results);
        producer.abort();
        outcome?;

        if cancel.is_cancelled() {
            return Err(TranslationError::Cancelled);
        }

        info!(
            "Job {} run {}: {} batches translated, {} fell back, {} calls in {:.1}s",
            job.key,
            job.short_id(),
            report.translated_batches,
            report.fallback_batches,
            report.calls,
            started.elapsed().as_secs_f64()
        );
        Ok(report)
    }

    async fn translate_batch(
        &self,
        batch: Batch,
        target_language: &str,
        cancel: &CancellationToken,
    ) -> Result<BatchResult, TranslationError> {
        let texts = batch.texts();
        let mut calls = 0;
        let mut attempt: u32 = 0;

        loop {
            cancellable(cancel, self.limiter.admit(batch.estimated_tokens)).await??;
            calls += 1;

            let failure = match cancellable(cancel, self.translator.translate(&texts, target_language)).await? {
                Ok(translated) if translated.len() == texts.len() => {
                    let entries = batch
                        .entries
                        .iter()
                        .zip(translated.iter())
                        .map(|(entry, text)| entry.with_text(text))
                        .collect();
                    return Ok(BatchResult {
                        index: batch.index,
                        phase: batch.phase,
                        entries,
                        fallback: false,
                        calls,
                    });
                }
                Ok(translated) => format!("expected {} texts, got {}", texts.len(), translated.len()),
                Err(e) if e.is_transient() => e.to_string(),
                Err(e) => return Err(TranslationError::PermanentBackend(e)),
            };

            if attempt >= self.retry_count {
                warn!(
                    "Batch {} keeps its source text after {} attempts: {}",
                    batch.index + 1,
                    calls,
                    failure
                );
                return Ok(BatchResult {
                    index: batch.index,
                    phase: batch.phase,
                    entries: batch.entries,
                    fallback: true,
                    calls,
                });
            }

            let delay = self.retry_backoff.saturating_mul(2u32.saturating_pow(attempt));
            warn!(
                "Batch {} attempt {} failed ({}), retrying in {:?}",
                batch.index + 1,
                attempt + 1,
                failure,
                delay
            );
            cancellable(cancel, tokio::time::sleep(delay)).await?;
            attempt += 1;
        }
    }
}

// Race a suspension point against the job's cancellation token
async fn cancellable<F: Future>(cancel: &CancellationToken, future: F) -> Result<F::Output, TranslationError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TranslationError::Cancelled),
        output = future => Ok(output),
    }
}
