/*!
 * End-to-end tests for the batch pipeline over a real progress store
 */

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use subrelay::app_config::{BatchingConfig, Config};
use subrelay::errors::TranslationError;
use subrelay::progress::{JobKey, JobPhase, ProgressStore};
use subrelay::providers::mock::MockTranslator;
use subrelay::providers::Translator;
use subrelay::subtitle_processor::SubtitleCollection;
use subrelay::translation::{Batch, BatchScheduler, BatchTranslator, RateLimiter, TranslationJob};

use crate::common::{self, fakes::RecordingTranslator};

/// Everything one pipeline run needs, claimed in a fresh data dir
struct Harness {
    _dir: tempfile::TempDir,
    config: Config,
    store: Arc<ProgressStore>,
    job: TranslationJob,
    document: SubtitleCollection,
}

async fn harness(entries: usize, batching: BatchingConfig) -> Result<Harness> {
    common::init_logging();
    let dir = common::create_temp_dir()?;
    let mut config = common::test_config(dir.path());
    config.batching = batching;
    let store = common::open_store(dir.path())?;
    let document = common::numbered_document(entries);
    let key = JobKey::new("tt0068646", None, None, "nl");
    let claim = store.get_or_create(&key, &document).await?;
    Ok(Harness {
        _dir: dir,
        config,
        store,
        job: TranslationJob { key, run_id: claim.run_id },
        document,
    })
}

impl Harness {
    fn plan(&self, anchor: Option<usize>) -> Vec<Batch> {
        BatchScheduler::new(self.config.batching.clone()).plan(&self.document, anchor)
    }

    fn pipeline(&self, translator: Arc<dyn Translator>) -> BatchTranslator {
        let limiter = Arc::new(RateLimiter::new(self.config.rate_limits.clone()));
        BatchTranslator::new(translator, limiter, self.store.clone(), &self.config)
    }
}

fn cold_start_batching() -> BatchingConfig {
    BatchingConfig {
        starting_batch_count: 2,
        starting_target_tokens: 200,
        sequential_initial_tokens: 400,
        ..BatchingConfig::default()
    }
}

/// A cold start translates the whole document front to back
#[tokio::test]
async fn test_run_coldStart_shouldTranslateEveryEntryInOrder() -> Result<()> {
    let hx = harness(120, cold_start_batching()).await?;
    let translator = RecordingTranslator::new();
    let batches = hx.plan(None);
    assert!(batches.len() > 2);

    let report = hx
        .pipeline(Arc::new(translator.clone()))
        .run(&hx.job, batches, CancellationToken::new())
        .await?;

    assert_eq!(report.processed_entries, 120);
    assert_eq!(report.fallback_batches, 0);
    assert_eq!(translator.translated_texts(), 120);

    let order: Vec<usize> = translator.calls().iter().flatten().map(|t| common::line_number(t)).collect();
    assert_eq!(order, (1..=120).collect::<Vec<_>>());

    let snapshot = hx.store.snapshot(&hx.job.key).expect("snapshot");
    assert_eq!(snapshot.state.processed_count, 120);
    assert_eq!(snapshot.state.phase, JobPhase::Sequential);
    for (i, entry) in snapshot.document.entries.iter().enumerate() {
        assert_eq!(entry.text(), format!("[nl] Line {}", i + 1));
    }
    Ok(())
}

/// Seeking to 10 minutes translates the entries around 10 minutes first
#[tokio::test]
async fn test_run_withSeekOffset_shouldTranslatePriorityWindowFirst() -> Result<()> {
    let hx = harness(500, BatchingConfig::default()).await?;
    let translator = RecordingTranslator::new();
    let anchor = BatchScheduler::anchor_for_offset(&hx.document, Some(600_000));
    assert_eq!(anchor, Some(300));

    hx.pipeline(Arc::new(translator.clone()))
        .run(&hx.job, hx.plan(anchor), CancellationToken::new())
        .await?;

    let calls = translator.calls();
    let mut first: Vec<usize> = calls[..2].iter().flatten().map(|t| common::line_number(t)).collect();
    // The first call starts at the anchor itself
    assert_eq!(first[0], 301);
    first.sort_unstable();
    assert_eq!(first, (271..=330).collect::<Vec<_>>());
    assert_eq!(translator.translated_texts(), 500);
    Ok(())
}

#[tokio::test]
async fn test_run_withTwoTransientFailures_shouldSucceedOnThirdCall() -> Result<()> {
    let hx = harness(10, BatchingConfig::default()).await?;
    let translator = MockTranslator::fail_times(2);
    let batches = hx.plan(None);
    assert_eq!(batches.len(), 1);

    let report = hx
        .pipeline(Arc::new(translator.clone()))
        .run(&hx.job, batches, CancellationToken::new())
        .await?;

    assert_eq!(translator.calls(), 3);
    assert_eq!(report.calls, 3);
    assert_eq!(report.fallback_batches, 0);
    let snapshot = hx.store.snapshot(&hx.job.key).expect("snapshot");
    assert_eq!(snapshot.document.entries[9].text(), "[nl] Line 10");
    Ok(())
}

/// Two requests left for the day: two batches land, then the job stops
#[tokio::test]
async fn test_run_withDailyLimit_shouldStopAfterQuota() -> Result<()> {
    let mut hx = harness(60, cold_start_batching()).await?;
    hx.config.rate_limits.requests_per_day = 2;
    let translator = RecordingTranslator::new();
    let batches = hx.plan(None);
    let expected: usize = batches[..2].iter().map(Batch::len).sum();

    let result = hx
        .pipeline(Arc::new(translator.clone()))
        .run(&hx.job, batches, CancellationToken::new())
        .await;

    assert!(matches!(result, Err(TranslationError::DailyLimitExceeded { limit: 2 })));
    assert_eq!(translator.call_count(), 2);
    let snapshot = hx.store.snapshot(&hx.job.key).expect("snapshot");
    assert_eq!(snapshot.state.processed_count, expected);

    // Persisted too, so a later run can resume
    let persisted = hx.store.repository().get_job_entries(&hx.job.key.storage_key()).await?;
    assert_eq!(persisted.len(), expected);
    Ok(())
}

#[tokio::test]
async fn test_run_withSeveralBatchesInFlight_shouldOverlapCalls() -> Result<()> {
    let mut hx = harness(
        40,
        BatchingConfig {
            max_entries_per_batch: 5,
            ..BatchingConfig::default()
        },
    )
    .await?;
    hx.config.pipeline.in_flight_batches = 4;
    let translator = MockTranslator::slow(100);
    let batches = hx.plan(None);
    assert_eq!(batches.len(), 8);
    let started = Instant::now();

    let report = hx
        .pipeline(Arc::new(translator))
        .run(&hx.job, batches, CancellationToken::new())
        .await?;

    assert_eq!(report.processed_entries, 40);
    // Eight sequential calls would need at least 800ms
    assert!(started.elapsed() < Duration::from_millis(700), "took {:?}", started.elapsed());
    Ok(())
}

#[tokio::test]
async fn test_run_cancelledMidway_shouldKeepAppliedBatches() -> Result<()> {
    let hx = harness(
        30,
        BatchingConfig {
            max_entries_per_batch: 3,
            ..BatchingConfig::default()
        },
    )
    .await?;
    let translator = MockTranslator::slow(40);
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        trigger.cancel();
    });

    let result = hx.pipeline(Arc::new(translator)).run(&hx.job, hx.plan(None), cancel).await;

    assert!(matches!(result, Err(TranslationError::Cancelled)));
    let snapshot = hx.store.snapshot(&hx.job.key).expect("snapshot");
    assert!(snapshot.state.processed_count > 0);
    assert!(snapshot.state.processed_count < 30);
    assert_eq!(snapshot.state.processed_count % 3, 0, "batches are applied whole");
    Ok(())
}
