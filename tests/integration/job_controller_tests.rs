/*!
 * Request handling through the job controller
 */

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::future::join_all;

use subrelay::app_config::Config;
use subrelay::progress::JobPhase;
use subrelay::providers::mock::MockTranslator;
use subrelay::{JobController, JobRequest, JobResponse, ResultSource};

use crate::common::{
    self,
    fakes::{RecordingTranslator, StaticSource},
};

const SETTLE_LIMIT: Duration = Duration::from_secs(20);

fn english_source(entries: usize) -> Arc<StaticSource> {
    Arc::new(StaticSource::new().with_subtitle("en-1", "en", common::numbered_srt(entries)))
}

fn controller(config: Config, translator: RecordingTranslator, source: Arc<StaticSource>) -> Result<JobController> {
    common::init_logging();
    common::build_controller(config, Arc::new(translator), source)
}

/// Five identical requests at once start one job; the rest see it running
#[tokio::test]
async fn test_handleRequest_concurrentDuplicates_shouldStartOneJob() -> Result<()> {
    let dir = common::create_temp_dir()?;
    let config = common::test_config(dir.path());
    let translator = Arc::new(MockTranslator::slow(50));
    let controller = common::build_controller(config, translator.clone(), english_source(30))?;
    let request = JobRequest::movie("tt0133093", "nl");

    let responses = join_all((0..5).map(|_| controller.handle_request(&request))).await;
    let responses: Vec<JobResponse> = responses.into_iter().collect::<Result<_>>()?;

    let started = responses.iter().filter(|r| matches!(r, JobResponse::Started { .. })).count();
    let in_progress = responses.iter().filter(|r| matches!(r, JobResponse::InProgress { .. })).count();
    assert_eq!(started, 1);
    assert_eq!(in_progress, 4);

    let snapshot = common::settle(&controller, &request, SETTLE_LIMIT).await;
    assert_eq!(snapshot.state.phase, JobPhase::Complete);
    let jobs = controller.store().repository().find_jobs("tt0133093", "nl").await?;
    assert_eq!(jobs.len(), 1);
    Ok(())
}

/// After completion the result is served without touching the source again
#[tokio::test]
async fn test_handleRequest_afterCompletion_shouldServeFromCache() -> Result<()> {
    let dir = common::create_temp_dir()?;
    let source = english_source(12);
    let translator = RecordingTranslator::new();
    let controller = controller(common::test_config(dir.path()), translator.clone(), source.clone())?;
    let request = JobRequest::episode("tt0903747", 1, 2, "nl");

    let first = controller.handle_request(&request).await?;
    assert!(matches!(first, JobResponse::Started { .. }));
    common::settle(&controller, &request, SETTLE_LIMIT).await;

    // Either the cache or a refresh from the final artifact, then the cache
    let second = controller.handle_request(&request).await?;
    assert!(second.is_completed());
    let third = controller.handle_request(&request).await?;
    let JobResponse::Completed { document, source: from } = &third else {
        panic!("expected a completed response, got {:?}", third);
    };
    assert_eq!(*from, ResultSource::Cache);
    assert_eq!(document.len(), 12);
    assert_eq!(document.entries[11].text(), "[nl] Line 12");

    assert_eq!(source.searches(), 1);
    assert_eq!(translator.translated_texts(), 12);
    assert_eq!(
        controller.directives(&third).header_value(),
        "public, max-age=86400, stale-while-revalidate=14400, stale-if-error=604800"
    );
    Ok(())
}

/// A seek offset changes the order of work but not the job identity
#[tokio::test]
async fn test_handleRequest_withSeekOffset_shouldJoinExistingJob() -> Result<()> {
    let dir = common::create_temp_dir()?;
    let translator = Arc::new(MockTranslator::slow(100));
    let controller = common::build_controller(common::test_config(dir.path()), translator, english_source(500))?;
    let plain = JobRequest::movie("tt0068646", "nl");
    let seeking = plain.clone().with_seek(600);

    assert!(matches!(controller.handle_request(&seeking).await?, JobResponse::Started { .. }));
    assert!(matches!(controller.handle_request(&plain).await?, JobResponse::InProgress { .. }));

    assert!(controller.cancel(&plain.job_key()).await?);
    let snapshot = common::settle(&controller, &plain, SETTLE_LIMIT).await;
    assert_eq!(snapshot.state.phase, JobPhase::Cancelled);
    Ok(())
}

#[tokio::test]
async fn test_handleRequest_withTargetLanguageAvailable_shouldPassThrough() -> Result<()> {
    let dir = common::create_temp_dir()?;
    let source = Arc::new(
        StaticSource::new()
            .with_subtitle("en-1", "en", common::numbered_srt(5))
            .with_subtitle("nl-1", "dut", "1\n00:00:01,000 --> 00:00:02,000\nHallo\n\n"),
    );
    let translator = RecordingTranslator::new();
    let controller = controller(common::test_config(dir.path()), translator.clone(), source)?;

    let response = controller.handle_request(&JobRequest::movie("tt1375666", "nl")).await?;

    let JobResponse::Completed { document, source } = response else {
        panic!("expected passthrough");
    };
    assert_eq!(source, ResultSource::Passthrough);
    assert_eq!(document.entries[0].text(), "Hallo");
    assert_eq!(translator.call_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_handleRequest_withPassthroughDisabled_shouldTranslate() -> Result<()> {
    let dir = common::create_temp_dir()?;
    let mut config = common::test_config(dir.path());
    config.source.passthrough_target_language = false;
    let source = Arc::new(
        StaticSource::new()
            .with_subtitle("nl-1", "nl", common::numbered_srt(2))
            .with_subtitle("en-1", "en", common::numbered_srt(4)),
    );
    let translator = RecordingTranslator::new();
    let controller = controller(config, translator.clone(), source)?;
    let request = JobRequest::movie("tt1375666", "nl");

    assert!(matches!(controller.handle_request(&request).await?, JobResponse::Started { .. }));
    common::settle(&controller, &request, SETTLE_LIMIT).await;
    assert_eq!(translator.translated_texts(), 4);
    Ok(())
}

#[tokio::test]
async fn test_handleRequest_withoutSubtitles_shouldReportNoSource() -> Result<()> {
    let dir = common::create_temp_dir()?;
    let controller = controller(
        common::test_config(dir.path()),
        RecordingTranslator::new(),
        Arc::new(StaticSource::new()),
    )?;

    let response = controller.handle_request(&JobRequest::movie("tt0000001", "nl")).await?;

    assert!(matches!(response, JobResponse::NoSource));
    assert!(response.document().is_none());
    assert_eq!(controller.directives(&response).max_age, Duration::from_secs(30));
    assert!(controller.status(&JobRequest::movie("tt0000001", "nl").job_key()).is_none());
    Ok(())
}

#[tokio::test]
async fn test_handleRequest_withUnknownTargetLanguage_shouldFail() -> Result<()> {
    let dir = common::create_temp_dir()?;
    let controller = controller(common::test_config(dir.path()), RecordingTranslator::new(), english_source(3))?;
    assert!(controller.handle_request(&JobRequest::movie("tt1", "qq")).await.is_err());
    Ok(())
}

/// Only French is offered; the job uses it instead of giving up
#[tokio::test]
async fn test_handleRequest_withOtherSourceLanguage_shouldFallBackToFirstCandidate() -> Result<()> {
    let dir = common::create_temp_dir()?;
    let source = Arc::new(StaticSource::new().with_subtitle("fr-1", "fre", common::numbered_srt(3)));
    let translator = RecordingTranslator::new();
    let controller = controller(common::test_config(dir.path()), translator.clone(), source)?;
    let request = JobRequest::movie("tt0211915", "nl");

    controller.handle_request(&request).await?;
    common::settle(&controller, &request, SETTLE_LIMIT).await;

    let record = controller
        .store()
        .repository()
        .get_job(&request.job_key().storage_key())
        .await?
        .expect("job record");
    assert_eq!(record.source_language, "fr");
    assert_eq!(record.phase, JobPhase::Complete);
    assert_eq!(translator.translated_texts(), 3);
    Ok(())
}

/// A job whose placeholder has not moved for too long is replaced
#[tokio::test]
async fn test_handleRequest_withStaleJob_shouldSupersedeIt() -> Result<()> {
    let dir = common::create_temp_dir()?;
    let translator = Arc::new(MockTranslator::slow(60_000));
    let controller = common::build_controller(common::test_config(dir.path()), translator, english_source(10))?;
    let request = JobRequest::movie("tt0110912", "nl");
    let key = request.job_key();

    assert!(matches!(controller.handle_request(&request).await?, JobResponse::Started { .. }));
    common::wait_for_slot(&controller, &request, SETTLE_LIMIT).await;
    let old_run = controller.status(&key).expect("snapshot").run_id.clone();

    // Fresh placeholder: the job is simply in progress
    assert!(matches!(controller.handle_request(&request).await?, JobResponse::InProgress { .. }));

    common::backdate_placeholder(&controller, &request, Duration::from_secs(3600))?;

    assert!(matches!(controller.handle_request(&request).await?, JobResponse::Started { .. }));
    let new_run = controller.status(&key).expect("snapshot").run_id.clone();
    assert_ne!(old_run, new_run);

    controller.cancel(&key).await?;
    let snapshot = common::settle(&controller, &request, SETTLE_LIMIT).await;
    assert_eq!(snapshot.run_id, new_run);
    assert_eq!(snapshot.state.phase, JobPhase::Cancelled);
    Ok(())
}

/// A job queued behind a long one is not mistaken for a stuck job
#[tokio::test]
async fn test_handleRequest_whileQueuedBehindLongJob_shouldNotSupersede() -> Result<()> {
    let dir = common::create_temp_dir()?;
    let mut config = common::test_config(dir.path());
    config.pipeline.max_concurrent_jobs = 1;
    config.pipeline.staleness_threshold_secs = 1;
    let translator = Arc::new(MockTranslator::slow(60_000));
    let controller = common::build_controller(config, translator, english_source(10))?;
    let long = JobRequest::movie("tt0076759", "nl");
    let waiting = JobRequest::movie("tt0080684", "nl");

    assert!(matches!(controller.handle_request(&long).await?, JobResponse::Started { .. }));
    common::wait_for_slot(&controller, &long, SETTLE_LIMIT).await;
    assert!(matches!(controller.handle_request(&waiting).await?, JobResponse::Started { .. }));
    let waiting_run = controller.status(&waiting.job_key()).expect("snapshot").run_id.clone();
    assert!(controller.queue().is_waiting(&waiting.job_key()));

    // Its placeholder is far older than the threshold, but it never had a slot
    common::backdate_placeholder(&controller, &waiting, Duration::from_secs(3600))?;
    let response = controller.handle_request(&waiting).await?;
    let JobResponse::InProgress { placeholder, .. } = &response else {
        panic!("expected the queued job to be reported, got {:?}", response);
    };
    assert!(placeholder.entries[0].text().starts_with("Queued, waiting for a translation slot..."));
    assert_eq!(controller.status(&waiting.job_key()).expect("snapshot").run_id, waiting_run);

    // Once it runs, its placeholder is fresh and the run survives another poll
    controller.cancel(&long.job_key()).await?;
    common::wait_for_slot(&controller, &waiting, SETTLE_LIMIT).await;
    let age = controller.store().placeholder_age(&waiting.job_key()).expect("placeholder");
    assert!(age < Duration::from_secs(1));
    assert!(matches!(controller.handle_request(&waiting).await?, JobResponse::InProgress { .. }));
    assert_eq!(controller.status(&waiting.job_key()).expect("snapshot").run_id, waiting_run);

    controller.cancel(&waiting.job_key()).await?;
    let snapshot = common::settle(&controller, &waiting, SETTLE_LIMIT).await;
    assert_eq!(snapshot.run_id, waiting_run);
    assert_eq!(snapshot.state.phase, JobPhase::Cancelled);
    Ok(())
}

/// Out of daily quota: later polls say so without searching or starting again
#[tokio::test]
async fn test_handleRequest_withDailyLimitExhausted_shouldAskToRetryLater() -> Result<()> {
    let dir = common::create_temp_dir()?;
    let mut config = common::test_config(dir.path());
    config.rate_limits.requests_per_day = 0;
    let source = english_source(5);
    let translator = RecordingTranslator::new();
    let controller = controller(config, translator.clone(), source.clone())?;
    let request = JobRequest::movie("tt0050083", "nl");
    let key = request.job_key();

    controller.handle_request(&request).await?;
    let snapshot = common::settle(&controller, &request, SETTLE_LIMIT).await;

    assert_eq!(snapshot.state.phase, JobPhase::Failed);
    assert!(snapshot.state.failure.as_ref().is_some_and(|f| f.quota_exhausted));
    let record = controller
        .store()
        .repository()
        .get_job(&key.storage_key())
        .await?
        .expect("job record");
    assert!(record.error_message.unwrap_or_default().contains("Daily request limit"));
    let placeholder = controller.store().read_placeholder(&key)?.expect("placeholder");
    assert!(placeholder.contains("Daily translation limit reached."));

    for _ in 0..3 {
        let response = controller.handle_request(&request).await?;
        let JobResponse::RetryLater { placeholder, retry_after } = &response else {
            panic!("expected a retry-later response, got {:?}", response);
        };
        assert!(placeholder.entries[0].text().contains("Please try again later."));
        assert!(*retry_after > Duration::ZERO);
        assert_eq!(controller.directives(&response).max_age, Duration::from_secs(30));
    }
    assert_eq!(source.searches(), 1);
    assert_eq!(translator.call_count(), 0);
    assert_eq!(controller.status(&key).expect("snapshot").run_id, snapshot.run_id);
    Ok(())
}

/// Other failures restart on the next request
#[tokio::test]
async fn test_handleRequest_afterNonQuotaFailure_shouldStartNewRun() -> Result<()> {
    let dir = common::create_temp_dir()?;
    let source = english_source(6);
    let controller = controller(common::test_config(dir.path()), RecordingTranslator::stop_after(0), source.clone())?;
    let request = JobRequest::movie("tt0047478", "nl");

    controller.handle_request(&request).await?;
    let failed = common::settle(&controller, &request, SETTLE_LIMIT).await;
    assert_eq!(failed.state.phase, JobPhase::Failed);
    let placeholder = controller.store().read_placeholder(&request.job_key())?.expect("placeholder");
    assert!(placeholder.contains("Translation error occurred. Please try again."));

    assert!(matches!(controller.handle_request(&request).await?, JobResponse::Started { .. }));
    assert_eq!(source.searches(), 2);
    common::settle(&controller, &request, SETTLE_LIMIT).await;
    Ok(())
}

/// A start position shifts a finished translation and keeps the shifted copy on disk
#[tokio::test]
async fn test_handleRequest_completedWithStartTime_shouldServeShiftedDocument() -> Result<()> {
    let dir = common::create_temp_dir()?;
    let translator = RecordingTranslator::new();
    let controller = controller(common::test_config(dir.path()), translator.clone(), english_source(10))?;
    let plain = JobRequest::episode("tt0141842", 1, 1, "nl");
    let key = plain.job_key();

    controller.handle_request(&plain).await?;
    common::settle(&controller, &plain, SETTLE_LIMIT).await;

    // Entries start every 2s and last 1.5s; at 7s entries 1-3 have ended and 4 is showing
    let response = controller.handle_request(&plain.clone().with_seek(7)).await?;
    let JobResponse::Completed { document, .. } = &response else {
        panic!("expected a completed response, got {:?}", response);
    };
    assert_eq!(document.len(), 7);
    assert_eq!(document.entries[0].text(), "[nl] Line 4");
    assert_eq!((document.entries[0].start_time_ms, document.entries[0].end_time_ms), (0, 500));
    assert_eq!(document.entries[1].start_time_ms, 1_000);
    assert_eq!(document.entries[6].end_time_ms, 19_500 - 7_000);

    let stored = controller.store().artifacts().read_offset(&key, 7)?.expect("shifted artifact");
    assert!(stored.starts_with('\u{feff}'));
    assert_eq!(subrelay::SubtitleCollection::parse_srt_string(&stored, "nl")?.entries, document.entries);

    // The unshifted result is untouched
    let JobResponse::Completed { document, .. } = controller.handle_request(&plain).await? else {
        panic!("expected a completed response");
    };
    assert_eq!(document.len(), 10);
    assert_eq!(document.entries[0].start_time_ms, 0);
    assert_eq!(translator.translated_texts(), 10);
    Ok(())
}
