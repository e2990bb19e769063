/*!
 * Restart and resume from persisted progress
 */

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use subrelay::app_config::{BatchingConfig, Config};
use subrelay::progress::JobPhase;
use subrelay::{JobRequest, JobResponse, SubtitleCollection};

use crate::common::{
    self,
    fakes::{RecordingTranslator, StaticSource},
};

const SETTLE_LIMIT: Duration = Duration::from_secs(20);
const ENTRIES: usize = 60;

fn resumable_config(data_dir: &std::path::Path) -> Config {
    let mut config = common::test_config(data_dir);
    config.batching = BatchingConfig {
        starting_batch_count: 2,
        starting_target_tokens: 200,
        sequential_initial_tokens: 200,
        sequential_growth_factor: 1,
        ..BatchingConfig::default()
    };
    config
}

/// A job that died halfway only translates what is left after a restart
#[tokio::test]
async fn test_restart_afterFailedRun_shouldOnlyTranslateRemainingEntries() -> Result<()> {
    common::init_logging();
    let dir = common::create_temp_dir()?;
    let source = Arc::new(StaticSource::new().with_subtitle("en-1", "en", common::numbered_srt(ENTRIES)));
    let request = JobRequest::episode("tt0944947", 3, 9, "nl");
    let key = request.job_key();

    // First process: the backend rejects the key after three batches
    let broken = RecordingTranslator::stop_after(3);
    let done_first: HashSet<usize> = {
        let controller = common::build_controller(resumable_config(dir.path()), Arc::new(broken.clone()), source.clone())?;
        assert!(matches!(controller.handle_request(&request).await?, JobResponse::Started { .. }));
        let snapshot = common::settle(&controller, &request, SETTLE_LIMIT).await;
        assert_eq!(snapshot.state.phase, JobPhase::Failed);

        let record = controller.store().repository().get_job(&key.storage_key()).await?.expect("job record");
        assert_eq!(record.phase, JobPhase::Failed);
        assert!(record.error_message.unwrap_or_default().contains("Key revoked"));

        let done: HashSet<usize> = broken.calls()[..3].iter().flatten().map(|t| common::line_number(t)).collect();
        assert_eq!(record.processed_count as usize, done.len());
        assert!(done.len() < ENTRIES);
        done
    };

    // Second process on the same data dir
    let working = RecordingTranslator::new();
    let controller = common::build_controller(resumable_config(dir.path()), Arc::new(working.clone()), source)?;
    assert!(matches!(controller.handle_request(&request).await?, JobResponse::Started { .. }));
    let snapshot = common::settle(&controller, &request, SETTLE_LIMIT).await;
    assert_eq!(snapshot.state.phase, JobPhase::Complete);

    let done_second: HashSet<usize> = working.calls().iter().flatten().map(|t| common::line_number(t)).collect();
    assert!(done_first.is_disjoint(&done_second));
    assert_eq!(done_first.len() + done_second.len(), ENTRIES);
    assert_eq!(working.translated_texts(), ENTRIES - done_first.len());

    let output = controller.store().read_output(&key)?.expect("final artifact");
    let document = SubtitleCollection::parse_srt_string(&output, "nl")?;
    assert_eq!(document.len(), ENTRIES);
    for (i, entry) in document.entries.iter().enumerate() {
        assert_eq!(entry.text(), format!("[nl] Line {}", i + 1));
    }
    Ok(())
}

/// A failed run leaves its batches behind for the next request
#[tokio::test]
async fn test_request_afterFailedRun_shouldResumeInSameProcess() -> Result<()> {
    common::init_logging();
    let dir = common::create_temp_dir()?;
    let source = Arc::new(StaticSource::new().with_subtitle("en-1", "en", common::numbered_srt(ENTRIES)));
    let request = JobRequest::movie("tt0120737", "nl");
    let key = request.job_key();

    let broken = RecordingTranslator::stop_after(2);
    let controller = common::build_controller(resumable_config(dir.path()), Arc::new(broken.clone()), source.clone())?;
    controller.handle_request(&request).await?;
    common::settle(&controller, &request, SETTLE_LIMIT).await;
    let first_run = controller.status(&key).expect("snapshot");
    assert!(first_run.state.processed_count > 0);

    // Same store, but a new controller with a working backend
    let working = RecordingTranslator::new();
    let cache = subrelay::translation::ResultCache::new(&resumable_config(dir.path()).cache);
    let resumed = subrelay::JobController::new(
        resumable_config(dir.path()),
        Arc::new(working.clone()),
        source,
        controller.store().clone(),
        cache,
    );
    assert!(matches!(resumed.handle_request(&request).await?, JobResponse::Started { .. }));
    let snapshot = common::settle(&resumed, &request, SETTLE_LIMIT).await;

    assert_eq!(snapshot.state.phase, JobPhase::Complete);
    assert_ne!(snapshot.run_id, first_run.run_id);
    assert_eq!(working.translated_texts(), ENTRIES - first_run.state.processed_count);
    Ok(())
}
