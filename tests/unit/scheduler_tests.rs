/*!
 * Tests for batch planning over generated documents
 */

use subrelay::app_config::BatchingConfig;
use subrelay::subtitle_processor::SubtitleCollection;
use subrelay::translation::{Batch, BatchPhase, BatchScheduler};

use crate::common;

/// Every position must be covered exactly once, each batch contiguous
fn assert_exact_cover(batches: &[Batch], total: usize) {
    let mut seen = vec![0u32; total];
    for (i, batch) in batches.iter().enumerate() {
        assert_eq!(batch.index, i, "indices must follow emission order");
        assert!(!batch.is_empty(), "batch {} is empty", i);
        assert_eq!(batch.len(), batch.range.len());
        for pos in batch.range.clone() {
            seen[pos] += 1;
        }
    }
    assert!(seen.iter().all(|n| *n == 1), "positions covered zero or several times");
}

fn phase_rank(phase: BatchPhase) -> u8 {
    match phase {
        BatchPhase::Starting => 0,
        BatchPhase::Priority => 1,
        BatchPhase::Context => 2,
        BatchPhase::Sequential => 3,
    }
}

fn small_batching() -> BatchingConfig {
    BatchingConfig {
        starting_batch_count: 2,
        starting_target_tokens: 200,
        sequential_initial_tokens: 300,
        sequential_max_tokens: 1200,
        ..BatchingConfig::default()
    }
}

#[test]
fn test_plan_withSeekIntoLongDocument_shouldTranslateAroundAnchorFirst() {
    let doc = common::numbered_document(500);
    let scheduler = BatchScheduler::new(BatchingConfig::default());

    let anchor = BatchScheduler::anchor_for_offset(&doc, Some(600_000));
    assert_eq!(anchor, Some(300));

    let batches = scheduler.plan(&doc, anchor);
    assert_exact_cover(&batches, 500);

    assert_eq!(batches[0].phase, BatchPhase::Starting);
    assert_eq!(batches[0].range.start, 300);

    // The priority window [270, 330) is fully covered before anything else
    let priority_done = batches
        .iter()
        .position(|b| b.phase == BatchPhase::Context || b.phase == BatchPhase::Sequential)
        .expect("plan has later phases");
    let mut early: Vec<usize> = batches[..priority_done].iter().flat_map(|b| b.range.clone()).collect();
    early.sort_unstable();
    assert_eq!(early, (270..330).collect::<Vec<_>>());
}

#[test]
fn test_plan_withAnchor_shouldNeverGoBackToEarlierPhase() {
    let doc = common::numbered_document(500);
    let scheduler = BatchScheduler::new(small_batching());
    let batches = scheduler.plan(&doc, Some(300));

    assert_exact_cover(&batches, 500);
    for pair in batches.windows(2) {
        assert!(phase_rank(pair[0].phase) <= phase_rank(pair[1].phase));
    }
    let context: Vec<usize> = batches
        .iter()
        .filter(|b| b.phase == BatchPhase::Context)
        .flat_map(|b| b.range.clone())
        .collect();
    assert!(context.iter().all(|p| (200..270).contains(p) || (330..400).contains(p)));
}

#[test]
fn test_plan_coldStart_shouldUseSmallBatchesThenSequential() {
    let doc = common::numbered_document(120);
    let scheduler = BatchScheduler::new(small_batching());
    let batches = scheduler.plan(&doc, None);

    assert_exact_cover(&batches, 120);
    assert_eq!(batches.iter().filter(|b| b.phase == BatchPhase::Starting).count(), 2);
    assert_eq!(batches[0].range.start, 0);
    assert!(batches[2..].iter().all(|b| b.phase == BatchPhase::Sequential));
    assert!(batches[0].estimated_tokens <= 200);

    // Positions are emitted in document order without an anchor
    let order: Vec<usize> = batches.iter().flat_map(|b| b.range.clone()).collect();
    assert_eq!(order, (0..120).collect::<Vec<_>>());
}

#[test]
fn test_plan_sequentialBatches_shouldRespectTokenCap() {
    let doc = common::numbered_document(400);
    let config = small_batching();
    let scheduler = BatchScheduler::new(config.clone());
    let batches = scheduler.plan(&doc, None);

    for batch in batches.iter().filter(|b| b.len() > 1) {
        assert!(batch.estimated_tokens <= config.sequential_max_tokens);
        assert!(batch.len() <= config.max_entries_per_batch);
    }
    assert_eq!(batches.iter().map(Batch::len).sum::<usize>(), 400);
}

#[test]
fn test_plan_completeness_overManyShapes() {
    let configs = [
        BatchingConfig::default(),
        small_batching(),
        BatchingConfig {
            priority_window: 3,
            context_window: 7,
            max_entries_per_batch: 4,
            starting_batch_count: 1,
            ..BatchingConfig::default()
        },
        BatchingConfig {
            starting_batch_count: 0,
            window_target_tokens: 1,
            sequential_growth_factor: 1,
            ..BatchingConfig::default()
        },
    ];
    for config in configs {
        let scheduler = BatchScheduler::new(config);
        for total in [1usize, 2, 17, 64, 301] {
            let doc = common::numbered_document(total);
            for anchor in [None, Some(0), Some(total / 2), Some(total - 1), Some(total + 10)] {
                let batches = scheduler.plan(&doc, anchor);
                assert_exact_cover(&batches, total);
            }
        }
    }
}

#[test]
fn test_plan_withEmptyDocument_shouldBeEmpty() {
    let scheduler = BatchScheduler::new(BatchingConfig::default());
    assert!(scheduler.plan(&SubtitleCollection::new("en"), Some(3)).is_empty());
}

#[test]
fn test_anchorForOffset_shouldTreatZeroAsNoAnchor() {
    let doc = common::numbered_document(10);
    assert_eq!(BatchScheduler::anchor_for_offset(&doc, Some(0)), None);
    assert_eq!(BatchScheduler::anchor_for_offset(&doc, None), None);
    assert_eq!(BatchScheduler::anchor_for_offset(&doc, Some(4_100)), Some(2));
}

#[test]
fn test_batchTexts_shouldJoinLinesWithNewline() {
    let doc = SubtitleCollection::parse_srt_string(
        "1\n00:00:01,000 --> 00:00:02,000\nfirst\nsecond\n\n",
        "en",
    )
    .unwrap();
    let batches = BatchScheduler::new(BatchingConfig::default()).plan(&doc, None);
    assert_eq!(batches[0].texts(), vec!["first\nsecond".to_string()]);
}
