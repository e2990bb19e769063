/*!
 * Batch scheduling.
 *
 * Splits a subtitle document into an ordered list of batches. The first
 * batches are small so a viewer sees translated text quickly. When a seek
 * anchor is given, the entries around the anchor are translated before the
 * rest of the document. Later batches grow to use the token budget well.
 */

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::app_config::BatchingConfig;
use crate::subtitle_processor::{SubtitleCollection, SubtitleEntry};

use super::tokens::TokenEstimator;

/// Scheduling phase of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchPhase {
    Starting,
    Priority,
    Context,
    Sequential,
}

impl BatchPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Priority => "priority",
            Self::Context => "context",
            Self::Sequential => "sequential",
        }
    }
}

impl std::fmt::Display for BatchPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Contiguous slice of entries sent to the translator in one call
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    // @field: Emission order, starting at 0
    pub index: usize,

    pub phase: BatchPhase,

    // @field: Position range inside the document's entry list
    pub range: Range<usize>,

    // @field: Estimated token cost including overhead
    pub estimated_tokens: u64,

    pub entries: Vec<SubtitleEntry>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    // @returns: Entry texts in order, lines joined with '\n'
    pub fn texts(&self) -> Vec<String> {
        self.entries.iter().map(SubtitleEntry::text).collect()
    }
}

/// Multi-phase batch planner
#[derive(Debug, Clone)]
pub struct BatchScheduler {
    config: BatchingConfig,
    estimator: TokenEstimator,
}

// Accumulates the batches of one plan
struct PlanBuilder<'a> {
    entries: &'a [SubtitleEntry],
    estimator: TokenEstimator,
    max_entries: usize,
    batches: Vec<Batch>,
}

impl PlanBuilder<'_> {
    // Grow a batch from `start` until the next entry would pass `target`
    fn slice_end(&self, start: usize, limit: usize, target: u64) -> usize {
        let mut end = start;
        let mut cost = self.estimator.overhead_per_batch;
        while end < limit && end - start < self.max_entries {
            let next = cost + self.estimator.entry_cost(&self.entries[end]);
            if end > start && next > target {
                break;
            }
            cost = next;
            end += 1;
        }
        end
    }

    fn push(&mut self, phase: BatchPhase, range: Range<usize>) {
        let entries = self.entries[range.clone()].to_vec();
        let estimated_tokens = self.estimator.estimate(&entries);
        self.batches.push(Batch {
            index: self.batches.len(),
            phase,
            range,
            estimated_tokens,
            entries,
        });
    }

    // Slice `range` with a fixed target, stopping after `max_batches`.
    // Returns the first position left uncovered.
    fn fill(&mut self, phase: BatchPhase, range: Range<usize>, target: u64, max_batches: usize) -> usize {
        let mut start = range.start;
        let mut emitted = 0;
        while start < range.end && emitted < max_batches {
            let end = self.slice_end(start, range.end, target);
            self.push(phase, start..end);
            start = end;
            emitted += 1;
        }
        start
    }

    // Slice several ranges with a target that grows after every batch
    fn fill_growing(&mut self, ranges: &[Range<usize>], initial: u64, factor: u64, cap: u64) {
        let mut target = initial;
        for range in ranges {
            let mut start = range.start;
            while start < range.end {
                let end = self.slice_end(start, range.end, target);
                self.push(BatchPhase::Sequential, start..end);
                start = end;
                target = target.saturating_mul(factor).min(cap);
            }
        }
    }
}

impl BatchScheduler {
    pub fn new(config: BatchingConfig) -> Self {
        Self {
            estimator: TokenEstimator::from_config(&config),
            config,
        }
    }

    pub fn estimator(&self) -> TokenEstimator {
        self.estimator
    }

    /// Entry position to schedule around for a playback offset.
    ///
    /// An offset of zero means playback starts at the beginning, which is
    /// the same as having no anchor.
    pub fn anchor_for_offset(document: &SubtitleCollection, offset_ms: Option<u64>) -> Option<usize> {
        match offset_ms {
            Some(offset) if offset > 0 => document.closest_entry_index(offset),
            _ => None,
        }
    }

    /// Plan all batches of `document`, optionally centred on an anchor position
    pub fn plan(&self, document: &SubtitleCollection, anchor: Option<usize>) -> Vec<Batch> {
        let total = document.len();
        let mut builder = PlanBuilder {
            entries: &document.entries,
            estimator: self.estimator,
            max_entries: self.config.max_entries_per_batch.max(1),
            batches: Vec::new(),
        };
        if total == 0 {
            return builder.batches;
        }

        let cfg = &self.config;
        let remaining = match anchor.filter(|a| *a < total) {
            None => {
                let covered = builder.fill(
                    BatchPhase::Starting,
                    0..total,
                    cfg.starting_target_tokens,
                    cfg.starting_batch_count,
                );
                vec![covered..total]
            }
            Some(anchor) => {
                let priority = window(anchor, cfg.priority_window, total);
                let context = window(anchor, cfg.context_window.max(cfg.priority_window), total);

                let covered = builder.fill(
                    BatchPhase::Starting,
                    anchor..priority.end,
                    cfg.starting_target_tokens,
                    cfg.starting_batch_count,
                );

                // Rest of the priority window: before the anchor first, then
                // whatever the starting phase left after it
                for range in [priority.start..anchor, covered..priority.end] {
                    builder.fill(BatchPhase::Priority, range, cfg.window_target_tokens, usize::MAX);
                }
                for range in [context.start..priority.start, priority.end..context.end] {
                    builder.fill(BatchPhase::Context, range, cfg.window_target_tokens, usize::MAX);
                }
                vec![0..context.start, context.end..total]
            }
        };

        builder.fill_growing(
            &remaining,
            cfg.sequential_initial_tokens,
            cfg.sequential_growth_factor.max(1),
            cfg.sequential_max_tokens,
        );
        builder.batches
    }
}

// [anchor - radius, anchor + radius) clamped to the document
fn window(anchor: usize, radius: usize, total: usize) -> Range<usize> {
    anchor.saturating_sub(radius)..anchor.saturating_add(radius).min(total)
}
