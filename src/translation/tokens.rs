/*!
 * Token cost estimation for subtitle batches.
 *
 * The remote backend bills per token, but tokenising locally would tie the
 * pipeline to one model family. A linear estimate over Unicode scalar values
 * is enough for admission control and batch sizing.
 */

use crate::app_config::BatchingConfig;
use crate::subtitle_processor::SubtitleEntry;

/// Linear token estimator
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenEstimator {
    // @field: Estimated tokens per character
    pub per_character: f64,

    // @field: Prompt overhead added once per batch
    pub overhead_per_batch: u64,
}

impl TokenEstimator {
    pub fn new(per_character: f64, overhead_per_batch: u64) -> Self {
        Self { per_character, overhead_per_batch }
    }

    pub fn from_config(config: &BatchingConfig) -> Self {
        Self::new(config.per_character_tokens, config.overhead_tokens)
    }

    /// Estimated cost of sending `entries` as one batch
    pub fn estimate(&self, entries: &[SubtitleEntry]) -> u64 {
        let chars: usize = entries.iter().map(SubtitleEntry::char_count).sum();
        self.estimate_chars(chars)
    }

    // @returns: ceil(chars * per_character) + overhead
    pub fn estimate_chars(&self, chars: usize) -> u64 {
        (chars as f64 * self.per_character).ceil() as u64 + self.overhead_per_batch
    }

    /// Marginal cost of one entry inside a batch, without the overhead
    pub fn entry_cost(&self, entry: &SubtitleEntry) -> u64 {
        (entry.char_count() as f64 * self.per_character).ceil() as u64
    }
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self::from_config(&BatchingConfig::default())
    }
}
