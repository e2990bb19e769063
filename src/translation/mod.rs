/*!
 * Rate-limited subtitle translation pipeline.
 *
 * The pipeline is split into several submodules:
 *
 * - `tokens`: Token cost estimate for a set of entries
 * - `rate_limit`: Shared admission control for per-minute and per-day limits
 * - `scheduler`: Multi-phase batch planning around an optional seek anchor
 * - `batch`: Per-job worker pipeline with retry and fallback
 * - `queue`: Bounded worker pool across jobs
 * - `cache`: Result cache with stale-while-revalidate
 */

// Re-export main types for easier usage
pub use self::batch::{BatchTranslator, PipelineReport, TranslationJob};
pub use self::cache::{CacheEntry, CacheKey, CacheLookup, CacheStatus, Cached, ResultCache};
pub use self::queue::JobQueue;
pub use self::rate_limit::{RateLimiter, RateWindow};
pub use self::scheduler::{Batch, BatchPhase, BatchScheduler};
pub use self::tokens::TokenEstimator;

// Submodules
pub mod batch;
pub mod cache;
pub mod queue;
pub mod rate_limit;
pub mod scheduler;
pub mod tokens;
