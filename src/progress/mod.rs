/*!
 * Job progress tracking.
 *
 * This module provides:
 * - The idempotent job key and per-job progress state
 * - Incremental persistence of translated batches with resume support
 * - Final and placeholder subtitle artifacts on disk
 */

pub mod artifacts;
pub mod models;
pub mod store;

// Re-export main types
pub use artifacts::{placeholder_document, ArtifactStore};
pub use models::{JobFailure, JobKey, JobPhase, JobSnapshot, ProgressState};
pub use store::{JobClaim, ProgressStore};
