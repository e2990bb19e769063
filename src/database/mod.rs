/*!
 * Database module for persistent storage of translation jobs.
 *
 * This module provides SQLite-based persistence for:
 * - Job progress records, so interrupted jobs resume after a restart
 * - Translated entries, written incrementally batch by batch
 * - Result cache entries that outlive the process
 */

pub mod schema;
pub mod connection;
pub mod repository;
pub mod models;

// Re-export main types
pub use connection::DatabaseConnection;
pub use repository::Repository;
