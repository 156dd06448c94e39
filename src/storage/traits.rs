//! Storage traits and error types
//!
//! This module defines the trait interfaces for storage backends and
//! associated error types.

use crate::state::{JobStatus, RunProgress};
use crate::storage::{
    AcquisitionJob, ChapterRecord, JobFilter, NewJob, PageRecord, RunRecord, RunStatus,
};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Job not found: {0}")]
    JobNotFound(i64),

    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("Work not found: {0}")]
    WorkNotFound(String),

    #[error("Chapter not found: {0}")]
    ChapterNotFound(String),

    #[error("Invalid job transition: {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for the durable job queue and run records
pub trait Storage {
    // ===== Job Queue =====

    /// Inserts jobs in chunks of `batch_size`, one transaction per chunk
    ///
    /// A chunk that fails is logged and skipped; the remaining chunks are
    /// still attempted. Jobs colliding with an active job for the same
    /// (work, chapter) pair are ignored.
    ///
    /// # Returns
    ///
    /// The number of rows actually inserted
    fn insert_jobs(&mut self, jobs: &[NewJob], batch_size: usize) -> StorageResult<usize>;

    /// Gets the chapter ids of a work that have a pending or processing job
    fn find_active_jobs(&self, work_id: &str) -> StorageResult<HashSet<String>>;

    /// Gets up to `limit` pending jobs, highest priority first
    ///
    /// Does not change the status of the returned jobs.
    fn claim_next_batch(&self, filter: &JobFilter, limit: usize)
        -> StorageResult<Vec<AcquisitionJob>>;

    /// Moves a pending job to processing
    ///
    /// Returns false when the job was no longer pending.
    fn mark_processing(&mut self, job_id: i64, run_id: Option<i64>) -> StorageResult<bool>;

    /// Records the outcome of a job (`Completed` or `Failed`)
    ///
    /// Returns false when the job was not in a state that allows the transition.
    fn mark_outcome(
        &mut self,
        job_id: i64,
        outcome: JobStatus,
        error_message: Option<&str>,
    ) -> StorageResult<bool>;

    /// Gets a job by ID
    fn get_job(&self, job_id: i64) -> StorageResult<AcquisitionJob>;

    /// Gets every job ever queued for a work, oldest first
    fn jobs_for_work(&self, work_id: &str) -> StorageResult<Vec<AcquisitionJob>>;

    /// Counts pending jobs matching the filter
    fn count_pending(&self, filter: &JobFilter) -> StorageResult<u64>;

    /// Gets the highest pending job id matching the filter
    fn max_pending_job_id(&self, filter: &JobFilter) -> StorageResult<Option<i64>>;

    /// Fails jobs left in processing for longer than `older_than`
    ///
    /// Used for crash recovery; the transition is forward-only so the next
    /// enqueue pass can queue the chapter again.
    fn fail_stale_processing(&mut self, older_than: chrono::Duration) -> StorageResult<usize>;

    // ===== Run Management =====

    /// Creates a new run record in the running state
    fn create_run(
        &mut self,
        work_id: Option<&str>,
        source: Option<&str>,
        config_hash: &str,
        total: u64,
    ) -> StorageResult<i64>;

    /// Persists the latest progress of a run
    fn update_run_progress(&mut self, run_id: i64, progress: &RunProgress) -> StorageResult<()>;

    /// Persists the final progress and status of a run
    fn finish_run(
        &mut self,
        run_id: i64,
        status: RunStatus,
        progress: &RunProgress,
    ) -> StorageResult<()>;

    /// Gets a run by ID
    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord>;

    /// Gets the most recent run for a scope
    fn latest_run(
        &self,
        work_id: Option<&str>,
        source: Option<&str>,
    ) -> StorageResult<Option<RunRecord>>;

    /// Gets the most recent runs across all scopes
    fn recent_runs(&self, limit: usize) -> StorageResult<Vec<RunRecord>>;

    /// Marks runs still flagged running as interrupted
    ///
    /// Called at startup; a run left running belongs to a dead process.
    fn mark_interrupted_runs(&mut self) -> StorageResult<usize>;

    // ===== Statistics =====

    /// Counts jobs by status
    fn count_jobs_by_status(&self) -> StorageResult<HashMap<JobStatus, u64>>;
}

/// Trait for the catalog collaborator
///
/// The pipeline only reads chapters and page counts; source adapters use the
/// write side to store what they acquired.
pub trait Catalog {
    /// Inserts or renames a work
    fn upsert_work(&mut self, work_id: &str, title: &str) -> StorageResult<()>;

    /// Inserts or updates a chapter of a work
    fn upsert_chapter(
        &mut self,
        work_id: &str,
        chapter_id: &str,
        number: f64,
        url: &str,
    ) -> StorageResult<()>;

    /// Gets every chapter of a work with its page count, in reading order
    fn chapters_with_page_counts(&self, work_id: &str) -> StorageResult<Vec<ChapterRecord>>;

    /// Gets a single chapter with its page count
    fn get_chapter(&self, work_id: &str, chapter_id: &str) -> StorageResult<ChapterRecord>;

    /// Replaces the pages of a chapter with the given ordered URLs
    fn store_pages(
        &mut self,
        work_id: &str,
        chapter_id: &str,
        urls: &[String],
    ) -> StorageResult<usize>;

    /// Gets the pages of a chapter in reading order
    fn pages_for_chapter(&self, work_id: &str, chapter_id: &str)
        -> StorageResult<Vec<PageRecord>>;
}
