//! Acquisition queue orchestration
//!
//! This module contains the moving parts of the pipeline, including:
//! - The enqueuer that diffs the catalog against active jobs
//! - The batch processor that drains pending jobs with bounded concurrency
//! - The progress reporter that publishes live and persisted run progress
//! - The service that starts, stops and re-triggers runs per scope

mod enqueuer;
mod processor;
mod progress;
mod service;

pub use enqueuer::{EnqueueOutcome, EnqueuePlan, EnqueueRequest, EnqueueStatus, Enqueuer};
pub use processor::{
    BatchProcessor, CompletionCallback, ProcessorSettings, RunOutcome, RunSummary,
};
pub use progress::ProgressReporter;
pub use service::IngestService;

use crate::storage::JobFilter;
use std::fmt;

/// Which pending jobs a run drains
///
/// `None` fields are wildcards; the default scope drains every pending job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct RunScope {
    pub work_id: Option<String>,
    pub source: Option<String>,
}

impl RunScope {
    /// Every pending job
    pub fn all() -> Self {
        Self::default()
    }

    /// Pending jobs of one work, any source
    pub fn work(work_id: impl Into<String>) -> Self {
        Self {
            work_id: Some(work_id.into()),
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Storage filter selecting this scope's pending jobs
    pub fn filter(&self) -> JobFilter {
        JobFilter {
            work_id: self.work_id.clone(),
            source: self.source.clone(),
            max_job_id: None,
        }
    }
}

impl fmt::Display for RunScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "work={} source={}",
            self.work_id.as_deref().unwrap_or("*"),
            self.source.as_deref().unwrap_or("*")
        )
    }
}
