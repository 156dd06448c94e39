use crate::config::QueueConfig;
use crate::queue::RunScope;
use crate::storage::{lock_storage, Catalog, NewJob, SharedStorage, Storage, StorageError};
use crate::IngestError;
use std::fmt;
use tokio::sync::mpsc::UnboundedSender;

/// Request to queue the missing chapters of a work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnqueueRequest {
    pub work_id: String,

    /// Source adapter name; the configured default when absent
    pub source: Option<String>,

    /// Priority of the first queued chapter; the configured default when absent
    pub priority_base: Option<i64>,
}

impl EnqueueRequest {
    pub fn new(work_id: impl Into<String>) -> Self {
        Self {
            work_id: work_id.into(),
            source: None,
            priority_base: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_priority_base(mut self, base: i64) -> Self {
        self.priority_base = Some(base);
        self
    }
}

/// How an enqueue call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueStatus {
    /// Every candidate was inserted
    Queued,
    /// Some insert batches failed
    PartiallyQueued,
    /// No chapter of the work lacks pages
    AlreadyComplete,
    /// Every chapter lacking pages already has an active job
    AlreadyQueued,
}

impl fmt::Display for EnqueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::PartiallyQueued => "partially queued",
            Self::AlreadyComplete => "already complete",
            Self::AlreadyQueued => "already queued",
        };
        write!(f, "{}", s)
    }
}

/// Result of an enqueue call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnqueueOutcome {
    /// Jobs actually inserted
    pub queued: usize,
    /// Jobs the call attempted to insert
    pub candidates: usize,
    pub status: EnqueueStatus,
    pub message: String,
}

/// Jobs an enqueue call would insert, without writing anything
#[derive(Debug, Clone, PartialEq)]
pub struct EnqueuePlan {
    pub work_id: String,
    pub source: String,

    /// Chapters of the work with zero pages
    pub missing: usize,

    /// Missing chapters without an active job, highest priority first
    pub jobs: Vec<NewJob>,
}

/// Diffs the catalog against active jobs and queues what is missing
pub struct Enqueuer {
    storage: SharedStorage,
    insert_batch_size: usize,
    default_priority_base: i64,
    default_source: String,
    trigger: Option<UnboundedSender<RunScope>>,
}

impl Enqueuer {
    pub fn new(storage: SharedStorage, config: &QueueConfig) -> Self {
        Self {
            storage,
            insert_batch_size: config.insert_batch_size,
            default_priority_base: config.default_priority_base,
            default_source: config.default_source.clone(),
            trigger: None,
        }
    }

    /// Sends a run request over `trigger` whenever an enqueue leaves pending work
    pub fn with_trigger(mut self, trigger: UnboundedSender<RunScope>) -> Self {
        self.trigger = Some(trigger);
        self
    }

    /// Computes the jobs an enqueue would insert
    ///
    /// # Errors
    ///
    /// * `IngestError::Validation` - empty work id or source
    /// * `IngestError::WorkNotFound` - the catalog has no such work
    /// * `IngestError::Upstream` - the catalog or queue could not be read
    pub fn plan(&self, request: &EnqueueRequest) -> Result<EnqueuePlan, IngestError> {
        let work_id = request.work_id.trim();
        if work_id.is_empty() {
            return Err(IngestError::Validation("work id must not be empty".to_string()));
        }

        let source = request
            .source
            .as_deref()
            .unwrap_or(&self.default_source)
            .trim();
        if source.is_empty() {
            return Err(IngestError::Validation("source must not be empty".to_string()));
        }

        let base = request.priority_base.unwrap_or(self.default_priority_base);

        let storage = lock_storage(&self.storage);
        let chapters = storage
            .chapters_with_page_counts(work_id)
            .map_err(|e| match e {
                StorageError::WorkNotFound(id) => IngestError::WorkNotFound(id),
                other => IngestError::Upstream(other.to_string()),
            })?;

        let mut missing: Vec<_> = chapters.into_iter().filter(|c| c.page_count == 0).collect();
        let missing_count = missing.len();

        if !missing.is_empty() {
            let active = storage
                .find_active_jobs(work_id)
                .map_err(|e| IngestError::Upstream(e.to_string()))?;
            missing.retain(|c| !active.contains(&c.id));
        }
        drop(storage);

        missing.sort_by(|a, b| a.number.total_cmp(&b.number).then_with(|| a.id.cmp(&b.id)));

        let jobs = missing
            .into_iter()
            .enumerate()
            .map(|(index, chapter)| NewJob {
                work_id: work_id.to_string(),
                chapter_id: chapter.id,
                locator: chapter.url,
                source: source.to_string(),
                priority: base.saturating_sub(index as i64),
            })
            .collect();

        Ok(EnqueuePlan {
            work_id: work_id.to_string(),
            source: source.to_string(),
            missing: missing_count,
            jobs,
        })
    }

    /// Queues every chapter of a work that has no pages and no active job
    ///
    /// Processing is triggered without waiting for it; the outcome only
    /// describes what was queued.
    pub fn enqueue(&self, request: &EnqueueRequest) -> Result<EnqueueOutcome, IngestError> {
        let plan = self.plan(request)?;

        if plan.missing == 0 {
            tracing::info!(work = %plan.work_id, "Every chapter already has pages");
            return Ok(EnqueueOutcome {
                queued: 0,
                candidates: 0,
                status: EnqueueStatus::AlreadyComplete,
                message: format!("All chapters of {} already have pages", plan.work_id),
            });
        }

        if plan.jobs.is_empty() {
            tracing::info!(
                work = %plan.work_id,
                missing = plan.missing,
                "Every missing chapter is already queued"
            );
            self.trigger_run(&plan.work_id);
            return Ok(EnqueueOutcome {
                queued: 0,
                candidates: 0,
                status: EnqueueStatus::AlreadyQueued,
                message: format!(
                    "All {} missing chapters of {} are already queued",
                    plan.missing, plan.work_id
                ),
            });
        }

        let candidates = plan.jobs.len();
        let queued = lock_storage(&self.storage).insert_jobs(&plan.jobs, self.insert_batch_size)?;

        let (status, message) = if queued == candidates {
            (
                EnqueueStatus::Queued,
                format!("Queued {} chapters of {}", queued, plan.work_id),
            )
        } else {
            (
                EnqueueStatus::PartiallyQueued,
                format!(
                    "Queued {} of {} chapters of {}",
                    queued, candidates, plan.work_id
                ),
            )
        };

        tracing::info!(
            work = %plan.work_id,
            source = %plan.source,
            queued,
            candidates,
            "{}",
            message
        );

        self.trigger_run(&plan.work_id);

        Ok(EnqueueOutcome {
            queued,
            candidates,
            status,
            message,
        })
    }

    /// Requests a run for the work when it has pending jobs
    fn trigger_run(&self, work_id: &str) {
        let Some(trigger) = &self.trigger else {
            return;
        };

        let scope = RunScope::work(work_id);
        let pending = match lock_storage(&self.storage).count_pending(&scope.filter()) {
            Ok(pending) => pending,
            Err(e) => {
                tracing::warn!(work = %work_id, error = %e, "Could not count pending jobs");
                return;
            }
        };

        if pending == 0 {
            return;
        }

        if trigger.send(scope).is_err() {
            tracing::warn!(work = %work_id, "Run trigger closed, jobs stay pending");
        }
    }
}
