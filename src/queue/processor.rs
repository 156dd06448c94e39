use crate::adapter::AdapterRegistry;
use crate::config::ProcessorConfig;
use crate::queue::{ProgressReporter, RunScope};
use crate::state::{JobStatus, RunProgress};
use crate::storage::{
    lock_storage, AcquisitionJob, JobFilter, RunStatus, SharedStorage, Storage, StorageError,
};
use crate::IngestError;
use futures::future::join_all;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Callback invoked once with the terminal summary of a run
pub type CompletionCallback = Box<dyn FnOnce(&RunSummary) + Send + 'static>;

/// Tunables of the batch processor
#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    /// Maximum concurrent dispatches per batch
    pub batch_size: usize,

    /// Pause between batches
    pub batch_delay: Duration,

    /// Upper bound on one adapter call
    pub dispatch_timeout: Duration,

    /// Hash of the configuration, recorded on each run
    pub config_hash: String,
}

impl ProcessorSettings {
    pub fn from_config(config: &ProcessorConfig, config_hash: impl Into<String>) -> Self {
        Self {
            batch_size: config.batch_size,
            batch_delay: Duration::from_millis(config.batch_delay_ms),
            dispatch_timeout: Duration::from_secs(config.dispatch_timeout_secs),
            config_hash: config_hash.into(),
        }
    }
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// No pending job in scope; no run record was created
    NothingToDo,
    /// Every job in the start snapshot reached an outcome
    Completed,
    /// Cancelled at a batch boundary; the rest stays pending
    Stopped,
}

/// Terminal summary of one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub run_id: Option<i64>,
    pub total: u64,
    pub completed: u64,
    pub failed: u64,

    /// Number of jobs dispatched in each batch, in order
    pub batches: Vec<usize>,

    pub outcome: RunOutcome,
}

/// Drains pending jobs in fixed-size concurrent batches
///
/// # Run Flow
///
/// 1. Snapshot the pending jobs in scope (count and highest id)
/// 2. Create the durable run record
/// 3. Per batch: check cancellation, claim, mark processing, dispatch all
///    jobs concurrently, record outcomes, persist and publish progress
/// 4. Wait `batch_delay` before the next batch, waking early on cancellation
///
/// Jobs queued after the snapshot are left to the next run, so
/// `completed + failed` never exceeds `total`. Snapshot jobs taken by an
/// overlapping run are removed from `total`, so a run that is not stopped
/// ends with `completed + failed == total`.
pub struct BatchProcessor {
    storage: SharedStorage,
    adapters: Arc<AdapterRegistry>,
    reporter: ProgressReporter,
    settings: ProcessorSettings,
}

impl BatchProcessor {
    pub fn new(
        storage: SharedStorage,
        adapters: Arc<AdapterRegistry>,
        reporter: ProgressReporter,
        settings: ProcessorSettings,
    ) -> Self {
        Self {
            storage,
            adapters,
            reporter,
            settings,
        }
    }

    pub fn reporter(&self) -> &ProgressReporter {
        &self.reporter
    }

    pub fn storage(&self) -> &SharedStorage {
        &self.storage
    }

    /// Runs the processor for a scope until done or cancelled
    ///
    /// Per-job failures are counted, never returned. An `Err` means the
    /// queue store itself failed; the run record is then marked failed.
    pub async fn run(
        &self,
        scope: &RunScope,
        cancel: CancellationToken,
        on_complete: Option<CompletionCallback>,
    ) -> Result<RunSummary, IngestError> {
        let (total, max_job_id) = {
            let storage = lock_storage(&self.storage);
            let max_job_id = storage.max_pending_job_id(&scope.filter())?;
            let snapshot = JobFilter {
                max_job_id,
                ..scope.filter()
            };
            (storage.count_pending(&snapshot)?, max_job_id)
        };

        if total == 0 {
            tracing::info!(scope = %scope, "Nothing to do");
            self.reporter
                .publish(scope, RunProgress::idle("Nothing to do"));
            let summary = RunSummary {
                run_id: None,
                total: 0,
                completed: 0,
                failed: 0,
                batches: Vec::new(),
                outcome: RunOutcome::NothingToDo,
            };
            if let Some(callback) = on_complete {
                callback(&summary);
            }
            return Ok(summary);
        }

        let run_id = lock_storage(&self.storage).create_run(
            scope.work_id.as_deref(),
            scope.source.as_deref(),
            &self.settings.config_hash,
            total,
        )?;

        tracing::info!("Starting run {} ({}): {} pending jobs", run_id, scope, total);

        let mut progress = RunProgress::started(run_id, total);
        self.reporter.publish(scope, progress.clone());

        let filter = JobFilter {
            max_job_id,
            ..scope.filter()
        };
        let mut batches = Vec::new();

        let result = self
            .drain(scope, &filter, &cancel, &mut progress, &mut batches)
            .await;

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!("Run {} failed: {}", run_id, e);
                progress.finish(format!("Failed: {}", e));
                self.reporter.publish(scope, progress.clone());
                if let Err(finish_err) =
                    lock_storage(&self.storage).finish_run(run_id, RunStatus::Failed, &progress)
                {
                    tracing::error!("Could not record failure of run {}: {}", run_id, finish_err);
                }
                return Err(e);
            }
        };

        let status = match outcome {
            RunOutcome::Stopped => {
                progress.finish(format!(
                    "Stopped: {} completed, {} failed, {} remaining",
                    progress.completed,
                    progress.failed,
                    progress.remaining()
                ));
                RunStatus::Stopped
            }
            _ => {
                progress.finish(format!(
                    "Completed: {} completed, {} failed",
                    progress.completed, progress.failed
                ));
                RunStatus::Completed
            }
        };

        lock_storage(&self.storage).finish_run(run_id, status, &progress)?;
        self.reporter.publish(scope, progress.clone());

        tracing::info!("Run {} finished: {}", run_id, progress.message);

        let summary = RunSummary {
            run_id: Some(run_id),
            total: progress.total,
            completed: progress.completed,
            failed: progress.failed,
            batches,
            outcome,
        };
        if let Some(callback) = on_complete {
            callback(&summary);
        }
        Ok(summary)
    }

    /// The batch loop
    async fn drain(
        &self,
        scope: &RunScope,
        filter: &JobFilter,
        cancel: &CancellationToken,
        progress: &mut RunProgress,
        batches: &mut Vec<usize>,
    ) -> Result<RunOutcome, IngestError> {
        let run_id = progress.run_id;

        loop {
            if cancel.is_cancelled() {
                return Ok(RunOutcome::Stopped);
            }

            let claimed = lock_storage(&self.storage)
                .claim_next_batch(filter, self.settings.batch_size)?;
            if claimed.is_empty() {
                // Whatever is left of the snapshot went to overlapping runs
                let lost = progress.remaining();
                if lost > 0 {
                    self.release_lost(scope, progress, lost)?;
                }
                return Ok(RunOutcome::Completed);
            }

            let claimed_count = claimed.len();
            let batch = self.mark_batch_processing(claimed, run_id)?;
            let lost = (claimed_count - batch.len()) as u64;
            if lost > 0 {
                self.release_lost(scope, progress, lost)?;
            }
            if batch.is_empty() {
                continue;
            }

            batches.push(batch.len());
            progress.current_unit = Some(batch[0].chapter_id.clone());
            progress.message = format!("Batch {}: dispatching {} jobs", batches.len(), batch.len());
            self.reporter.publish(scope, progress.clone());

            let results = join_all(batch.iter().map(|job| self.dispatch(job))).await;
            let (completed, failed, write_error) = self.record_outcomes(&batch, results);

            progress.record_batch(completed, failed);
            if let Some(e) = write_error {
                return Err(e.into());
            }

            progress.message = format!(
                "Batch {}: {} completed, {} failed ({}/{})",
                batches.len(),
                completed,
                failed,
                progress.processed(),
                progress.total
            );
            if let Some(id) = run_id {
                lock_storage(&self.storage).update_run_progress(id, progress)?;
            }
            self.reporter.publish(scope, progress.clone());

            tracing::debug!(
                batch = batches.len(),
                completed,
                failed,
                lost,
                percent = progress.percent(),
                "Batch finished"
            );

            if progress.remaining() == 0 {
                return Ok(RunOutcome::Completed);
            }

            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(self.settings.batch_delay) => {}
            }
        }
    }

    /// Marks claimed jobs processing, dropping those another run took first
    ///
    /// On a storage error the jobs already marked are failed before the
    /// error is returned, so none is left in processing.
    fn mark_batch_processing(
        &self,
        claimed: Vec<AcquisitionJob>,
        run_id: Option<i64>,
    ) -> Result<Vec<AcquisitionJob>, IngestError> {
        let mut storage = lock_storage(&self.storage);
        let mut batch = Vec::with_capacity(claimed.len());

        for job in claimed {
            match storage.mark_processing(job.id, run_id) {
                Ok(true) => batch.push(job),
                Ok(false) => {
                    tracing::debug!(job_id = job.id, "Job taken by another run");
                }
                Err(e) => {
                    let reason = format!("Not dispatched: {}", e);
                    for marked in &batch {
                        if let Err(fail_err) =
                            storage.mark_outcome(marked.id, JobStatus::Failed, Some(&reason))
                        {
                            tracing::warn!(
                                job_id = marked.id,
                                error = %fail_err,
                                "Could not release job"
                            );
                        }
                    }
                    return Err(e.into());
                }
            }
        }

        Ok(batch)
    }

    /// Records the outcome of every dispatched job
    ///
    /// Every write is attempted even after one fails. A job whose outcome
    /// could not be written is failed instead when possible. Returns the
    /// completed and failed counts of the rows actually written, plus the
    /// first write error.
    fn record_outcomes(
        &self,
        batch: &[AcquisitionJob],
        results: Vec<Result<usize, String>>,
    ) -> (u64, u64, Option<StorageError>) {
        let (mut completed, mut failed) = (0u64, 0u64);
        let mut first_error = None;
        let mut storage = lock_storage(&self.storage);

        for (job, result) in batch.iter().zip(results) {
            let written = match result {
                Ok(pages) => {
                    tracing::debug!(
                        job_id = job.id,
                        chapter = %job.chapter_id,
                        pages,
                        "Job completed"
                    );
                    storage
                        .mark_outcome(job.id, JobStatus::Completed, None)
                        .map(|_| JobStatus::Completed)
                }
                Err(reason) => {
                    tracing::warn!(
                        job_id = job.id,
                        work = %job.work_id,
                        chapter = %job.chapter_id,
                        source = %job.source,
                        error = %reason,
                        "Job failed"
                    );
                    storage
                        .mark_outcome(job.id, JobStatus::Failed, Some(&reason))
                        .map(|_| JobStatus::Failed)
                }
            };

            let status = match written {
                Ok(status) => status,
                Err(e) => {
                    tracing::warn!(job_id = job.id, error = %e, "Could not record job outcome");
                    let reason = format!("Outcome not recorded: {}", e);
                    let fallback = storage.mark_outcome(job.id, JobStatus::Failed, Some(&reason));
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                    match fallback {
                        Ok(_) => JobStatus::Failed,
                        Err(fail_err) => {
                            tracing::warn!(
                                job_id = job.id,
                                error = %fail_err,
                                "Job left in processing"
                            );
                            continue;
                        }
                    }
                }
            };

            match status {
                JobStatus::Completed => completed += 1,
                _ => failed += 1,
            }
        }

        (completed, failed, first_error)
    }

    /// Shrinks the run total by jobs that overlapping runs processed
    fn release_lost(
        &self,
        scope: &RunScope,
        progress: &mut RunProgress,
        lost: u64,
    ) -> Result<(), IngestError> {
        tracing::info!(scope = %scope, lost, "Jobs of this run were taken by another run");
        progress.total = progress.total.saturating_sub(lost);
        if let Some(id) = progress.run_id {
            lock_storage(&self.storage).update_run_progress(id, progress)?;
        }
        self.reporter.publish(scope, progress.clone());
        Ok(())
    }

    /// Runs one job through its source adapter, bounded by the dispatch timeout
    ///
    /// A panicking adapter counts as a failed job.
    async fn dispatch(&self, job: &AcquisitionJob) -> Result<usize, String> {
        let adapter = self.adapters.resolve(&job.source).map_err(|e| e.to_string())?;
        let acquire = AssertUnwindSafe(adapter.acquire(job)).catch_unwind();

        match tokio::time::timeout(self.settings.dispatch_timeout, acquire).await {
            Ok(Ok(Ok(pages))) => Ok(pages),
            Ok(Ok(Err(e))) => Err(e.to_string()),
            Ok(Err(panic)) => Err(format!("Adapter panicked: {}", panic_message(&*panic))),
            Err(_) => Err(format!(
                "Timed out after {}s",
                self.settings.dispatch_timeout.as_secs_f64()
            )),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}
