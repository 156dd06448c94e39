use crate::queue::RunScope;
use crate::state::RunProgress;
use crate::storage::{lock_storage, SharedStorage, Storage};
use crate::IngestError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;

/// Read side of run progress
///
/// Live progress is kept in one watch channel per scope; anything the
/// process has not seen yet is read back from the run records.
#[derive(Clone)]
pub struct ProgressReporter {
    channels: Arc<Mutex<HashMap<RunScope, watch::Sender<RunProgress>>>>,
    storage: SharedStorage,
}

impl ProgressReporter {
    pub fn new(storage: SharedStorage) -> Self {
        Self {
            channels: Arc::new(Mutex::new(HashMap::new())),
            storage,
        }
    }

    /// Publishes new progress for a scope
    ///
    /// Counters are clamped so observers never see more outcomes than jobs.
    pub fn publish(&self, scope: &RunScope, mut progress: RunProgress) {
        progress.completed = progress.completed.min(progress.total);
        progress.failed = progress.failed.min(progress.total - progress.completed);

        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        match channels.get(scope) {
            Some(sender) => {
                sender.send_replace(progress);
            }
            None => {
                let (sender, _) = watch::channel(progress);
                channels.insert(scope.clone(), sender);
            }
        }
    }

    /// Subscribes to progress updates of a scope
    ///
    /// The receiver starts at the latest known progress, live or persisted.
    pub fn subscribe(&self, scope: &RunScope) -> watch::Receiver<RunProgress> {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(sender) = channels.get(scope) {
            return sender.subscribe();
        }

        let initial = self.persisted_or_idle(scope);
        let (sender, receiver) = watch::channel(initial);
        channels.insert(scope.clone(), sender);
        receiver
    }

    /// Latest known progress of a scope
    pub fn current(&self, scope: &RunScope) -> RunProgress {
        let channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(sender) = channels.get(scope) {
            return sender.borrow().clone();
        }
        drop(channels);

        self.persisted_or_idle(scope)
    }

    /// Progress of a specific run, from its durable record
    pub fn load_run(&self, run_id: i64) -> Result<RunProgress, IngestError> {
        let run = lock_storage(&self.storage).get_run(run_id)?;
        Ok(run.progress())
    }

    /// Progress of the most recent run recorded for a scope
    pub fn latest_for(&self, scope: &RunScope) -> Result<Option<RunProgress>, IngestError> {
        let run = lock_storage(&self.storage)
            .latest_run(scope.work_id.as_deref(), scope.source.as_deref())?;
        Ok(run.map(|r| r.progress()))
    }

    fn persisted_or_idle(&self, scope: &RunScope) -> RunProgress {
        match self.latest_for(scope) {
            Ok(Some(progress)) => progress,
            Ok(None) => RunProgress::idle("No runs yet"),
            Err(e) => {
                tracing::warn!(scope = %scope, error = %e, "Could not read persisted progress");
                RunProgress::idle("Progress unavailable")
            }
        }
    }
}
