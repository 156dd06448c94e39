use crate::queue::{BatchProcessor, CompletionCallback, ProgressReporter, RunScope, RunSummary};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

type CompletionHook = Arc<dyn Fn(&RunScope, &RunSummary) + Send + Sync>;

struct ActiveRun {
    cancel: CancellationToken,
    /// Start was requested while this run was active
    rerun: bool,
}

/// Removes a scope from the active runs when its task ends, even by panic
struct ActiveGuard {
    service: IngestService,
    scope: RunScope,
    armed: bool,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        if self.armed {
            self.service.finish_scope(&self.scope);
        }
    }
}

/// Run controls over the batch processor
///
/// At most one run is active per scope. Starting an active scope is a
/// no-op that schedules one follow-up run, so jobs queued mid-run are
/// drained once the current run finishes.
#[derive(Clone)]
pub struct IngestService {
    processor: Arc<BatchProcessor>,
    active: Arc<Mutex<HashMap<RunScope, ActiveRun>>>,
    running: Arc<watch::Sender<usize>>,
    on_complete: Option<CompletionHook>,
}

impl IngestService {
    pub fn new(processor: BatchProcessor) -> Self {
        let (running, _) = watch::channel(0);
        Self {
            processor: Arc::new(processor),
            active: Arc::new(Mutex::new(HashMap::new())),
            running: Arc::new(running),
            on_complete: None,
        }
    }

    /// Calls `hook` with the summary of every finished run
    pub fn with_completion_hook(
        mut self,
        hook: impl Fn(&RunScope, &RunSummary) + Send + Sync + 'static,
    ) -> Self {
        self.on_complete = Some(Arc::new(hook));
        self
    }

    pub fn reporter(&self) -> &ProgressReporter {
        self.processor.reporter()
    }

    fn lock_active(&self) -> MutexGuard<'_, HashMap<RunScope, ActiveRun>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts a run for `scope` unless one is already active
    ///
    /// Returns true when a new run task was spawned. Must be called from
    /// within a tokio runtime.
    pub fn start(&self, scope: RunScope) -> bool {
        let mut active = self.lock_active();
        if let Some(run) = active.get_mut(&scope) {
            if !run.cancel.is_cancelled() {
                run.rerun = true;
                tracing::debug!(scope = %scope, "Run already active, follow-up scheduled");
            }
            return false;
        }

        let cancel = CancellationToken::new();
        active.insert(
            scope.clone(),
            ActiveRun {
                cancel: cancel.clone(),
                rerun: false,
            },
        );
        self.running.send_replace(active.len());
        drop(active);

        let service = self.clone();
        tokio::spawn(async move {
            service.run_scope(scope, cancel).await;
        });
        true
    }

    async fn run_scope(&self, scope: RunScope, cancel: CancellationToken) {
        let mut guard = ActiveGuard {
            service: self.clone(),
            scope: scope.clone(),
            armed: true,
        };

        loop {
            let callback = self.on_complete.clone().map(|hook| {
                let scope = scope.clone();
                Box::new(move |summary: &RunSummary| hook(&scope, summary)) as CompletionCallback
            });

            if let Err(e) = self.processor.run(&scope, cancel.clone(), callback).await {
                tracing::error!(scope = %scope, error = %e, "Run aborted");
            }

            let finished = {
                let mut active = self.lock_active();
                let again = match active.get_mut(&scope) {
                    Some(run) if run.rerun && !run.cancel.is_cancelled() => {
                        run.rerun = false;
                        true
                    }
                    _ => false,
                };

                // Removed under the same lock so a concurrent start is never lost
                if !again {
                    active.remove(&scope);
                    self.running.send_replace(active.len());
                }
                !again
            };

            if finished {
                guard.armed = false;
                return;
            }
            tracing::debug!(scope = %scope, "Starting follow-up run");
        }
    }

    fn finish_scope(&self, scope: &RunScope) {
        tracing::warn!(scope = %scope, "Run task ended abnormally");
        let mut active = self.lock_active();
        active.remove(scope);
        self.running.send_replace(active.len());
    }

    /// Requests cooperative cancellation of the run for `scope`
    ///
    /// The current batch finishes; remaining jobs stay pending. Returns
    /// false when no run is active for the scope.
    pub fn stop(&self, scope: &RunScope) -> bool {
        match self.lock_active().get(scope) {
            Some(run) => {
                tracing::info!(scope = %scope, "Stopping run");
                run.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Requests cancellation of every active run
    pub fn stop_all(&self) -> usize {
        let active = self.lock_active();
        for run in active.values() {
            run.cancel.cancel();
        }
        if !active.is_empty() {
            tracing::info!("Stopping {} active runs", active.len());
        }
        active.len()
    }

    pub fn is_running(&self, scope: &RunScope) -> bool {
        self.lock_active().contains_key(scope)
    }

    pub fn active_scopes(&self) -> Vec<RunScope> {
        self.lock_active().keys().cloned().collect()
    }

    /// Resolves once no run is active
    pub async fn wait_idle(&self) {
        let mut receiver = self.running.subscribe();
        loop {
            if *receiver.borrow_and_update() == 0 {
                return;
            }
            if receiver.changed().await.is_err() {
                return;
            }
        }
    }

    /// Spawns the worker that turns run requests into runs
    ///
    /// The worker ends when every sender of the channel is dropped.
    pub fn spawn_trigger_worker(&self, mut requests: UnboundedReceiver<RunScope>) -> JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            while let Some(scope) = requests.recv().await {
                tracing::debug!(scope = %scope, "Run requested");
                service.start(scope);
            }
            tracing::debug!("Run trigger closed");
        })
    }
}
