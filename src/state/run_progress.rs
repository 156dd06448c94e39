use serde::Serialize;

/// Observable state of one batch run
///
/// `completed + failed` never exceeds `total`; the recording methods clamp
/// rather than overshoot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunProgress {
    /// Durable run id, `None` before a run record exists
    pub run_id: Option<i64>,

    pub total: u64,
    pub completed: u64,
    pub failed: u64,

    /// Chapter currently being dispatched
    pub current_unit: Option<String>,

    pub is_running: bool,

    /// Human-readable status line, never used for control decisions
    pub message: String,
}

impl RunProgress {
    /// Creates the progress for a freshly started run
    pub fn started(run_id: i64, total: u64) -> Self {
        Self {
            run_id: Some(run_id),
            total,
            completed: 0,
            failed: 0,
            current_unit: None,
            is_running: true,
            message: format!("Processing {} chapters", total),
        }
    }

    /// Progress reported when there is nothing to process
    pub fn idle(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    /// Jobs that have reached an outcome
    pub fn processed(&self) -> u64 {
        self.completed + self.failed
    }

    /// Jobs not yet resolved
    pub fn remaining(&self) -> u64 {
        self.total.saturating_sub(self.processed())
    }

    /// Records the outcomes of one joined batch
    pub fn record_batch(&mut self, completed: u64, failed: u64) {
        let completed = completed.min(self.remaining());
        self.completed += completed;
        let failed = failed.min(self.remaining());
        self.failed += failed;
    }

    /// Completion percentage, rounded; 0 when there is nothing to do
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 0;
        }
        let ratio = self.processed() as f64 / self.total as f64;
        (ratio * 100.0).round().min(100.0) as u8
    }

    /// Marks the run finished with the given status line
    pub fn finish(&mut self, message: impl Into<String>) {
        self.is_running = false;
        self.current_unit = None;
        self.message = message.into();
    }
}
