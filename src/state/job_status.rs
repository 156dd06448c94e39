/// Job status definitions for the acquisition queue
///
/// Jobs only ever move forward through these states.
use std::fmt;

/// Represents the current state of an acquisition job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStatus {
    // ===== Active States =====
    /// Job is queued and waiting to be claimed
    Pending,

    /// Job has been dispatched to a source adapter
    Processing,

    // ===== Terminal States =====
    /// Adapter acquired and stored the chapter's pages
    Completed,

    /// Adapter failed, timed out, or the job was abandoned
    Failed,
}

impl JobStatus {
    /// Returns true if the job still occupies its (work, chapter) slot
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Processing)
    }

    /// Returns true if no further transition is possible
    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    /// Returns true if moving from `self` to `next` is a forward transition
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Pending, Self::Failed)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
        )
    }

    /// States a job must be in for a transition to `next` to apply
    pub fn predecessors(next: JobStatus) -> &'static [JobStatus] {
        match next {
            Self::Pending => &[],
            Self::Processing => &[Self::Pending],
            Self::Completed => &[Self::Processing],
            Self::Failed => &[Self::Pending, Self::Processing],
        }
    }

    /// Converts the status to its database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parses a status from its database string representation
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Returns all job statuses
    pub fn all_statuses() -> [Self; 4] {
        [
            Self::Pending,
            Self::Processing,
            Self::Completed,
            Self::Failed,
        ]
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
