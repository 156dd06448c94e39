//! State module for tracking acquisition progress
//!
//! # Components
//!
//! - `JobStatus`: lifecycle of a queued acquisition job
//! - `RunProgress`: counters and status line of one batch run
//! - `PageFetchState`: fallback ladder position of one displayed page

mod job_status;
mod page_fetch_state;
mod run_progress;

// Re-export main types
pub use job_status::JobStatus;
pub use page_fetch_state::{backoff_delay, total_backoff, FetchStatus, NextStep, PageFetchState};
pub use run_progress::RunProgress;
