//! Output module for console reports
//!
//! This module handles:
//! - Printing enqueue outcomes and dry-run plans
//! - Printing run summaries
//! - Loading and printing queue statistics

mod report;
pub mod stats;

pub use report::{print_enqueue_outcome, print_enqueue_plan, print_run_summary};
pub use stats::{load_statistics, print_statistics, QueueStatistics};
