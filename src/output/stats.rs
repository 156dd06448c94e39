//! Statistics generation from the acquisition database
//!
//! This module provides functionality for extracting and displaying
//! queue and run statistics from the storage layer.

use crate::state::JobStatus;
use crate::storage::{RunRecord, Storage};
use crate::IngestError;
use std::collections::HashMap;

/// Number of recent runs shown by `--stats`
pub const RECENT_RUN_LIMIT: usize = 5;

/// Queue statistics summary
#[derive(Debug, Clone)]
pub struct QueueStatistics {
    /// Total number of jobs ever queued
    pub total_jobs: u64,

    /// Count of jobs by status
    pub jobs_by_status: HashMap<JobStatus, u64>,

    /// Most recent runs, newest first
    pub recent_runs: Vec<RunRecord>,
}

impl QueueStatistics {
    pub fn count(&self, status: JobStatus) -> u64 {
        self.jobs_by_status.get(&status).copied().unwrap_or(0)
    }

    /// Share of resolved jobs that completed, in percent
    pub fn success_rate(&self) -> f64 {
        let completed = self.count(JobStatus::Completed);
        let resolved = completed + self.count(JobStatus::Failed);
        if resolved == 0 {
            0.0
        } else {
            (completed as f64 / resolved as f64) * 100.0
        }
    }
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `storage` - The storage backend to query
///
/// # Returns
///
/// * `Ok(QueueStatistics)` - Successfully loaded statistics
/// * `Err(IngestError)` - Failed to query statistics
pub fn load_statistics(storage: &dyn Storage) -> Result<QueueStatistics, IngestError> {
    let jobs_by_status = storage.count_jobs_by_status()?;
    let total_jobs = jobs_by_status.values().sum();
    let recent_runs = storage.recent_runs(RECENT_RUN_LIMIT)?;

    Ok(QueueStatistics {
        total_jobs,
        jobs_by_status,
        recent_runs,
    })
}

/// Prints statistics to stdout in a formatted manner
///
/// # Arguments
///
/// * `stats` - The statistics to display
pub fn print_statistics(stats: &QueueStatistics) {
    println!("=== Queue Statistics ===\n");

    println!("Jobs by Status:");
    for status in JobStatus::all_statuses() {
        let count = stats.count(status);
        let percentage = if stats.total_jobs > 0 {
            (count as f64 / stats.total_jobs as f64) * 100.0
        } else {
            0.0
        };
        println!("  {}: {} ({:.1}%)", status, count, percentage);
    }
    println!("  Total: {}", stats.total_jobs);
    println!();

    if !stats.recent_runs.is_empty() {
        println!("Recent Runs ({}):", stats.recent_runs.len());
        for run in &stats.recent_runs {
            let progress = run.progress();
            println!(
                "  #{} [{}] work={} source={} {}/{} ({}%) started {}",
                run.id,
                run.status.to_db_string(),
                run.work_id.as_deref().unwrap_or("*"),
                run.source.as_deref().unwrap_or("*"),
                progress.processed(),
                run.total,
                progress.percent(),
                run.started_at
            );
            if !run.message.is_empty() {
                println!("      {}", run.message);
            }
        }
        println!();
    }

    println!(
        "Success Rate: {:.1}% ({} completed, {} failed)",
        stats.success_rate(),
        stats.count(JobStatus::Completed),
        stats.count(JobStatus::Failed)
    );
}
