//! Console reports for enqueue and run results

use crate::queue::{EnqueueOutcome, EnqueuePlan, RunOutcome, RunSummary};

/// Prints the result of an enqueue call
pub fn print_enqueue_outcome(outcome: &EnqueueOutcome) {
    println!("Enqueue: {} ({})", outcome.message, outcome.status);
    if outcome.queued < outcome.candidates {
        println!(
            "  {} of {} candidates could not be inserted",
            outcome.candidates - outcome.queued,
            outcome.candidates
        );
    }
}

/// Prints the jobs an enqueue would insert
pub fn print_enqueue_plan(plan: &EnqueuePlan) {
    println!(
        "Work {}: {} chapters without pages, {} would be queued (source {})",
        plan.work_id,
        plan.missing,
        plan.jobs.len(),
        plan.source
    );
    for job in &plan.jobs {
        println!("  [{}] {} {}", job.priority, job.chapter_id, job.locator);
    }
}

/// Prints the terminal summary of a run
pub fn print_run_summary(summary: &RunSummary) {
    match summary.outcome {
        RunOutcome::NothingToDo => println!("Run: nothing to do"),
        RunOutcome::Completed | RunOutcome::Stopped => {
            let label = if summary.outcome == RunOutcome::Stopped {
                "stopped"
            } else {
                "completed"
            };
            println!(
                "Run #{} {}: {} completed, {} failed of {} in {} batches",
                summary.run_id.unwrap_or_default(),
                label,
                summary.completed,
                summary.failed,
                summary.total,
                summary.batches.len()
            );
        }
    }
}
