/// Admission control for the download queue
///
/// Selection is a pure function over the live job list so it can be tested
/// without spawning anything. The queue service calls it under its state lock
/// and flips the selected jobs to downloading before releasing the lock.
use crate::modules::downloads::domain::entities::{Job, JobStatus};
use crate::modules::downloads::domain::value_objects::JobId;
use std::cmp::Ordering;

/// Outcome of one scheduling pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulingDecision {
    pub limit: usize,
    pub active: usize,
    pub dispatch: Vec<JobId>,
}

/// Jobs occupying a concurrency slot
pub fn active_count(jobs: &[Job]) -> usize {
    jobs.iter().filter(|j| j.status.is_active()).count()
}

/// Pending jobs in dispatch order: priority descending, then oldest first
pub fn dispatch_order(jobs: &[Job]) -> Vec<&Job> {
    let mut pending: Vec<&Job> = jobs
        .iter()
        .filter(|j| j.status == JobStatus::Pending)
        .collect();
    pending.sort_by(|a, b| compare_for_dispatch(a, b));
    pending
}

fn compare_for_dispatch(a: &Job, b: &Job) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| a.added_at.cmp(&b.added_at))
}

/// Which pending jobs fill the free slots under `limit`.
///
/// A limit of zero is treated as one. Running jobs are never preempted when the
/// limit drops below the active count; nothing new is selected instead.
pub fn select_dispatchable(jobs: &[Job], limit: usize) -> SchedulingDecision {
    let limit = limit.max(1);
    let active = active_count(jobs);
    let free = limit.saturating_sub(active);

    let dispatch = dispatch_order(jobs)
        .into_iter()
        .take(free)
        .map(|j| j.id)
        .collect();

    SchedulingDecision {
        limit,
        active,
        dispatch,
    }
}

/// Priority that puts a job ahead of every other job
pub fn top_priority(jobs: &[Job]) -> i64 {
    jobs.iter().map(|j| j.priority).max().unwrap_or(0) + 1
}
