/// Read-only views over the live job list
use crate::modules::downloads::domain::entities::{Job, JobStatus};
use crate::modules::downloads::domain::value_objects::{GroupProgress, JobId};
use serde::Serialize;
use std::sync::Arc;

/// Whole-list snapshot published after every mutation
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueSnapshot {
    pub jobs: Arc<Vec<Job>>,
    pub paused: bool,
}

/// Jobs of one playlist submission
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobGroupView {
    pub group_id: String,
    pub group_title: String,
    pub jobs: Vec<Job>,
    pub progress: GroupProgress,
}

impl QueueSnapshot {
    pub fn new(jobs: Vec<Job>, paused: bool) -> Self {
        Self {
            jobs: Arc::new(jobs),
            paused,
        }
    }

    pub fn get(&self, id: &JobId) -> Option<&Job> {
        self.jobs.iter().find(|j| j.id == *id)
    }

    pub fn active_count(&self) -> usize {
        self.jobs.iter().filter(|j| j.status.is_active()).count()
    }

    pub fn downloading_count(&self) -> usize {
        self.count(JobStatus::Downloading)
    }

    pub fn pending_count(&self) -> usize {
        self.count(JobStatus::Pending)
    }

    pub fn count(&self, status: JobStatus) -> usize {
        self.jobs.iter().filter(|j| j.status == status).count()
    }

    /// Nothing running and nothing that could start
    pub fn is_idle(&self) -> bool {
        self.active_count() == 0 && (self.paused || self.pending_count() == 0)
    }

    pub fn group_progress(&self, group_id: &str) -> GroupProgress {
        group_progress_of(self.jobs.iter().filter(|j| j.group_id() == Some(group_id)))
    }

    /// Grouped jobs in first-seen order, members sorted by their index in the group
    pub fn groups(&self) -> Vec<JobGroupView> {
        let mut groups: Vec<JobGroupView> = Vec::new();

        for job in self.jobs.iter() {
            let Some(group) = job.group.as_ref() else {
                continue;
            };
            match groups.iter_mut().find(|g| g.group_id == group.group_id) {
                Some(view) => view.jobs.push(job.clone()),
                None => groups.push(JobGroupView {
                    group_id: group.group_id.clone(),
                    group_title: group.group_title.clone(),
                    jobs: vec![job.clone()],
                    progress: GroupProgress::default(),
                }),
            }
        }

        for view in groups.iter_mut() {
            view.jobs
                .sort_by_key(|j| j.group.as_ref().and_then(|g| g.index_in_group));
            view.progress = group_progress_of(view.jobs.iter());
        }
        groups
    }

    /// Jobs that belong to no group
    pub fn ungrouped(&self) -> Vec<&Job> {
        self.jobs.iter().filter(|j| j.group.is_none()).collect()
    }
}

fn group_progress_of<'a>(jobs: impl Iterator<Item = &'a Job>) -> GroupProgress {
    jobs.fold(GroupProgress::default(), |mut acc, job| {
        acc.total += 1;
        match job.status {
            JobStatus::Completed => acc.completed += 1,
            JobStatus::Failed => acc.failed += 1,
            _ => {}
        }
        acc
    })
}
