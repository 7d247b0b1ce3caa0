/// Domain entities for the download queue
///
/// A `Job` is one requested transfer. Its status moves through the lifecycle
/// encoded by `JobStatus::can_transition_to`; every status change in the crate
/// goes through `Job::transition`.
use super::value_objects::{
    DownloadOptions, GroupInfo, JobId, JobSource, MediaMetadata,
};
use crate::shared::errors::{AppError, AppResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const QUEUED_MESSAGE: &str = "Queued";

/// Job status enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Paused,
    Downloading,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    /// Legal lifecycle moves. Cancellation is not a transition: the job leaves the live set.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Downloading)
                | (Pending, Paused)
                | (Paused, Pending)
                | (Downloading, Processing)
                | (Downloading, Completed)
                | (Downloading, Failed)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Failed, Pending)
        )
    }

    /// Occupies a concurrency slot
    pub fn is_active(self) -> bool {
        matches!(self, JobStatus::Downloading | JobStatus::Processing)
    }

    /// Eligible for durable persistence
    pub fn is_recoverable(self) -> bool {
        matches!(
            self,
            JobStatus::Pending | JobStatus::Paused | JobStatus::Failed
        )
    }

    pub fn is_finished(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Paused => write!(f, "paused"),
            JobStatus::Downloading => write!(f, "downloading"),
            JobStatus::Processing => write!(f, "processing"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            "paused" => Ok(JobStatus::Paused),
            "downloading" => Ok(JobStatus::Downloading),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            _ => Err(format!("Invalid job status: {}", s)),
        }
    }
}

/// Display metadata known before the transfer starts
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PresetMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub thumbnail: Option<String>,
    pub duration: Option<f64>,
    pub filesize: Option<u64>,
    pub extension: Option<String>,
}

impl PresetMetadata {
    pub fn has_title(&self) -> bool {
        self.title.as_deref().is_some_and(|t| !t.trim().is_empty())
    }
}

/// A queued transfer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub url: String,
    pub status: JobStatus,

    pub title: String,
    pub author: Option<String>,
    pub thumbnail: Option<String>,
    pub duration: Option<f64>,
    pub filesize: Option<u64>,
    pub extension: Option<String>,
    pub file_path: Option<String>,

    pub progress: f64,
    #[serde(default)]
    pub speed: String,
    #[serde(default)]
    pub eta: String,
    pub error: Option<String>,
    #[serde(default)]
    pub status_message: String,

    pub added_at: DateTime<Utc>,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub source: JobSource,
    #[serde(default)]
    pub options: DownloadOptions,
    #[serde(default)]
    pub group: Option<GroupInfo>,
}

impl Job {
    /// Create a pending job; the URL stands in for the title until metadata arrives
    pub fn new(url: impl Into<String>, source: JobSource, options: DownloadOptions) -> Self {
        let url = url.into();
        Self {
            id: JobId::new(),
            title: url.clone(),
            url,
            status: JobStatus::Pending,
            author: None,
            thumbnail: None,
            duration: None,
            filesize: None,
            extension: None,
            file_path: None,
            progress: 0.0,
            speed: String::new(),
            eta: String::new(),
            error: None,
            status_message: QUEUED_MESSAGE.to_string(),
            added_at: Utc::now(),
            priority: 0,
            source,
            options,
            group: None,
        }
    }

    pub fn with_group(mut self, group: Option<GroupInfo>) -> Self {
        self.group = group;
        self
    }

    pub fn with_preset(mut self, preset: &PresetMetadata) -> Self {
        if let Some(title) = preset.title.as_ref().filter(|t| !t.trim().is_empty()) {
            self.title = title.clone();
        }
        self.author = preset.author.clone().or(self.author);
        self.thumbnail = preset.thumbnail.clone().or(self.thumbnail);
        self.duration = preset.duration.or(self.duration);
        self.filesize = preset.filesize.or(self.filesize);
        self.extension = preset.extension.clone().or(self.extension);
        self
    }

    pub fn group_id(&self) -> Option<&str> {
        self.group.as_ref().map(|g| g.group_id.as_str())
    }

    /// Move to `next`, rejecting moves outside the lifecycle
    pub fn transition(&mut self, next: JobStatus) -> AppResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(AppError::InvalidTransition(format!(
                "job {} cannot move from {} to {}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        Ok(())
    }

    /// Failed -> pending with cleared error and zeroed telemetry
    pub fn reset_for_retry(&mut self) -> AppResult<()> {
        self.transition(JobStatus::Pending)?;
        self.error = None;
        self.clear_telemetry();
        self.status_message = QUEUED_MESSAGE.to_string();
        Ok(())
    }

    pub fn fail(&mut self, error: impl Into<String>) -> AppResult<()> {
        let error = error.into();
        self.transition(JobStatus::Failed)?;
        self.status_message = format!("Failed: {}", error);
        self.error = Some(error);
        self.speed.clear();
        self.eta.clear();
        Ok(())
    }

    pub fn complete(&mut self) -> AppResult<()> {
        self.transition(JobStatus::Completed)?;
        self.progress = 100.0;
        self.speed.clear();
        self.eta.clear();
        self.status_message = "Completed".to_string();
        Ok(())
    }

    /// Fold fetched metadata into the display fields that are still unset
    pub fn apply_metadata(&mut self, title: String, author: Option<String>, meta: &MediaMetadata) {
        if !title.is_empty() {
            self.title = title;
        }
        if author.is_some() {
            self.author = author;
        }
        if meta.thumbnail.is_some() {
            self.thumbnail = meta.thumbnail.clone();
        }
        if meta.duration.is_some() {
            self.duration = meta.duration;
        }
        if self.filesize.is_none() {
            self.filesize = meta.filesize;
        }
        if self.extension.is_none() {
            self.extension = meta.ext.clone();
        }
    }

    /// Record the final artifact location; extension comes from the path
    pub fn apply_artifact(&mut self, path: &str, size: Option<u64>) {
        self.file_path = Some(path.to_string());
        if let Some(ext) = std::path::Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .filter(|e| !e.is_empty())
        {
            self.extension = Some(ext.to_lowercase());
        }
        if size.is_some() {
            self.filesize = size;
        }
    }

    /// Copy suitable for the durable store, or `None` when the job is not recoverable.
    ///
    /// Active statuses collapse to pending; failed jobs keep their error and message.
    /// This is a serialization view, not a lifecycle transition.
    pub fn to_persisted(&self) -> Option<Job> {
        let mut copy = self.clone();
        match self.status {
            JobStatus::Completed => return None,
            JobStatus::Downloading | JobStatus::Processing => {
                copy.status = JobStatus::Pending;
            }
            JobStatus::Pending | JobStatus::Paused | JobStatus::Failed => {}
        }
        copy.clear_telemetry();
        if copy.status != JobStatus::Failed {
            copy.status_message = QUEUED_MESSAGE.to_string();
        }
        Some(copy)
    }

    fn clear_telemetry(&mut self) {
        self.progress = 0.0;
        self.speed.clear();
        self.eta.clear();
    }
}

/// Final record handed to the history sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    pub id: JobId,
    pub url: String,
    pub title: String,
    pub author: Option<String>,
    pub thumbnail: Option<String>,
    pub duration: Option<f64>,
    pub filesize: Option<u64>,
    pub extension: Option<String>,
    pub file_path: Option<String>,
    pub source: JobSource,
    pub group_title: Option<String>,
    pub completed_at: DateTime<Utc>,
}

impl From<&Job> for HistoryRecord {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            url: job.url.clone(),
            title: job.title.clone(),
            author: job.author.clone(),
            thumbnail: job.thumbnail.clone(),
            duration: job.duration,
            filesize: job.filesize,
            extension: job.extension.clone(),
            file_path: job.file_path.clone(),
            source: job.source,
            group_title: job.group.as_ref().map(|g| g.group_title.clone()),
            completed_at: Utc::now(),
        }
    }
}
