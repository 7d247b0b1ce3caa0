/// Ports for the collaborators the download queue supervises
///
/// The queue never transfers bytes itself. The engine does, and reports back
/// through an `EngineEventSender` tagged with the job id; everything else is
/// best-effort output.
use crate::modules::downloads::domain::entities::HistoryRecord;
use crate::modules::downloads::domain::value_objects::{
    DownloadOptions, JobId, JobSource, MediaMetadata,
};
use crate::shared::config::ModeDefaults;
use crate::shared::errors::AppResult;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Everything the engine needs to run one transfer
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub job_id: JobId,
    pub url: String,
    pub source: JobSource,
    pub options: DownloadOptions,
    /// Sub-folder named after the group, when the group asked for one
    pub group_folder: Option<String>,
    /// Target file name for direct files
    pub file_name: Option<String>,
    /// Cancelled when the job leaves the queue; may already be cancelled on arrival
    pub cancel: CancellationToken,
}

/// Raw output from a running transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEventKind {
    /// One free-text progress line
    Line(String),
    /// Final artifact location, reported separately from progress
    ArtifactPath(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineEvent {
    pub job_id: JobId,
    pub url: String,
    pub kind: EngineEventKind,
}

/// Job-tagged event channel handed to the engine for one transfer
#[derive(Debug, Clone)]
pub struct EngineEventSender {
    job_id: JobId,
    url: String,
    tx: mpsc::UnboundedSender<EngineEvent>,
}

impl EngineEventSender {
    pub fn new(
        job_id: JobId,
        url: impl Into<String>,
        tx: mpsc::UnboundedSender<EngineEvent>,
    ) -> Self {
        Self {
            job_id,
            url: url.into(),
            tx,
        }
    }

    /// Create a sender together with its receiving end
    pub fn channel(
        job_id: JobId,
        url: impl Into<String>,
    ) -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(job_id, url, tx), rx)
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns false once the queue stopped listening
    pub fn line(&self, text: impl Into<String>) -> bool {
        self.send(EngineEventKind::Line(text.into()))
    }

    pub fn artifact(&self, path: impl Into<String>) -> bool {
        self.send(EngineEventKind::ArtifactPath(path.into()))
    }

    fn send(&self, kind: EngineEventKind) -> bool {
        self.tx
            .send(EngineEvent {
                job_id: self.job_id,
                url: self.url.clone(),
                kind,
            })
            .is_ok()
    }
}

/// External download/extraction engine
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DownloadEngine: Send + Sync {
    /// Whether the capability required by `source` is installed
    fn supports(&self, source: JobSource) -> bool;

    /// Display metadata for `url`, using the auth and proxy of `options`
    async fn fetch_metadata(
        &self,
        url: &str,
        options: &DownloadOptions,
    ) -> AppResult<MediaMetadata>;

    /// Run a transfer to completion; returns the artifact path when known
    async fn transfer(
        &self,
        request: TransferRequest,
        events: EngineEventSender,
    ) -> AppResult<Option<String>>;

    /// Stop the transfer of `job_id`; a no-op when none is running
    async fn cancel_transfer(&self, job_id: JobId) -> AppResult<()>;

    /// Size in bytes of a finished artifact
    async fn stat_file(&self, path: &str) -> AppResult<u64>;
}

/// Receives one record per successfully completed job
#[async_trait]
pub trait HistorySink: Send + Sync {
    async fn archive(&self, record: HistoryRecord) -> AppResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Started,
    Completed,
    Failed,
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationKind::Started => write!(f, "started"),
            NotificationKind::Completed => write!(f, "completed"),
            NotificationKind::Failed => write!(f, "failed"),
        }
    }
}

/// Desktop-style notifications; failures are swallowed by the caller
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, kind: NotificationKind, title: &str, body: &str) -> AppResult<()>;
}

/// Transient messages for the UI layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiMessage {
    Info(String),
    Success(String),
    Error(String),
    Progress(String),
}

pub trait UiSink: Send + Sync {
    fn show(&self, message: UiMessage);
}

/// Settings read synchronously at every scheduling pass
pub trait ConfigurationSource: Send + Sync {
    fn concurrency_limit(&self) -> usize;

    fn mode_defaults(&self) -> ModeDefaults;
}

/// Key-value persistence
#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn get(&self, key: &str) -> AppResult<Option<JsonValue>>;

    async fn set(&self, key: &str, value: JsonValue) -> AppResult<()>;

    /// Flush pending sets to durable media
    async fn save(&self) -> AppResult<()>;
}
