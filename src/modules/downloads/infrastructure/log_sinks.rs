use crate::modules::downloads::domain::entities::HistoryRecord;
use crate::modules::downloads::domain::ports::{
    HistorySink, NotificationKind, NotificationSink, UiMessage, UiSink,
};
use crate::shared::errors::{AppError, AppResult};
use crate::{log_debug, log_error, log_info, log_warn};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Notifications rendered as log lines
#[derive(Debug, Default)]
pub struct LoggingNotificationSink;

#[async_trait]
impl NotificationSink for LoggingNotificationSink {
    async fn notify(&self, kind: NotificationKind, title: &str, body: &str) -> AppResult<()> {
        match kind {
            NotificationKind::Failed => log_warn!("[{}] {}: {}", kind, title, body),
            _ => log_info!("[{}] {}: {}", kind, title, body),
        }
        Ok(())
    }
}

/// UI messages rendered as log lines
#[derive(Debug, Default)]
pub struct LoggingUiSink;

impl UiSink for LoggingUiSink {
    fn show(&self, message: UiMessage) {
        match message {
            UiMessage::Info(text) => log_info!("{}", text),
            UiMessage::Success(text) => log_info!("✓ {}", text),
            UiMessage::Error(text) => log_error!("{}", text),
            UiMessage::Progress(text) => log_debug!("{}", text),
        }
    }
}

/// Appends one JSON line per completed job
pub struct JsonlHistorySink {
    path: PathBuf,
    // Serializes appends so records never interleave.
    lock: Mutex<()>,
}

impl JsonlHistorySink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl HistorySink for JsonlHistorySink {
    async fn archive(&self, record: HistoryRecord) -> AppResult<()> {
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        let _guard = self.lock.lock().await;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| AppError::StorageError(format!("open {:?}: {}", self.path, e)))?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        log_debug!("Archived {} to {:?}", record.url, self.path);
        Ok(())
    }
}
