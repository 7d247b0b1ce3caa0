/// In-memory collaborators for driving the queue from tests
///
/// `FakeEngine` holds every transfer open until the test resolves it, so
/// tests decide exactly when and how each download ends.
use async_trait::async_trait;
use dashmap::DashMap;
use dlqueue_lib::modules::downloads::{
    DownloadEngine, DownloadOptions, DurableStore, EngineEventSender, HistoryRecord, HistorySink,
    JobId, JobSource, MediaMetadata, NotificationKind, NotificationSink, TransferRequest,
    UiMessage, UiSink,
};
use dlqueue_lib::shared::errors::{AppError, AppResult};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::oneshot;

const WAIT: Duration = Duration::from_secs(30);

// ================================================================================================
// ENGINE
// ================================================================================================

struct OpenTransfer {
    job_id: JobId,
    events: EngineEventSender,
    done: oneshot::Sender<AppResult<Option<String>>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelBehavior {
    /// The killed transfer resolves with an error, like a real process
    FailAfterKill,
    /// The transfer never resolves
    Hang,
}

pub struct FakeEngine {
    supported: AtomicBool,
    cancel_behavior: Mutex<CancelBehavior>,
    metadata: DashMap<String, AppResult<MediaMetadata>>,
    metadata_calls: DashMap<String, usize>,
    metadata_options: Mutex<Vec<DownloadOptions>>,
    sizes: DashMap<String, u64>,
    open: DashMap<String, OpenTransfer>,
    hung: Mutex<Vec<oneshot::Sender<AppResult<Option<String>>>>>,
    requests: Mutex<Vec<TransferRequest>>,
    cancelled: Mutex<Vec<String>>,
    peak_concurrency: AtomicUsize,
}

impl Default for FakeEngine {
    fn default() -> Self {
        Self {
            supported: AtomicBool::new(true),
            cancel_behavior: Mutex::new(CancelBehavior::FailAfterKill),
            metadata: DashMap::new(),
            metadata_calls: DashMap::new(),
            metadata_options: Mutex::new(Vec::new()),
            sizes: DashMap::new(),
            open: DashMap::new(),
            hung: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
            peak_concurrency: AtomicUsize::new(0),
        }
    }
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_supported(&self, supported: bool) {
        self.supported.store(supported, Ordering::SeqCst);
    }

    pub fn set_cancel_behavior(&self, behavior: CancelBehavior) {
        *self.cancel_behavior.lock().unwrap() = behavior;
    }

    /// Script the metadata lookup result for `url`
    pub fn set_metadata(&self, url: &str, result: AppResult<MediaMetadata>) {
        self.metadata.insert(url.to_string(), result);
    }

    pub fn set_file_size(&self, path: &str, size: u64) {
        self.sizes.insert(path.to_string(), size);
    }

    pub fn metadata_calls(&self, url: &str) -> usize {
        self.metadata_calls.get(url).map(|c| *c).unwrap_or(0)
    }

    /// Options passed to every metadata lookup, in call order
    pub fn metadata_options(&self) -> Vec<DownloadOptions> {
        self.metadata_options.lock().unwrap().clone()
    }

    pub fn requests(&self) -> Vec<TransferRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn started_urls(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.url).collect()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.cancelled.lock().unwrap().clone()
    }

    pub fn running(&self) -> usize {
        self.open.len()
    }

    pub fn is_running(&self, url: &str) -> bool {
        self.open.contains_key(url)
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak_concurrency.load(Ordering::SeqCst)
    }

    /// Wait until a transfer for `url` is open
    pub async fn wait_started(&self, url: &str) {
        tokio::time::timeout(WAIT, async {
            while !self.is_running(url) {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("transfer for {} never started", url));
    }

    pub fn emit(&self, url: &str, line: &str) {
        let transfer = self.open.get(url).expect("no open transfer");
        transfer.events.line(line);
    }

    pub fn emit_artifact(&self, url: &str, path: &str) {
        let transfer = self.open.get(url).expect("no open transfer");
        transfer.events.artifact(path);
    }

    /// Resolve the open transfer for `url`
    pub fn finish(&self, url: &str, result: AppResult<Option<String>>) {
        let (_, transfer) = self.open.remove(url).expect("no open transfer");
        let _ = transfer.done.send(result);
    }

    pub fn succeed(&self, url: &str) {
        self.finish(url, Ok(None));
    }
}

#[async_trait]
impl DownloadEngine for FakeEngine {
    fn supports(&self, _source: JobSource) -> bool {
        self.supported.load(Ordering::SeqCst)
    }

    async fn fetch_metadata(
        &self,
        url: &str,
        options: &DownloadOptions,
    ) -> AppResult<MediaMetadata> {
        *self.metadata_calls.entry(url.to_string()).or_insert(0) += 1;
        self.metadata_options.lock().unwrap().push(options.clone());
        match self.metadata.get(url) {
            Some(result) => result.clone(),
            None => Err(AppError::EngineUnavailable("no metadata scripted".to_string())),
        }
    }

    async fn transfer(
        &self,
        request: TransferRequest,
        events: EngineEventSender,
    ) -> AppResult<Option<String>> {
        // Like the real engines: a token fired before the transfer starts means no transfer
        if request.cancel.is_cancelled() {
            return Err(AppError::Cancelled(format!("transfer of {}", request.url)));
        }

        let (done, rx) = oneshot::channel();
        let url = request.url.clone();
        let job_id = request.job_id;
        self.requests.lock().unwrap().push(request);
        self.open.insert(
            url.clone(),
            OpenTransfer {
                job_id,
                events,
                done,
            },
        );
        self.peak_concurrency
            .fetch_max(self.open.len(), Ordering::SeqCst);

        rx.await
            .unwrap_or_else(|_| Err(AppError::Cancelled(format!("transfer of {}", url))))
    }

    async fn cancel_transfer(&self, job_id: JobId) -> AppResult<()> {
        let url = self
            .requests()
            .into_iter()
            .find(|r| r.job_id == job_id)
            .map(|r| r.url);
        let Some(url) = url else {
            return Ok(());
        };
        self.cancelled.lock().unwrap().push(url.clone());

        let open = self.open.get(&url).is_some_and(|t| t.job_id == job_id);
        if let Some((_, transfer)) = open.then(|| self.open.remove(&url)).flatten() {
            let behavior = *self.cancel_behavior.lock().unwrap();
            match behavior {
                CancelBehavior::FailAfterKill => {
                    let _ = transfer
                        .done
                        .send(Err(AppError::EngineError("process killed".to_string())));
                }
                CancelBehavior::Hang => self.hung.lock().unwrap().push(transfer.done),
            }
        }
        Ok(())
    }

    async fn stat_file(&self, path: &str) -> AppResult<u64> {
        self.sizes
            .get(path)
            .map(|s| *s)
            .ok_or_else(|| AppError::NotFound(path.to_string()))
    }
}

// ================================================================================================
// SINKS
// ================================================================================================

/// Records everything the queue reports
#[derive(Default)]
pub struct RecordingSinks {
    history: Mutex<Vec<HistoryRecord>>,
    notifications: Mutex<Vec<(NotificationKind, String)>>,
    ui: Mutex<Vec<UiMessage>>,
    fail_outputs: AtomicBool,
    started_delay: Mutex<Option<Duration>>,
}

impl RecordingSinks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make history and notification sinks return errors
    pub fn fail_outputs(&self) {
        self.fail_outputs.store(true, Ordering::SeqCst);
    }

    /// Make every "started" notification take `delay` to deliver
    pub fn delay_started(&self, delay: Duration) {
        *self.started_delay.lock().unwrap() = Some(delay);
    }

    pub fn history(&self) -> Vec<HistoryRecord> {
        self.history.lock().unwrap().clone()
    }

    pub fn notifications(&self) -> Vec<(NotificationKind, String)> {
        self.notifications.lock().unwrap().clone()
    }

    pub fn notified(&self, kind: NotificationKind) -> usize {
        self.notifications()
            .iter()
            .filter(|(k, _)| *k == kind)
            .count()
    }

    pub fn ui_messages(&self) -> Vec<UiMessage> {
        self.ui.lock().unwrap().clone()
    }

    pub fn ui_errors(&self) -> Vec<String> {
        self.ui_messages()
            .into_iter()
            .filter_map(|m| match m {
                UiMessage::Error(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn ui_contains(&self, needle: &str) -> bool {
        self.ui_messages().iter().any(|m| match m {
            UiMessage::Info(t) | UiMessage::Success(t) | UiMessage::Error(t) | UiMessage::Progress(t) => {
                t.contains(needle)
            }
        })
    }
}

#[async_trait]
impl HistorySink for RecordingSinks {
    async fn archive(&self, record: HistoryRecord) -> AppResult<()> {
        if self.fail_outputs.load(Ordering::SeqCst) {
            return Err(AppError::StorageError("history unavailable".to_string()));
        }
        self.history.lock().unwrap().push(record);
        Ok(())
    }
}

#[async_trait]
impl NotificationSink for RecordingSinks {
    async fn notify(&self, kind: NotificationKind, title: &str, _body: &str) -> AppResult<()> {
        let delay = *self.started_delay.lock().unwrap();
        if let Some(delay) = delay.filter(|_| kind == NotificationKind::Started) {
            tokio::time::sleep(delay).await;
        }
        if self.fail_outputs.load(Ordering::SeqCst) {
            return Err(AppError::InternalError("notifications unavailable".to_string()));
        }
        self.notifications
            .lock()
            .unwrap()
            .push((kind, title.to_string()));
        Ok(())
    }
}

impl UiSink for RecordingSinks {
    fn show(&self, message: UiMessage) {
        self.ui.lock().unwrap().push(message);
    }
}

// ================================================================================================
// STORE
// ================================================================================================

/// Durable store that tracks what was actually saved
#[derive(Default)]
pub struct MemoryStore {
    pending: Mutex<HashMap<String, JsonValue>>,
    saved: Mutex<HashMap<String, JsonValue>>,
    saves: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded as if written by an earlier run
    pub fn with_value(key: &str, value: JsonValue) -> Self {
        let store = Self::default();
        store.pending.lock().unwrap().insert(key.to_string(), value.clone());
        store.saved.lock().unwrap().insert(key.to_string(), value);
        store
    }

    pub fn saved(&self, key: &str) -> Option<JsonValue> {
        self.saved.lock().unwrap().get(key).cloned()
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn get(&self, key: &str) -> AppResult<Option<JsonValue>> {
        Ok(self.pending.lock().unwrap().get(key).cloned())
    }

    async fn set(&self, key: &str, value: JsonValue) -> AppResult<()> {
        self.pending.lock().unwrap().insert(key.to_string(), value);
        Ok(())
    }

    async fn save(&self) -> AppResult<()> {
        let pending = self.pending.lock().unwrap().clone();
        *self.saved.lock().unwrap() = pending;
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
