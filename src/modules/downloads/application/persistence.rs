/// Durable copy of the recoverable part of the queue
///
/// Writes are debounced: the writer task wakes on a snapshot change, waits
/// out the debounce window so bursts of progress updates coalesce, then
/// writes only if the persisted view actually changed. Progress, speed and
/// ETA are zeroed in that view, so telemetry alone never causes a write.
use crate::modules::downloads::application::queue_state::QueueSnapshot;
use crate::modules::downloads::domain::entities::Job;
use crate::modules::downloads::domain::ports::DurableStore;
use crate::shared::errors::{AppError, AppResult};
use crate::{log_debug, log_info, log_warn};
use serde_json::Value as JsonValue;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Key the queue is stored under
pub const STORE_KEY: &str = "download_queue";

/// Persistable view of `jobs` as a JSON array
pub fn encode_jobs(jobs: &[Job]) -> AppResult<JsonValue> {
    let persisted: Vec<Job> = jobs.iter().filter_map(Job::to_persisted).collect();
    Ok(serde_json::to_value(persisted)?)
}

/// Decode a stored array, skipping malformed or unrecoverable entries.
///
/// Active statuses collapse to pending and ids are de-duplicated.
pub fn decode_jobs(value: JsonValue) -> Vec<Job> {
    let JsonValue::Array(entries) = value else {
        log_warn!("Stored queue is not an array; starting empty");
        return Vec::new();
    };

    let mut seen = HashSet::new();
    let mut jobs = Vec::with_capacity(entries.len());

    for (index, entry) in entries.into_iter().enumerate() {
        let job: Job = match serde_json::from_value(entry) {
            Ok(job) => job,
            Err(e) => {
                log_warn!("Skipping malformed stored job at index {}: {}", index, e);
                continue;
            }
        };
        let Some(job) = job.to_persisted() else {
            continue;
        };
        if seen.insert(job.id) {
            jobs.push(job);
        }
    }
    jobs
}

/// Reads and writes the queue through a `DurableStore`
pub struct QueuePersistence {
    store: Arc<dyn DurableStore>,
    last_written: Mutex<Option<JsonValue>>,
}

impl QueuePersistence {
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self {
            store,
            last_written: Mutex::new(None),
        }
    }

    /// Recoverable jobs from the store; read failures yield an empty queue
    pub async fn load(&self) -> Vec<Job> {
        match self.store.get(STORE_KEY).await {
            Ok(Some(value)) => {
                let jobs = decode_jobs(value);
                log_info!("Loaded {} job(s) from the durable store", jobs.len());
                jobs
            }
            Ok(None) => Vec::new(),
            Err(e) => {
                log_warn!("Failed to read stored queue: {}", e);
                Vec::new()
            }
        }
    }

    /// Write the persistable view of `jobs` unless it equals the last write.
    ///
    /// Returns whether a write happened.
    pub async fn write_if_changed(&self, jobs: &[Job]) -> AppResult<bool> {
        let encoded = encode_jobs(jobs)?;

        let mut last = self.last_written.lock().await;
        if last.as_ref() == Some(&encoded) {
            return Ok(false);
        }

        self.store.set(STORE_KEY, encoded.clone()).await?;
        self.store
            .save()
            .await
            .map_err(|e| AppError::StorageError(format!("Failed to save queue: {}", e)))?;
        *last = Some(encoded);
        Ok(true)
    }

    /// Write right away, bypassing the debounce
    pub async fn flush(&self, jobs: &[Job]) {
        if let Err(e) = self.write_if_changed(jobs).await {
            log_warn!("Failed to flush queue: {}", e);
        }
    }
}

/// Spawn the debounced writer fed by queue snapshots
pub fn spawn_debounced_writer(
    persistence: Arc<QueuePersistence>,
    mut snapshots: watch::Receiver<QueueSnapshot>,
    debounce: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                changed = snapshots.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = sleep(debounce) => {}
            }

            let jobs = snapshots.borrow_and_update().jobs.clone();
            match persistence.write_if_changed(&jobs).await {
                Ok(true) => log_debug!("Persisted {} job(s)", jobs.len()),
                Ok(false) => {}
                Err(e) => log_warn!("Failed to persist queue: {}", e),
            }
        }
        log_debug!("Queue writer stopped");
    })
}
