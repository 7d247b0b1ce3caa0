/// Download queue orchestrator
///
/// `DownloadQueue` owns the live job list and supervises one spawned task per
/// dispatched job. All mutations happen under a single state lock, and each one
/// publishes a whole-list `QueueSnapshot` on a watch channel. The engine reports
/// progress through a per-transfer channel, so updates for one job are applied
/// in the order they were emitted.
///
/// Cancellation records a tombstone and fires the job's transfer token before
/// tearing a job down. A failure that arrives for a tombstoned id is discarded,
/// and the job task clears the tombstone once the transfer has resolved.
use crate::modules::downloads::application::metadata_enrichment::{
    fetch_with_retry, MetadataRetryPolicy,
};
use crate::modules::downloads::application::persistence::{
    spawn_debounced_writer, QueuePersistence,
};
use crate::modules::downloads::application::queue_state::QueueSnapshot;
use crate::modules::downloads::domain::entities::{
    HistoryRecord, Job, JobStatus, PresetMetadata, QUEUED_MESSAGE,
};
use crate::modules::downloads::domain::ports::{
    ConfigurationSource, DownloadEngine, DurableStore, EngineEvent, EngineEventKind,
    EngineEventSender, HistorySink, NotificationKind, NotificationSink, TransferRequest, UiMessage,
    UiSink,
};
use crate::modules::downloads::domain::services::scheduler::top_priority;
use crate::modules::downloads::domain::services::{
    interpret_progress_line, select_dispatchable, ProgressTracker, ProgressUpdate,
};
use crate::modules::downloads::domain::value_objects::{
    DownloadOptions, FileDescriptor, GroupEntry, GroupInfo, GroupOrder,
    GroupProgress, JobId, JobSource,
};
use crate::shared::config::AppConfig;
use crate::shared::errors::{AppError, AppResult};
use crate::shared::utils::{LogContext, TimedOperation};
use crate::{log_debug, log_info, log_warn};
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use rand::seq::SliceRandom;
use std::collections::HashSet;
use std::sync::{Arc, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

const DEFAULT_TOMBSTONE_TTL: Duration = Duration::from_secs(300);
const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

type MetadataLookup = Shared<BoxFuture<'static, ()>>;

/// Collaborators the queue supervises or reports to
#[derive(Clone)]
pub struct QueueDependencies {
    pub engine: Arc<dyn DownloadEngine>,
    pub history: Arc<dyn HistorySink>,
    pub notifier: Arc<dyn NotificationSink>,
    pub ui: Arc<dyn UiSink>,
    pub config: Arc<dyn ConfigurationSource>,
    pub store: Arc<dyn DurableStore>,
}

/// Timing knobs for the queue's background behavior
#[derive(Debug, Clone)]
pub struct QueueSettings {
    /// How long a completed job stays visible before removal
    pub completed_removal_delay: Duration,
    pub persist_debounce: Duration,
    pub sweep_interval: Duration,
    /// Age after which the sweep drops a tombstone
    pub tombstone_ttl: Duration,
    pub metadata_retry: MetadataRetryPolicy,
    /// Show a UI message when metadata retries are exhausted
    pub metadata_failure_notice: bool,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            completed_removal_delay: Duration::from_millis(3000),
            persist_debounce: Duration::from_millis(500),
            sweep_interval: Duration::from_secs(60),
            tombstone_ttl: DEFAULT_TOMBSTONE_TTL,
            metadata_retry: MetadataRetryPolicy::default(),
            metadata_failure_notice: false,
        }
    }
}

impl QueueSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            completed_removal_delay: config.completed_removal_delay,
            persist_debounce: config.persist_debounce,
            sweep_interval: config.sweep_interval,
            tombstone_ttl: DEFAULT_TOMBSTONE_TTL,
            metadata_retry: MetadataRetryPolicy::from_config(config),
            metadata_failure_notice: config.metadata_failure_notice,
        }
    }
}

/// What one orphan sweep removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub progress_trackers: usize,
    pub metadata_lookups: usize,
    pub tombstones: usize,
}

#[derive(Debug, Default)]
struct QueueState {
    jobs: Vec<Job>,
    paused: bool,
}

impl QueueState {
    fn find(&self, id: &JobId) -> Option<&Job> {
        self.jobs.iter().find(|j| j.id == *id)
    }

    fn find_mut(&mut self, id: &JobId) -> Option<&mut Job> {
        self.jobs.iter_mut().find(|j| j.id == *id)
    }

    fn position(&self, id: &JobId) -> Option<usize> {
        self.jobs.iter().position(|j| j.id == *id)
    }

    fn active_mut(&mut self, id: &JobId) -> Option<&mut Job> {
        self.find_mut(id).filter(|j| j.status.is_active())
    }

    /// A live job for `url` that has not yet reached a terminal status
    fn has_in_flight_url(&self, url: &str) -> bool {
        self.jobs
            .iter()
            .any(|j| j.url == url && !j.status.is_finished())
    }

    fn group_members(&self, group_id: &str) -> Vec<JobId> {
        self.jobs
            .iter()
            .filter(|j| j.group_id() == Some(group_id))
            .map(|j| j.id)
            .collect()
    }

    fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot::new(self.jobs.clone(), self.paused)
    }
}

struct QueueInner {
    state: Mutex<QueueState>,
    snapshot_tx: watch::Sender<QueueSnapshot>,

    engine: Arc<dyn DownloadEngine>,
    history: Arc<dyn HistorySink>,
    notifier: Arc<dyn NotificationSink>,
    ui: Arc<dyn UiSink>,
    config: Arc<dyn ConfigurationSource>,
    persistence: Arc<QueuePersistence>,
    settings: QueueSettings,

    progress: ProgressTracker,
    metadata_lookups: DashMap<JobId, MetadataLookup>,
    tombstones: DashMap<JobId, Instant>,
    /// Cancellation tokens of dispatched jobs, from dispatch until the job task ends
    transfers: DashMap<JobId, CancellationToken>,

    shutdown: CancellationToken,
    background: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

/// Cloneable handle to the download queue
#[derive(Clone)]
pub struct DownloadQueue {
    inner: Arc<QueueInner>,
}

impl DownloadQueue {
    /// Build the queue and start its persistence writer and orphan sweep.
    ///
    /// Background tasks only start when called inside a Tokio runtime.
    pub fn new(deps: QueueDependencies, settings: QueueSettings) -> Self {
        let (snapshot_tx, _) = watch::channel(QueueSnapshot::default());
        let persistence = Arc::new(QueuePersistence::new(deps.store.clone()));

        let inner = Arc::new(QueueInner {
            state: Mutex::new(QueueState::default()),
            snapshot_tx,
            engine: deps.engine,
            history: deps.history,
            notifier: deps.notifier,
            ui: deps.ui,
            config: deps.config,
            persistence,
            settings,
            progress: ProgressTracker::new(),
            metadata_lookups: DashMap::new(),
            tombstones: DashMap::new(),
            transfers: DashMap::new(),
            shutdown: CancellationToken::new(),
            background: std::sync::Mutex::new(Vec::new()),
        });

        let queue = Self { inner };
        queue.start_background_tasks();
        queue
    }

    fn start_background_tasks(&self) {
        if tokio::runtime::Handle::try_current().is_err() {
            log_warn!("No Tokio runtime available; queue persistence and sweep are disabled");
            return;
        }

        let writer = spawn_debounced_writer(
            self.inner.persistence.clone(),
            self.inner.snapshot_tx.subscribe(),
            self.inner.settings.persist_debounce,
            self.inner.shutdown.clone(),
        );
        let sweeper = spawn_sweeper(
            Arc::downgrade(&self.inner),
            self.inner.settings.sweep_interval,
            self.inner.shutdown.clone(),
        );

        self.inner
            .background
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend([writer, sweeper]);
    }

    // ========================================================================
    // OBSERVATION
    // ========================================================================

    pub fn subscribe(&self) -> watch::Receiver<QueueSnapshot> {
        self.inner.snapshot_tx.subscribe()
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        self.inner.snapshot_tx.borrow().clone()
    }

    pub fn get(&self, id: &JobId) -> Option<Job> {
        self.snapshot().get(id).cloned()
    }

    pub fn is_paused(&self) -> bool {
        self.inner.snapshot_tx.borrow().paused
    }

    pub fn get_group_progress(&self, group_id: &str) -> GroupProgress {
        self.snapshot().group_progress(group_id)
    }

    /// Resolves once nothing is active and nothing could start
    pub async fn wait_idle(&self) {
        let mut rx = self.subscribe();
        if rx.wait_for(QueueSnapshot::is_idle).await.is_err() {
            log_debug!("Queue closed while waiting for idle");
        }
    }

    // ========================================================================
    // SUBMISSION
    // ========================================================================

    /// Submit a media URL; `None` when it is a duplicate or the extractor is missing
    pub async fn add(
        &self,
        url: &str,
        options: DownloadOptions,
        group: Option<GroupInfo>,
    ) -> Option<JobId> {
        self.add_with_metadata(url, options, group, PresetMetadata::default())
            .await
    }

    /// Submit a media URL whose display metadata is already known
    pub async fn add_with_metadata(
        &self,
        url: &str,
        options: DownloadOptions,
        group: Option<GroupInfo>,
        preset: PresetMetadata,
    ) -> Option<JobId> {
        let url = url.trim();
        if url.is_empty() {
            self.inner
                .ui
                .show(UiMessage::Error("Nothing to download: empty URL".to_string()));
            return None;
        }
        if !self.ensure_supported(JobSource::Extractor) {
            return None;
        }

        let job = Job::new(url, JobSource::Extractor, self.with_mode_defaults(options))
            .with_group(group)
            .with_preset(&preset);
        let inserted = self.insert_jobs(vec![job]).await;
        let job = inserted.into_iter().next()?;

        if !preset.has_title() {
            self.start_metadata_lookup(job.id, job.url.clone(), job.options.clone());
        }
        self.inner
            .ui
            .show(UiMessage::Info(format!("Added to queue: {}", job.title)));
        self.schedule().await;
        Some(job.id)
    }

    /// Submit a direct file; the file name is the title and no lookup runs
    pub async fn add_file(&self, descriptor: FileDescriptor) -> Option<JobId> {
        let url = descriptor.url.trim();
        if url.is_empty() {
            self.inner
                .ui
                .show(UiMessage::Error("Nothing to download: empty URL".to_string()));
            return None;
        }
        if !self.ensure_supported(JobSource::DirectFile) {
            return None;
        }

        let extension = std::path::Path::new(&descriptor.filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase);
        let preset = PresetMetadata {
            title: Some(descriptor.filename.clone()),
            filesize: descriptor.size,
            extension,
            ..Default::default()
        };
        let options = DownloadOptions {
            output_dir: descriptor.output_dir.clone(),
            proxy: Some(self.inner.config.mode_defaults().proxy),
            ..Default::default()
        };

        let job = Job::new(url, JobSource::DirectFile, options).with_preset(&preset);
        let job = self.insert_jobs(vec![job]).await.into_iter().next()?;

        self.inner
            .ui
            .show(UiMessage::Info(format!("Added file: {}", job.title)));
        self.schedule().await;
        Some(job.id)
    }

    /// Submit a playlist; returns the ids that entered the queue, in dispatch order
    pub async fn add_group(
        &self,
        mut entries: Vec<GroupEntry>,
        group: GroupInfo,
        shared_options: DownloadOptions,
        order: GroupOrder,
    ) -> Vec<JobId> {
        entries.retain(|e| !e.url.trim().is_empty());
        if entries.is_empty() {
            return Vec::new();
        }
        if !self.ensure_supported(JobSource::Extractor) {
            return Vec::new();
        }

        match order {
            GroupOrder::Forward => {}
            GroupOrder::Reverse => entries.reverse(),
            GroupOrder::Shuffle => entries.shuffle(&mut rand::thread_rng()),
        }

        let options = self.with_mode_defaults(shared_options);
        let base = chrono::Utc::now();
        let mut needs_lookup = HashSet::new();

        let jobs: Vec<Job> = entries
            .into_iter()
            .enumerate()
            .map(|(index, entry)| {
                let preset = PresetMetadata {
                    title: entry.title,
                    author: entry.author,
                    thumbnail: entry.thumbnail,
                    duration: entry.duration,
                    ..Default::default()
                };
                let mut job = Job::new(entry.url.trim(), JobSource::Extractor, options.clone())
                    .with_group(Some(group.at_index(index)))
                    .with_preset(&preset);
                // Strictly increasing arrival keeps the group FIFO under equal priority
                job.added_at = base + chrono::Duration::microseconds(index as i64);
                if !preset.has_title() {
                    needs_lookup.insert(job.id);
                }
                job
            })
            .collect();

        let inserted = self.insert_jobs(jobs).await;
        for job in inserted.iter().filter(|j| needs_lookup.contains(&j.id)) {
            self.start_metadata_lookup(job.id, job.url.clone(), job.options.clone());
        }

        if !inserted.is_empty() {
            self.inner.ui.show(UiMessage::Info(format!(
                "Added {} item(s) from {}",
                inserted.len(),
                group.group_title
            )));
            self.schedule().await;
        }
        inserted.into_iter().map(|j| j.id).collect()
    }

    // ========================================================================
    // PER-JOB CONTROL
    // ========================================================================

    /// Remove a job from the live set, stopping its transfer if one is running.
    ///
    /// Unknown ids are ignored.
    pub async fn cancel(&self, id: JobId) -> AppResult<()> {
        self.cancel_jobs(&[id]).await;
        Ok(())
    }

    /// Tombstone and remove `ids` under one lock, then stop their transfers
    async fn cancel_jobs(&self, ids: &[JobId]) {
        let removed: Vec<Job> = {
            let mut state = self.inner.state.lock().await;
            let mut removed = Vec::with_capacity(ids.len());
            for id in ids {
                let Some(index) = state.position(id) else {
                    continue;
                };
                self.inner.tombstones.insert(*id, Instant::now());
                if let Some((_, token)) = self.inner.transfers.remove(id) {
                    token.cancel();
                }
                removed.push(state.jobs.remove(index));
            }
            if !removed.is_empty() {
                self.publish(&state);
            }
            removed
        };

        let mut freed_slot = false;
        for job in &removed {
            self.purge_trackers(&job.id);
            log_info!("Cancelled job {} ({})", job.id, job.url);

            if job.status.is_active() {
                LogContext::engine_call("cancel", &job.url, None);
                if let Err(e) = self.inner.engine.cancel_transfer(job.id).await {
                    log_warn!("Engine failed to cancel {}: {}", job.url, e);
                }
                freed_slot = true;
            } else {
                self.inner.tombstones.remove(&job.id);
            }
        }

        if freed_slot {
            self.schedule().await;
        }
    }

    /// Failed -> pending with cleared error and progress
    pub async fn retry(&self, id: JobId) -> AppResult<()> {
        let title = {
            let mut state = self.inner.state.lock().await;
            let job = state
                .find_mut(&id)
                .ok_or_else(|| AppError::NotFound(format!("job {}", id)))?;
            job.reset_for_retry()?;
            let title = job.title.clone();
            self.publish(&state);
            title
        };

        self.inner.progress.forget(&id);
        LogContext::job_transition(&id.to_string(), "failed", "pending");
        self.inner
            .ui
            .show(UiMessage::Info(format!("Retrying: {}", title)));
        self.schedule().await;
        Ok(())
    }

    /// Hold a pending job back from dispatch
    pub async fn pause_item(&self, id: JobId) -> AppResult<()> {
        let mut state = self.inner.state.lock().await;
        if let Some(job) = state.find_mut(&id) {
            if job.status == JobStatus::Pending {
                job.transition(JobStatus::Paused)?;
                job.status_message = "Paused".to_string();
                self.publish(&state);
            }
        }
        Ok(())
    }

    pub async fn resume_item(&self, id: JobId) -> AppResult<()> {
        let resumed = {
            let mut state = self.inner.state.lock().await;
            match state.find_mut(&id) {
                Some(job) if job.status == JobStatus::Paused => {
                    job.transition(JobStatus::Pending)?;
                    job.status_message = QUEUED_MESSAGE.to_string();
                    self.publish(&state);
                    true
                }
                _ => false,
            }
        };
        if resumed {
            self.schedule().await;
        }
        Ok(())
    }

    pub async fn move_up(&self, id: JobId) -> AppResult<()> {
        self.reprioritize(id, |_, current| current.saturating_add(1))
            .await
    }

    pub async fn move_down(&self, id: JobId) -> AppResult<()> {
        self.reprioritize(id, |_, current| current.saturating_sub(1))
            .await
    }

    /// Priority one above the current maximum across all jobs
    pub async fn move_to_top(&self, id: JobId) -> AppResult<()> {
        self.reprioritize(id, |jobs, _| top_priority(jobs)).await
    }

    async fn reprioritize<F>(&self, id: JobId, next: F) -> AppResult<()>
    where
        F: FnOnce(&[Job], i64) -> i64,
    {
        let mut state = self.inner.state.lock().await;
        let Some(index) = state.position(&id) else {
            return Ok(());
        };
        let priority = next(&state.jobs, state.jobs[index].priority);
        state.jobs[index].priority = priority;
        log_debug!("Job {} priority set to {}", id, priority);
        self.publish(&state);
        Ok(())
    }

    // ========================================================================
    // QUEUE-WIDE CONTROL
    // ========================================================================

    /// Stop dispatching; running jobs continue
    pub async fn pause(&self) {
        self.set_paused(true).await;
    }

    pub async fn resume(&self) {
        self.set_paused(false).await;
        self.schedule().await;
    }

    /// Flip the global pause flag; returns the new value
    pub async fn toggle_pause(&self) -> bool {
        let paused = !self.inner.state.lock().await.paused;
        if paused {
            self.pause().await;
        } else {
            self.resume().await;
        }
        paused
    }

    async fn set_paused(&self, paused: bool) {
        let mut state = self.inner.state.lock().await;
        if state.paused != paused {
            state.paused = paused;
            self.publish(&state);
            let text = if paused { "Queue paused" } else { "Queue resumed" };
            log_info!("{}", text);
            self.inner.ui.show(UiMessage::Info(text.to_string()));
        }
    }

    /// Remove completed and failed jobs; returns how many were removed
    pub async fn clear_finished(&self) -> usize {
        let removed: Vec<JobId> = {
            let mut state = self.inner.state.lock().await;
            let (finished, kept): (Vec<Job>, Vec<Job>) = std::mem::take(&mut state.jobs)
                .into_iter()
                .partition(|j| j.status.is_finished());
            state.jobs = kept;
            if !finished.is_empty() {
                self.publish(&state);
            }
            finished.into_iter().map(|j| j.id).collect()
        };

        for id in &removed {
            self.purge_trackers(id);
        }
        removed.len()
    }

    /// Cancel every job
    pub async fn clear_all(&self) -> AppResult<()> {
        let ids: Vec<JobId> = self.inner.state.lock().await.jobs.iter().map(|j| j.id).collect();
        self.cancel_jobs(&ids).await;
        Ok(())
    }

    pub async fn cancel_group(&self, group_id: &str) -> AppResult<()> {
        let members = self.inner.state.lock().await.group_members(group_id);
        self.cancel_jobs(&members).await;
        Ok(())
    }

    pub async fn pause_group(&self, group_id: &str) -> AppResult<()> {
        let members = self.inner.state.lock().await.group_members(group_id);
        for id in members {
            self.pause_item(id).await?;
        }
        Ok(())
    }

    pub async fn resume_group(&self, group_id: &str) -> AppResult<()> {
        let members = self.inner.state.lock().await.group_members(group_id);
        for id in members {
            self.resume_item(id).await?;
        }
        Ok(())
    }

    /// Run a scheduling pass, e.g. after raising the concurrency limit
    pub async fn reschedule(&self) {
        self.schedule().await;
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Merge persisted jobs into the live set; returns how many were restored
    pub async fn restore(&self) -> usize {
        let stored = self.inner.persistence.load().await;

        let (restored, jobs) = {
            let mut state = self.inner.state.lock().await;
            let mut restored = Vec::new();
            for job in stored {
                if state.find(&job.id).is_some() || state.has_in_flight_url(&job.url) {
                    log_debug!("Skipping stored job {} already in the queue", job.id);
                    continue;
                }
                restored.push(job.clone());
                state.jobs.push(job);
            }
            self.publish(&state);
            (restored, state.jobs.clone())
        };

        self.inner.persistence.flush(&jobs).await;

        for job in restored
            .iter()
            .filter(|j| j.source == JobSource::Extractor && j.title == j.url)
        {
            self.start_metadata_lookup(job.id, job.url.clone(), job.options.clone());
        }

        if !restored.is_empty() {
            log_info!("Restored {} job(s)", restored.len());
        }
        self.schedule().await;
        restored.len()
    }

    /// Write the persistable queue right away
    pub async fn flush(&self) {
        let jobs = self.snapshot().jobs;
        self.inner.persistence.flush(&jobs).await;
    }

    /// Stop dispatching and background tasks, then flush persistence
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();

        for handle in self.take_background_tasks() {
            if let Err(e) = handle.await {
                log_warn!("Background task ended abnormally: {}", e);
            }
        }

        self.flush().await;
        log_info!("Download queue shut down");
    }

    fn take_background_tasks(&self) -> Vec<JoinHandle<()>> {
        let mut handles = self
            .inner
            .background
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *handles)
    }

    /// Drop ephemeral per-job state whose job is gone
    pub async fn sweep_orphans(&self) -> SweepReport {
        let live: HashSet<JobId> = {
            let state = self.inner.state.lock().await;
            state.jobs.iter().map(|j| j.id).collect()
        };

        let progress_trackers = self.inner.progress.retain_live(|id| live.contains(id));

        let before = self.inner.metadata_lookups.len();
        self.inner.metadata_lookups.retain(|id, _| live.contains(id));
        let metadata_lookups = before - self.inner.metadata_lookups.len();

        let ttl = self.inner.settings.tombstone_ttl;
        let before = self.inner.tombstones.len();
        self.inner
            .tombstones
            .retain(|id, marked| !live.contains(id) && marked.elapsed() < ttl);
        let tombstones = before - self.inner.tombstones.len();

        let report = SweepReport {
            progress_trackers,
            metadata_lookups,
            tombstones,
        };
        if report != SweepReport::default() {
            log_debug!("Orphan sweep removed {:?}", report);
        }
        report
    }

    /// True while a cancelled job's transfer has not yet resolved
    pub fn is_tombstoned(&self, id: &JobId) -> bool {
        self.inner.tombstones.contains_key(id)
    }

    // ========================================================================
    // ENGINE EVENTS
    // ========================================================================

    /// Apply one engine event to its job; ignored once the job is no longer active
    pub async fn apply_engine_event(&self, event: EngineEvent) {
        match event.kind {
            EngineEventKind::Line(text) => self.apply_progress_line(event.job_id, &text).await,
            EngineEventKind::ArtifactPath(path) => {
                let active = {
                    let mut state = self.inner.state.lock().await;
                    state.active_mut(&event.job_id).is_some()
                };
                if active {
                    self.merge_artifact(event.job_id, &path).await;
                }
            }
        }
    }

    async fn apply_progress_line(&self, id: JobId, text: &str) {
        let event = interpret_progress_line(text);

        let mut state = self.inner.state.lock().await;
        let Some(job) = state.active_mut(&id) else {
            return;
        };
        let Some(update) = self.inner.progress.observe(job.id, job.status, &event) else {
            return;
        };

        match update {
            ProgressUpdate::Transfer {
                progress,
                speed,
                eta,
            } => {
                job.progress = job.progress.max(progress);
                job.speed = speed;
                job.eta = eta;
                job.status_message = "Downloading...".to_string();
            }
            ProgressUpdate::EnterProcessing { progress, message } => {
                if let Err(e) = job.transition(JobStatus::Processing) {
                    log_warn!("Ignoring processing signal: {}", e);
                    return;
                }
                LogContext::job_transition(&job.id.to_string(), "downloading", "processing");
                job.progress = job.progress.max(progress);
                job.speed.clear();
                job.eta.clear();
                job.status_message = message;
            }
            ProgressUpdate::Processing { progress, message } => {
                job.progress = job.progress.max(progress);
                job.status_message = message;
            }
            ProgressUpdate::Message(message) => job.status_message = message,
        }
        self.publish(&state);
    }

    /// Record the artifact path, sized by a best-effort stat
    async fn merge_artifact(&self, id: JobId, path: &str) {
        let size = match self.inner.engine.stat_file(path).await {
            Ok(size) => Some(size),
            Err(e) => {
                log_debug!("Could not stat {}: {}", path, e);
                None
            }
        };

        let mut state = self.inner.state.lock().await;
        if let Some(job) = state.find_mut(&id) {
            job.apply_artifact(path, size);
            self.publish(&state);
        }
    }

    // ========================================================================
    // SCHEDULING AND JOB TASKS
    // ========================================================================

    async fn schedule(&self) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        let limit = self.inner.config.concurrency_limit();

        let started: Vec<JobId> = {
            let mut state = self.inner.state.lock().await;
            if state.paused {
                return;
            }

            let decision = select_dispatchable(&state.jobs, limit);
            LogContext::scheduling_pass(decision.active, decision.limit, decision.dispatch.len());

            let mut started = Vec::with_capacity(decision.dispatch.len());
            for id in decision.dispatch {
                let Some(job) = state.find_mut(&id) else {
                    continue;
                };
                match job.transition(JobStatus::Downloading) {
                    Ok(()) => {
                        job.status_message = "Starting...".to_string();
                        started.push(id);
                    }
                    Err(e) => log_warn!("Could not dispatch job {}: {}", id, e),
                }
            }
            if !started.is_empty() {
                self.publish(&state);
            }
            started
        };

        for id in started {
            LogContext::job_transition(&id.to_string(), "pending", "downloading");
            tokio::spawn(self.clone().run_job(id));
        }
    }

    // Boxed: `schedule` spawns this future and this future awaits `schedule`.
    fn run_job(self, id: JobId) -> BoxFuture<'static, ()> {
        async move {
            if let Some((request, title)) = self.transfer_request(id).await {
                self.execute_transfer(id, request, title).await;
            }
            self.inner.transfers.remove(&id);
            self.inner.tombstones.remove(&id);
            self.schedule().await;
        }
        .boxed()
    }

    async fn transfer_request(&self, id: JobId) -> Option<(TransferRequest, String)> {
        let state = self.inner.state.lock().await;
        let job = state.find(&id)?;
        if job.status != JobStatus::Downloading {
            return None;
        }

        let group_folder = job
            .group
            .as_ref()
            .filter(|g| g.use_group_folder)
            .map(|g| g.group_title.clone());
        let file_name = (job.source == JobSource::DirectFile).then(|| job.title.clone());

        let cancel = CancellationToken::new();
        self.inner.transfers.insert(id, cancel.clone());

        let request = TransferRequest {
            job_id: id,
            url: job.url.clone(),
            source: job.source,
            options: job.options.clone(),
            group_folder,
            file_name,
            cancel,
        };
        Some((request, job.title.clone()))
    }

    /// Whether the job is still waiting on the transfer it was dispatched for
    async fn still_dispatched(&self, id: JobId, cancel: &CancellationToken) -> bool {
        let state = self.inner.state.lock().await;
        !cancel.is_cancelled()
            && !self.inner.tombstones.contains_key(&id)
            && state
                .find(&id)
                .is_some_and(|j| j.status == JobStatus::Downloading)
    }

    async fn execute_transfer(&self, id: JobId, request: TransferRequest, title: String) {
        let url = request.url.clone();
        self.notify(NotificationKind::Started, &title, "Download started")
            .await;

        // Cancelled while the start notification was pending
        if !self.still_dispatched(id, &request.cancel).await {
            log_debug!("Job {} left the queue before its transfer started", id);
            return;
        }

        let timer = TimedOperation::new(&format!("transfer {}", url));
        let (events, mut rx) = EngineEventSender::channel(id, url.clone());
        let engine = self.inner.engine.clone();
        let mut transfer = engine.transfer(request, events);

        let result = loop {
            tokio::select! {
                Some(event) = rx.recv() => self.apply_engine_event(event).await,
                result = &mut transfer => break result,
            }
        };
        while let Ok(event) = rx.try_recv() {
            self.apply_engine_event(event).await;
        }

        match result {
            Ok(path) => {
                timer.finish_with_info("succeeded");
                self.finish_success(id, path).await;
            }
            Err(error) => {
                timer.finish_with_info("failed");
                self.finish_failure(id, error).await;
            }
        }
    }

    async fn finish_success(&self, id: JobId, returned_path: Option<String>) {
        if let Some(path) = returned_path {
            let known = self.get(&id).is_some_and(|j| {
                j.file_path.as_deref() == Some(path.as_str()) && j.filesize.is_some()
            });
            if !known {
                self.merge_artifact(id, &path).await;
            }
        }

        // Archive with the freshest metadata; a failed lookup resolves too.
        let lookup = self
            .inner
            .metadata_lookups
            .get(&id)
            .map(|entry| entry.value().clone());
        if let Some(lookup) = lookup {
            lookup.await;
        }

        let record = {
            let mut state = self.inner.state.lock().await;
            let Some(job) = state.find_mut(&id) else {
                log_debug!("Job {} finished after leaving the queue", id);
                return;
            };
            let from = job.status;
            if let Err(e) = job.complete() {
                log_warn!("Could not complete job {}: {}", id, e);
                return;
            }
            LogContext::job_transition(&id.to_string(), &from.to_string(), "completed");
            let record = HistoryRecord::from(&*job);
            self.publish(&state);
            record
        };

        self.inner.metadata_lookups.remove(&id);
        if let Err(e) = self.inner.history.archive(record.clone()).await {
            log_warn!("Failed to archive {}: {}", record.url, e);
        }
        self.notify(NotificationKind::Completed, &record.title, "Download completed")
            .await;
        self.inner
            .ui
            .show(UiMessage::Success(format!("Downloaded: {}", record.title)));
        self.schedule_completed_removal(id);
    }

    async fn finish_failure(&self, id: JobId, error: AppError) {
        if self.inner.tombstones.contains_key(&id) {
            log_debug!("Discarding failure of cancelled job {}: {}", id, error);
            return;
        }

        let message = error.user_message();
        let title = {
            let mut state = self.inner.state.lock().await;
            let Some(job) = state.find_mut(&id) else {
                return;
            };
            if !job.status.is_active() {
                return;
            }
            let from = job.status;
            if let Err(e) = job.fail(message.clone()) {
                log_warn!("Could not fail job {}: {}", id, e);
                return;
            }
            LogContext::job_transition(&id.to_string(), &from.to_string(), "failed");
            let title = job.title.clone();
            self.publish(&state);
            title
        };

        log_warn!("Download failed for {}: {}", title, message);
        self.notify(NotificationKind::Failed, &title, &message).await;
        self.inner
            .ui
            .show(UiMessage::Error(format!("Download failed: {}", message)));
    }

    fn schedule_completed_removal(&self, id: JobId) {
        let weak = Arc::downgrade(&self.inner);
        let delay = self.inner.settings.completed_removal_delay;
        tokio::spawn(async move {
            sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                DownloadQueue { inner }.remove_completed(id).await;
            }
        });
    }

    async fn remove_completed(&self, id: JobId) {
        {
            let mut state = self.inner.state.lock().await;
            let Some(index) = state.position(&id) else {
                return;
            };
            if state.jobs[index].status != JobStatus::Completed {
                return;
            }
            state.jobs.remove(index);
            self.publish(&state);
        }
        self.purge_trackers(&id);
    }

    // ========================================================================
    // METADATA
    // ========================================================================

    fn start_metadata_lookup(&self, id: JobId, url: String, options: DownloadOptions) {
        let queue = self.clone();
        let lookup: MetadataLookup = async move { queue.enrich(id, url, options).await }
            .boxed()
            .shared();
        self.inner.metadata_lookups.insert(id, lookup.clone());
        tokio::spawn(lookup);
    }

    async fn enrich(&self, id: JobId, url: String, options: DownloadOptions) {
        let result = fetch_with_retry(
            self.inner.engine.as_ref(),
            &url,
            &options,
            &self.inner.settings.metadata_retry,
        )
        .await;

        match result {
            Ok(meta) => {
                let mut state = self.inner.state.lock().await;
                if let Some(job) = state.find_mut(&id) {
                    job.apply_metadata(meta.title, meta.author, &meta.raw);
                    self.publish(&state);
                }
            }
            Err(e) => {
                log_debug!("Keeping URL as title for {}: {}", url, e);
                if self.inner.settings.metadata_failure_notice {
                    self.inner
                        .ui
                        .show(UiMessage::Info(format!("Could not load details for {}", url)));
                }
            }
        }
        self.inner.metadata_lookups.remove(&id);
    }

    // ========================================================================
    // HELPERS
    // ========================================================================

    /// Append jobs whose URL is not already in flight; returns the inserted jobs
    async fn insert_jobs(&self, jobs: Vec<Job>) -> Vec<Job> {
        let mut state = self.inner.state.lock().await;
        let mut inserted = Vec::with_capacity(jobs.len());

        for job in jobs {
            if state.has_in_flight_url(&job.url) {
                log_debug!("Skipping duplicate submission {}", job.url);
                self.inner
                    .ui
                    .show(UiMessage::Info(format!("Already in queue: {}", job.url)));
                continue;
            }
            inserted.push(job.clone());
            state.jobs.push(job);
        }

        if !inserted.is_empty() {
            self.publish(&state);
        }
        inserted
    }

    fn ensure_supported(&self, source: JobSource) -> bool {
        if self.inner.engine.supports(source) {
            return true;
        }
        let message = match source {
            JobSource::Extractor => "Media extractor is not installed",
            JobSource::DirectFile => "Direct file downloads are not available",
        };
        log_warn!("{}", message);
        self.inner.ui.show(UiMessage::Error(message.to_string()));
        false
    }

    fn with_mode_defaults(&self, mut options: DownloadOptions) -> DownloadOptions {
        let defaults = self.inner.config.mode_defaults();
        if options.video_quality.as_deref().map_or(true, str::is_empty) {
            options.video_quality = Some(defaults.video_quality);
        }
        if options.audio_quality.as_deref().map_or(true, str::is_empty) {
            options.audio_quality = Some(defaults.audio_quality);
        }
        if options.proxy.is_none() {
            options.proxy = Some(defaults.proxy);
        }
        options
    }

    async fn notify(&self, kind: NotificationKind, title: &str, body: &str) {
        if let Err(e) = self.inner.notifier.notify(kind, title, body).await {
            log_debug!("Notification ({}) failed: {}", kind, e);
        }
    }

    fn purge_trackers(&self, id: &JobId) {
        self.inner.progress.forget(id);
        self.inner.metadata_lookups.remove(id);
    }

    fn publish(&self, state: &QueueState) {
        self.inner.snapshot_tx.send_replace(state.snapshot());
    }
}

fn spawn_sweeper(
    inner: Weak<QueueInner>,
    period: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period.max(MIN_SWEEP_INTERVAL));
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let Some(inner) = inner.upgrade() else {
                break;
            };
            DownloadQueue { inner }.sweep_orphans().await;
        }
    })
}
