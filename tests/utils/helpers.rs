/// Test helper functions and queue builders
use super::fakes::{FakeEngine, MemoryStore, RecordingSinks};
use dlqueue_lib::modules::downloads::{
    DownloadQueue, DurableStore, JobId, JobStatus, QueueDependencies, QueueSettings,
    QueueSnapshot, SharedConfig,
};
use dlqueue_lib::shared::config::AppConfig;
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(30);

pub struct TestQueue {
    pub queue: DownloadQueue,
    pub engine: Arc<FakeEngine>,
    pub sinks: Arc<RecordingSinks>,
    pub store: Arc<MemoryStore>,
    pub config: Arc<SharedConfig>,
}

/// Queue over fresh fakes with default settings
pub fn build_queue(limit: usize) -> TestQueue {
    build_queue_with(limit, Arc::new(MemoryStore::new()), QueueSettings::default())
}

pub fn build_queue_with(
    limit: usize,
    store: Arc<MemoryStore>,
    settings: QueueSettings,
) -> TestQueue {
    let engine = Arc::new(FakeEngine::new());
    let sinks = Arc::new(RecordingSinks::new());
    let config = Arc::new(SharedConfig::from_config(&AppConfig {
        concurrency_limit: limit,
        ..Default::default()
    }));

    let queue = DownloadQueue::new(
        QueueDependencies {
            engine: engine.clone(),
            history: sinks.clone(),
            notifier: sinks.clone(),
            ui: sinks.clone(),
            config: config.clone(),
            store: store.clone(),
        },
        settings,
    );

    TestQueue {
        queue,
        engine,
        sinks,
        store,
        config,
    }
}

/// Queue over an arbitrary store, e.g. a file-backed one
pub fn build_queue_on(store: Arc<dyn DurableStore>) -> (DownloadQueue, Arc<FakeEngine>) {
    let engine = Arc::new(FakeEngine::new());
    let sinks = Arc::new(RecordingSinks::new());
    let queue = DownloadQueue::new(
        QueueDependencies {
            engine: engine.clone(),
            history: sinks.clone(),
            notifier: sinks.clone(),
            ui: sinks,
            config: Arc::new(SharedConfig::from_config(&AppConfig::default())),
            store,
        },
        QueueSettings::default(),
    );
    (queue, engine)
}

/// Wait until the published snapshot satisfies `predicate`
pub async fn wait_until<F>(queue: &DownloadQueue, mut predicate: F)
where
    F: FnMut(&QueueSnapshot) -> bool,
{
    let mut rx = queue.subscribe();
    tokio::time::timeout(WAIT, rx.wait_for(|s| predicate(s)))
        .await
        .expect("queue never reached the expected state")
        .expect("queue closed");
}

pub async fn wait_for_status(queue: &DownloadQueue, id: JobId, status: JobStatus) {
    wait_until(queue, |s| s.get(&id).is_some_and(|j| j.status == status)).await;
}

pub async fn wait_removed(queue: &DownloadQueue, id: JobId) {
    wait_until(queue, |s| s.get(&id).is_none()).await;
}

/// Let spawned tasks run without moving the clock far
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}
