pub mod modules;
pub mod shared;

use modules::downloads::{
    DownloadQueue, EngineRouter, HttpFileFetcher, JsonFileStore, JsonlHistorySink,
    LoggingNotificationSink, LoggingUiSink, ProcessEngine, QueueDependencies, QueueSettings,
    SharedConfig,
};
use shared::config::AppConfig;
use shared::errors::AppResult;
use std::sync::Arc;

/// Production wiring: extractor process engine and HTTP fetcher behind a router,
/// JSON state file, JSONL history and log-backed notifications.
///
/// Returns the queue together with the runtime settings handle it reads from.
pub async fn build_queue(config: &AppConfig) -> AppResult<(DownloadQueue, Arc<SharedConfig>)> {
    let runtime_config = Arc::new(SharedConfig::from_config(config));
    let store = Arc::new(JsonFileStore::open(&config.state_file).await?);

    let engine = ProcessEngine::new(config.extractor_path.clone(), config.download_dir.clone());
    match engine.resolve_executable() {
        Some(path) => log_info!("Using extractor at {:?}", path),
        None => log_warn!(
            "Extractor {:?} not found; media submissions will be rejected",
            config.extractor_path
        ),
    }

    let fetcher = HttpFileFetcher::new(config.download_dir.clone())?;

    let deps = QueueDependencies {
        engine: Arc::new(EngineRouter::new(Arc::new(engine), Arc::new(fetcher))),
        history: Arc::new(JsonlHistorySink::new(config.history_file.clone())),
        notifier: Arc::new(LoggingNotificationSink),
        ui: Arc::new(LoggingUiSink),
        config: runtime_config.clone(),
        store,
    };

    let queue = DownloadQueue::new(deps, QueueSettings::from_config(config));
    Ok((queue, runtime_config))
}
