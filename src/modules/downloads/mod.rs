/// Download queue module
///
/// Keeps an ordered, prioritized, concurrency-limited queue of download jobs
/// and supervises an external engine that performs the transfers.
///
/// Architecture:
/// - Domain: Job entity, lifecycle, ports and pure services (scheduling,
///   progress interpretation, metadata normalization)
/// - Application: the queue orchestrator, persistence and metadata enrichment
/// - Infrastructure: extractor process engine, HTTP file fetcher and the router
///   between them, JSON store, sinks, runtime config
pub mod application;
pub mod domain;
pub mod infrastructure;

// Re-exports for easy access
pub use application::{DownloadQueue, JobGroupView, QueueDependencies, QueueSettings, QueueSnapshot};
pub use domain::{
    entities::{HistoryRecord, Job, JobStatus, PresetMetadata},
    ports::{
        ConfigurationSource, DownloadEngine, DurableStore, EngineEvent, EngineEventKind,
        EngineEventSender, HistorySink, NotificationKind, NotificationSink, TransferRequest,
        UiMessage, UiSink,
    },
    value_objects::{
        AuthOptions, DownloadMode, DownloadOptions, FileDescriptor, GroupEntry, GroupInfo,
        GroupOrder, GroupProgress, JobId, JobSource, MediaMetadata, ProxyConfig, ProxyMode,
    },
};
pub use infrastructure::{
    EngineRouter, HttpFileFetcher, JsonFileStore, JsonlHistorySink, LoggingNotificationSink,
    LoggingUiSink, ProcessEngine, SharedConfig,
};
