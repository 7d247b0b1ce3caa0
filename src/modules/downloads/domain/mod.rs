pub mod entities;
pub mod ports;
pub mod services;
pub mod value_objects;

pub use entities::{HistoryRecord, Job, JobStatus, PresetMetadata};
pub use ports::{
    ConfigurationSource, DownloadEngine, DurableStore, EngineEvent, EngineEventKind,
    EngineEventSender, HistorySink, NotificationKind, NotificationSink, TransferRequest,
    UiMessage, UiSink,
};
pub use value_objects::{
    AuthOptions, DownloadMode, DownloadOptions, FileDescriptor, GroupEntry, GroupInfo,
    GroupOrder, GroupProgress, JobId, JobSource, MediaMetadata,
};
