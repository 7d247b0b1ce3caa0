pub mod config_source;
pub mod engine_router;
pub mod http_fetcher;
pub mod json_store;
pub mod log_sinks;
pub mod process_engine;

pub use config_source::SharedConfig;
pub use engine_router::EngineRouter;
pub use http_fetcher::HttpFileFetcher;
pub use json_store::JsonFileStore;
pub use log_sinks::{JsonlHistorySink, LoggingNotificationSink, LoggingUiSink};
pub use process_engine::ProcessEngine;
