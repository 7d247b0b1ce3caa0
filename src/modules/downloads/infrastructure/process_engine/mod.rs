/// Extractor process adapter
///
/// - command: argument building (format selection, output folders, auth)
/// - output: stdout/stderr parsing and failure classification
/// - engine: the `DownloadEngine` implementation supervising the child process
pub mod command;
pub mod engine;
pub mod output;

pub use command::{format_selector, sanitize_folder_name};
pub use engine::ProcessEngine;
