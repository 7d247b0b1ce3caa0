pub mod metadata_normalizer;
pub mod progress_interpreter;
pub mod proxy_resolver;
pub mod scheduler;

pub use metadata_normalizer::{resolve_author, sanitize_title};
pub use progress_interpreter::{interpret_progress_line, PhaseEvent, ProgressTracker, ProgressUpdate};
pub use proxy_resolver::{env_lookup, proxy_strategies, resolve_proxy, ProxyRoute};
pub use scheduler::{select_dispatchable, SchedulingDecision};
