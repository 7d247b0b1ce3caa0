use log::{debug, info};
use std::sync::Once;

static INIT: Once = Once::new();

/// Install the env_logger backend; later calls are no-ops.
///
/// `RUST_LOG` directives are applied on top of the built-in levels.
pub fn init_logger() {
    INIT.call_once(|| {
        env_logger::Builder::new()
            .filter_level(log::LevelFilter::Info)
            .filter_module("dlqueue", log::LevelFilter::Debug)
            .filter_module("dlqueue_lib", log::LevelFilter::Debug)
            // Process I/O polling is chatty at debug
            .filter_module("tokio", log::LevelFilter::Warn)
            .parse_default_env()
            .format_timestamp_secs()
            .format_target(false)
            .format_module_path(false)
            .init();

        debug!("Logger ready");
    });
}

/// Crate-wide logging macros over the `log` facade
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        log::info!($($arg)*)
    };
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        log::debug!($($arg)*)
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        log::warn!($($arg)*)
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        log::error!($($arg)*)
    };
}

/// Structured log lines for queue and engine events
pub struct LogContext;

impl LogContext {
    /// Log engine invocations
    pub fn engine_call(operation: &str, url: &str, duration_ms: Option<u64>) {
        match duration_ms {
            Some(duration) => info!("Engine: {} for {} finished in {}ms", operation, url, duration),
            None => debug!("Engine: Starting {} for {}", operation, url),
        }
    }

    /// Log a job status change
    pub fn job_transition(job_id: &str, from: &str, to: &str) {
        debug!("Job {}: {} -> {}", job_id, from, to);
    }

    /// Log a scheduling pass
    pub fn scheduling_pass(active: usize, limit: usize, dispatched: usize) {
        if dispatched > 0 {
            info!(
                "Scheduler: dispatched {} job(s) ({} active, limit {})",
                dispatched, active, limit
            );
        } else {
            debug!("Scheduler: nothing to dispatch ({} active, limit {})", active, limit);
        }
    }

    /// Log performance metrics
    pub fn performance_metric(operation: &str, duration_ms: u64, additional_info: Option<&str>) {
        match additional_info {
            Some(info) => info!(
                "Performance: {} took {}ms ({})",
                operation, duration_ms, info
            ),
            None => info!("Performance: {} took {}ms", operation, duration_ms),
        }
    }
}

/// Helper for timing operations
pub struct TimedOperation {
    start: std::time::Instant,
    operation: String,
}

impl TimedOperation {
    pub fn new(operation: &str) -> Self {
        debug!("Starting: {}", operation);
        Self {
            start: std::time::Instant::now(),
            operation: operation.to_string(),
        }
    }

    pub fn finish_with_info(self, info: &str) -> u64 {
        let duration = self.start.elapsed().as_millis() as u64;
        LogContext::performance_metric(&self.operation, duration, Some(info));
        duration
    }
}
