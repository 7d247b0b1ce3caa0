use crate::log_info;
use crate::modules::downloads::domain::ports::ConfigurationSource;
use crate::shared::config::{AppConfig, ModeDefaults, MAX_CONCURRENCY_LIMIT};
use std::sync::{PoisonError, RwLock};

#[derive(Debug, Clone)]
struct Settings {
    concurrency_limit: usize,
    mode_defaults: ModeDefaults,
}

/// Runtime-adjustable settings, read at every scheduling pass
#[derive(Debug)]
pub struct SharedConfig {
    settings: RwLock<Settings>,
}

impl SharedConfig {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            settings: RwLock::new(Settings {
                concurrency_limit: config.concurrency_limit.clamp(1, MAX_CONCURRENCY_LIMIT),
                mode_defaults: config.mode_defaults.clone(),
            }),
        }
    }

    /// Set the limit, clamped to `1..=MAX_CONCURRENCY_LIMIT`; returns the applied value
    pub fn set_concurrency_limit(&self, limit: usize) -> usize {
        let applied = limit.clamp(1, MAX_CONCURRENCY_LIMIT);
        self.settings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .concurrency_limit = applied;
        log_info!("Concurrency limit set to {}", applied);
        applied
    }

    pub fn set_mode_defaults(&self, defaults: ModeDefaults) {
        self.settings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .mode_defaults = defaults;
    }
}

impl ConfigurationSource for SharedConfig {
    fn concurrency_limit(&self) -> usize {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .concurrency_limit
    }

    fn mode_defaults(&self) -> ModeDefaults {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .mode_defaults
            .clone()
    }
}
