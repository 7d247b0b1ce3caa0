use crate::log_debug;
use crate::modules::downloads::domain::value_objects::{ProxyConfig, ProxyMode};
use crate::shared::errors::{AppError, AppResult};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_CONCURRENCY_LIMIT: usize = 3;
pub const MAX_CONCURRENCY_LIMIT: usize = 32;

/// Defaults applied to submissions that leave quality or proxy unset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeDefaults {
    pub video_quality: String,
    pub audio_quality: String,
    pub proxy: ProxyConfig,
}

impl Default for ModeDefaults {
    fn default() -> Self {
        Self {
            video_quality: "max".to_string(),
            audio_quality: "best".to_string(),
            proxy: ProxyConfig::default(),
        }
    }
}

/// Application configuration loaded from the environment (and `.env`)
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub concurrency_limit: usize,
    pub mode_defaults: ModeDefaults,
    pub download_dir: PathBuf,
    pub state_file: PathBuf,
    pub history_file: PathBuf,
    pub extractor_path: String,
    pub completed_removal_delay: Duration,
    pub persist_debounce: Duration,
    pub sweep_interval: Duration,
    pub metadata_attempts: u32,
    pub metadata_backoff_step: Duration,
    pub metadata_failure_notice: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: DEFAULT_CONCURRENCY_LIMIT,
            mode_defaults: ModeDefaults::default(),
            download_dir: PathBuf::from("./downloads"),
            state_file: PathBuf::from("./dlqueue-state.json"),
            history_file: PathBuf::from("./dlqueue-history.jsonl"),
            extractor_path: "yt-dlp".to_string(),
            completed_removal_delay: Duration::from_millis(3000),
            persist_debounce: Duration::from_millis(500),
            sweep_interval: Duration::from_secs(60),
            metadata_attempts: 3,
            metadata_backoff_step: Duration::from_millis(1000),
            metadata_failure_notice: false,
        }
    }
}

impl AppConfig {
    /// Load configuration, reading `.env` first when present
    pub fn load() -> AppResult<Self> {
        if let Err(e) = dotenvy::dotenv() {
            log_debug!("No .env file loaded: {}", e);
        }
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup (the environment in production)
    pub fn from_lookup<F>(lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let concurrency_limit: usize =
            parse_var(&lookup, "DLQ_CONCURRENCY_LIMIT")?.unwrap_or(defaults.concurrency_limit);
        if concurrency_limit == 0 || concurrency_limit > MAX_CONCURRENCY_LIMIT {
            return Err(AppError::ConfigError(format!(
                "DLQ_CONCURRENCY_LIMIT must be between 1 and {}, got {}",
                MAX_CONCURRENCY_LIMIT, concurrency_limit
            )));
        }

        let metadata_attempts: u32 =
            parse_var(&lookup, "DLQ_METADATA_ATTEMPTS")?.unwrap_or(defaults.metadata_attempts);
        if metadata_attempts == 0 {
            return Err(AppError::ConfigError(
                "DLQ_METADATA_ATTEMPTS must be at least 1".to_string(),
            ));
        }

        let millis = |key: &str, fallback: Duration| -> AppResult<Duration> {
            Ok(parse_var::<u64, _>(&lookup, key)?
                .map(Duration::from_millis)
                .unwrap_or(fallback))
        };

        Ok(Self {
            concurrency_limit,
            mode_defaults: ModeDefaults {
                video_quality: non_empty(&lookup, "DLQ_VIDEO_QUALITY")
                    .unwrap_or(defaults.mode_defaults.video_quality),
                audio_quality: non_empty(&lookup, "DLQ_AUDIO_QUALITY")
                    .unwrap_or(defaults.mode_defaults.audio_quality),
                proxy: ProxyConfig {
                    mode: parse_var::<ProxyMode, _>(&lookup, "DLQ_PROXY_MODE")?
                        .unwrap_or(defaults.mode_defaults.proxy.mode),
                    custom_url: non_empty(&lookup, "DLQ_PROXY_URL"),
                    fallback: parse_bool(&lookup, "DLQ_PROXY_FALLBACK")?
                        .unwrap_or(defaults.mode_defaults.proxy.fallback),
                },
            },
            download_dir: non_empty(&lookup, "DLQ_DOWNLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.download_dir),
            state_file: non_empty(&lookup, "DLQ_STATE_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.state_file),
            history_file: non_empty(&lookup, "DLQ_HISTORY_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.history_file),
            extractor_path: non_empty(&lookup, "DLQ_EXTRACTOR_PATH")
                .unwrap_or(defaults.extractor_path),
            completed_removal_delay: millis(
                "DLQ_COMPLETED_REMOVAL_MS",
                defaults.completed_removal_delay,
            )?,
            persist_debounce: millis("DLQ_PERSIST_DEBOUNCE_MS", defaults.persist_debounce)?,
            sweep_interval: parse_var::<u64, _>(&lookup, "DLQ_SWEEP_INTERVAL_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
            metadata_attempts,
            metadata_backoff_step: millis(
                "DLQ_METADATA_BACKOFF_MS",
                defaults.metadata_backoff_step,
            )?,
            metadata_failure_notice: parse_bool(&lookup, "DLQ_METADATA_FAILURE_NOTICE")?
                .unwrap_or(defaults.metadata_failure_notice),
        })
    }
}

fn non_empty<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_var<T, F>(lookup: &F, key: &str) -> AppResult<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match non_empty(lookup, key) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| AppError::ConfigError(format!("{}={:?}: {}", key, raw, e))),
        None => Ok(None),
    }
}

fn parse_bool<F>(lookup: &F, key: &str) -> AppResult<Option<bool>>
where
    F: Fn(&str) -> Option<String>,
{
    match non_empty(lookup, key).map(|v| v.to_lowercase()) {
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(AppError::ConfigError(format!(
                "{} must be a boolean, got {:?}",
                key, v
            ))),
        },
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_nothing_set() {
        let config = AppConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.concurrency_limit, DEFAULT_CONCURRENCY_LIMIT);
        assert_eq!(config.persist_debounce, Duration::from_millis(500));
        assert_eq!(config.metadata_attempts, 3);
        assert_eq!(config.mode_defaults.video_quality, "max");
        assert!(!config.metadata_failure_notice);
        assert_eq!(config.mode_defaults.proxy.mode, ProxyMode::System);
    }

    #[test]
    fn test_proxy_defaults() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("DLQ_PROXY_MODE", "custom"),
            ("DLQ_PROXY_URL", "socks5://127.0.0.1:1080"),
            ("DLQ_PROXY_FALLBACK", "true"),
        ]))
        .unwrap();
        let proxy = config.mode_defaults.proxy;
        assert_eq!(proxy.mode, ProxyMode::Custom);
        assert_eq!(proxy.custom_url.as_deref(), Some("socks5://127.0.0.1:1080"));
        assert!(proxy.fallback);

        let bad = AppConfig::from_lookup(lookup_from(&[("DLQ_PROXY_MODE", "tor")]));
        assert!(matches!(bad, Err(AppError::ConfigError(_))));
    }

    #[test]
    fn test_overrides_are_applied() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("DLQ_CONCURRENCY_LIMIT", "5"),
            ("DLQ_VIDEO_QUALITY", "1080p"),
            ("DLQ_COMPLETED_REMOVAL_MS", "10"),
            ("DLQ_METADATA_FAILURE_NOTICE", "yes"),
            ("DLQ_EXTRACTOR_PATH", "/opt/bin/yt-dlp"),
        ]))
        .unwrap();

        assert_eq!(config.concurrency_limit, 5);
        assert_eq!(config.mode_defaults.video_quality, "1080p");
        assert_eq!(config.completed_removal_delay, Duration::from_millis(10));
        assert!(config.metadata_failure_notice);
        assert_eq!(config.extractor_path, "/opt/bin/yt-dlp");
    }

    #[test]
    fn test_rejects_invalid_values() {
        let zero = AppConfig::from_lookup(lookup_from(&[("DLQ_CONCURRENCY_LIMIT", "0")]));
        assert!(matches!(zero, Err(AppError::ConfigError(_))));

        let garbage = AppConfig::from_lookup(lookup_from(&[("DLQ_PERSIST_DEBOUNCE_MS", "soon")]));
        assert!(matches!(garbage, Err(AppError::ConfigError(_))));

        let bad_bool =
            AppConfig::from_lookup(lookup_from(&[("DLQ_METADATA_FAILURE_NOTICE", "maybe")]));
        assert!(matches!(bad_bool, Err(AppError::ConfigError(_))));
    }
}
