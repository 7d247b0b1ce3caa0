use crate::modules::downloads::domain::ports::DownloadEngine;
use crate::modules::downloads::domain::services::{resolve_author, sanitize_title};
use crate::modules::downloads::domain::value_objects::{DownloadOptions, MediaMetadata};
use crate::shared::config::AppConfig;
use crate::shared::errors::{AppError, AppResult};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Retry schedule for display-metadata lookups
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetadataRetryPolicy {
    pub max_attempts: u32,
    /// Delay before attempt `n + 1` is `n * backoff_step`
    pub backoff_step: Duration,
}

impl Default for MetadataRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_step: Duration::from_millis(1000),
        }
    }
}

impl MetadataRetryPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_attempts: config.metadata_attempts.max(1),
            backoff_step: config.metadata_backoff_step,
        }
    }

    /// Wait after the given 1-based failed attempt
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff_step * attempt
    }
}

/// Normalized metadata ready to fold into a job
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedMetadata {
    pub title: String,
    pub author: Option<String>,
    pub raw: MediaMetadata,
}

impl EnrichedMetadata {
    pub fn from_raw(url: &str, raw: MediaMetadata) -> Self {
        let title = sanitize_title(&raw.title);
        let author = resolve_author(url, &raw);
        Self { title, author, raw }
    }
}

/// Fetch and normalize metadata for `url`, retrying with linear backoff
pub async fn fetch_with_retry(
    engine: &dyn DownloadEngine,
    url: &str,
    options: &DownloadOptions,
    policy: &MetadataRetryPolicy,
) -> AppResult<EnrichedMetadata> {
    let attempts = policy.max_attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
        match engine.fetch_metadata(url, options).await {
            Ok(raw) => {
                if attempt > 1 {
                    debug!("Metadata for {} resolved on attempt {}", url, attempt);
                }
                return Ok(EnrichedMetadata::from_raw(url, raw));
            }
            Err(error) => {
                if !error.is_retryable() {
                    debug!("Metadata lookup for {} failed permanently: {}", url, error);
                    return Err(error);
                }

                if attempt < attempts {
                    let delay = policy.delay_after(attempt);
                    warn!(
                        "Metadata lookup for {} failed on attempt {} ({}), retrying in {:?}",
                        url, attempt, error, delay
                    );
                    sleep(delay).await;
                } else {
                    warn!(
                        "Metadata lookup for {} failed on final attempt {} ({}), giving up",
                        url, attempt, error
                    );
                }
                last_error = Some(error);
            }
        }
    }

    Err(last_error
        .unwrap_or_else(|| AppError::EngineError("Metadata lookup exhausted".to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::downloads::domain::ports::MockDownloadEngine;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn metadata(title: &str) -> MediaMetadata {
        MediaMetadata {
            title: title.to_string(),
            uploader: Some("Uploader".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_linear_backoff() {
        let policy = MetadataRetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_after(2), Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let mut engine = MockDownloadEngine::new();
        engine
            .expect_fetch_metadata()
            .times(3)
            .returning(move |_, _| {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(AppError::EngineError("timeout".to_string()))
                } else {
                    Ok(metadata("Talk [1080p]"))
                }
            });

        let started = tokio::time::Instant::now();
        let result = fetch_with_retry(
            &engine,
            "https://example.com/v",
            &DownloadOptions::default(),
            &MetadataRetryPolicy::default(),
        )
        .await
        .unwrap();

        assert_eq!(result.title, "Talk");
        assert_eq!(result.author.as_deref(), Some("Uploader"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 1s after the first failure, 2s after the second
        assert!(started.elapsed() >= Duration::from_millis(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let mut engine = MockDownloadEngine::new();
        engine
            .expect_fetch_metadata()
            .times(3)
            .returning(|_, _| Err(AppError::EngineError("unavailable video".to_string())));

        let result = fetch_with_retry(
            &engine,
            "https://example.com/v",
            &DownloadOptions::default(),
            &MetadataRetryPolicy::default(),
        )
        .await;

        assert!(matches!(result, Err(AppError::EngineError(_))));
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let mut engine = MockDownloadEngine::new();
        engine
            .expect_fetch_metadata()
            .times(1)
            .returning(|_, _| Err(AppError::EngineUnavailable("yt-dlp".to_string())));

        let result = fetch_with_retry(
            &engine,
            "https://example.com/v",
            &DownloadOptions::default(),
            &MetadataRetryPolicy::default(),
        )
        .await;

        assert!(matches!(result, Err(AppError::EngineUnavailable(_))));
    }

    #[test]
    fn test_missing_title_yields_empty() {
        let enriched = EnrichedMetadata::from_raw("https://example.com/v", MediaMetadata::default());
        assert!(enriched.title.is_empty());
        assert_eq!(enriched.author, None);
    }
}
