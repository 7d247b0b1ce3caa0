//! Direct file downloads over HTTP(S)
//!
//! Streams the response body into `<name>.part` next to its final location and
//! renames it once complete. Progress goes out as `"<pct>% <speed> <eta>"` lines,
//! the same shape the extractor prints, so the queue interprets both alike.

use super::process_engine::command::output_dir;
use super::process_engine::output::{LineThrottle, PROGRESS_THROTTLE};
use crate::modules::downloads::domain::ports::{DownloadEngine, EngineEventSender, TransferRequest};
use crate::modules::downloads::domain::services::{env_lookup, resolve_proxy};
use crate::modules::downloads::domain::value_objects::{
    DownloadOptions, JobId, JobSource, MediaMetadata,
};
use crate::shared::errors::{AppError, AppResult};
use crate::shared::utils::LogContext;
use crate::{log_debug, log_info, log_warn};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use reqwest::header::{HeaderMap, CONTENT_DISPOSITION};
use reqwest::{Client, Proxy, Response};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(3600);
const USER_AGENT: &str = concat!("dlqueue/", env!("CARGO_PKG_VERSION"));
const PARTIAL_SUFFIX: &str = ".part";
const FALLBACK_FILE_NAME: &str = "download";

/// Download engine for plain file URLs
pub struct HttpFileFetcher {
    client: Client,
    download_dir: PathBuf,
    running: DashMap<JobId, CancellationToken>,
}

impl HttpFileFetcher {
    pub fn new(download_dir: impl Into<PathBuf>) -> AppResult<Self> {
        Ok(Self {
            client: Self::build_client(None)?,
            download_dir: download_dir.into(),
            running: DashMap::new(),
        })
    }

    /// Proxies are explicit; reqwest's own environment detection stays off
    fn build_client(proxy: Option<&str>) -> AppResult<Client> {
        let mut builder = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .no_proxy();
        if let Some(url) = proxy {
            let proxy = Proxy::all(url)
                .map_err(|e| AppError::InvalidInput(format!("Invalid proxy {}: {}", url, e)))?;
            builder = builder.proxy(proxy);
        }
        builder
            .build()
            .map_err(|e| AppError::InternalError(format!("Failed to build HTTP client: {}", e)))
    }

    fn client_for(&self, options: &DownloadOptions) -> AppResult<Client> {
        let config = options.proxy.clone().unwrap_or_default();
        match resolve_proxy(&config, env_lookup) {
            Some(url) => {
                log_debug!("Fetching through proxy {}", url);
                Self::build_client(Some(&url))
            }
            None => Ok(self.client.clone()),
        }
    }

    async fn fetch(
        &self,
        request: &TransferRequest,
        events: &EngineEventSender,
        cancel: &CancellationToken,
    ) -> AppResult<String> {
        let client = self.client_for(&request.options)?;
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(cancelled(&request.url)),
            response = client.get(&request.url).send() => response?,
        };
        let response = response.error_for_status()?;

        let name = file_name_for(request, response.headers());
        let dir = output_dir(&self.download_dir, request);
        tokio::fs::create_dir_all(&dir).await?;
        let target = dir.join(&name);
        let partial = dir.join(format!("{}{}", name, PARTIAL_SUFFIX));

        log_info!("Fetching {} into {:?}", request.url, target);
        events.line(format!("Starting download of {}", name));

        if let Err(e) = stream_body(response, &partial, events, cancel).await {
            if let Err(remove) = tokio::fs::remove_file(&partial).await {
                log_debug!("Could not remove partial file {:?}: {}", partial, remove);
            }
            return Err(match e {
                AppError::Cancelled(_) => cancelled(&request.url),
                other => other,
            });
        }

        tokio::fs::rename(&partial, &target).await?;
        let path = target.to_string_lossy().to_string();
        events.artifact(path.clone());
        Ok(path)
    }
}

fn cancelled(url: &str) -> AppError {
    AppError::Cancelled(format!("transfer of {}", url))
}

/// Copy the body into `partial`; returns the number of bytes written
async fn stream_body(
    response: Response,
    partial: &Path,
    events: &EngineEventSender,
    cancel: &CancellationToken,
) -> AppResult<u64> {
    let mut meter = TransferMeter::new(response.content_length(), Instant::now());
    let mut throttle = LineThrottle::new(PROGRESS_THROTTLE);
    let mut file = tokio::fs::File::create(partial).await?;
    let mut stream = response.bytes_stream();

    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => return Err(AppError::Cancelled(String::new())),
            chunk = stream.next() => chunk,
        };
        match chunk {
            Some(Ok(bytes)) => {
                file.write_all(&bytes).await?;
                meter.add(bytes.len() as u64);
                let now = Instant::now();
                if throttle.admit(now, false) {
                    events.line(meter.line(now));
                }
            }
            Some(Err(e)) => return Err(e.into()),
            None => break,
        }
    }
    file.flush().await?;

    if let Some(total) = meter.total.filter(|t| meter.downloaded < *t) {
        return Err(AppError::EngineError(format!(
            "Connection closed after {} of {} bytes",
            meter.downloaded, total
        )));
    }
    events.line(meter.finished_line(Instant::now()));
    Ok(meter.downloaded)
}

/// Byte counter behind the progress lines
#[derive(Debug)]
struct TransferMeter {
    total: Option<u64>,
    downloaded: u64,
    started: Instant,
}

impl TransferMeter {
    fn new(total: Option<u64>, started: Instant) -> Self {
        Self {
            total: total.filter(|t| *t > 0),
            downloaded: 0,
            started,
        }
    }

    fn add(&mut self, bytes: u64) {
        self.downloaded += bytes;
    }

    fn rate(&self, now: Instant) -> f64 {
        let elapsed = now.duration_since(self.started).as_secs_f64();
        if elapsed > 0.0 {
            self.downloaded as f64 / elapsed
        } else {
            0.0
        }
    }

    fn line(&self, now: Instant) -> String {
        let rate = self.rate(now);
        match self.total {
            Some(total) => {
                // Capped below 100 so only the finished line signals completion
                let percent = (self.downloaded as f64 / total as f64 * 100.0).min(99.9);
                let eta = (rate > 0.0)
                    .then(|| total.saturating_sub(self.downloaded) as f64 / rate)
                    .map(format_eta)
                    .unwrap_or_else(|| "N/A".to_string());
                format!("{:.1}% {} {}", percent, format_rate(rate), eta)
            }
            None => format!(
                "Downloaded {} at {}",
                format_size(self.downloaded),
                format_rate(rate)
            ),
        }
    }

    fn finished_line(&self, now: Instant) -> String {
        format!("100% {} 00:00", format_rate(self.rate(now)))
    }
}

/// Binary-prefixed size, e.g. `1.50MiB`
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{}B", bytes)
    } else {
        format!("{:.2}{}", value, UNITS[unit])
    }
}

pub fn format_rate(bytes_per_second: f64) -> String {
    if !bytes_per_second.is_finite() || bytes_per_second <= 0.0 {
        return "N/A".to_string();
    }
    format!("{}/s", format_size(bytes_per_second as u64))
}

/// `MM:SS`, or `H:MM:SS` past an hour
pub fn format_eta(seconds: f64) -> String {
    let total = seconds.max(0.0).round() as u64;
    let (hours, minutes, secs) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{:02}:{:02}", minutes, secs)
    }
}

/// Keep alphanumerics and `.-_ `; everything else becomes `_`
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_' | ' ') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim().to_string();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        FALLBACK_FILE_NAME.to_string()
    } else {
        cleaned
    }
}

/// `filename=` parameter of a Content-Disposition header
pub fn disposition_file_name(value: &str) -> Option<String> {
    let start = value.find("filename=")? + "filename=".len();
    let rest = value[start..].trim_start();
    let name = match rest.strip_prefix('"') {
        Some(quoted) => quoted.split('"').next().unwrap_or_default(),
        None => rest.split(';').next().unwrap_or_default().trim(),
    };
    (!name.is_empty()).then(|| name.to_string())
}

fn url_file_name(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let segment = parsed.path_segments()?.next_back()?;
    segment.contains('.').then(|| segment.to_string())
}

/// Requested name, then the server's suggestion, then the URL's last segment
fn file_name_for(request: &TransferRequest, headers: &HeaderMap) -> String {
    let requested = request
        .file_name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string);
    let suggested = || {
        headers
            .get(CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(disposition_file_name)
    };

    requested
        .or_else(suggested)
        .or_else(|| url_file_name(&request.url))
        .map(|name| sanitize_file_name(&name))
        .unwrap_or_else(|| FALLBACK_FILE_NAME.to_string())
}

#[async_trait]
impl DownloadEngine for HttpFileFetcher {
    fn supports(&self, source: JobSource) -> bool {
        source == JobSource::DirectFile
    }

    async fn fetch_metadata(
        &self,
        url: &str,
        _options: &DownloadOptions,
    ) -> AppResult<MediaMetadata> {
        Err(AppError::InvalidInput(format!(
            "No metadata lookup for direct file {}",
            url
        )))
    }

    async fn transfer(
        &self,
        request: TransferRequest,
        events: EngineEventSender,
    ) -> AppResult<Option<String>> {
        if request.cancel.is_cancelled() {
            return Err(cancelled(&request.url));
        }
        LogContext::engine_call("fetch_file", &request.url, None);
        let started = std::time::Instant::now();

        let cancel = request.cancel.child_token();
        self.running.insert(request.job_id, cancel.clone());
        let result = self.fetch(&request, &events, &cancel).await;
        self.running.remove(&request.job_id);

        match &result {
            Ok(_) => LogContext::engine_call(
                "fetch_file",
                &request.url,
                Some(started.elapsed().as_millis() as u64),
            ),
            Err(e) => log_warn!("Direct download of {} failed: {}", request.url, e),
        }
        result.map(Some)
    }

    async fn cancel_transfer(&self, job_id: JobId) -> AppResult<()> {
        if let Some(token) = self.running.get(&job_id) {
            log_info!("Cancelling direct download for job {}", job_id);
            token.cancel();
        }
        Ok(())
    }

    async fn stat_file(&self, path: &str) -> AppResult<u64> {
        Ok(tokio::fs::metadata(path).await?.len())
    }
}
