use super::command::{metadata_args, output_dir, transfer_args};
use super::output::{
    classify_failure, destination_artifact, is_error_line, is_image_path, is_important,
    merger_artifact, parse_metadata_output, printed_artifact, LineThrottle, PROGRESS_THROTTLE,
};
use crate::modules::downloads::domain::ports::{DownloadEngine, EngineEventSender, TransferRequest};
use crate::modules::downloads::domain::services::{env_lookup, proxy_strategies, resolve_proxy};
use crate::modules::downloads::domain::value_objects::{
    AuthOptions, DownloadOptions, JobId, JobSource, MediaMetadata,
};
use crate::shared::errors::{AppError, AppResult};
use crate::shared::utils::LogContext;
use crate::{log_debug, log_info, log_warn};
use async_trait::async_trait;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Download engine backed by an external extractor executable (yt-dlp)
///
/// Handles media pages only; direct files go to the HTTP fetcher.
pub struct ProcessEngine {
    executable: String,
    download_dir: PathBuf,
    /// Cancellation handles of running transfers
    running: DashMap<JobId, CancellationToken>,
}

impl ProcessEngine {
    pub fn new(executable: impl Into<String>, download_dir: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            download_dir: download_dir.into(),
            running: DashMap::new(),
        }
    }

    /// Resolve the executable as a path or through `PATH`
    pub fn resolve_executable(&self) -> Option<PathBuf> {
        let candidate = Path::new(&self.executable);
        if candidate.components().count() > 1 {
            return candidate.is_file().then(|| candidate.to_path_buf());
        }

        let paths = std::env::var_os("PATH")?;
        std::env::split_paths(&paths).find_map(|dir| {
            let full = dir.join(&self.executable);
            if full.is_file() {
                return Some(full);
            }
            let exe = full.with_extension("exe");
            (cfg!(windows) && exe.is_file()).then_some(exe)
        })
    }

    fn command(&self, args: &[String]) -> Command {
        let mut cmd = Command::new(&self.executable);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Write custom cookies to a private temp file for the duration of one run
    async fn write_cookies(&self, auth: &AuthOptions) -> AppResult<Option<PathBuf>> {
        let Some(text) = auth.custom_cookies.as_deref().filter(|c| !c.trim().is_empty()) else {
            return Ok(None);
        };
        let path = std::env::temp_dir().join(format!("dlqueue-cookies-{}.txt", Uuid::new_v4()));
        tokio::fs::write(&path, text).await?;
        log_debug!("Using custom cookies file {:?}", path);
        Ok(Some(path))
    }

    async fn remove_cookies(path: Option<PathBuf>) {
        if let Some(path) = path {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                log_debug!("Could not remove cookies file {:?}: {}", path, e);
            }
        }
    }

    async fn lookup_metadata(
        &self,
        url: &str,
        cookies: Option<&Path>,
        auth: &AuthOptions,
        proxy: Option<&str>,
    ) -> AppResult<MediaMetadata> {
        let args = metadata_args(url, auth, cookies, proxy);
        let output = self.command(&args).output().await.map_err(|e| {
            AppError::EngineUnavailable(format!("Failed to start {}: {}", self.executable, e))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let errors: Vec<String> = stderr
                .lines()
                .filter(|l| is_error_line(l))
                .map(str::to_string)
                .collect();
            return Err(AppError::EngineError(classify_failure(&errors)));
        }
        Ok(parse_metadata_output(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn supervise(
        &self,
        child: &mut Child,
        events: &EngineEventSender,
        cancel: &CancellationToken,
    ) -> AppResult<Option<String>> {
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::InternalError("extractor stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AppError::InternalError("extractor stderr not captured".to_string()))?;

        let mut stdout = BufReader::new(stdout).lines();
        let mut stderr = BufReader::new(stderr).lines();
        let mut output = RunOutput::new();
        let (mut stdout_done, mut stderr_done) = (false, false);

        while !stdout_done || !stderr_done {
            tokio::select! {
                _ = cancel.cancelled() => {
                    if let Err(e) = child.start_kill() {
                        log_warn!("Failed to kill extractor for job {}: {}", events.job_id(), e);
                    }
                    let _ = child.wait().await;
                    return Err(AppError::Cancelled(format!("transfer of {}", events.url())));
                }
                line = stdout.next_line(), if !stdout_done => match line {
                    Ok(Some(line)) => output.on_stdout(&line, events),
                    Ok(None) | Err(_) => stdout_done = true,
                },
                line = stderr.next_line(), if !stderr_done => match line {
                    Ok(Some(line)) => output.on_stderr(&line, events),
                    Ok(None) | Err(_) => stderr_done = true,
                },
            }
        }

        let status = child.wait().await?;
        if status.success() {
            return Ok(output.final_path);
        }

        // Non-zero exit with the artifact on disk is a success with warnings.
        if let Some(path) = output
            .final_path
            .as_ref()
            .filter(|p| Path::new(p.as_str()).exists())
        {
            log_warn!(
                "Extractor exited with {} but {} exists; treating as complete",
                status,
                path
            );
            return Ok(Some(path.clone()));
        }

        Err(AppError::EngineError(classify_failure(&output.errors)))
    }
}

/// Accumulated state of one extractor run
struct RunOutput {
    final_path: Option<String>,
    errors: Vec<String>,
    throttle: LineThrottle,
}

impl RunOutput {
    fn new() -> Self {
        Self {
            final_path: None,
            errors: Vec::new(),
            throttle: LineThrottle::new(PROGRESS_THROTTLE),
        }
    }

    fn on_stdout(&mut self, raw: &str, events: &EngineEventSender) {
        let line = raw.trim();
        if line.is_empty() {
            return;
        }

        if let Some(path) = printed_artifact(line) {
            if is_image_path(path) {
                log_debug!("Skipping image artifact {}", path);
            } else {
                self.final_path = Some(path.to_string());
                events.artifact(path);
            }
            return;
        }
        self.forward(line, events);
    }

    fn on_stderr(&mut self, raw: &str, events: &EngineEventSender) {
        let line = raw.trim();
        if line.is_empty() {
            return;
        }
        log_debug!("extractor: {}", line);

        if let Some(path) = merger_artifact(line) {
            self.final_path = Some(path.to_string());
            events.artifact(path);
        } else if let Some(path) = destination_artifact(line) {
            if self.final_path.is_none() {
                self.final_path = Some(path.to_string());
                events.artifact(path);
            }
        }

        if is_error_line(line) {
            self.errors.push(line.to_string());
        }
        self.forward(line, events);
    }

    fn forward(&mut self, line: &str, events: &EngineEventSender) {
        if self
            .throttle
            .admit(tokio::time::Instant::now(), is_important(line))
        {
            events.line(line);
        }
    }
}

#[async_trait]
impl DownloadEngine for ProcessEngine {
    fn supports(&self, source: JobSource) -> bool {
        source == JobSource::Extractor && self.resolve_executable().is_some()
    }

    async fn fetch_metadata(
        &self,
        url: &str,
        options: &DownloadOptions,
    ) -> AppResult<MediaMetadata> {
        LogContext::engine_call("fetch_metadata", url, None);
        let started = std::time::Instant::now();

        let proxy = options.proxy.clone().unwrap_or_default();
        let cookies = self.write_cookies(&options.auth).await?;
        let mut result = Err(AppError::EngineError(format!("No route to {}", url)));

        for route in proxy_strategies(&proxy, env_lookup) {
            result = self
                .lookup_metadata(url, cookies.as_deref(), &options.auth, route.url.as_deref())
                .await;
            match &result {
                Ok(_) | Err(AppError::EngineUnavailable(_)) => break,
                Err(e) => log_warn!("Metadata lookup via {} failed for {}: {}", route.label, url, e),
            }
        }
        Self::remove_cookies(cookies).await;

        if result.is_ok() {
            LogContext::engine_call(
                "fetch_metadata",
                url,
                Some(started.elapsed().as_millis() as u64),
            );
        }
        result
    }

    async fn transfer(
        &self,
        request: TransferRequest,
        events: EngineEventSender,
    ) -> AppResult<Option<String>> {
        if request.source != JobSource::Extractor {
            return Err(AppError::InvalidInput(format!(
                "{} is not a media page",
                request.url
            )));
        }
        if request.cancel.is_cancelled() {
            return Err(AppError::Cancelled(format!("transfer of {}", request.url)));
        }

        let dir = output_dir(&self.download_dir, &request);
        tokio::fs::create_dir_all(&dir).await?;

        let proxy = resolve_proxy(&request.options.proxy.clone().unwrap_or_default(), env_lookup);
        let cookies = self.write_cookies(&request.options.auth).await?;
        let args = transfer_args(&request, &dir, cookies.as_deref(), proxy.as_deref());

        if request.cancel.is_cancelled() {
            Self::remove_cookies(cookies).await;
            return Err(AppError::Cancelled(format!("transfer of {}", request.url)));
        }
        log_info!("Starting extractor for {} into {:?}", request.url, dir);

        let mut child = match self.command(&args).spawn() {
            Ok(child) => child,
            Err(e) => {
                Self::remove_cookies(cookies).await;
                return Err(AppError::EngineUnavailable(format!(
                    "Failed to start {}: {}",
                    self.executable, e
                )));
            }
        };

        let cancel = request.cancel.child_token();
        self.running.insert(request.job_id, cancel.clone());

        let result = self.supervise(&mut child, &events, &cancel).await;

        self.running.remove(&request.job_id);
        Self::remove_cookies(cookies).await;
        result
    }

    async fn cancel_transfer(&self, job_id: JobId) -> AppResult<()> {
        match self.running.get(&job_id) {
            Some(token) => {
                log_info!("Cancelling extractor for job {}", job_id);
                token.cancel();
            }
            None => log_debug!("No running extractor for job {}", job_id),
        }
        Ok(())
    }

    async fn stat_file(&self, path: &str) -> AppResult<u64> {
        Ok(tokio::fs::metadata(path).await?.len())
    }
}
