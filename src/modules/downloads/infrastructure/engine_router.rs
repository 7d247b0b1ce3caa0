use crate::log_debug;
use crate::modules::downloads::domain::ports::{DownloadEngine, EngineEventSender, TransferRequest};
use crate::modules::downloads::domain::value_objects::{
    DownloadOptions, JobId, JobSource, MediaMetadata,
};
use crate::shared::errors::AppResult;
use async_trait::async_trait;
use std::sync::Arc;

/// Sends media pages to the extractor and direct files to the HTTP fetcher
pub struct EngineRouter {
    media: Arc<dyn DownloadEngine>,
    files: Arc<dyn DownloadEngine>,
}

impl EngineRouter {
    pub fn new(media: Arc<dyn DownloadEngine>, files: Arc<dyn DownloadEngine>) -> Self {
        Self { media, files }
    }

    fn engine_for(&self, source: JobSource) -> &dyn DownloadEngine {
        match source {
            JobSource::Extractor => self.media.as_ref(),
            JobSource::DirectFile => self.files.as_ref(),
        }
    }
}

#[async_trait]
impl DownloadEngine for EngineRouter {
    fn supports(&self, source: JobSource) -> bool {
        self.engine_for(source).supports(source)
    }

    async fn fetch_metadata(
        &self,
        url: &str,
        options: &DownloadOptions,
    ) -> AppResult<MediaMetadata> {
        self.media.fetch_metadata(url, options).await
    }

    async fn transfer(
        &self,
        request: TransferRequest,
        events: EngineEventSender,
    ) -> AppResult<Option<String>> {
        log_debug!("Routing {} ({}) transfer", request.url, request.source);
        self.engine_for(request.source).transfer(request, events).await
    }

    /// Each engine ignores ids it is not running
    async fn cancel_transfer(&self, job_id: JobId) -> AppResult<()> {
        self.media.cancel_transfer(job_id).await?;
        self.files.cancel_transfer(job_id).await
    }

    async fn stat_file(&self, path: &str) -> AppResult<u64> {
        self.media.stat_file(path).await
    }
}
