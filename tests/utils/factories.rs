/// Test data factories using builder pattern
///
/// Provides convenient methods to create test data with sensible defaults
use dlqueue_lib::modules::downloads::{
    DownloadOptions, GroupEntry, GroupInfo, Job, JobSource, JobStatus, MediaMetadata,
};

pub fn url(n: usize) -> String {
    format!("https://video.example.com/watch?v={}", n)
}

pub fn metadata(title: &str, uploader: &str) -> MediaMetadata {
    MediaMetadata {
        title: title.to_string(),
        uploader: Some(uploader.to_string()),
        thumbnail: Some("https://img.example.com/t.jpg".to_string()),
        duration: Some(212.0),
        ..Default::default()
    }
}

pub fn playlist(count: usize) -> Vec<GroupEntry> {
    (0..count)
        .map(|i| GroupEntry {
            url: format!("https://video.example.com/watch?v=pl{}", i),
            title: Some(format!("Track {}", i)),
            ..Default::default()
        })
        .collect()
}

pub fn group(id: &str) -> GroupInfo {
    GroupInfo::new(id, format!("Playlist {}", id))
}

pub struct JobFactory {
    job: Job,
}

impl JobFactory {
    pub fn new(url: &str) -> Self {
        Self {
            job: Job::new(url, JobSource::Extractor, DownloadOptions::default()),
        }
    }

    pub fn with_title(mut self, title: &str) -> Self {
        self.job.title = title.to_string();
        self
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.job.status = status;
        self
    }

    pub fn with_error(mut self, error: &str) -> Self {
        self.job.error = Some(error.to_string());
        self.job.status_message = format!("Failed: {}", error);
        self
    }

    pub fn with_progress(mut self, progress: f64) -> Self {
        self.job.progress = progress;
        self.job.speed = "1.0MiB/s".to_string();
        self.job.eta = "00:10".to_string();
        self
    }

    pub fn in_group(mut self, group: GroupInfo) -> Self {
        self.job.group = Some(group);
        self
    }

    pub fn build(self) -> Job {
        self.job
    }
}
