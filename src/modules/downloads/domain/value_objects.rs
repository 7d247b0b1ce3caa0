/// Value objects for the downloads domain
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier of a queued job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Which engine capability a job needs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobSource {
    /// Media page handled by the extraction engine
    #[default]
    Extractor,
    /// Plain file URL fetched as-is
    DirectFile,
}

impl fmt::Display for JobSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobSource::Extractor => write!(f, "extractor"),
            JobSource::DirectFile => write!(f, "direct_file"),
        }
    }
}

/// What kind of output the user asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadMode {
    #[default]
    Auto,
    Audio,
    /// Video stream without audio
    Mute,
}

impl FromStr for DownloadMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(DownloadMode::Auto),
            "audio" => Ok(DownloadMode::Audio),
            "mute" => Ok(DownloadMode::Mute),
            _ => Err(format!("Invalid download mode: {}", s)),
        }
    }
}

/// Credentials forwarded to the engine for gated content
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthOptions {
    pub cookies_from_browser: Option<String>,
    pub custom_cookies: Option<String>,
}

/// How a job reaches the network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyMode {
    /// Direct connection
    None,
    /// Proxy from the environment (`HTTPS_PROXY`, `HTTP_PROXY`, `ALL_PROXY`)
    #[default]
    System,
    /// The configured `custom_url`
    Custom,
}

impl FromStr for ProxyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "off" => Ok(ProxyMode::None),
            "system" => Ok(ProxyMode::System),
            "custom" => Ok(ProxyMode::Custom),
            _ => Err(format!("Invalid proxy mode: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub mode: ProxyMode,
    pub custom_url: Option<String>,
    /// Fall back to the system proxy, then a direct connection, when the custom one fails
    pub fallback: bool,
}

/// Options captured at submission time
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadOptions {
    pub mode: DownloadMode,
    pub video_quality: Option<String>,
    pub audio_quality: Option<String>,
    pub output_dir: Option<String>,
    pub auth: AuthOptions,
    pub embed_thumbnail: bool,
    pub embed_subtitles: bool,
    /// Bytes per second
    pub speed_limit: Option<u64>,
    /// `None` until submission fills in the configured default
    pub proxy: Option<ProxyConfig>,
}

/// Playlist/collection membership of a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupInfo {
    pub group_id: String,
    pub group_title: String,
    pub index_in_group: Option<usize>,
    pub use_group_folder: bool,
}

impl GroupInfo {
    pub fn new(group_id: impl Into<String>, group_title: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            group_title: group_title.into(),
            index_in_group: None,
            use_group_folder: false,
        }
    }

    pub fn with_group_folder(mut self, use_group_folder: bool) -> Self {
        self.use_group_folder = use_group_folder;
        self
    }

    pub fn at_index(&self, index: usize) -> Self {
        Self {
            index_in_group: Some(index),
            ..self.clone()
        }
    }
}

/// Order in which the entries of a group are enqueued
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupOrder {
    #[default]
    Forward,
    Reverse,
    Shuffle,
}

/// One entry of a playlist submission, optionally carrying display metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupEntry {
    pub url: String,
    pub title: Option<String>,
    pub author: Option<String>,
    pub thumbnail: Option<String>,
    pub duration: Option<f64>,
}

impl GroupEntry {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }
}

/// Descriptor for a direct file submission
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileDescriptor {
    pub url: String,
    pub filename: String,
    pub size: Option<u64>,
    pub mime_type: Option<String>,
    pub output_dir: Option<String>,
}

/// Completion tally of one group
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GroupProgress {
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
}

/// Display metadata reported by the engine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaMetadata {
    pub title: String,
    pub uploader: Option<String>,
    pub channel: Option<String>,
    pub creator: Option<String>,
    pub uploader_id: Option<String>,
    pub thumbnail: Option<String>,
    pub duration: Option<f64>,
    pub filesize: Option<u64>,
    pub ext: Option<String>,
}
