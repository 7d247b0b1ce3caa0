/// Progress interpretation for free-text engine output
///
/// `interpret_progress_line` is a pure classifier over one line of engine
/// output. `ProgressTracker` turns the classified events into displayed
/// progress: transfer percentages are compressed into [0, 90], the transfer
/// completion signal snaps to 95 and moves the job to processing, and a per-job
/// running maximum keeps the displayed value from ever going backwards.
use crate::log_debug;
use crate::modules::downloads::domain::entities::JobStatus;
use crate::modules::downloads::domain::value_objects::JobId;
use dashmap::DashMap;
use regex::Regex;
use std::sync::LazyLock;

pub const TRANSFER_CEILING: f64 = 90.0;
pub const PROCESSING_FLOOR: f64 = 95.0;
pub const COMPLETION_THRESHOLD: f64 = 99.9;
const TRANSFER_SCALE: f64 = 0.9;

static PERCENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(-?\d+(?:\.\d+)?)\s*%").expect("valid percent regex"));
static AT_SPEED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bat\s+(\S+)").expect("valid speed regex"));
static ETA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bETA\s+(\S+)").expect("valid eta regex"));

/// Post-processing step announced by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostProcessStep {
    Merging,
    ExtractingAudio,
    EmbeddingThumbnail,
    EmbeddingSubtitles,
    WritingMetadata,
    Converting,
}

impl PostProcessStep {
    pub fn message(self) -> &'static str {
        match self {
            PostProcessStep::Merging => "Merging formats...",
            PostProcessStep::ExtractingAudio => "Extracting audio...",
            PostProcessStep::EmbeddingThumbnail => "Embedding thumbnail...",
            PostProcessStep::EmbeddingSubtitles => "Embedding subtitles...",
            PostProcessStep::WritingMetadata => "Writing metadata...",
            PostProcessStep::Converting => "Converting...",
        }
    }
}

/// One parsed transfer sample
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSample {
    pub percent: f64,
    pub speed: String,
    pub eta: String,
}

/// Classification of a single engine output line
#[derive(Debug, Clone, PartialEq)]
pub enum PhaseEvent {
    Starting,
    Transferring(ProgressSample),
    PostProcessing(PostProcessStep),
    /// A percentage outside [0, 100]; the whole sample is dropped
    Rejected(String),
    Info(String),
}

const POST_PROCESS_MARKERS: &[(&str, PostProcessStep)] = &[
    ("[Merger]", PostProcessStep::Merging),
    ("[ExtractAudio]", PostProcessStep::ExtractingAudio),
    ("[EmbedThumbnail]", PostProcessStep::EmbeddingThumbnail),
    ("[EmbedSubtitle]", PostProcessStep::EmbeddingSubtitles),
    ("[Metadata]", PostProcessStep::WritingMetadata),
    ("[ffmpeg]", PostProcessStep::Converting),
    ("[VideoConvertor]", PostProcessStep::Converting),
    ("[VideoRemuxer]", PostProcessStep::Converting),
    ("[FixupM3u8]", PostProcessStep::Converting),
];

const STARTING_MARKERS: &[&str] = &[
    "[info]",
    "Destination:",
    "Downloading webpage",
    "Downloading player",
    "Downloading m3u8",
    "Downloading API JSON",
    "Extracting URL",
    "Starting download",
];

/// Classify one line of engine output
pub fn interpret_progress_line(text: &str) -> PhaseEvent {
    let line = text.trim();

    if let Some((_, step)) = POST_PROCESS_MARKERS
        .iter()
        .find(|(marker, _)| line.contains(marker))
    {
        return PhaseEvent::PostProcessing(*step);
    }

    if let Some(caps) = PERCENT_RE.captures(line) {
        let (whole, number) = match (caps.get(0), caps.get(1)) {
            (Some(whole), Some(number)) => (whole, number),
            _ => return PhaseEvent::Info(line.to_string()),
        };
        let percent = match number.as_str().parse::<f64>() {
            Ok(p) if p.is_finite() => p,
            _ => return PhaseEvent::Info(line.to_string()),
        };
        if !(0.0..=100.0).contains(&percent) {
            return PhaseEvent::Rejected(line.to_string());
        }

        let (speed, eta) = extract_speed_eta(line, whole.end());
        return PhaseEvent::Transferring(ProgressSample {
            percent,
            speed,
            eta,
        });
    }

    if STARTING_MARKERS.iter().any(|marker| line.contains(marker)) {
        return PhaseEvent::Starting;
    }

    PhaseEvent::Info(line.to_string())
}

/// Speed/ETA either from the verbose `at X ETA Y` form or positional tokens after the percentage
fn extract_speed_eta(line: &str, percent_end: usize) -> (String, String) {
    let verbose_speed = AT_SPEED_RE.captures(line).and_then(|c| c.get(1));
    let verbose_eta = ETA_RE.captures(line).and_then(|c| c.get(1));

    if verbose_speed.is_some() || verbose_eta.is_some() {
        return (
            normalize_token(verbose_speed.map(|m| m.as_str()).unwrap_or_default()),
            normalize_token(verbose_eta.map(|m| m.as_str()).unwrap_or_default()),
        );
    }

    let mut rest = line[percent_end..].split_whitespace();
    let speed = normalize_token(rest.next().unwrap_or_default());
    let eta = normalize_token(rest.next().unwrap_or_default());
    (speed, eta)
}

/// Placeholder tokens become empty strings
pub fn normalize_token(token: &str) -> String {
    let token = token.trim();
    let lowered = token.to_lowercase();
    if token.is_empty()
        || token == "~"
        || lowered == "na"
        || lowered == "n/a"
        || lowered.starts_with("unknown")
    {
        String::new()
    } else {
        token.to_string()
    }
}

/// What the queue should apply to a job after an observed event
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressUpdate {
    /// Still transferring
    Transfer {
        progress: f64,
        speed: String,
        eta: String,
    },
    /// Transfer finished or post-processing started; job moves to processing
    EnterProcessing { progress: f64, message: String },
    /// Already processing; only the message (and pinned progress) change
    Processing { progress: f64, message: String },
    /// Status message only
    Message(String),
}

/// Per-job running maximum of displayed progress
#[derive(Debug, Default)]
pub struct ProgressTracker {
    running_max: DashMap<JobId, f64>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map an event for a job in `status` to a display update
    pub fn observe(
        &self,
        job_id: JobId,
        status: JobStatus,
        event: &PhaseEvent,
    ) -> Option<ProgressUpdate> {
        if !status.is_active() {
            return None;
        }

        match event {
            PhaseEvent::Transferring(sample) if status == JobStatus::Downloading => {
                if sample.percent >= COMPLETION_THRESHOLD {
                    let progress = self.raise(job_id, PROCESSING_FLOOR);
                    Some(ProgressUpdate::EnterProcessing {
                        progress,
                        message: "Processing...".to_string(),
                    })
                } else {
                    let scaled = round2((sample.percent * TRANSFER_SCALE).min(TRANSFER_CEILING));
                    let progress = self.raise(job_id, scaled);
                    Some(ProgressUpdate::Transfer {
                        progress,
                        speed: sample.speed.clone(),
                        eta: sample.eta.clone(),
                    })
                }
            }
            // Later streams (e.g. the audio half of a merge) restart at 0%; stay pinned.
            PhaseEvent::Transferring(_) => None,
            PhaseEvent::PostProcessing(step) => {
                let progress = self.raise(job_id, PROCESSING_FLOOR);
                let message = step.message().to_string();
                if status == JobStatus::Downloading {
                    Some(ProgressUpdate::EnterProcessing { progress, message })
                } else {
                    Some(ProgressUpdate::Processing { progress, message })
                }
            }
            PhaseEvent::Starting if status == JobStatus::Downloading => {
                Some(ProgressUpdate::Message("Starting...".to_string()))
            }
            PhaseEvent::Starting => None,
            PhaseEvent::Rejected(line) => {
                log_debug!("Dropping out-of-range progress sample for {}: {}", job_id, line);
                None
            }
            PhaseEvent::Info(_) => None,
        }
    }

    /// Current running maximum, if any sample was seen
    pub fn current(&self, job_id: &JobId) -> Option<f64> {
        self.running_max.get(job_id).map(|v| *v)
    }

    pub fn forget(&self, job_id: &JobId) {
        self.running_max.remove(job_id);
    }

    /// Drop trackers for jobs no longer live; returns how many were removed
    pub fn retain_live<F>(&self, is_live: F) -> usize
    where
        F: Fn(&JobId) -> bool,
    {
        let before = self.running_max.len();
        self.running_max.retain(|id, _| is_live(id));
        before - self.running_max.len()
    }

    pub fn len(&self) -> usize {
        self.running_max.len()
    }

    pub fn is_empty(&self) -> bool {
        self.running_max.is_empty()
    }

    fn raise(&self, job_id: JobId, candidate: f64) -> f64 {
        let mut entry = self.running_max.entry(job_id).or_insert(0.0);
        if candidate > *entry {
            *entry = candidate;
        }
        *entry
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
