/// Parsing of extractor stdout/stderr
use super::command::FILEPATH_MARKER;
use crate::modules::downloads::domain::services::progress_interpreter::COMPLETION_THRESHOLD;
use crate::modules::downloads::domain::services::{interpret_progress_line, PhaseEvent};
use crate::modules::downloads::domain::value_objects::MediaMetadata;
use std::time::Duration;
use tokio::time::Instant;

pub const PROGRESS_THROTTLE: Duration = Duration::from_millis(100);

const IMAGE_EXTENSIONS: [&str; 4] = [".png", ".jpg", ".jpeg", ".webp"];

const POST_PROCESSING_MARKERS: [&str; 6] = [
    "[Merger]",
    "[ExtractAudio]",
    "[EmbedThumbnail]",
    "[Metadata]",
    "[ffmpeg]",
    "[download] Destination:",
];

const ERROR_MARKERS: [&str; 10] = [
    "ERROR:",
    "Sign in to confirm",
    "LOGIN_REQUIRED",
    "age-restricted",
    "Private video",
    "Video unavailable",
    "members-only",
    "requires payment",
    "is not a valid URL",
    "Unsupported URL",
];

pub fn is_image_path(path: &str) -> bool {
    let lower = path.to_lowercase();
    IMAGE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

/// Artifact path announced by the `--print after_move` marker
pub fn printed_artifact(line: &str) -> Option<&str> {
    line.strip_prefix(FILEPATH_MARKER)
        .map(str::trim)
        .filter(|p| !p.is_empty())
}

/// Final container path from a `[Merger] Merging formats into "..."` line
pub fn merger_artifact(line: &str) -> Option<&str> {
    if !line.contains("[Merger] Merging formats into") {
        return None;
    }
    let start = line.find('"')?;
    let end = line.rfind('"')?;
    (end > start + 1).then(|| &line[start + 1..end])
}

/// Target of a `[download] Destination: ...` line, skipping thumbnails
pub fn destination_artifact(line: &str) -> Option<&str> {
    if !line.contains("[download] Destination:") {
        return None;
    }
    line.split("Destination:")
        .nth(1)
        .map(str::trim)
        .filter(|p| !p.is_empty() && !is_image_path(p))
}

pub fn is_error_line(line: &str) -> bool {
    ERROR_MARKERS.iter().any(|m| line.contains(m))
}

/// Lines that bypass the throttle
pub fn is_important(line: &str) -> bool {
    if POST_PROCESSING_MARKERS.iter().any(|m| line.contains(m)) {
        return true;
    }
    matches!(
        interpret_progress_line(line),
        PhaseEvent::Transferring(sample) if sample.percent >= COMPLETION_THRESHOLD
    )
}

/// Friendly message for a failed run, from the collected error lines
pub fn classify_failure(errors: &[String]) -> String {
    if errors.is_empty() {
        return "Download failed".to_string();
    }
    let combined = errors.join(" ");

    if combined.contains("LOGIN_REQUIRED") || combined.contains("Sign in to confirm") {
        "LOGIN_REQUIRED: This video requires authentication. Select a browser for cookies to use a logged-in session.".to_string()
    } else if combined.contains("age-restricted") {
        "AGE_RESTRICTED: This video is age-restricted. Select a browser for cookies to use a logged-in session.".to_string()
    } else if combined.contains("Private video") {
        "PRIVATE_VIDEO: This video is private. Make sure you have access and select a browser for cookies.".to_string()
    } else if combined.contains("members-only") {
        "MEMBERS_ONLY: This video is for channel members only.".to_string()
    } else if combined.contains("requires payment") {
        "PAYMENT_REQUIRED: This video requires payment to watch.".to_string()
    } else if combined.contains("Video unavailable") {
        "VIDEO_UNAVAILABLE: This video is not available. It may have been removed or restricted in your region.".to_string()
    } else if combined.contains("is not a valid URL") || combined.contains("Unsupported URL") {
        "INVALID_URL: The URL is not valid or not supported.".to_string()
    } else {
        format!("Download failed: {}", errors[0])
    }
}

/// Rate limit for forwarded progress lines
#[derive(Debug)]
pub struct LineThrottle {
    interval: Duration,
    last: Option<Instant>,
}

impl LineThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    /// Whether a line seen at `now` should be forwarded
    pub fn admit(&mut self, now: Instant, important: bool) -> bool {
        let due = self
            .last
            .map_or(true, |last| now.duration_since(last) >= self.interval);
        if important || due {
            self.last = Some(now);
            true
        } else {
            false
        }
    }
}

/// Parse the line-per-field output of a metadata lookup
pub fn parse_metadata_output(stdout: &str) -> MediaMetadata {
    let lines: Vec<&str> = stdout.lines().map(str::trim).collect();
    let field = |idx: usize| -> Option<String> {
        lines
            .get(idx)
            .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("na"))
            .map(|s| s.to_string())
    };

    MediaMetadata {
        title: field(0).unwrap_or_default(),
        uploader: field(1),
        channel: field(2),
        creator: field(3),
        uploader_id: field(4),
        thumbnail: field(5),
        duration: field(6).and_then(|d| d.parse::<f64>().ok()),
        filesize: None,
        ext: None,
    }
}
