/// Argument building for the extractor executable
use crate::modules::downloads::domain::ports::TransferRequest;
use crate::modules::downloads::domain::value_objects::{AuthOptions, DownloadMode, DownloadOptions};
use std::path::{Path, PathBuf};

pub const FILEPATH_MARKER: &str = ">>>FILEPATH:";
pub const PROGRESS_TEMPLATE: &str =
    "%(progress._percent_str)s %(progress._speed_str)s %(progress._eta_str)s";

const MAX_FOLDER_CHARS: usize = 100;
const FORBIDDEN_FOLDER_CHARS: &str = "<>:\"/\\|?*";
const DEFAULT_SUBTITLE_LANGS: &str = "en.*";

/// Fields printed by a metadata lookup, one per output line
pub const METADATA_FIELDS: [&str; 7] = [
    "%(title)s",
    "%(uploader)s",
    "%(channel)s",
    "%(creator)s",
    "%(uploader_id)s",
    "%(thumbnail)s",
    "%(duration)s",
];

/// Folder-safe form of a group title; empty when nothing usable remains
pub fn sanitize_folder_name(title: &str) -> String {
    let replaced: String = title
        .chars()
        .map(|c| if FORBIDDEN_FOLDER_CHARS.contains(c) { '_' } else { c })
        .collect();
    replaced
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(MAX_FOLDER_CHARS)
        .collect::<String>()
        .trim_end()
        .to_string()
}

/// Directory a transfer writes into
pub fn output_dir(base: &Path, request: &TransferRequest) -> PathBuf {
    let mut dir = request
        .options
        .output_dir
        .as_deref()
        .filter(|d| !d.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| base.to_path_buf());

    if let Some(folder) = request
        .group_folder
        .as_deref()
        .map(sanitize_folder_name)
        .filter(|f| !f.is_empty())
    {
        dir = dir.join(folder);
    }
    dir
}

fn is_raw_format(quality: &str) -> bool {
    quality.starts_with(|c: char| c.is_ascii_digit())
        || quality.contains('+')
        || quality.starts_with("best")
}

fn height_for(quality: &str) -> Option<u32> {
    match quality.to_lowercase().as_str() {
        "4k" | "2160p" => Some(2160),
        "1440p" => Some(1440),
        "1080p" => Some(1080),
        "720p" => Some(720),
        "480p" => Some(480),
        "360p" => Some(360),
        "240p" => Some(240),
        _ => None,
    }
}

/// `-f` selector for the requested mode and quality
pub fn format_selector(options: &DownloadOptions) -> String {
    let video = options.video_quality.as_deref().unwrap_or("max");
    let audio = options.audio_quality.as_deref().unwrap_or("best");

    match options.mode {
        DownloadMode::Audio => match audio.parse::<u32>() {
            Ok(abr) => format!("bestaudio[abr<={}]/bestaudio/best", abr),
            Err(_) => "bestaudio/best".to_string(),
        },
        _ if is_raw_format(video) => video.to_string(),
        DownloadMode::Mute => match height_for(video) {
            Some(h) => format!("bestvideo[height<={}]/bestvideo/best", h),
            None => "bestvideo/best".to_string(),
        },
        DownloadMode::Auto => match height_for(video) {
            Some(h) => format!("bestvideo[height<={h}]+bestaudio/best[height<={h}]/best"),
            None => "bestvideo+bestaudio/best".to_string(),
        },
    }
}

fn push_auth(args: &mut Vec<String>, auth: &AuthOptions, cookies_file: Option<&Path>) {
    if let Some(file) = cookies_file {
        args.push("--cookies".to_string());
        args.push(file.to_string_lossy().to_string());
    } else if let Some(browser) = auth
        .cookies_from_browser
        .as_deref()
        .filter(|b| !b.is_empty() && *b != "custom")
    {
        args.push("--cookies-from-browser".to_string());
        args.push(browser.to_string());
    }
}

fn push_proxy(args: &mut Vec<String>, proxy: Option<&str>) {
    if let Some(proxy) = proxy.filter(|p| !p.trim().is_empty()) {
        args.push("--proxy".to_string());
        args.push(proxy.trim().to_string());
    }
}

/// Full argument list for one extractor transfer
pub fn transfer_args(
    request: &TransferRequest,
    output_dir: &Path,
    cookies_file: Option<&Path>,
    proxy: Option<&str>,
) -> Vec<String> {
    let template = output_dir.join("%(title)s.%(ext)s");

    let mut args: Vec<String> = vec![
        "--encoding".to_string(),
        "utf-8".to_string(),
        "-o".to_string(),
        template.to_string_lossy().to_string(),
        "--newline".to_string(),
        "--progress".to_string(),
        "--progress-template".to_string(),
        PROGRESS_TEMPLATE.to_string(),
        "--print".to_string(),
        format!("after_move:{}%(filepath)s", FILEPATH_MARKER),
        "--no-playlist".to_string(),
    ];

    let options = &request.options;
    args.extend(["-f".to_string(), format_selector(options)]);

    if options.mode == DownloadMode::Audio {
        args.extend([
            "-x".to_string(),
            "--audio-format".to_string(),
            "m4a".to_string(),
        ]);
        if options.embed_thumbnail {
            args.push("--embed-thumbnail".to_string());
        }
    } else {
        args.extend(["--remux-video".to_string(), "mp4".to_string()]);
    }

    if options.embed_subtitles {
        args.extend([
            "--embed-subs".to_string(),
            "--sub-langs".to_string(),
            DEFAULT_SUBTITLE_LANGS.to_string(),
        ]);
    }

    if let Some(limit) = options.speed_limit.filter(|l| *l > 0) {
        args.extend(["--limit-rate".to_string(), limit.to_string()]);
    }

    push_auth(&mut args, &options.auth, cookies_file);
    push_proxy(&mut args, proxy);
    args.push(request.url.clone());
    args
}

/// Arguments for a metadata-only lookup
pub fn metadata_args(
    url: &str,
    auth: &AuthOptions,
    cookies_file: Option<&Path>,
    proxy: Option<&str>,
) -> Vec<String> {
    let mut args = vec!["--encoding".to_string(), "utf-8".to_string()];
    for field in METADATA_FIELDS {
        args.push("--print".to_string());
        args.push(field.to_string());
    }
    args.extend(["--no-download".to_string(), "--no-playlist".to_string()]);
    push_auth(&mut args, auth, cookies_file);
    push_proxy(&mut args, proxy);
    args.push(url.to_string());
    args
}
