/// Cleanup of engine-reported display metadata
use crate::modules::downloads::domain::value_objects::MediaMetadata;
use regex::Regex;
use std::sync::LazyLock;

pub const MAX_TITLE_CHARS: usize = 200;

static FORMAT_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\s*[\[(](?:\d{3,4}p\d{0,3}|[48]k|hd|fhd|uhd|hq|mp4|webm|mkv|m4a|mp3|opus|audio only|video only|\d{3,4}x\d{3,4})[\])]\s*$",
    )
    .expect("valid format tag regex")
});
static EXTENSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\.(?:mp4|webm|mkv|m4a|mp3|opus)\s*$").expect("valid extension regex")
});
static SITE_SUFFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\s+[-|]\s+(?:youtube|youtube music|tiktok)\s*$").expect("valid site regex")
});

/// Hosts whose authors are shown by handle
const HANDLE_HOSTS: &[&str] = &["x.com", "twitter.com"];

/// Strip engine-appended suffixes and cap the length; falls back to the raw title if nothing is left
pub fn sanitize_title(raw: &str) -> String {
    let original = raw.trim();
    let mut title = original.to_string();

    loop {
        let before = title.len();
        for re in [&*FORMAT_TAG_RE, &*EXTENSION_RE, &*SITE_SUFFIX_RE] {
            let stripped = re.replace(&title, "").trim_end().to_string();
            title = stripped;
        }
        if title.len() == before {
            break;
        }
    }

    if title.is_empty() {
        title = original.to_string();
    }

    if title.chars().count() > MAX_TITLE_CHARS {
        title = title.chars().take(MAX_TITLE_CHARS).collect::<String>();
        title = title.trim_end().to_string();
    }
    title
}

/// Pick the author to display for `url`
pub fn resolve_author(url: &str, meta: &MediaMetadata) -> Option<String> {
    if is_handle_host(url) {
        if let Some(handle) = usable(&meta.uploader_id) {
            return Some(format!("@{}", handle.trim_start_matches('@')));
        }
    }

    [&meta.uploader, &meta.channel, &meta.creator, &meta.uploader_id]
        .into_iter()
        .find_map(usable)
        .map(str::to_string)
}

fn usable(field: &Option<String>) -> Option<&str> {
    field
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("na"))
}

fn is_handle_host(url: &str) -> bool {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
        .map(|host| {
            HANDLE_HOSTS
                .iter()
                .any(|known| host == *known || host.ends_with(&format!(".{}", known)))
        })
        .unwrap_or(false)
}
