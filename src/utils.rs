use chrono::Utc;
use regex::Regex;
use std::sync::LazyLock;
use url::Url;
use crate::downloader::MediaKind;
use crate::errors::{AppError, Result};

const MAX_TITLE_CHARS: usize = 50;

static UNSAFE_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\s\p{Han}-]").expect("valid filename pattern"));
static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace pattern"));

/// Builds `<title>_<millis><extension>` from an arbitrary title.
///
/// The title is cut to 50 characters, stripped down to word characters, CJK and `-`,
/// and whitespace runs become `_`.
pub fn generate_safe_filename(title: &str, extension: &str) -> String {
    let truncated: String = title.trim().chars().take(MAX_TITLE_CHARS).collect();
    let cleaned = UNSAFE_CHARS.replace_all(&truncated, "");
    let cleaned = WHITESPACE.replace_all(cleaned.trim(), "_");
    let stem = if cleaned.is_empty() { "media" } else { cleaned.as_ref() };

    format!("{}_{}{}", stem, Utc::now().timestamp_millis(), extension)
}

/// RFC 5987 attachment header value.
pub fn content_disposition(file_name: &str) -> String {
    format!("attachment; filename*=UTF-8''{}", urlencoding::encode(file_name))
}

/// Accepts absolute http(s) URLs with a host.
pub fn validate_media_url(url: &str) -> Result<Url> {
    if url.trim().is_empty() {
        return Err(AppError::InvalidInput("URL cannot be empty".to_string()));
    }

    let parsed = Url::parse(url)
        .map_err(|e| AppError::InvalidInput(format!("Invalid URL {}: {}", url, e)))?;

    match parsed.scheme() {
        "http" | "https" => {}
        other => {
            return Err(AppError::InvalidInput(format!(
                "Unsupported URL scheme: {}",
                other
            )))
        }
    }

    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(AppError::InvalidInput(format!("URL must have a host: {}", url)));
    }

    Ok(parsed)
}

/// Generates a unique ID for downloads
pub fn generate_download_id(kind: MediaKind) -> String {
    format!("{}_{}", kind.as_str(), uuid::Uuid::new_v4())
}
