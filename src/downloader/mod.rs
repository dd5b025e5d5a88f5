pub mod http_pool;
pub mod manager;
pub mod monitor;
pub mod profile;
pub mod quality;
pub mod queue;
pub mod retry;
pub mod sink;
pub mod stream;

use serde::{Deserialize, Serialize};

/// One alternative URL for a piece of media, as handed over by the content resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadLink {
    pub url: String,
    pub label: String,
}

impl DownloadLink {
    pub fn new(url: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            label: label.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
}

impl MediaKind {
    pub fn content_type(&self) -> &'static str {
        match self {
            MediaKind::Video => "video/mp4",
            MediaKind::Audio => "audio/mpeg",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            MediaKind::Video => ".mp4",
            MediaKind::Audio => ".mp3",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
        }
    }
}

/// Video request as produced by the content resolver.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoRequest {
    pub video_url: Option<String>,
    pub download_links: Option<Vec<DownloadLink>>,
    pub title: String,
    /// Media duration in seconds, when the resolver knows it.
    pub duration: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioRequest {
    pub audio_url: Option<String>,
    pub download_links: Option<Vec<DownloadLink>>,
    pub title: String,
}

/// A single download owned by the orchestrator from selection until its terminal state.
#[derive(Debug, Clone)]
pub struct DownloadTask {
    pub id: String,
    pub kind: MediaKind,
    pub candidate_links: Vec<DownloadLink>,
    pub resolved_url: String,
    pub title: String,
}
