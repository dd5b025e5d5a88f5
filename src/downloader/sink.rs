use async_trait::async_trait;
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use crate::downloader::MediaKind;
use crate::errors::{AppError, ErrorResponse, Result};
use crate::utils::{content_disposition, generate_safe_filename};

/// Headers announced to the caller before the body starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseHead {
    pub content_type: String,
    pub content_length: Option<u64>,
    pub content_disposition: String,
    pub file_name: String,
}

impl ResponseHead {
    pub fn for_media(kind: MediaKind, title: &str, content_length: Option<u64>) -> Self {
        let file_name = generate_safe_filename(title, kind.extension());
        Self {
            content_type: kind.content_type().to_string(),
            content_length,
            content_disposition: content_disposition(&file_name),
            file_name,
        }
    }
}

/// Destination of a download: a byte sink that can also carry a head or an error.
#[async_trait]
pub trait MediaSink: AsyncWrite + Unpin + Send {
    /// Called at most once, before any body byte.
    async fn send_head(&mut self, head: ResponseHead) -> Result<()>;

    /// Only meaningful while no head has been sent.
    async fn send_error(&mut self, error: ErrorResponse) -> Result<()>;

    fn head_sent(&self) -> bool;
}

/// Writes the body to disk and shows transfer progress on the terminal.
pub struct FileSink {
    target: PathBuf,
    resolved: Option<PathBuf>,
    file: Option<File>,
    progress: ProgressBar,
    show_progress: bool,
    last_error: Option<ErrorResponse>,
}

impl FileSink {
    /// `target` may be a file path or an existing directory; in the latter case the
    /// suggested file name from the head is used.
    pub fn new(target: impl Into<PathBuf>) -> Self {
        Self {
            target: target.into(),
            resolved: None,
            file: None,
            progress: ProgressBar::hidden(),
            show_progress: true,
            last_error: None,
        }
    }

    pub fn without_progress(mut self) -> Self {
        self.show_progress = false;
        self
    }

    pub fn path(&self) -> Option<&Path> {
        self.resolved.as_deref()
    }

    pub fn last_error(&self) -> Option<&ErrorResponse> {
        self.last_error.as_ref()
    }

    /// Flushes the file and closes the progress bar. Returns the written path.
    pub async fn finish(&mut self) -> Result<Option<PathBuf>> {
        if let Some(file) = self.file.as_mut() {
            file.shutdown().await?;
        }
        self.progress.finish();
        Ok(self.resolved.clone())
    }

    fn progress_bar(&self, content_length: Option<u64>, file_name: &str) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }

        let (bar, template) = match content_length {
            Some(len) => (
                ProgressBar::new(len),
                "{spinner:.green} {wide_msg} [{bar:30.cyan/blue}] {bytes}/{total_bytes} {bytes_per_sec} ({eta})",
            ),
            None => (
                ProgressBar::new_spinner(),
                "{spinner:.green} {wide_msg} {bytes} {bytes_per_sec}",
            ),
        };
        if let Ok(style) = ProgressStyle::default_bar().template(template) {
            bar.set_style(style.progress_chars("=>-"));
        }
        bar.set_message(file_name.to_string());
        bar.enable_steady_tick(Duration::from_millis(100));
        bar
    }
}

#[async_trait]
impl MediaSink for FileSink {
    async fn send_head(&mut self, head: ResponseHead) -> Result<()> {
        if self.file.is_some() {
            return Err(AppError::Stream("response head already sent".to_string()));
        }

        let path = if self.target.is_dir() {
            self.target.join(&head.file_name)
        } else {
            self.target.clone()
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let file = File::create(&path).await?;
        log::info!(
            "🎬 [DOWNLOAD] Writing {} ({}) to {:?}",
            head.file_name,
            head.content_type,
            path
        );

        self.progress = self.progress_bar(head.content_length, &head.file_name);
        self.file = Some(file);
        self.resolved = Some(path);
        Ok(())
    }

    async fn send_error(&mut self, error: ErrorResponse) -> Result<()> {
        log::error!("❌ [DOWNLOAD] {}", serde_json::to_string(&error)?);
        self.last_error = Some(error);
        Ok(())
    }

    fn head_sent(&self) -> bool {
        self.file.is_some()
    }
}

fn head_missing() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "response head not sent")
}

impl AsyncWrite for FileSink {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = &mut *self;
        let Some(file) = this.file.as_mut() else {
            return Poll::Ready(Err(head_missing()));
        };
        let poll = Pin::new(file).poll_write(cx, buf);
        if let Poll::Ready(Ok(written)) = &poll {
            this.progress.inc(*written as u64);
        }
        poll
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.file.as_mut() {
            Some(file) => Pin::new(file).poll_flush(cx),
            None => Poll::Ready(Ok(())),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.file.as_mut() {
            Some(file) => Pin::new(file).poll_shutdown(cx),
            None => Poll::Ready(Ok(())),
        }
    }
}
