use std::time::Duration;
use bytes::Bytes;
use futures::{Stream, TryStreamExt};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncWrite, AsyncWriteExt, BufReader};
use tokio::time::Instant;
use tokio_util::io::StreamReader;
use crate::config::StreamConfig;
use crate::errors::{AppError, Result};

const MB: f64 = 1024.0 * 1024.0;

/// Progress report emitted while piping a download.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamProgress {
    pub downloaded_bytes: u64,
    /// 0 when the upstream did not declare a length.
    pub total_bytes: u64,
    pub percentage: f64,
    pub speed_mbps: f64,
    pub eta_sec: f64,
    pub elapsed_sec: f64,
}

pub trait ProgressHandler: Send {
    fn on_progress(&mut self, progress: &StreamProgress);
}

impl<F> ProgressHandler for F
where
    F: FnMut(&StreamProgress) + Send,
{
    fn on_progress(&mut self, progress: &StreamProgress) {
        self(progress)
    }
}

/// Handler for callers that don't care about progress.
pub struct NoProgress;

impl ProgressHandler for NoProgress {
    fn on_progress(&mut self, _progress: &StreamProgress) {}
}

/// Byte counter with a throttled report.
struct ProgressTracker<'a> {
    total_bytes: u64,
    downloaded_bytes: u64,
    started: Instant,
    last_report: Option<Instant>,
    throttle: Duration,
    handler: &'a mut dyn ProgressHandler,
}

impl<'a> ProgressTracker<'a> {
    fn record(&mut self, chunk_len: usize) {
        self.downloaded_bytes += chunk_len as u64;

        let now = Instant::now();
        let due = match self.last_report {
            Some(last) => now.duration_since(last) >= self.throttle,
            None => true,
        };
        if due {
            self.last_report = Some(now);
            self.report(now);
        }
    }

    fn report(&mut self, now: Instant) {
        let progress = self.snapshot(now);
        self.handler.on_progress(&progress);
    }

    fn snapshot(&self, now: Instant) -> StreamProgress {
        let elapsed_sec = now.duration_since(self.started).as_secs_f64();
        let bytes_per_sec = if elapsed_sec > 0.0 {
            self.downloaded_bytes as f64 / elapsed_sec
        } else {
            0.0
        };
        let percentage = if self.total_bytes > 0 {
            self.downloaded_bytes as f64 / self.total_bytes as f64 * 100.0
        } else {
            0.0
        };
        let eta_sec = if bytes_per_sec > 0.0 && self.total_bytes > 0 {
            self.total_bytes.saturating_sub(self.downloaded_bytes) as f64 / bytes_per_sec
        } else {
            0.0
        };

        StreamProgress {
            downloaded_bytes: self.downloaded_bytes,
            total_bytes: self.total_bytes,
            percentage,
            speed_mbps: bytes_per_sec / MB,
            eta_sec,
            elapsed_sec,
        }
    }
}

/// Pipes a source byte stream into a sink with a size-tuned buffer.
#[derive(Debug, Clone)]
pub struct StreamOptimizer {
    options: StreamConfig,
}

impl Default for StreamOptimizer {
    fn default() -> Self {
        Self::new(StreamConfig::default())
    }
}

impl StreamOptimizer {
    pub fn new(options: StreamConfig) -> Self {
        Self { options }
    }

    /// Small files favour latency, large files favour throughput.
    pub fn buffer_size_for(&self, content_length: Option<u64>) -> usize {
        match content_length {
            None | Some(0) => self.options.default_buffer_size,
            Some(len) if len < self.options.small_file_threshold => self.options.min_buffer_size,
            Some(len) if len > self.options.large_file_threshold => self.options.max_buffer_size,
            Some(_) => self.options.default_buffer_size,
        }
    }

    /// Forwards every chunk of `source` to `sink`; returns the number of bytes written.
    ///
    /// The source is only polled when the buffer has room, so a slow sink pauses the
    /// upstream read. Progress is reported at most once per throttle window plus once
    /// at the end.
    pub async fn stream_download<S, W>(
        &self,
        source: S,
        sink: &mut W,
        content_length: Option<u64>,
        handler: &mut dyn ProgressHandler,
    ) -> Result<u64>
    where
        S: Stream<Item = Result<Bytes>> + Send + Unpin,
        W: AsyncWrite + Unpin + ?Sized,
    {
        let buffer_size = self.buffer_size_for(content_length);
        let total_bytes = content_length.unwrap_or(0);
        log::info!(
            "🚀 [STREAM] Buffer {}KB for {:.2}MB payload",
            buffer_size / 1024,
            total_bytes as f64 / MB
        );

        let mut tracker = ProgressTracker {
            total_bytes,
            downloaded_bytes: 0,
            started: Instant::now(),
            last_report: None,
            throttle: Duration::from_millis(self.options.progress_throttle_ms),
            handler,
        };

        let copied = {
            let tracked = source
                .inspect_ok(|chunk| tracker.record(chunk.len()))
                .map_err(into_io_error);
            let mut reader = BufReader::with_capacity(buffer_size, StreamReader::new(tracked));
            let copied = tokio::io::copy_buf(&mut reader, sink)
                .await
                .map_err(into_stream_error)?;
            sink.flush().await.map_err(into_stream_error)?;
            copied
        };

        tracker.report(Instant::now());
        log::info!(
            "✅ [STREAM] Forwarded {:.2}MB in {:.1}s",
            copied as f64 / MB,
            tracker.started.elapsed().as_secs_f64()
        );

        Ok(copied)
    }
}

fn into_io_error(error: AppError) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, error)
}

fn into_stream_error(error: std::io::Error) -> AppError {
    log::error!("❌ [STREAM] Pipe failed: {}", error);
    AppError::Stream(error.to_string())
}
