#![allow(dead_code)]

use async_trait::async_trait;
use media_relay::config::AppConfig;
use media_relay::downloader::monitor::{MemoryProbe, PerformanceMonitor};
use media_relay::downloader::profile::SharedNetworkProfile;
use media_relay::{DownloadOrchestrator, ErrorResponse, MediaSink, ResponseHead, Result};
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::AsyncWrite;
use wiremock::MockServer;

/// In-memory response: records the head, the error body and every byte written.
#[derive(Default)]
pub struct MemorySink {
    pub head: Option<ResponseHead>,
    pub error: Option<ErrorResponse>,
    pub body: Vec<u8>,
    /// Fail writes once this many bytes have been accepted.
    pub fail_after: Option<usize>,
}

impl MemorySink {
    pub fn failing_after(bytes: usize) -> Self {
        Self {
            fail_after: Some(bytes),
            ..Self::default()
        }
    }
}

impl AsyncWrite for MemorySink {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if let Some(limit) = self.fail_after {
            if self.body.len() >= limit {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "client went away",
                )));
            }
        }
        self.body.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[async_trait]
impl MediaSink for MemorySink {
    async fn send_head(&mut self, head: ResponseHead) -> Result<()> {
        self.head = Some(head);
        Ok(())
    }

    async fn send_error(&mut self, error: ErrorResponse) -> Result<()> {
        self.error = Some(error);
        Ok(())
    }

    fn head_sent(&self) -> bool {
        self.head.is_some()
    }
}

pub struct NoMemory;

impl MemoryProbe for NoMemory {
    fn memory_mb(&self) -> f64 {
        0.0
    }
}

/// Fast retries so failure paths finish quickly.
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.retry.base_delay_ms = 10;
    config.retry.max_delay_ms = 50;
    config.retry.jitter = false;
    config.http.warmup_timeout_secs = 1;
    config
}

pub fn orchestrator(config: &AppConfig) -> DownloadOrchestrator {
    let profile = SharedNetworkProfile::default();
    let monitor =
        PerformanceMonitor::with_memory_probe(config.monitor.clone(), profile.clone(), Arc::new(NoMemory));
    DownloadOrchestrator::with_parts(config, profile, monitor).expect("orchestrator")
}

pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

pub async fn get_count(server: &MockServer, path: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.method.as_str() == "GET" && r.url.path() == path)
        .count()
}
