use std::sync::Arc;
use crate::config::AppConfig;
use crate::downloader::http_pool::{truncate, HttpPool, PROBE_FALLBACK_MBPS};
use crate::downloader::monitor::{
    CheckpointEvent, DownloadStats, Monitor, MonitorMetadata, PerformanceMonitor, PerformanceReport,
};
use crate::downloader::profile::SharedNetworkProfile;
use crate::downloader::quality::QualitySelector;
use crate::downloader::queue::{DownloadQueue, QueueStatus};
use crate::downloader::retry::{RetryController, RetryPolicy};
use crate::downloader::sink::{MediaSink, ResponseHead};
use crate::downloader::stream::{StreamOptimizer, StreamProgress};
use crate::downloader::{AudioRequest, DownloadLink, DownloadTask, MediaKind, VideoRequest};
use crate::errors::{AppError, ErrorResponse, Result};
use crate::utils::{generate_download_id, validate_media_url};

/// Outcome of a finished download.
#[derive(Debug, Clone)]
pub struct DownloadOutcome {
    pub bytes_written: u64,
    pub stats: DownloadStats,
}

/// Wires selection, admission, retry, streaming and monitoring into one download flow.
pub struct DownloadOrchestrator {
    http: Arc<HttpPool>,
    selector: QualitySelector,
    retry: RetryController,
    queue: DownloadQueue,
    monitor: Arc<PerformanceMonitor>,
    optimizer: StreamOptimizer,
    profile: SharedNetworkProfile,
    probe_url: Option<String>,
}

impl DownloadOrchestrator {
    pub fn new(config: &AppConfig) -> Result<Self> {
        let profile = SharedNetworkProfile::default();
        let monitor = PerformanceMonitor::new(config.monitor.clone(), profile.clone());
        Self::with_parts(config, profile, monitor)
    }

    /// Builds the orchestrator around an existing profile and monitor, e.g. one with a
    /// custom memory probe.
    pub fn with_parts(
        config: &AppConfig,
        profile: SharedNetworkProfile,
        monitor: PerformanceMonitor,
    ) -> Result<Self> {
        Ok(Self {
            http: Arc::new(HttpPool::new(config.http.clone())?),
            selector: QualitySelector::new(profile.clone(), config.selector.clone()),
            retry: RetryController::new(RetryPolicy::from(&config.retry)),
            queue: DownloadQueue::new(config.queue.max_concurrent),
            monitor: Arc::new(monitor),
            optimizer: StreamOptimizer::new(config.stream.clone()),
            profile,
            probe_url: config.probe_url.clone(),
        })
    }

    pub async fn download_video<S>(
        &self,
        request: &VideoRequest,
        sink: &mut S,
    ) -> Result<DownloadOutcome>
    where
        S: MediaSink + ?Sized,
    {
        let links = request.download_links.as_deref().unwrap_or(&[]);
        let selected = match request.video_url.as_deref().filter(|url| !url.is_empty()) {
            Some(url) => Some(url),
            None => self
                .selector
                .select_optimal_quality(links, request.duration.unwrap_or(0.0)),
        };

        let task = match Self::resolve_task(MediaKind::Video, selected, links, &request.title) {
            Ok(task) => task,
            Err(e) => return Self::reject(e, sink).await,
        };
        let metadata = MonitorMetadata {
            kind: Some(MediaKind::Video),
            title: request.title.clone(),
            has_links: request.download_links.is_some(),
        };
        self.run(task, metadata, sink).await
    }

    pub async fn download_audio<S>(
        &self,
        request: &AudioRequest,
        sink: &mut S,
    ) -> Result<DownloadOutcome>
    where
        S: MediaSink + ?Sized,
    {
        let links = request.download_links.as_deref().unwrap_or(&[]);
        let selected = match request.audio_url.as_deref().filter(|url| !url.is_empty()) {
            Some(url) => Some(url),
            None => self.selector.select_audio(links),
        };

        let task = match Self::resolve_task(MediaKind::Audio, selected, links, &request.title) {
            Ok(task) => task,
            Err(e) => return Self::reject(e, sink).await,
        };
        let metadata = MonitorMetadata {
            kind: Some(MediaKind::Audio),
            title: request.title.clone(),
            has_links: request.download_links.is_some(),
        };
        self.run(task, metadata, sink).await
    }

    pub fn performance_report(&self) -> PerformanceReport {
        self.monitor.performance_report()
    }

    pub fn queue_status(&self) -> QueueStatus {
        self.queue.status()
    }

    pub fn network_profile(&self) -> &SharedNetworkProfile {
        &self.profile
    }

    /// Estimated bandwidth in Mbps. Falls back to the configured probe target, and to a
    /// fixed estimate when there is none.
    pub async fn probe_network(&self, probe_url: Option<&str>) -> f64 {
        match probe_url.or(self.probe_url.as_deref()) {
            Some(url) => self.http.probe_network_speed(url).await,
            None => {
                log::warn!("⚠️ [HTTP] No probe URL configured, assuming {} Mbps", PROBE_FALLBACK_MBPS);
                PROBE_FALLBACK_MBPS
            }
        }
    }

    fn resolve_task(
        kind: MediaKind,
        selected: Option<&str>,
        links: &[DownloadLink],
        title: &str,
    ) -> Result<DownloadTask> {
        let url = selected.ok_or_else(|| AppError::NoCandidateLink(kind.as_str().to_string()))?;
        validate_media_url(url)?;

        Ok(DownloadTask {
            id: generate_download_id(kind),
            kind,
            candidate_links: links.to_vec(),
            resolved_url: url.to_string(),
            title: title.to_string(),
        })
    }

    /// User-input failures are answered right away and never reach the monitor.
    async fn reject<S>(error: AppError, sink: &mut S) -> Result<DownloadOutcome>
    where
        S: MediaSink + ?Sized,
    {
        log::warn!("⚠️ [DOWNLOAD] Rejected request: {}", error);
        Self::report_error(&error, sink).await;
        Err(error)
    }

    async fn report_error<S>(error: &AppError, sink: &mut S)
    where
        S: MediaSink + ?Sized,
    {
        if sink.head_sent() {
            return;
        }
        if let Err(e) = sink.send_error(ErrorResponse::from(error)).await {
            log::error!("❌ [DOWNLOAD] Could not deliver error response: {}", e);
        }
    }

    async fn run<S>(
        &self,
        task: DownloadTask,
        metadata: MonitorMetadata,
        sink: &mut S,
    ) -> Result<DownloadOutcome>
    where
        S: MediaSink + ?Sized,
    {
        log::info!(
            "🎬 [DOWNLOAD] {} queued: {}",
            task.id,
            truncate(&task.resolved_url, 100)
        );

        let (result, stats) = self
            .queue
            .add(async {
                let mut monitor = self.monitor.start_monitoring(task.id.clone(), metadata);
                self.monitor.add_checkpoint(
                    &mut monitor,
                    CheckpointEvent::UrlSelected {
                        url: truncate(&task.resolved_url, 100),
                    },
                );

                let result = self.transfer(&task, &mut monitor, &mut *sink).await;
                let stats = match &result {
                    Ok(_) => self.monitor.complete(monitor, true, None),
                    Err(e) => self.monitor.complete(monitor, false, Some(e)),
                };
                (result, stats)
            })
            .await;

        match result {
            Ok(bytes_written) => Ok(DownloadOutcome {
                bytes_written,
                stats,
            }),
            Err(error) => {
                log::error!("❌ [DOWNLOAD] {} failed: {}", task.id, error);
                Self::report_error(&error, sink).await;
                Err(error)
            }
        }
    }

    async fn transfer<S>(
        &self,
        task: &DownloadTask,
        monitor: &mut Monitor,
        sink: &mut S,
    ) -> Result<u64>
    where
        S: MediaSink + ?Sized,
    {
        let http = &self.http;
        let url = task.resolved_url.as_str();

        let response = self
            .retry
            .execute_with_retry(&format!("{} download", task.kind.as_str()), move |_| async move {
                http.warmup_connection(url).await;
                http.download_stream(url).await
            })
            .await?;

        self.monitor.add_checkpoint(
            monitor,
            CheckpointEvent::StreamStarted {
                content_length: response.content_length,
                content_type: response.content_type.clone(),
            },
        );

        let head = ResponseHead::for_media(task.kind, &task.title, response.content_length);
        log::info!(
            "🎬 [DOWNLOAD] {} sending {} ({})",
            task.id,
            head.file_name,
            head.content_type
        );
        sink.send_head(head).await?;

        let perf = &self.monitor;
        let mut on_progress = |progress: &StreamProgress| {
            perf.add_checkpoint(monitor, CheckpointEvent::Progress(*progress));
        };
        let written = self
            .optimizer
            .stream_download(response.body, sink, response.content_length, &mut on_progress)
            .await?;

        self.monitor
            .add_checkpoint(monitor, CheckpointEvent::DownloadCompleted);
        Ok(written)
    }
}
