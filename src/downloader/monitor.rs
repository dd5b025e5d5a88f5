use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tokio::time::Instant;
use crate::config::MonitorConfig;
use crate::downloader::profile::SharedNetworkProfile;
use crate::downloader::stream::StreamProgress;
use crate::downloader::MediaKind;
use crate::errors::AppError;

const MB: f64 = 1024.0 * 1024.0;
const REPORT_RECENT: usize = 10;

/// Source of the per-checkpoint memory snapshot, in MB.
pub trait MemoryProbe: Send + Sync {
    fn memory_mb(&self) -> f64;
}

/// Resident set size of the current process.
pub struct SystemMemoryProbe {
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl SystemMemoryProbe {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
            pid: sysinfo::get_current_pid().ok(),
        }
    }
}

impl Default for SystemMemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for SystemMemoryProbe {
    fn memory_mb(&self) -> f64 {
        let Some(pid) = self.pid else {
            return 0.0;
        };
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::nothing().with_memory(),
        );
        system
            .process(pid)
            .map(|process| process.memory() as f64 / MB)
            .unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonitorMetadata {
    pub kind: Option<MediaKind>,
    pub title: String,
    pub has_links: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CheckpointEvent {
    UrlSelected { url: String },
    StreamStarted {
        content_length: Option<u64>,
        content_type: Option<String>,
    },
    Progress(StreamProgress),
    DownloadCompleted,
}

impl CheckpointEvent {
    pub fn name(&self) -> &'static str {
        match self {
            CheckpointEvent::UrlSelected { .. } => "url_selected",
            CheckpointEvent::StreamStarted { .. } => "stream_started",
            CheckpointEvent::Progress(_) => "progress",
            CheckpointEvent::DownloadCompleted => "download_completed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub at: Instant,
    pub event: CheckpointEvent,
    pub memory_mb: f64,
    pub elapsed_ms: u64,
}

/// Observations for one download. Consumed by [`PerformanceMonitor::complete`].
#[derive(Debug)]
pub struct Monitor {
    pub id: String,
    pub started: Instant,
    pub metadata: MonitorMetadata,
    checkpoints: Vec<Checkpoint>,
}

impl Monitor {
    pub fn checkpoints(&self) -> &[Checkpoint] {
        &self.checkpoints
    }

    fn progress_points(&self) -> impl Iterator<Item = (Instant, &StreamProgress)> {
        self.checkpoints.iter().filter_map(|cp| match &cp.event {
            CheckpointEvent::Progress(progress) => Some((cp.at, progress)),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadStats {
    pub id: String,
    pub success: bool,
    pub duration_sec: f64,
    pub total_bytes: u64,
    pub downloaded_bytes: u64,
    pub average_speed_mbps: f64,
    pub memory_peak_mb: f64,
    pub network_efficiency: f64,
    pub checkpoints: usize,
    pub metadata: MonitorMetadata,
    pub error: Option<String>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceReport {
    pub total_downloads: usize,
    pub successful_downloads: usize,
    pub success_rate: f64,
    pub average_speed_mbps: f64,
    pub average_duration_sec: f64,
    pub recent: Vec<DownloadStats>,
}

/// Records per-download checkpoints and feeds outcomes back into the network profile.
pub struct PerformanceMonitor {
    config: MonitorConfig,
    history: Mutex<VecDeque<DownloadStats>>,
    profile: SharedNetworkProfile,
    memory: Arc<dyn MemoryProbe>,
}

impl PerformanceMonitor {
    pub fn new(config: MonitorConfig, profile: SharedNetworkProfile) -> Self {
        Self::with_memory_probe(config, profile, Arc::new(SystemMemoryProbe::new()))
    }

    pub fn with_memory_probe(
        config: MonitorConfig,
        profile: SharedNetworkProfile,
        memory: Arc<dyn MemoryProbe>,
    ) -> Self {
        let capacity = config.history_capacity.max(1);
        Self {
            config: MonitorConfig {
                history_capacity: capacity,
                ..config
            },
            history: Mutex::new(VecDeque::with_capacity(capacity)),
            profile,
            memory,
        }
    }

    pub fn start_monitoring(&self, id: impl Into<String>, metadata: MonitorMetadata) -> Monitor {
        let monitor = Monitor {
            id: id.into(),
            started: Instant::now(),
            metadata,
            checkpoints: Vec::new(),
        };
        log::debug!("📊 [MONITOR] Started {}", monitor.id);
        monitor
    }

    pub fn add_checkpoint(&self, monitor: &mut Monitor, event: CheckpointEvent) {
        let at = Instant::now();
        let checkpoint = Checkpoint {
            at,
            memory_mb: self.memory.memory_mb(),
            elapsed_ms: at.duration_since(monitor.started).as_millis() as u64,
            event,
        };

        let is_progress = matches!(checkpoint.event, CheckpointEvent::Progress(_));
        monitor.checkpoints.push(checkpoint);

        if is_progress {
            self.analyze_real_time(monitor);
        }
    }

    /// Log-only signals for slow transfer, high memory and long-running downloads.
    fn analyze_real_time(&self, monitor: &Monitor) {
        let Some(checkpoint) = monitor.checkpoints.last() else {
            return;
        };

        if let Some(speed) = current_speed_mbps(monitor) {
            if speed < self.config.slow_download_mbps {
                log::warn!(
                    "⚠️ [MONITOR] {} slow download: {:.2} MB/s, consider a lower quality",
                    monitor.id,
                    speed
                );
            }
        }

        if checkpoint.memory_mb > self.config.high_memory_mb {
            log::warn!(
                "⚠️ [MONITOR] {} high memory usage: {:.1} MB, consider a smaller buffer",
                monitor.id,
                checkpoint.memory_mb
            );
        }

        if checkpoint.elapsed_ms > self.config.long_duration_secs * 1000 {
            log::warn!(
                "⚠️ [MONITOR] {} running for {}s, consider a lower quality",
                monitor.id,
                checkpoint.elapsed_ms / 1000
            );
        }
    }

    /// Finalizes a monitor into stats, records them and updates the network profile.
    pub fn complete(
        &self,
        monitor: Monitor,
        success: bool,
        error: Option<&AppError>,
    ) -> DownloadStats {
        let duration_sec = monitor.started.elapsed().as_secs_f64();
        let last_progress = monitor.progress_points().last().map(|(_, p)| *p);
        let downloaded_bytes = last_progress.map(|p| p.downloaded_bytes).unwrap_or(0);
        let total_bytes = last_progress.map(|p| p.total_bytes).unwrap_or(0);

        let average_speed_mbps = if duration_sec > 0.0 {
            downloaded_bytes as f64 / duration_sec / MB
        } else {
            0.0
        };

        let memory_peak_mb = monitor
            .checkpoints
            .iter()
            .map(|cp| cp.memory_mb)
            .fold(0.0, f64::max);

        let stats = DownloadStats {
            id: monitor.id.clone(),
            success,
            duration_sec,
            total_bytes,
            downloaded_bytes,
            average_speed_mbps,
            memory_peak_mb,
            network_efficiency: network_efficiency(&monitor),
            checkpoints: monitor.checkpoints.len(),
            metadata: monitor.metadata,
            error: error.map(|e| e.to_string()),
            finished_at: Utc::now(),
        };

        log::info!(
            "📊 [MONITOR] {} {} in {:.1}s, {:.2}MB at {:.2}MB/s, efficiency {:.1}%, memory peak {:.1}MB",
            stats.id,
            if stats.success { "✅" } else { "❌" },
            stats.duration_sec,
            stats.total_bytes as f64 / MB,
            stats.average_speed_mbps,
            stats.network_efficiency * 100.0,
            stats.memory_peak_mb
        );

        self.record(stats.clone());
        stats
    }

    /// History push and profile update happen under one lock.
    fn record(&self, stats: DownloadStats) {
        let mut history = self.history();
        if history.len() >= self.config.history_capacity {
            history.pop_front();
        }
        history.push_back(stats);

        let window: Vec<&DownloadStats> = history
            .iter()
            .rev()
            .take(self.config.adaptive_window.max(1))
            .collect();
        if window.len() < self.config.adaptive_min_samples {
            return;
        }

        let count = window.len() as f64;
        let avg_speed = window.iter().map(|s| s.average_speed_mbps).sum::<f64>() / count;
        let success_rate = window.iter().filter(|s| s.success).count() as f64 / count;

        log::info!(
            "📈 [MONITOR] Adaptive analysis: {:.2}MB/s average, {:.1}% success",
            avg_speed,
            success_rate * 100.0
        );
        if avg_speed < 2.0 {
            log::info!("🔧 [MONITOR] Suggest defaulting to standard quality");
        }
        if success_rate < 0.8 {
            log::info!("🔧 [MONITOR] Suggest raising the retry budget");
        }
        if avg_speed > 10.0 {
            log::info!("🔧 [MONITOR] Network looks good, high quality is affordable");
        }

        let profile = self.profile.apply_observation(avg_speed, success_rate);
        log::info!(
            "📊 [MONITOR] Network profile: {:.2}MB/s, reliability {:.1}%",
            profile.average_speed_mbps,
            profile.reliability * 100.0
        );
    }

    pub fn history_len(&self) -> usize {
        self.history().len()
    }

    pub fn performance_report(&self) -> PerformanceReport {
        let history = self.history();
        let successful: Vec<&DownloadStats> = history.iter().filter(|s| s.success).collect();
        let (average_speed_mbps, average_duration_sec) = if successful.is_empty() {
            (0.0, 0.0)
        } else {
            let n = successful.len() as f64;
            (
                successful.iter().map(|s| s.average_speed_mbps).sum::<f64>() / n,
                successful.iter().map(|s| s.duration_sec).sum::<f64>() / n,
            )
        };

        PerformanceReport {
            total_downloads: history.len(),
            successful_downloads: successful.len(),
            success_rate: if history.is_empty() {
                0.0
            } else {
                successful.len() as f64 / history.len() as f64
            },
            average_speed_mbps,
            average_duration_sec,
            recent: history
                .iter()
                .skip(history.len().saturating_sub(REPORT_RECENT))
                .cloned()
                .collect(),
        }
    }

    fn history(&self) -> MutexGuard<'_, VecDeque<DownloadStats>> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Speed across the last three progress checkpoints, in MB/s.
fn current_speed_mbps(monitor: &Monitor) -> Option<f64> {
    let points: Vec<(Instant, &StreamProgress)> = monitor.progress_points().collect();
    let recent = &points[points.len().saturating_sub(3)..];
    if recent.len() < 2 {
        return None;
    }
    let (first_at, first) = recent[0];
    let (last_at, last) = recent[recent.len() - 1];
    let secs = last_at.duration_since(first_at).as_secs_f64();
    if secs <= 0.0 {
        return None;
    }
    let bytes = last.downloaded_bytes.saturating_sub(first.downloaded_bytes);
    Some(bytes as f64 / secs / MB)
}

/// `1 - coefficient of variation` of inter-checkpoint speeds, clamped to [0, 1].
fn network_efficiency(monitor: &Monitor) -> f64 {
    let points: Vec<(Instant, &StreamProgress)> = monitor.progress_points().collect();
    if points.len() < 2 {
        return 1.0;
    }

    let speeds: Vec<f64> = points
        .windows(2)
        .map(|pair| {
            let (prev_at, prev) = pair[0];
            let (curr_at, curr) = pair[1];
            let secs = curr_at.duration_since(prev_at).as_secs_f64();
            let bytes = curr.downloaded_bytes.saturating_sub(prev.downloaded_bytes);
            if secs > 0.0 {
                bytes as f64 / secs
            } else {
                0.0
            }
        })
        .collect();

    let n = speeds.len() as f64;
    let mean = speeds.iter().sum::<f64>() / n;
    if mean <= 0.0 {
        return 0.0;
    }
    let variance = speeds.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;
    let cv = variance.sqrt() / mean;
    (1.0 - cv).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::profile::NetworkProfile;
    use std::time::Duration;

    struct FixedMemory(f64);

    impl MemoryProbe for FixedMemory {
        fn memory_mb(&self) -> f64 {
            self.0
        }
    }

    fn monitor_with(config: MonitorConfig, profile: SharedNetworkProfile) -> PerformanceMonitor {
        PerformanceMonitor::with_memory_probe(config, profile, Arc::new(FixedMemory(42.0)))
    }

    fn monitor() -> PerformanceMonitor {
        monitor_with(MonitorConfig::default(), SharedNetworkProfile::default())
    }

    fn progress(downloaded: u64, total: u64) -> CheckpointEvent {
        CheckpointEvent::Progress(StreamProgress {
            downloaded_bytes: downloaded,
            total_bytes: total,
            ..StreamProgress::default()
        })
    }

    const ONE_MB: u64 = 1024 * 1024;

    #[tokio::test(start_paused = true)]
    async fn constant_speed_is_fully_efficient() {
        let perf = monitor();
        let mut m = perf.start_monitoring("video_1", MonitorMetadata::default());
        perf.add_checkpoint(&mut m, progress(0, 4 * ONE_MB));
        for i in 1..=4 {
            tokio::time::advance(Duration::from_secs(1)).await;
            perf.add_checkpoint(&mut m, progress(i * ONE_MB, 4 * ONE_MB));
        }

        let stats = perf.complete(m, true, None);
        assert!(stats.success);
        assert!((stats.network_efficiency - 1.0).abs() < 1e-9);
        assert_eq!(stats.downloaded_bytes, 4 * ONE_MB);
        assert!((stats.average_speed_mbps - 1.0).abs() < 1e-9);
        assert_eq!(stats.memory_peak_mb, 42.0);
    }

    #[tokio::test(start_paused = true)]
    async fn two_progress_checkpoints_are_fully_efficient() {
        let perf = monitor();
        let mut m = perf.start_monitoring("video_2", MonitorMetadata::default());
        perf.add_checkpoint(&mut m, progress(ONE_MB, 2 * ONE_MB));
        tokio::time::advance(Duration::from_millis(500)).await;
        perf.add_checkpoint(&mut m, progress(2 * ONE_MB, 2 * ONE_MB));

        let stats = perf.complete(m, true, None);
        assert!((stats.network_efficiency - 1.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn variable_speed_lowers_efficiency() {
        let perf = monitor();
        let mut m = perf.start_monitoring("video_3", MonitorMetadata::default());
        let mut downloaded = 0;
        perf.add_checkpoint(&mut m, progress(downloaded, 0));
        for step in [10 * ONE_MB, ONE_MB / 10, 8 * ONE_MB, ONE_MB / 20] {
            tokio::time::advance(Duration::from_secs(1)).await;
            downloaded += step;
            perf.add_checkpoint(&mut m, progress(downloaded, 0));
        }

        let stats = perf.complete(m, true, None);
        assert!(stats.network_efficiency < 0.5, "got {}", stats.network_efficiency);
        assert!(stats.network_efficiency >= 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn checkpoints_are_time_ordered() {
        let perf = monitor();
        let mut m = perf.start_monitoring("audio_1", MonitorMetadata::default());
        perf.add_checkpoint(&mut m, CheckpointEvent::UrlSelected { url: "https://cdn/a.mp3".into() });
        tokio::time::advance(Duration::from_millis(5)).await;
        perf.add_checkpoint(
            &mut m,
            CheckpointEvent::StreamStarted {
                content_length: Some(10),
                content_type: None,
            },
        );
        perf.add_checkpoint(&mut m, progress(10, 10));
        perf.add_checkpoint(&mut m, CheckpointEvent::DownloadCompleted);

        let names: Vec<&str> = m.checkpoints().iter().map(|cp| cp.event.name()).collect();
        assert_eq!(
            names,
            vec!["url_selected", "stream_started", "progress", "download_completed"]
        );
        for pair in m.checkpoints().windows(2) {
            assert!(pair[1].at >= pair[0].at);
            assert!(pair[1].elapsed_ms >= pair[0].elapsed_ms);
        }
        assert_eq!(m.checkpoints()[1].elapsed_ms, 5);
    }

    #[tokio::test]
    async fn history_is_bounded() {
        let config = MonitorConfig {
            history_capacity: 3,
            ..MonitorConfig::default()
        };
        let perf = monitor_with(config, SharedNetworkProfile::default());
        for i in 0..5 {
            let m = perf.start_monitoring(format!("video_{}", i), MonitorMetadata::default());
            perf.complete(m, true, None);
        }

        assert_eq!(perf.history_len(), 3);
        let ids: Vec<String> = perf.performance_report().recent.into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["video_2", "video_3", "video_4"]);
    }

    #[tokio::test(start_paused = true)]
    async fn profile_updates_after_enough_samples() {
        let profile = SharedNetworkProfile::default();
        let perf = monitor_with(MonitorConfig::default(), profile.clone());

        for i in 0..5 {
            let mut m = perf.start_monitoring(format!("video_{}", i), MonitorMetadata::default());
            tokio::time::advance(Duration::from_secs(1)).await;
            perf.add_checkpoint(&mut m, progress(10 * ONE_MB, 10 * ONE_MB));
            perf.complete(m, true, None);

            if i < 4 {
                assert_eq!(profile.snapshot().average_speed_mbps, 5.0);
                assert_eq!(profile.snapshot().reliability, 0.8);
            }
        }

        let updated: NetworkProfile = profile.snapshot();
        assert!((updated.average_speed_mbps - 6.5).abs() < 1e-6);
        assert!((updated.reliability - 0.84).abs() < 1e-6);
    }

    #[tokio::test]
    async fn failures_lower_reliability() {
        let profile = SharedNetworkProfile::default();
        let perf = monitor_with(MonitorConfig::default(), profile.clone());
        let error = AppError::Stream("sink closed".into());
        for i in 0..5 {
            let m = perf.start_monitoring(format!("video_{}", i), MonitorMetadata::default());
            let stats = perf.complete(m, false, Some(&error));
            assert_eq!(stats.error.as_deref(), Some("Stream error: sink closed"));
        }

        let updated = profile.snapshot();
        assert!(updated.reliability < 0.8);
        assert!(updated.reliability >= 0.0);
        assert_eq!(updated.average_speed_mbps, 5.0);
    }

    #[tokio::test(start_paused = true)]
    async fn report_averages_successful_downloads() {
        let perf = monitor();
        assert_eq!(perf.performance_report().total_downloads, 0);

        let mut ok = perf.start_monitoring("video_ok", MonitorMetadata::default());
        tokio::time::advance(Duration::from_secs(2)).await;
        perf.add_checkpoint(&mut ok, progress(4 * ONE_MB, 4 * ONE_MB));
        perf.complete(ok, true, None);

        let failed = perf.start_monitoring("video_failed", MonitorMetadata::default());
        perf.complete(failed, false, None);

        let report = perf.performance_report();
        assert_eq!(report.total_downloads, 2);
        assert_eq!(report.successful_downloads, 1);
        assert!((report.success_rate - 0.5).abs() < 1e-9);
        assert!((report.average_speed_mbps - 2.0).abs() < 1e-9);
        assert!((report.average_duration_sec - 2.0).abs() < 1e-9);
        assert_eq!(report.recent.len(), 2);
    }

    #[test]
    fn system_probe_reads_process_memory() {
        assert!(SystemMemoryProbe::new().memory_mb() >= 0.0);
    }
}
