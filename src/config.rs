use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use crate::errors::Result;

const ENV_PREFIX: &str = "MEDIA_RELAY";

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub http: HttpConfig,
    pub retry: RetryConfig,
    pub stream: StreamConfig,
    pub queue: QueueConfig,
    pub monitor: MonitorConfig,
    pub selector: SelectorConfig,
    /// Small resource fetched by the network speed probe.
    pub probe_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConfig {
    pub max_sockets: usize,
    pub max_free_sockets: usize,
    pub idle_timeout_secs: u64,
    pub keepalive_secs: u64,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub read_timeout_secs: u64,
    pub warmup_timeout_secs: u64,
    pub referer: Option<String>,
    pub proxy: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RetryConfig {
    /// Total number of attempts, the first one included.
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct StreamConfig {
    pub min_buffer_size: usize,
    pub default_buffer_size: usize,
    pub max_buffer_size: usize,
    pub small_file_threshold: u64,
    pub large_file_threshold: u64,
    pub progress_throttle_ms: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct QueueConfig {
    pub max_concurrent: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct MonitorConfig {
    pub history_capacity: usize,
    pub slow_download_mbps: f64,
    pub high_memory_mb: f64,
    pub long_duration_secs: u64,
    pub adaptive_window: usize,
    pub adaptive_min_samples: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SelectorConfig {
    pub hd_marker: String,
    pub video_marker: String,
    pub audio_marker: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            max_sockets: 10,
            max_free_sockets: 5,
            idle_timeout_secs: 15,
            keepalive_secs: 30,
            connect_timeout_secs: 15,
            request_timeout_secs: 60,
            read_timeout_secs: 60,
            warmup_timeout_secs: 5,
            referer: None,
            proxy: None,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            min_buffer_size: 32 * 1024,
            default_buffer_size: 128 * 1024,
            max_buffer_size: 512 * 1024,
            small_file_threshold: 5 * 1024 * 1024,
            large_file_threshold: 50 * 1024 * 1024,
            progress_throttle_ms: 100,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { max_concurrent: 2 }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            history_capacity: 100,
            slow_download_mbps: 1.0,
            high_memory_mb: 100.0,
            long_duration_secs: 300,
            adaptive_window: 10,
            adaptive_min_samples: 5,
        }
    }
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            hd_marker: "HD".to_string(),
            video_marker: "MP4".to_string(),
            audio_marker: "MP3".to_string(),
        }
    }
}

impl AppConfig {
    /// Loads defaults, then the user config file (if any), then `MEDIA_RELAY__*` variables.
    pub fn load() -> Result<Self> {
        let path = Self::get_config_path();
        Self::load_layered(path.as_deref())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        Self::load_layered(Some(path))
    }

    fn load_layered(path: Option<&Path>) -> Result<Self> {
        let defaults = config::Config::try_from(&AppConfig::default())?;
        let mut builder = config::Config::builder().add_source(defaults);

        if let Some(path) = path {
            log::info!("⚙️ [CONFIG] Reading configuration from {:?}", path);
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Json)
                    .required(false),
            );
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    fn get_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("media-relay").join("config.json"))
    }
}

impl HttpConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}
