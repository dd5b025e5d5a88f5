pub mod config;
pub mod downloader;
pub mod errors;
pub mod utils;

pub use config::AppConfig;
pub use downloader::manager::{DownloadOrchestrator, DownloadOutcome};
pub use downloader::sink::{FileSink, MediaSink, ResponseHead};
pub use downloader::{AudioRequest, DownloadLink, MediaKind, VideoRequest};
pub use errors::{AppError, ErrorResponse, Result};
