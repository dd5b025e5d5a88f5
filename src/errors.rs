use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Network-level failure classes reported by the pooled client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportErrorKind {
    ConnectionReset,
    Timeout,
    Dns,
    Connect,
    Other,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportErrorKind::ConnectionReset => "connection reset",
            TransportErrorKind::Timeout => "timeout",
            TransportErrorKind::Dns => "dns failure",
            TransportErrorKind::Connect => "connect failure",
            TransportErrorKind::Other => "transport failure",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("No usable {0} link found")]
    NoCandidateLink(String),

    #[error("Transport error ({kind}): {message}")]
    Transport {
        kind: TransportErrorKind,
        message: String,
    },

    #[error("Upstream HTTP error: {status} for {url}")]
    UpstreamHttp { status: u16, url: String },

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Operation failed after {attempts} attempts: {source}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        source: Box<AppError>,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// How the retry controller should treat a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retry,
    /// Retryable, but the base delay doubles for the rest of the call (HTTP 429).
    RetryEscalated,
    Fatal,
}

impl AppError {
    pub fn transport(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        AppError::Transport {
            kind,
            message: message.into(),
        }
    }

    pub fn retry_disposition(&self) -> RetryDisposition {
        match self {
            AppError::Transport { .. } => RetryDisposition::Retry,
            AppError::UpstreamHttp { status, .. } => match *status {
                429 => RetryDisposition::RetryEscalated,
                500..=599 => RetryDisposition::Retry,
                _ => RetryDisposition::Fatal,
            },
            _ => RetryDisposition::Fatal,
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            AppError::NoCandidateLink(_) | AppError::InvalidInput(_) => 400,
            _ => 500,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AppError::NoCandidateLink(_) => "no_candidate_link",
            AppError::Transport { .. } => "transport_error",
            AppError::UpstreamHttp { .. } => "upstream_http_error",
            AppError::Stream(_) => "stream_error",
            AppError::RetryExhausted { .. } => "retry_exhausted",
            AppError::Config(_) => "config_error",
            AppError::Io(_) => "io_error",
            AppError::Json(_) => "json_error",
            AppError::InvalidInput(_) => "invalid_input",
        }
    }
}

impl From<reqwest::Error> for AppError {
    fn from(error: reqwest::Error) -> Self {
        if let Some(status) = error.status() {
            return AppError::UpstreamHttp {
                status: status.as_u16(),
                url: error.url().map(|u| u.to_string()).unwrap_or_default(),
            };
        }
        AppError::transport(classify_transport(&error), error.to_string())
    }
}

fn classify_transport(error: &reqwest::Error) -> TransportErrorKind {
    if error.is_timeout() {
        return TransportErrorKind::Timeout;
    }

    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(error);
    while let Some(err) = source {
        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            match io.kind() {
                std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::BrokenPipe => return TransportErrorKind::ConnectionReset,
                std::io::ErrorKind::TimedOut => return TransportErrorKind::Timeout,
                _ => {}
            }
        }
        let text = err.to_string().to_lowercase();
        if text.contains("dns error") || text.contains("failed to lookup address") {
            return TransportErrorKind::Dns;
        }
        source = err.source();
    }

    if error.is_connect() {
        TransportErrorKind::Connect
    } else {
        TransportErrorKind::Other
    }
}

/// JSON body sent to the caller when a download fails before any header went out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: String,
    pub status: u16,
}

impl From<&AppError> for ErrorResponse {
    fn from(error: &AppError) -> Self {
        Self {
            error: error.to_string(),
            kind: error.kind().to_string(),
            status: error.status_code(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
