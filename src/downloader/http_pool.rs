use std::sync::Arc;
use std::time::{Duration, Instant};
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use rand::seq::SliceRandom;
use reqwest::header::{
    HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, CONTENT_TYPE, REFERER,
    UPGRADE_INSECURE_REQUESTS, USER_AGENT,
};
use reqwest::{Client, ClientBuilder, Proxy, Url};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use crate::config::HttpConfig;
use crate::errors::{AppError, Result, TransportErrorKind};

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (iPhone; CPU iPhone OS 14_7_1 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/14.1.2 Mobile/15E148 Safari/604.1",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 15_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/15.0 Mobile/15E148 Safari/604.1",
    "Mozilla/5.0 (Linux; Android 10; SM-G975F) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.120 Mobile Safari/537.36",
    "Mozilla/5.0 (Linux; Android 11; Pixel 5) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/90.0.4430.91 Mobile Safari/537.36",
];

const MEDIA_ACCEPT: &str = "video/*, audio/*, */*";
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);
pub const PROBE_FALLBACK_MBPS: f64 = 5.0;

pub fn random_user_agent() -> &'static str {
    USER_AGENTS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(USER_AGENTS[0])
}

/// Lazy, non-restartable body. Holds a socket permit until dropped.
pub type BodyStream = BoxStream<'static, Result<Bytes>>;

pub struct MediaResponse {
    pub status: u16,
    pub content_length: Option<u64>,
    pub content_type: Option<String>,
    pub headers: HeaderMap,
    pub body: BodyStream,
}

impl std::fmt::Debug for MediaResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaResponse")
            .field("status", &self.status)
            .field("content_length", &self.content_length)
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

/// Keep-alive client for one URL scheme, with a cap on in-flight requests.
struct SchemePool {
    client: Client,
    sockets: Arc<Semaphore>,
}

impl SchemePool {
    fn new(config: &HttpConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config)?,
            sockets: Arc::new(Semaphore::new(config.max_sockets.max(1))),
        })
    }

    async fn acquire(&self) -> Result<OwnedSemaphorePermit> {
        self.sockets
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AppError::transport(TransportErrorKind::Other, "connection pool closed"))
    }
}

fn build_client(config: &HttpConfig) -> Result<Client> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));
    if let Some(referer) = &config.referer {
        let value = HeaderValue::from_str(referer)
            .map_err(|e| AppError::InvalidInput(format!("Invalid referer: {}", e)))?;
        headers.insert(REFERER, value);
    }

    let mut builder = ClientBuilder::new()
        .default_headers(headers)
        .pool_max_idle_per_host(config.max_free_sockets)
        .pool_idle_timeout(Some(Duration::from_secs(config.idle_timeout_secs)))
        .connect_timeout(config.connect_timeout())
        .gzip(true)
        .brotli(true)
        .http1_title_case_headers()
        .tcp_keepalive(Duration::from_secs(config.keepalive_secs))
        .tcp_nodelay(true)
        .redirect(reqwest::redirect::Policy::limited(5));

    if let Some(proxy_url) = &config.proxy {
        log::info!("🌐 [HTTP] Using proxy: {}", proxy_url);
        let proxy = Proxy::all(proxy_url)
            .map_err(|e| AppError::InvalidInput(format!("Invalid proxy: {}", e)))?;
        builder = builder.proxy(proxy);
    }

    builder.build().map_err(|e| {
        AppError::Config(config::ConfigError::Message(format!(
            "Could not build HTTP client: {}",
            e
        )))
    })
}

/// Pooled HTTP client shared by every download.
pub struct HttpPool {
    http: SchemePool,
    https: SchemePool,
    config: HttpConfig,
}

impl HttpPool {
    pub fn new(config: HttpConfig) -> Result<Self> {
        Ok(Self {
            http: SchemePool::new(&config)?,
            https: SchemePool::new(&config)?,
            config,
        })
    }

    fn pool_for(&self, url: &Url) -> Result<&SchemePool> {
        match url.scheme() {
            "http" => Ok(&self.http),
            "https" => Ok(&self.https),
            other => Err(AppError::InvalidInput(format!("Unsupported scheme: {}", other))),
        }
    }

    fn parse(url: &str) -> Result<Url> {
        Url::parse(url).map_err(|e| AppError::InvalidInput(format!("Invalid URL '{}': {}", url, e)))
    }

    /// Opens a streaming GET. Non-2xx statuses come back as `UpstreamHttp`.
    pub async fn download_stream(&self, url: &str) -> Result<MediaResponse> {
        let parsed = Self::parse(url)?;
        let pool = self.pool_for(&parsed)?;
        let permit = pool.acquire().await?;
        let started = Instant::now();

        log::info!("🚀 [HTTP] Opening stream: {}", truncate(url, 100));

        let request = pool
            .client
            .get(parsed)
            .header(USER_AGENT, random_user_agent())
            .header(ACCEPT, MEDIA_ACCEPT)
            .send();

        let response = match tokio::time::timeout(self.config.request_timeout(), request).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                log::error!("❌ [HTTP] Request failed: {}", e);
                return Err(AppError::from(e));
            }
            Err(_) => {
                log::error!("❌ [HTTP] Request timed out after {:?}", self.config.request_timeout());
                return Err(AppError::transport(
                    TransportErrorKind::Timeout,
                    format!("no response within {:?}", self.config.request_timeout()),
                ));
            }
        };

        let status = response.status();
        if !status.is_success() {
            log::warn!("⚠️ [HTTP] Upstream answered {} for {}", status, truncate(url, 100));
            return Err(AppError::UpstreamHttp {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let content_length = response.content_length();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let headers = response.headers().clone();

        log::info!(
            "📊 [HTTP] status={} size={} type={} ttfb={}ms",
            status.as_u16(),
            content_length
                .map(|len| format!("{:.2}MB", len as f64 / (1024.0 * 1024.0)))
                .unwrap_or_else(|| "unknown".to_string()),
            content_type.as_deref().unwrap_or("unknown"),
            started.elapsed().as_millis()
        );

        let read_timeout = self.config.read_timeout();
        let chunks = Box::pin(response.bytes_stream());
        let body = futures::stream::unfold((chunks, permit), move |(mut chunks, permit)| async move {
            match tokio::time::timeout(read_timeout, chunks.next()).await {
                Ok(Some(Ok(chunk))) => Some((Ok(chunk), (chunks, permit))),
                Ok(Some(Err(e))) => Some((Err(AppError::from(e)), (chunks, permit))),
                Ok(None) => None,
                Err(_) => Some((
                    Err(AppError::transport(
                        TransportErrorKind::Timeout,
                        format!("no data within {:?}", read_timeout),
                    )),
                    (chunks, permit),
                )),
            }
        })
        .boxed();

        Ok(MediaResponse {
            status: status.as_u16(),
            content_length,
            content_type,
            headers,
            body,
        })
    }

    /// Pre-establishes a connection to the URL's origin. Never fails.
    pub async fn warmup_connection(&self, url: &str) {
        let result = async {
            let parsed = Self::parse(url)?;
            let pool = self.pool_for(&parsed)?;
            let origin = parsed.origin().ascii_serialization();
            let _permit = pool.acquire().await?;

            log::info!("🔥 [HTTP] Warming up connection: {}", origin);
            pool.client
                .head(origin.as_str())
                .header(USER_AGENT, random_user_agent())
                .timeout(Duration::from_secs(self.config.warmup_timeout_secs))
                .send()
                .await?;
            Ok::<(), AppError>(())
        }
        .await;

        match result {
            Ok(()) => log::info!("✅ [HTTP] Connection warmed up"),
            Err(e) => log::info!("⚠️ [HTTP] Warm-up failed, continuing: {}", e),
        }
    }

    /// Times a small GET and returns an estimate in Mbps (at least 1, 5 when the probe fails).
    pub async fn probe_network_speed(&self, probe_url: &str) -> f64 {
        let result = async {
            let parsed = Self::parse(probe_url)?;
            let pool = self.pool_for(&parsed)?;
            let _permit = pool.acquire().await?;
            let started = Instant::now();

            let response = pool
                .client
                .get(parsed)
                .header(USER_AGENT, random_user_agent())
                .timeout(PROBE_TIMEOUT)
                .send()
                .await?;
            let body = response.bytes().await?;
            Ok::<(usize, Duration), AppError>((body.len(), started.elapsed()))
        }
        .await;

        match result {
            Ok((size, elapsed)) => {
                let size = if size == 0 { 1024 } else { size };
                let secs = elapsed.as_secs_f64().max(0.001);
                let mbps = (size as f64 * 8.0) / secs / 1_000_000.0;
                log::info!("📶 [HTTP] Estimated network speed: {:.1} Mbps", mbps);
                mbps.max(1.0)
            }
            Err(e) => {
                log::warn!("⚠️ [HTTP] Speed probe failed: {}", e);
                PROBE_FALLBACK_MBPS
            }
        }
    }
}

pub(crate) fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
