use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};

use crate::DownloadError;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/142.0.0.0 Safari/537.36";

pub const MIN_THREADS: usize = 1;
pub const MAX_THREADS: usize = 20;
pub const MIN_CHUNK_SIZE: usize = 256 * 1024;
pub const MAX_CHUNK_SIZE: usize = 4096 * 1024;
pub const MIN_TIMEOUT_SECS: u64 = 5;
pub const MAX_TIMEOUT_SECS: u64 = 30;

/// Per-run download settings. Immutable for the duration of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Upper bound on concurrent segment fetches (1-20)
    pub max_threads: usize,

    /// Write buffer size used when streaming a segment to disk (256 KiB - 4 MiB)
    pub chunk_size_bytes: usize,

    /// Per-request timeout in seconds (5-30)
    pub timeout_secs: u64,

    /// Keep the manifest's file names instead of `NNNN.<ext>`
    pub use_original_filenames: bool,

    /// Emit a throughput status line at most once per second
    pub show_speed: bool,

    /// Attempts per download path of a segment
    pub max_retries: u32,

    /// Fixed delay between attempts, in milliseconds
    pub retry_delay_ms: u64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_threads: 10,
            chunk_size_bytes: 1024 * 1024,
            timeout_secs: 15,
            use_original_filenames: false,
            show_speed: true,
            max_retries: 3,
            retry_delay_ms: 1000,
        }
    }
}

impl DownloadConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Rejects values outside the supported ranges.
    ///
    /// Meant for configuration loaders; the engine itself trusts whatever it is handed.
    pub fn validate(&self) -> Result<(), DownloadError> {
        if !(MIN_THREADS..=MAX_THREADS).contains(&self.max_threads) {
            return Err(DownloadError::configuration(format!(
                "max_threads must be between {MIN_THREADS} and {MAX_THREADS}, got {}",
                self.max_threads
            )));
        }
        if !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&self.chunk_size_bytes) {
            return Err(DownloadError::configuration(format!(
                "chunk size must be between {} KB and {} KB, got {} bytes",
                MIN_CHUNK_SIZE / 1024,
                MAX_CHUNK_SIZE / 1024,
                self.chunk_size_bytes
            )));
        }
        if !(MIN_TIMEOUT_SECS..=MAX_TIMEOUT_SECS).contains(&self.timeout_secs) {
            return Err(DownloadError::configuration(format!(
                "timeout must be between {MIN_TIMEOUT_SECS} and {MAX_TIMEOUT_SECS} seconds, got {}",
                self.timeout_secs
            )));
        }
        if self.max_retries == 0 {
            return Err(DownloadError::configuration(
                "max_retries must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Settings for the shared HTTP client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// User agent sent with every header profile
    pub user_agent: String,

    /// Connection timeout (time to establish initial connection)
    pub connect_timeout: Duration,

    /// Read timeout (maximum time between receiving data chunks)
    pub read_timeout: Duration,

    /// Extra headers merged into every request
    pub headers: HeaderMap,

    /// Proxy URL (`http://`, `https://` or `socks5://`), applied to all schemes
    pub proxy: Option<String>,

    /// Whether to use system proxy settings if no explicit proxy is set
    pub use_system_proxy: bool,

    /// Maximum idle connections to keep per host
    pub pool_max_idle_per_host: usize,

    /// Duration to keep idle connections alive before closing
    pub pool_idle_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(15),
            headers: HeaderMap::new(),
            proxy: None,
            use_system_proxy: true,
            // Sized for up to MAX_THREADS workers hitting one CDN host.
            pool_max_idle_per_host: 50,
            pool_idle_timeout: Duration::from_secs(30),
        }
    }
}

impl ClientConfig {
    /// Inserts an extra header sent with every request.
    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self, DownloadError> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| DownloadError::configuration(format!("invalid header name `{name}`: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| DownloadError::configuration(format!("invalid header value: {e}")))?;
        self.headers.insert(name, value);
        Ok(self)
    }
}
