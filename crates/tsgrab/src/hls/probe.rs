// Network-condition probe used once per run to bound concurrency.

use std::fmt;
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, info};
use url::Url;

use crate::client::{HeaderProfile, HttpClient};

pub const DEFAULT_PROBE_ENDPOINT: &str = "https://www.google.com";
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

static DEFAULT_ENDPOINT: LazyLock<Option<Url>> =
    LazyLock::new(|| Url::parse(DEFAULT_PROBE_ENDPOINT).ok());

const FAST_THRESHOLD: Duration = Duration::from_millis(100);
const MEDIUM_THRESHOLD: Duration = Duration::from_millis(500);

const MEDIUM_CEILING: usize = 20;
const SLOW_CEILING: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkTier {
    Fast,
    Medium,
    Slow,
    Unknown,
}

impl NetworkTier {
    pub fn from_latency(latency: Duration) -> Self {
        if latency < FAST_THRESHOLD {
            Self::Fast
        } else if latency < MEDIUM_THRESHOLD {
            Self::Medium
        } else {
            Self::Slow
        }
    }
}

impl fmt::Display for NetworkTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Fast => "fast",
            Self::Medium => "medium",
            Self::Slow => "slow",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Worker count for a tier, never above the user's ceiling.
pub fn select_concurrency(tier: NetworkTier, max_threads: usize) -> usize {
    let selected = match tier {
        NetworkTier::Fast | NetworkTier::Unknown => max_threads,
        NetworkTier::Medium => max_threads.min(MEDIUM_CEILING),
        NetworkTier::Slow => max_threads.min(SLOW_CEILING),
    };
    selected.max(1)
}

#[async_trait]
pub trait LatencyProbe: Send + Sync {
    async fn probe(&self) -> NetworkTier;
}

/// Times a single request to a well-known endpoint.
pub struct HttpLatencyProbe {
    client: HttpClient,
    /// `None` when no endpoint could be parsed; the probe then reports `Unknown`.
    endpoint: Option<Url>,
    timeout: Duration,
}

impl HttpLatencyProbe {
    pub fn new(client: HttpClient) -> Self {
        Self {
            client,
            endpoint: DEFAULT_ENDPOINT.clone(),
            timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    pub fn with_endpoint(mut self, endpoint: Url) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl LatencyProbe for HttpLatencyProbe {
    async fn probe(&self) -> NetworkTier {
        let Some(endpoint) = &self.endpoint else {
            debug!("No probe endpoint configured");
            return NetworkTier::Unknown;
        };
        let started = Instant::now();
        let result = self
            .client
            .get(endpoint, HeaderProfile::Minimal)
            .timeout(self.timeout)
            .send()
            .await;
        let latency = started.elapsed();

        let tier = match result {
            Ok(response) if response.status().is_success() => NetworkTier::from_latency(latency),
            Ok(response) => {
                debug!(status = %response.status(), "Probe endpoint returned non-success status");
                NetworkTier::Unknown
            }
            Err(e) => {
                debug!(error = %e, "Network probe failed");
                NetworkTier::Unknown
            }
        };
        info!(latency_ms = latency.as_millis() as u64, %tier, "Network condition probed");
        tier
    }
}

/// Always reports the same tier. Useful when probing is disabled.
#[derive(Debug, Clone, Copy)]
pub struct FixedTier(pub NetworkTier);

#[async_trait]
impl LatencyProbe for FixedTier {
    async fn probe(&self) -> NetworkTier {
        self.0
    }
}
