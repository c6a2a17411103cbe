// Segment Fetcher: downloads one segment to disk with ranged resume, the header ladder
// and a bounded retry loop.

use std::path::Path;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{CONTENT_RANGE, RANGE};
use reqwest::{RequestBuilder, Response, StatusCode};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};
use url::Url;

use crate::client::{HeaderProfile, HttpClient};
use crate::hls::segment::SegmentDescriptor;
use crate::retry::{RetryAction, RetryPolicy, retry_with_backoff};
use crate::{DownloadConfig, DownloadError};

/// Terminal result of fetching one segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// `bytes` counts what was received in this fetch, excluding a resumed prefix.
    Complete { bytes: u64 },
    Failed { reason: String },
    /// Stopped at a chunk boundary or retry check; partial data stays on disk.
    Cancelled,
}

#[async_trait]
pub trait SegmentDownloader: Send + Sync {
    async fn fetch(
        &self,
        descriptor: &SegmentDescriptor,
        target: &Path,
        config: &DownloadConfig,
        token: &CancellationToken,
    ) -> FetchOutcome;
}

pub struct SegmentFetcher {
    client: HttpClient,
}

impl SegmentFetcher {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }

    async fn attempt(
        &self,
        url: &Url,
        target: &Path,
        config: &DownloadConfig,
        token: &CancellationToken,
    ) -> RetryAction<u64> {
        match self.try_once(url, target, config, token).await {
            Ok(bytes) => RetryAction::Success(bytes),
            Err(DownloadError::Cancelled) => RetryAction::Fail(DownloadError::Cancelled),
            Err(e) if e.is_retryable() => RetryAction::Retry(e),
            Err(e) => RetryAction::Fail(e),
        }
    }

    async fn try_once(
        &self,
        url: &Url,
        target: &Path,
        config: &DownloadConfig,
        token: &CancellationToken,
    ) -> Result<u64, DownloadError> {
        let existing = existing_len(target).await;
        if existing > 0
            && let Some(written) = self.resume(url, target, existing, config, token).await?
        {
            return Ok(written);
        }
        self.download_full(url, target, config, token).await
    }

    /// Continues a partial file and returns the bytes appended. `None` when the server
    /// ignores the range or answers from another offset; the partial file has been
    /// removed by then.
    async fn resume(
        &self,
        url: &Url,
        target: &Path,
        offset: u64,
        config: &DownloadConfig,
        token: &CancellationToken,
    ) -> Result<Option<u64>, DownloadError> {
        let request = self
            .client
            .get(url, HeaderProfile::Browser)
            .header(RANGE, format!("bytes={offset}-"));
        let response = send(request, config).await?;

        if response.status() != StatusCode::PARTIAL_CONTENT {
            debug!(status = %response.status(), offset, "Range not honored, restarting segment");
            remove_partial(target).await?;
            return Ok(None);
        }

        let start = response
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|value| value.to_str().ok())
            .and_then(content_range_start);
        if start != Some(offset) {
            debug!(
                offset,
                ?start,
                "Partial response does not continue the file, restarting segment"
            );
            remove_partial(target).await?;
            return Ok(None);
        }

        debug!(offset, "Resuming partial segment");
        let file = OpenOptions::new().append(true).open(target).await?;
        let written = stream_body(response, file, config, token).await?;
        Ok(Some(written))
    }

    async fn download_full(
        &self,
        url: &Url,
        target: &Path,
        config: &DownloadConfig,
        token: &CancellationToken,
    ) -> Result<u64, DownloadError> {
        for profile in HeaderProfile::LADDER {
            let response = send(self.client.get(url, profile), config).await?;
            let status = response.status();

            if status == StatusCode::FORBIDDEN {
                debug!(?profile, "Segment request forbidden, escalating header strategy");
                continue;
            }
            if !status.is_success() {
                return Err(DownloadError::http_status(status, url.as_str(), "segment fetch"));
            }

            trace!(?profile, content_length = ?response.content_length(), "Streaming segment");
            let file = File::create(target).await?;
            return stream_body(response, file, config, token).await;
        }

        Err(DownloadError::segment_fetch(
            format!("{url} forbidden with every header strategy"),
            true,
        ))
    }
}

#[async_trait]
impl SegmentDownloader for SegmentFetcher {
    #[instrument(skip_all, fields(segment = descriptor.sequence_index, url = %descriptor.source_url))]
    async fn fetch(
        &self,
        descriptor: &SegmentDescriptor,
        target: &Path,
        config: &DownloadConfig,
        token: &CancellationToken,
    ) -> FetchOutcome {
        let policy = RetryPolicy::fixed(config.max_retries, config.retry_delay());
        let url = &descriptor.source_url;
        let result =
            retry_with_backoff(&policy, token, |_| self.attempt(url, target, config, token)).await;

        match result {
            Ok(bytes) => {
                trace!(bytes, "Segment complete");
                FetchOutcome::Complete { bytes }
            }
            Err(DownloadError::Cancelled) => FetchOutcome::Cancelled,
            Err(e) => {
                warn!(error = %e, "Segment failed");
                FetchOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }
}

/// Sends the request, bounding the wait for response headers by the configured timeout.
async fn send(request: RequestBuilder, config: &DownloadConfig) -> Result<Response, DownloadError> {
    match tokio::time::timeout(config.timeout(), request.send()).await {
        Ok(response) => Ok(response?),
        Err(_) => Err(DownloadError::segment_fetch(
            format!("no response within {}s", config.timeout_secs),
            true,
        )),
    }
}

/// Streams the body through a `chunk_size_bytes` write buffer.
///
/// Bytes received before a cancellation or stream error are flushed so the next
/// attempt can resume from them.
async fn stream_body(
    response: Response,
    file: File,
    config: &DownloadConfig,
    token: &CancellationToken,
) -> Result<u64, DownloadError> {
    let mut writer = BufWriter::with_capacity(config.chunk_size_bytes, file);
    let mut stream = response.bytes_stream();
    let idle = config.timeout();
    let mut written = 0u64;

    let result = loop {
        let next = tokio::select! {
            biased;
            _ = token.cancelled() => break Err(DownloadError::Cancelled),
            next = tokio::time::timeout(idle, stream.next()) => next,
        };
        match next {
            Err(_) => {
                break Err(DownloadError::segment_fetch(
                    format!("no data received for {}s", idle.as_secs()),
                    true,
                ));
            }
            Ok(None) => break Ok(written),
            Ok(Some(Err(e))) => break Err(e.into()),
            Ok(Some(Ok(chunk))) => {
                if let Err(e) = writer.write_all(&chunk).await {
                    break Err(e.into());
                }
                written += chunk.len() as u64;
            }
        }
    };

    let flushed = writer.flush().await;
    let written = result?;
    flushed?;
    Ok(written)
}

/// First byte position of a `Content-Range: bytes <start>-<end>/<total>` value.
fn content_range_start(value: &str) -> Option<u64> {
    let range = value.trim().strip_prefix("bytes")?.trim_start();
    let (start, _) = range.split_once('-')?;
    start.trim().parse().ok()
}

async fn existing_len(path: &Path) -> u64 {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.len())
        .unwrap_or(0)
}

async fn remove_partial(path: &Path) -> Result<(), DownloadError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_range_start_positions() {
        assert_eq!(content_range_start("bytes 1000-65535/65536"), Some(1000));
        assert_eq!(content_range_start("bytes 0-99/*"), Some(0));
        assert_eq!(content_range_start("bytes */65536"), None);
        assert_eq!(content_range_start("items 0-1/2"), None);
    }

    #[tokio::test]
    async fn existing_len_of_missing_file_is_zero() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(existing_len(&dir.path().join("0001.ts.part")).await, 0);
    }

    #[tokio::test]
    async fn remove_partial_tolerates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("0001.ts.part");
        remove_partial(&path).await.unwrap();
        tokio::fs::write(&path, b"abc").await.unwrap();
        remove_partial(&path).await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn unreachable_host_fails_after_retries() {
        let dir = tempfile::tempdir().unwrap();
        let client = HttpClient::new(&crate::ClientConfig {
            use_system_proxy: false,
            ..crate::ClientConfig::default()
        })
        .unwrap();
        let fetcher = SegmentFetcher::new(client);
        let config = DownloadConfig {
            max_retries: 2,
            retry_delay_ms: 1,
            timeout_secs: 5,
            ..DownloadConfig::default()
        };
        let descriptor = SegmentDescriptor {
            sequence_index: 0,
            // Port 9 on loopback refuses connections.
            source_url: Url::parse("http://127.0.0.1:9/seg-0.ts").unwrap(),
            suggested_filename: "seg-0.ts".into(),
        };
        let target = dir.path().join("0000.ts.part");
        let outcome = fetcher
            .fetch(&descriptor, &target, &config, &CancellationToken::new())
            .await;
        assert!(matches!(outcome, FetchOutcome::Failed { .. }));
    }
}
