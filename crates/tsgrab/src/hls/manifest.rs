// Manifest Fetcher: downloads the playlist with the header ladder and persists it in the
// destination directory under a fixed name.

use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::StatusCode;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::client::{HeaderProfile, HttpClient};
use crate::error::ManifestFetchKind;
use crate::hls::segment::ManifestReference;
use crate::retry::{RetryAction, RetryPolicy, is_retryable_reqwest_error, retry_with_backoff};
use crate::DownloadError;

/// Name of the persisted manifest inside the destination directory.
pub const MANIFEST_FILENAME: &str = "playlist.m3u8";

/// First line of a well-formed playlist.
pub const MANIFEST_MARKER: &str = "#EXTM3U";

/// Number of leading characters inspected when re-verifying the persisted file.
const VERIFY_PREFIX_CHARS: usize = 100;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// A manifest stored on disk.
#[derive(Debug, Clone)]
pub struct PersistedManifest {
    pub path: PathBuf,
    pub content: String,
    /// Whether the body contained a playlist marker or a segment reference.
    pub looks_like_playlist: bool,
    /// Header profile that got the successful response.
    pub profile: HeaderProfile,
}

pub fn manifest_path(dest_dir: &Path) -> PathBuf {
    dest_dir.join(MANIFEST_FILENAME)
}

/// Loose plausibility check; manifests vary in extension and encoding across origins.
pub fn looks_like_playlist(content: &str) -> bool {
    content.contains(MANIFEST_MARKER) || content.contains(".ts")
}

/// Reads the persisted manifest, tolerating invalid UTF-8.
pub async fn read_manifest(dest_dir: &Path) -> Result<String, DownloadError> {
    let path = manifest_path(dest_dir);
    match tokio::fs::read(&path).await {
        Ok(bytes) => Ok(String::from_utf8_lossy(strip_bom(&bytes)).into_owned()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(DownloadError::ManifestMissing { path })
        }
        Err(e) => Err(DownloadError::directory_io(path, e)),
    }
}

fn strip_bom(bytes: &[u8]) -> &[u8] {
    bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes)
}

pub struct ManifestFetcher {
    client: HttpClient,
    timeout: Duration,
    retry: RetryPolicy,
}

impl ManifestFetcher {
    pub fn new(client: HttpClient, timeout: Duration) -> Self {
        Self {
            client,
            timeout,
            // Transport errors, 429 and 5xx: three attempts, 0.5 s doubling.
            retry: RetryPolicy::exponential(3, Duration::from_millis(500), Duration::from_secs(4)),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Fetches the manifest and stores it as [`MANIFEST_FILENAME`] in `dest_dir`.
    ///
    /// The directory is created before any request is sent.
    #[instrument(skip_all, fields(url = %reference))]
    pub async fn fetch_manifest(
        &self,
        reference: &ManifestReference,
        dest_dir: &Path,
        token: &CancellationToken,
    ) -> Result<PersistedManifest, DownloadError> {
        tokio::fs::create_dir_all(dest_dir)
            .await
            .map_err(|e| DownloadError::directory_io(dest_dir, e))?;

        let (body, profile) =
            retry_with_backoff(&self.retry, token, |_| self.fetch_once(reference)).await?;

        let content = String::from_utf8_lossy(strip_bom(&body)).into_owned();
        let plausible = looks_like_playlist(&content);
        if !plausible {
            warn!(url = %reference, "Downloaded content does not look like an m3u8 playlist");
        }

        let path = manifest_path(dest_dir);
        persist(&path, &body).await?;
        info!(path = %path.display(), bytes = body.len(), ?profile, "Manifest saved");

        Ok(PersistedManifest {
            path,
            content,
            looks_like_playlist: plausible,
            profile,
        })
    }

    /// One pass down the header ladder.
    async fn fetch_once(
        &self,
        reference: &ManifestReference,
    ) -> RetryAction<(Vec<u8>, HeaderProfile)> {
        let url = reference.url();
        for profile in HeaderProfile::LADDER {
            let response = match self
                .client
                .get(url, profile)
                .timeout(self.timeout)
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) if is_retryable_reqwest_error(&e) => return RetryAction::Retry(e.into()),
                Err(e) => return RetryAction::Fail(e.into()),
            };

            let status = response.status();
            debug!(?profile, %status, "Manifest response");

            if status.is_success() {
                return match response.bytes().await {
                    Ok(body) => RetryAction::Success((body.to_vec(), profile)),
                    Err(e) => RetryAction::Retry(e.into()),
                };
            }

            let kind = ManifestFetchKind::from_status(status);
            match status {
                StatusCode::FORBIDDEN => {
                    warn!(?profile, "Manifest request forbidden, escalating header strategy");
                    continue;
                }
                StatusCode::GONE => {
                    return RetryAction::Fail(DownloadError::manifest_fetch(kind, url.as_str()));
                }
                s if s.is_server_error() || s == StatusCode::TOO_MANY_REQUESTS => {
                    return RetryAction::Retry(DownloadError::manifest_fetch(kind, url.as_str()));
                }
                _ => return RetryAction::Fail(DownloadError::manifest_fetch(kind, url.as_str())),
            }
        }

        RetryAction::Fail(DownloadError::manifest_fetch(
            ManifestFetchKind::Forbidden,
            url.as_str(),
        ))
    }
}

/// Writes the manifest, preferring normalized text and falling back to the raw bytes,
/// then re-reads it and repairs from the raw bytes if the stored copy is implausible.
async fn persist(path: &Path, body: &[u8]) -> Result<(), DownloadError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Replacing existing manifest"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(DownloadError::directory_io(path, e)),
    }

    let write_result = match std::str::from_utf8(strip_bom(body)) {
        Ok(text) => tokio::fs::write(path, text.replace("\r\n", "\n")).await,
        Err(_) => {
            debug!(path = %path.display(), "Manifest is not valid UTF-8, storing raw bytes");
            tokio::fs::write(path, body).await
        }
    };
    write_result.map_err(|e| DownloadError::directory_io(path, e))?;

    if !verify(path).await {
        warn!(path = %path.display(), "Stored manifest failed verification, rewriting raw bytes");
        tokio::fs::write(path, body)
            .await
            .map_err(|e| DownloadError::directory_io(path, e))?;
    }
    Ok(())
}

async fn verify(path: &Path) -> bool {
    match tokio::fs::read(path).await {
        Ok(bytes) if !bytes.is_empty() => {
            let text = String::from_utf8_lossy(strip_bom(&bytes));
            let prefix: String = text.chars().take(VERIFY_PREFIX_CHARS).collect();
            prefix.contains(MANIFEST_MARKER)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plausibility_accepts_marker_or_segment_extension() {
        assert!(looks_like_playlist("#EXTM3U\n#EXTINF:2,\na.ts\n"));
        assert!(looks_like_playlist("a.ts\nb.ts\n"));
        assert!(!looks_like_playlist("<html>blocked</html>"));
    }

    #[tokio::test]
    async fn persist_normalizes_text_and_strips_bom() {
        let dir = tempfile::tempdir().unwrap();
        let path = manifest_path(dir.path());
        persist(&path, b"\xEF\xBB\xBF#EXTM3U\r\na.ts\r\n").await.unwrap();
        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), "#EXTM3U\na.ts\n");
    }

    #[tokio::test]
    async fn persist_keeps_raw_bytes_for_invalid_utf8() {
        let dir = tempfile::tempdir().unwrap();
        let path = manifest_path(dir.path());
        let body = b"#EXTM3U\n\xFFclip.ts\n";
        persist(&path, body).await.unwrap();
        assert_eq!(tokio::fs::read(&path).await.unwrap(), body.to_vec());
    }

    #[tokio::test]
    async fn persist_replaces_existing_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let path = manifest_path(dir.path());
        tokio::fs::write(&path, "#EXTM3U\nold.ts\n").await.unwrap();
        persist(&path, b"#EXTM3U\nnew.ts\n").await.unwrap();
        let content = read_manifest(dir.path()).await.unwrap();
        assert_eq!(content, "#EXTM3U\nnew.ts\n");
    }

    #[tokio::test]
    async fn read_manifest_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            read_manifest(dir.path()).await,
            Err(DownloadError::ManifestMissing { .. })
        ));
    }
}
