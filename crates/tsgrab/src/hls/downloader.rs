// Wires locator, manifest fetcher, parser and orchestrator into a single run.

use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::client::HttpClient;
use crate::hls::events::EventCallback;
use crate::hls::fetcher::{SegmentDownloader, SegmentFetcher};
use crate::hls::locator::ManifestLocator;
use crate::hls::manifest::{ManifestFetcher, read_manifest};
use crate::hls::orchestrator::{DownloadOrchestrator, DownloadOutcome};
use crate::hls::playlist::parse_segments;
use crate::hls::probe::{HttpLatencyProbe, LatencyProbe};
use crate::hls::segment::{ManifestReference, SegmentDescriptor};
use crate::{DownloadConfig, DownloadError};

/// Manifest resolved and parsed, ready for the orchestrator.
#[derive(Debug, Clone)]
pub struct PreparedRun {
    pub reference: ManifestReference,
    pub segments: Vec<SegmentDescriptor>,
    /// The manifest could not be fetched and the copy already on disk was used.
    pub from_disk: bool,
}

pub struct HlsDownloader {
    locator: ManifestLocator,
    manifest_fetcher: ManifestFetcher,
    orchestrator: DownloadOrchestrator,
}

impl HlsDownloader {
    pub fn new(client: HttpClient, config: DownloadConfig) -> Self {
        let probe = Arc::new(HttpLatencyProbe::new(client.clone()));
        Self::with_probe(client, config, probe)
    }

    pub fn with_probe(
        client: HttpClient,
        config: DownloadConfig,
        probe: Arc<dyn LatencyProbe>,
    ) -> Self {
        let fetcher: Arc<dyn SegmentDownloader> = Arc::new(SegmentFetcher::new(client.clone()));
        Self {
            locator: ManifestLocator::new(client.clone()),
            manifest_fetcher: ManifestFetcher::new(client, config.timeout()),
            orchestrator: DownloadOrchestrator::new(fetcher, probe, config),
        }
    }

    pub fn with_events(mut self, on_event: EventCallback) -> Self {
        self.orchestrator = self.orchestrator.with_events(on_event);
        self
    }

    pub async fn locate(&self, raw_url: &str) -> Result<ManifestReference, DownloadError> {
        self.locator.locate(raw_url).await
    }

    /// Fetches and parses the manifest into `dest_dir`.
    ///
    /// When the fetch fails but a manifest from an earlier run is on disk, that copy
    /// is used so an interrupted download can still be resumed after its URL expired.
    pub async fn prepare(
        &self,
        reference: ManifestReference,
        dest_dir: &Path,
        token: &CancellationToken,
    ) -> Result<PreparedRun, DownloadError> {
        let (content, from_disk) = match self
            .manifest_fetcher
            .fetch_manifest(&reference, dest_dir, token)
            .await
        {
            Ok(manifest) => (manifest.content, false),
            Err(e @ DownloadError::ManifestFetch { .. }) => match read_manifest(dest_dir).await {
                Ok(content) => {
                    warn!(error = %e, "Manifest fetch failed, resuming from the copy on disk");
                    (content, true)
                }
                Err(_) => return Err(e),
            },
            Err(e) => return Err(e),
        };

        let segments = parse_segments(&content, &reference)?;
        info!(segments = segments.len(), from_disk, "Manifest ready");
        Ok(PreparedRun {
            reference,
            segments,
            from_disk,
        })
    }

    pub async fn run(
        &self,
        prepared: &PreparedRun,
        dest_dir: &Path,
        token: &CancellationToken,
    ) -> Result<DownloadOutcome, DownloadError> {
        self.orchestrator
            .run(&prepared.segments, dest_dir, token)
            .await
    }

    /// Locate, fetch, parse and download in one call.
    pub async fn download(
        &self,
        raw_url: &str,
        dest_dir: &Path,
        token: &CancellationToken,
    ) -> Result<DownloadOutcome, DownloadError> {
        let reference = self.locate(raw_url).await?;
        let prepared = self.prepare(reference, dest_dir, token).await?;
        self.run(&prepared, dest_dir, token).await
    }
}
