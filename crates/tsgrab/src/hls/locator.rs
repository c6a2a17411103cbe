// Manifest Locator: recovers the playlist URL from a manifest, segment or directory URL.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tracing::{debug, info, trace};
use url::Url;

use crate::client::{HeaderProfile, HttpClient};
use crate::hls::segment::ManifestReference;
use crate::DownloadError;

/// Manifest name appended to directory URLs and used as the final fallback.
pub const DEFAULT_MANIFEST_NAME: &str = "index.m3u8";

/// Conventional manifest names probed next to a segment, in order.
pub const CANDIDATE_MANIFEST_NAMES: [&str; 3] = ["index.m3u8", "playlist.m3u8", "master.m3u8"];

const SEGMENT_EXTENSIONS: [&str; 2] = ["ts", "m4s"];

static SEGMENT_CONVENTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"seg(?:ment)?-\d").expect("valid segment convention regex"));

/// What the path of a user-supplied URL points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlKind {
    Manifest,
    Segment,
    Directory,
}

pub fn classify(url: &Url) -> UrlKind {
    let name = last_path_segment(url).to_ascii_lowercase();
    if name.contains(".m3u8") || name.ends_with(".m3u") {
        return UrlKind::Manifest;
    }
    match name.rsplit_once('.') {
        Some((_, ext)) if SEGMENT_EXTENSIONS.contains(&ext) => UrlKind::Segment,
        _ => UrlKind::Directory,
    }
}

fn last_path_segment(url: &Url) -> &str {
    url.path().rsplit('/').next().unwrap_or_default()
}

/// Candidate manifest URLs for a segment URL, plus the deterministic guess used
/// when none of them answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatorPlan {
    pub candidates: Vec<Url>,
    pub fallback: Url,
}

impl LocatorPlan {
    pub fn for_segment(url: &Url) -> Self {
        let path = url.path();
        let (dir, file_name) = path.rsplit_once('/').unwrap_or(("", path));
        let parent = dir.rsplit_once('/').map(|(parent, _)| parent).unwrap_or("");
        // Multi-variant streams keep segments one level below their manifest.
        let follows_convention = SEGMENT_CONVENTION.is_match(file_name);

        let mut candidates = Vec::with_capacity(CANDIDATE_MANIFEST_NAMES.len() + 1);
        if follows_convention {
            candidates.push(with_path(url, parent, DEFAULT_MANIFEST_NAME));
        }
        candidates.extend(
            CANDIDATE_MANIFEST_NAMES
                .iter()
                .map(|name| with_path(url, dir, name)),
        );

        let fallback = if follows_convention {
            with_path(url, parent, DEFAULT_MANIFEST_NAME)
        } else {
            with_path(url, dir, DEFAULT_MANIFEST_NAME)
        };

        Self {
            candidates,
            fallback,
        }
    }
}

/// `url` with its path replaced by `dir/name`; query preserved, fragment dropped.
fn with_path(url: &Url, dir: &str, name: &str) -> Url {
    let mut out = url.clone();
    out.set_path(&format!("{}/{name}", dir.trim_end_matches('/')));
    out.set_fragment(None);
    out
}

/// Directory URL with the default manifest name appended, query preserved.
pub fn directory_manifest(url: &Url) -> Url {
    with_path(url, url.path(), DEFAULT_MANIFEST_NAME)
}

/// Resolves a user-supplied URL to a manifest reference.
pub struct ManifestLocator {
    client: HttpClient,
    probe_timeout: Duration,
}

impl ManifestLocator {
    pub fn new(client: HttpClient) -> Self {
        Self {
            client,
            probe_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub async fn locate(&self, raw_url: &str) -> Result<ManifestReference, DownloadError> {
        let reference = ManifestReference::parse(raw_url)?;
        let url = reference.url();
        match classify(url) {
            UrlKind::Manifest => Ok(reference),
            UrlKind::Directory => {
                let manifest = directory_manifest(url);
                debug!(from = %url, to = %manifest, "Appending default manifest name");
                ManifestReference::from_url(manifest)
            }
            UrlKind::Segment => {
                let plan = LocatorPlan::for_segment(url);
                for candidate in &plan.candidates {
                    if self.exists(candidate).await {
                        info!(segment = %url, manifest = %candidate, "Located manifest next to segment");
                        return ManifestReference::from_url(candidate.clone());
                    }
                }
                info!(
                    segment = %url,
                    manifest = %plan.fallback,
                    "No manifest candidate answered, using best guess"
                );
                ManifestReference::from_url(plan.fallback)
            }
        }
    }

    /// Same rules as [`locate`](Self::locate) without any probing.
    pub fn locate_offline(raw_url: &str) -> Result<ManifestReference, DownloadError> {
        let reference = ManifestReference::parse(raw_url)?;
        let url = reference.url();
        match classify(url) {
            UrlKind::Manifest => Ok(reference),
            UrlKind::Directory => ManifestReference::from_url(directory_manifest(url)),
            UrlKind::Segment => ManifestReference::from_url(LocatorPlan::for_segment(url).fallback),
        }
    }

    async fn exists(&self, candidate: &Url) -> bool {
        match self
            .client
            .head(candidate, HeaderProfile::Minimal)
            .timeout(self.probe_timeout)
            .send()
            .await
        {
            Ok(response) => {
                trace!(url = %candidate, status = %response.status(), "Probed manifest candidate");
                response.status().is_success()
            }
            Err(e) => {
                trace!(url = %candidate, error = %e, "Manifest candidate probe failed");
                false
            }
        }
    }
}
