use std::fmt;
use std::path::{Path, PathBuf};

use url::Url;

use crate::DownloadError;

/// Extension used for sequence file names when the manifest line has none.
pub const DEFAULT_SEGMENT_EXTENSION: &str = "ts";

/// Width of the zero-padded sequence file name (`0007.ts`).
pub const SEQUENCE_WIDTH: usize = 4;

/// Suffix of the staging file a segment is streamed into before it is complete.
pub const STAGING_SUFFIX: &str = ".part";

/// Parsed, normalized manifest URL. Always `http`/`https` with a non-empty host.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ManifestReference {
    url: Url,
}

impl ManifestReference {
    pub fn parse(raw: &str) -> Result<Self, DownloadError> {
        let url = Url::parse(raw.trim()).map_err(|e| DownloadError::invalid_url(raw, e.to_string()))?;
        Self::from_url(url)
    }

    pub fn from_url(url: Url) -> Result<Self, DownloadError> {
        if !matches!(url.scheme(), "http" | "https") {
            return Err(DownloadError::invalid_url(
                url.as_str(),
                format!("unsupported scheme `{}`", url.scheme()),
            ));
        }
        if url.host_str().is_none_or(str::is_empty) {
            return Err(DownloadError::invalid_url(url.as_str(), "missing host"));
        }
        Ok(Self { url })
    }

    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    pub fn path(&self) -> &str {
        self.url.path()
    }

    pub fn query(&self) -> Option<&str> {
        self.url.query().filter(|q| !q.is_empty())
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }
}

impl fmt::Display for ManifestReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}

/// One segment reference extracted from a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SegmentDescriptor {
    /// 0-based position among the manifest's segment lines; canonical playback order.
    pub sequence_index: usize,
    /// Absolute URL, carrying the manifest's query when the line had none.
    pub source_url: Url,
    /// Path basename of the manifest line with its own query stripped.
    pub suggested_filename: String,
}

impl SegmentDescriptor {
    /// Extension of the suggested file name, falling back to `ts`.
    pub fn extension(&self) -> &str {
        Path::new(&self.suggested_filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .filter(|ext| !ext.is_empty())
            .unwrap_or(DEFAULT_SEGMENT_EXTENSION)
    }

    /// Zero-padded sequence file name, e.g. `0007.ts`.
    pub fn sequence_filename(&self) -> String {
        format!(
            "{:0width$}.{}",
            self.sequence_index,
            self.extension(),
            width = SEQUENCE_WIDTH
        )
    }

    /// File name this segment is stored under.
    pub fn target_filename(&self, use_original_filenames: bool) -> String {
        if use_original_filenames && !self.suggested_filename.is_empty() {
            self.suggested_filename.clone()
        } else {
            self.sequence_filename()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    InFlight,
    Complete,
    Failed,
}

/// A segment scheduled for download, owned by exactly one worker at a time.
#[derive(Debug, Clone)]
pub struct DownloadTask {
    pub descriptor: SegmentDescriptor,
    pub target_path: PathBuf,
    pub state: TaskState,
}

impl DownloadTask {
    pub fn new(descriptor: SegmentDescriptor, dest_dir: &Path, use_original_filenames: bool) -> Self {
        let filename = descriptor.target_filename(use_original_filenames);
        Self::with_filename(descriptor, dest_dir, &filename)
    }

    /// Task stored under an explicitly chosen file name in `dest_dir`.
    pub fn with_filename(descriptor: SegmentDescriptor, dest_dir: &Path, filename: &str) -> Self {
        Self {
            descriptor,
            target_path: dest_dir.join(filename),
            state: TaskState::Pending,
        }
    }

    /// Path the fetcher writes to until the segment is complete.
    pub fn staging_path(&self) -> PathBuf {
        let mut staging = self.target_path.clone().into_os_string();
        staging.push(STAGING_SUFFIX);
        PathBuf::from(staging)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, TaskState::Complete | TaskState::Failed)
    }
}
