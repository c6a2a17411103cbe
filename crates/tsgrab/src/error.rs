use std::fmt;
use std::path::PathBuf;

use reqwest::StatusCode;

/// Terminal failure kinds of a manifest request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestFetchKind {
    /// `403` that survived every header strategy.
    Forbidden,
    /// `410`: the time-limited URL has expired and needs to be refreshed by the user.
    Gone,
    /// Any other non-success status.
    Status(u16),
}

impl ManifestFetchKind {
    pub fn from_status(status: StatusCode) -> Self {
        match status {
            StatusCode::FORBIDDEN => Self::Forbidden,
            StatusCode::GONE => Self::Gone,
            other => Self::Status(other.as_u16()),
        }
    }
}

impl fmt::Display for ManifestFetchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Forbidden => f.write_str("access forbidden (HTTP 403)"),
            Self::Gone => f.write_str("URL has expired (HTTP 410)"),
            Self::Status(code) => write!(f, "unexpected HTTP status {code}"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("download cancelled")]
    Cancelled,

    #[error("invalid URL `{input}`: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("manifest request for {url} failed: {kind}")]
    ManifestFetch { kind: ManifestFetchKind, url: String },

    #[error("manifest file not found at {}", path.display())]
    ManifestMissing { path: PathBuf },

    #[error("no segments found in manifest {url}")]
    NoSegmentsFound { url: String },

    #[error("request failed with HTTP {status} during {operation} for {url}")]
    HttpStatus {
        status: StatusCode,
        url: String,
        operation: &'static str,
    },

    #[error("HTTP request failed: {source}")]
    Network {
        #[from]
        source: reqwest::Error,
    },

    #[error("segment fetch error: {reason}")]
    SegmentFetch { reason: String, retryable: bool },

    #[error("cannot use directory {}: {source}", path.display())]
    DirectoryIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    #[error("remux failed: {reason}")]
    Remux { reason: String },
}

impl DownloadError {
    pub fn invalid_url(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn manifest_fetch(kind: ManifestFetchKind, url: impl Into<String>) -> Self {
        Self::ManifestFetch {
            kind,
            url: url.into(),
        }
    }

    pub fn http_status(
        status: StatusCode,
        url: impl Into<String>,
        operation: &'static str,
    ) -> Self {
        Self::HttpStatus {
            status,
            url: url.into(),
            operation,
        }
    }

    pub fn segment_fetch(reason: impl Into<String>, retryable: bool) -> Self {
        Self::SegmentFetch {
            reason: reason.into(),
            retryable,
        }
    }

    pub fn directory_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::DirectoryIo {
            path: path.into(),
            source,
        }
    }

    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    pub fn remux(reason: impl Into<String>) -> Self {
        Self::Remux {
            reason: reason.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Cancelled
            | Self::InvalidUrl { .. }
            | Self::ManifestFetch { .. }
            | Self::ManifestMissing { .. }
            | Self::NoSegmentsFound { .. }
            | Self::DirectoryIo { .. }
            | Self::Configuration { .. }
            | Self::Remux { .. } => false,
            Self::HttpStatus { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            Self::SegmentFetch { retryable, .. } => *retryable,
            Self::Network { .. } | Self::Io { .. } => true,
        }
    }

    /// Whether this error stops the run before or during setup, as opposed to a
    /// per-segment failure that is only accounted for.
    pub fn is_fatal_precondition(&self) -> bool {
        matches!(
            self,
            Self::InvalidUrl { .. } | Self::ManifestMissing { .. } | Self::DirectoryIo { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gone_is_never_retryable() {
        let err = DownloadError::manifest_fetch(
            ManifestFetchKind::from_status(StatusCode::GONE),
            "https://h/a/index.m3u8",
        );
        assert!(matches!(
            err,
            DownloadError::ManifestFetch {
                kind: ManifestFetchKind::Gone,
                ..
            }
        ));
        assert!(!err.is_retryable());
    }

    #[test]
    fn server_errors_and_throttling_are_retryable() {
        let err = DownloadError::http_status(StatusCode::BAD_GATEWAY, "u", "manifest fetch");
        assert!(err.is_retryable());
        let err = DownloadError::http_status(StatusCode::TOO_MANY_REQUESTS, "u", "manifest fetch");
        assert!(err.is_retryable());
        let err = DownloadError::http_status(StatusCode::NOT_FOUND, "u", "manifest fetch");
        assert!(!err.is_retryable());
    }

    #[test]
    fn precondition_errors_are_fatal() {
        assert!(DownloadError::invalid_url("ftp://x", "unsupported scheme").is_fatal_precondition());
        assert!(
            DownloadError::ManifestMissing {
                path: PathBuf::from("/tmp/x/playlist.m3u8")
            }
            .is_fatal_precondition()
        );
        assert!(!DownloadError::segment_fetch("timeout", true).is_fatal_precondition());
    }

    #[test]
    fn status_kind_maps_unknown_codes() {
        assert_eq!(
            ManifestFetchKind::from_status(StatusCode::FORBIDDEN),
            ManifestFetchKind::Forbidden
        );
        assert_eq!(
            ManifestFetchKind::from_status(StatusCode::NOT_FOUND),
            ManifestFetchKind::Status(404)
        );
    }
}
