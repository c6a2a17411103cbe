//! Destination directory naming and preparation.

use std::path::{Path, PathBuf};

use chrono::Local;
use url::Url;

use crate::DownloadError;

/// Path components that say nothing about the video.
const GENERIC_COMPONENTS: [&str; 3] = ["index.m3u8", "playlist.m3u8", "video"];

/// Query keys that usually carry a time-limited token.
const EXPIRING_QUERY_MARKERS: [&str; 3] = ["t=", "token=", "expire="];

/// Directory name derived from the URL's last meaningful path component, or a
/// timestamped `video_<YYYYmmdd_HHMMSS>` when there is none.
pub fn suggest_directory_name(url: &Url) -> String {
    url.path_segments()
        .into_iter()
        .flatten()
        .rev()
        .filter(|component| !component.is_empty())
        .filter(|component| !GENERIC_COMPONENTS.contains(&component.to_ascii_lowercase().as_str()))
        .map(|component| match component.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => component,
        })
        .map(sanitize)
        .find(|name| name.chars().count() > 2)
        .unwrap_or_else(|| format!("video_{}", Local::now().format("%Y%m%d_%H%M%S")))
}

fn sanitize(component: &str) -> String {
    component
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

/// `base`, or `base_1`, `base_2`, ... whichever does not exist yet.
pub fn unique_directory(base: &Path) -> PathBuf {
    if !base.exists() {
        return base.to_path_buf();
    }
    let name = base
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    (1u32..)
        .map(|n| base.with_file_name(format!("{name}_{n}")))
        .find(|candidate| !candidate.exists())
        .unwrap_or_else(|| base.to_path_buf())
}

/// Heuristic for signed URLs whose token will stop working after a while.
pub fn looks_like_expiring_url(url: &Url) -> bool {
    url.query().is_some_and(|query| {
        query
            .split('&')
            .any(|pair| EXPIRING_QUERY_MARKERS.iter().any(|m| pair.starts_with(m)))
    })
}

/// Creates `dir` (and parents). Must succeed before any request is made.
pub async fn prepare_directory(dir: &Path) -> Result<(), DownloadError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| DownloadError::directory_io(dir, e))
}
