// Manifest Parser: extracts segment references from the minimal playlist subset.

use tracing::{debug, warn};
use url::Url;

use crate::hls::segment::{ManifestReference, SegmentDescriptor};
use crate::DownloadError;

const COMMENT_MARKER: char = '#';

/// Lazily yields segment descriptors in manifest line order.
///
/// Single pass; create a new one to start over.
pub struct SegmentLines<'a> {
    lines: std::str::Lines<'a>,
    manifest: &'a ManifestReference,
    next_index: usize,
}

impl<'a> SegmentLines<'a> {
    pub fn new(manifest_text: &'a str, manifest: &'a ManifestReference) -> Self {
        Self {
            lines: manifest_text.lines(),
            manifest,
            next_index: 0,
        }
    }
}

impl Iterator for SegmentLines<'_> {
    type Item = SegmentDescriptor;

    fn next(&mut self) -> Option<Self::Item> {
        for raw in self.lines.by_ref() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with(COMMENT_MARKER) {
                continue;
            }
            let Some(source_url) = resolve_segment_url(line, self.manifest) else {
                warn!(line, "Skipping unresolvable manifest line");
                continue;
            };
            let descriptor = SegmentDescriptor {
                sequence_index: self.next_index,
                source_url,
                suggested_filename: suggested_filename(line),
            };
            self.next_index += 1;
            return Some(descriptor);
        }
        None
    }
}

/// Parses the whole manifest; an empty result is [`DownloadError::NoSegmentsFound`].
pub fn parse_segments(
    manifest_text: &str,
    manifest: &ManifestReference,
) -> Result<Vec<SegmentDescriptor>, DownloadError> {
    let segments: Vec<_> = SegmentLines::new(manifest_text, manifest).collect();
    if segments.is_empty() {
        return Err(DownloadError::NoSegmentsFound {
            url: manifest.to_string(),
        });
    }
    debug!(count = segments.len(), url = %manifest, "Parsed manifest");
    Ok(segments)
}

/// Resolves one manifest line against the manifest URL.
///
/// Only `http(s)://` lines are absolute. `/`-rooted lines resolve against the origin
/// and everything else against the manifest's directory. The manifest's query is
/// carried over when the resolved URL has none.
pub fn resolve_segment_url(line: &str, manifest: &ManifestReference) -> Option<Url> {
    let lower = line.to_ascii_lowercase();
    let mut resolved = if lower.starts_with("http://") || lower.starts_with("https://") {
        Url::parse(line).ok()?
    } else {
        let joined = manifest.url().join(line).ok()?;
        if matches!(joined.scheme(), "http" | "https") {
            joined
        } else {
            // `name:1.ts` parses as a scheme; it is still a relative path.
            manifest.url().join(&format!("./{line}")).ok()?
        }
    };

    if resolved.query().is_none_or(str::is_empty)
        && let Some(query) = manifest.query()
    {
        resolved.set_query(Some(query));
    }
    Some(resolved)
}

/// Basename of the line's path, with the line's own query and fragment stripped.
pub fn suggested_filename(line: &str) -> String {
    let path = line.split(['?', '#']).next().unwrap_or_default();
    path.rsplit('/').next().unwrap_or_default().to_string()
}
