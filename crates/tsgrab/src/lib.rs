//! Segmented HLS downloader engine.
//!
//! Resolves a manifest from a manifest, segment or directory URL, downloads every segment
//! concurrently with resume and retry, and prepares an ordered file list for remuxing.

pub mod client;
pub mod config;
pub mod destination;
pub mod error;
pub mod hls;
pub mod remux;
pub mod retry;

pub use client::{HeaderProfile, HttpClient};
pub use config::{ClientConfig, DownloadConfig};
pub use error::{DownloadError, ManifestFetchKind};
pub use hls::{
    DownloadEvent, DownloadOrchestrator, DownloadOutcome, HlsDownloader, ManifestReference,
    NetworkTier, SegmentDescriptor,
};
pub use remux::{ConcatList, Remuxer};
pub use tokio_util::sync::CancellationToken;
