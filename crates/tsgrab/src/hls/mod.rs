// HLS download pipeline: locate, fetch, parse, download, order.

mod downloader;
pub mod events;
pub mod fetcher;
pub mod locator;
pub mod manifest;
pub mod orchestrator;
pub mod playlist;
pub mod probe;
pub mod segment;
pub mod sequence;

pub use downloader::{HlsDownloader, PreparedRun};
pub use events::{DownloadEvent, EventCallback};
pub use fetcher::{FetchOutcome, SegmentDownloader, SegmentFetcher};
pub use locator::ManifestLocator;
pub use manifest::{MANIFEST_FILENAME, ManifestFetcher, PersistedManifest};
pub use orchestrator::{DownloadOrchestrator, DownloadOutcome, format_speed};
pub use playlist::{SegmentLines, parse_segments};
pub use probe::{FixedTier, HttpLatencyProbe, LatencyProbe, NetworkTier, select_concurrency};
pub use segment::{DownloadTask, ManifestReference, SegmentDescriptor, TaskState};
pub use sequence::{SequenceKey, extract_key, resolve_order};
