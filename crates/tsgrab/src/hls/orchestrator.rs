// Download Orchestrator: filters finished segments, sizes the worker pool from the
// network probe and drives the Segment Fetcher over what is left.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::hls::events::{DownloadEvent, EventCallback, ignore_events};
use crate::hls::fetcher::{FetchOutcome, SegmentDownloader};
use crate::hls::manifest::manifest_path;
use crate::hls::probe::{LatencyProbe, NetworkTier, select_concurrency};
use crate::hls::segment::{DownloadTask, SEQUENCE_WIDTH, SegmentDescriptor, TaskState};
use crate::{DownloadConfig, DownloadError};

const SPEED_REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// Accounting of one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DownloadOutcome {
    /// Fetched in this run or already present on disk.
    pub succeeded: Vec<SegmentDescriptor>,
    pub failed: Vec<SegmentDescriptor>,
    /// Not finished because the run was cancelled.
    pub interrupted: Vec<SegmentDescriptor>,
    /// How many of `succeeded` were found on disk and not fetched.
    pub skipped: usize,
    pub bytes_downloaded: u64,
    /// `None` when nothing needed fetching and the probe was not run.
    pub tier: Option<NetworkTier>,
    pub concurrency: usize,
}

impl DownloadOutcome {
    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len() + self.interrupted.len()
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.interrupted.is_empty()
    }

    /// Run finished but some segments exhausted their retries.
    pub fn is_partial_failure(&self) -> bool {
        !self.failed.is_empty()
    }

    pub fn was_interrupted(&self) -> bool {
        !self.interrupted.is_empty()
    }

    pub fn summary(&self) -> String {
        let mut summary = format!(
            "{}/{} segments downloaded",
            self.succeeded.len(),
            self.total()
        );
        if self.skipped > 0 {
            summary.push_str(&format!(" ({} already present)", self.skipped));
        }
        if self.is_partial_failure() {
            summary.push_str(&format!(
                ", {} failed; run again to resume",
                self.failed.len()
            ));
        }
        if self.was_interrupted() {
            summary.push_str(&format!(", {} interrupted", self.interrupted.len()));
        }
        summary
    }
}

/// `KB/s`, or `MB/s` above 1024 KB/s, two decimals.
pub fn format_speed(bytes: u64, elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64().max(0.001);
    let kib_per_sec = bytes as f64 / 1024.0 / secs;
    if kib_per_sec > 1024.0 {
        format!("{:.2} MB/s", kib_per_sec / 1024.0)
    } else {
        format!("{kib_per_sec:.2} KB/s")
    }
}

/// Bytes completed since the start of the run, reported at most once per interval.
struct ThroughputMeter {
    started: Instant,
    bytes: u64,
    last_report: Option<Instant>,
}

impl ThroughputMeter {
    fn new(started: Instant) -> Self {
        Self {
            started,
            bytes: 0,
            last_report: None,
        }
    }

    fn record(&mut self, bytes: u64) {
        self.bytes += bytes;
    }

    fn report(&mut self, now: Instant) -> Option<String> {
        if self
            .last_report
            .is_some_and(|last| now.duration_since(last) < SPEED_REPORT_INTERVAL)
        {
            return None;
        }
        self.last_report = Some(now);
        Some(format_speed(self.bytes, now.duration_since(self.started)))
    }
}

pub struct DownloadOrchestrator {
    downloader: Arc<dyn SegmentDownloader>,
    probe: Arc<dyn LatencyProbe>,
    config: DownloadConfig,
    on_event: EventCallback,
}

impl DownloadOrchestrator {
    pub fn new(
        downloader: Arc<dyn SegmentDownloader>,
        probe: Arc<dyn LatencyProbe>,
        config: DownloadConfig,
    ) -> Self {
        Self {
            downloader,
            probe,
            config,
            on_event: ignore_events(),
        }
    }

    pub fn with_events(mut self, on_event: EventCallback) -> Self {
        self.on_event = on_event;
        self
    }

    pub fn config(&self) -> &DownloadConfig {
        &self.config
    }

    fn emit(&self, event: DownloadEvent) {
        (self.on_event)(event);
    }

    /// Downloads every descriptor not yet present in `dest_dir`.
    ///
    /// Fails only on precondition violations; per-segment failures end up in the outcome.
    #[instrument(skip_all, fields(dest = %dest_dir.display(), segments = descriptors.len()))]
    pub async fn run(
        &self,
        descriptors: &[SegmentDescriptor],
        dest_dir: &Path,
        token: &CancellationToken,
    ) -> Result<DownloadOutcome, DownloadError> {
        let manifest = manifest_path(dest_dir);
        match tokio::fs::try_exists(&manifest).await {
            Ok(true) => {}
            Ok(false) => return Err(DownloadError::ManifestMissing { path: manifest }),
            Err(e) => return Err(DownloadError::directory_io(dest_dir, e)),
        }

        let existing = existing_files(dest_dir).await?;
        let total = descriptors.len();
        let mut outcome = DownloadOutcome::default();
        let mut tasks = Vec::new();

        let filenames = assign_filenames(descriptors, self.config.use_original_filenames);
        let owners = name_owners(descriptors, &filenames);

        for (descriptor, filename) in descriptors.iter().zip(&filenames) {
            if is_done(descriptor, filename, &owners, &existing) {
                outcome.succeeded.push(descriptor.clone());
            } else {
                tasks.push(DownloadTask::with_filename(
                    descriptor.clone(),
                    dest_dir,
                    filename,
                ));
            }
        }
        outcome.skipped = outcome.succeeded.len();
        let mut completed = outcome.skipped;

        if outcome.skipped > 0 {
            info!(skipped = outcome.skipped, total, "Skipping segments already on disk");
        }
        self.emit(DownloadEvent::Progress { completed, total });

        if tasks.is_empty() {
            return Ok(outcome);
        }

        let tier = self.probe.probe().await;
        let concurrency = select_concurrency(tier, self.config.max_threads);
        outcome.tier = Some(tier);
        outcome.concurrency = concurrency;
        info!(%tier, concurrency, pending = tasks.len(), "Starting segment downloads");
        self.emit(DownloadEvent::Status(format!(
            "Network {tier}, downloading {} segments with {concurrency} workers",
            tasks.len()
        )));

        let mut meter = ThroughputMeter::new(Instant::now());
        let mut results = stream::iter(tasks)
            .map(|task| self.run_task(task, token))
            .buffer_unordered(concurrency);

        while let Some((task, result)) = results.next().await {
            match result {
                FetchOutcome::Complete { bytes } => {
                    meter.record(bytes);
                    outcome.bytes_downloaded += bytes;
                    outcome.succeeded.push(task.descriptor);
                }
                FetchOutcome::Failed { reason } => {
                    debug!(segment = task.descriptor.sequence_index, %reason, "Segment failed");
                    outcome.failed.push(task.descriptor);
                }
                FetchOutcome::Cancelled => {
                    outcome.interrupted.push(task.descriptor);
                    continue;
                }
            }

            completed += 1;
            self.emit(DownloadEvent::Progress { completed, total });
            if self.config.show_speed
                && let Some(speed) = meter.report(Instant::now())
            {
                self.emit(DownloadEvent::Status(format!(
                    "Downloaded: {completed}/{total}, Speed: {speed}"
                )));
            }
        }

        outcome.failed.sort_by_key(|d| d.sequence_index);
        outcome.interrupted.sort_by_key(|d| d.sequence_index);

        if outcome.was_interrupted() {
            warn!(interrupted = outcome.interrupted.len(), "Run cancelled");
        }
        info!(summary = %outcome.summary(), "Run finished");
        Ok(outcome)
    }

    /// Fetches into the staging path and publishes the final name only on success.
    async fn run_task(
        &self,
        mut task: DownloadTask,
        token: &CancellationToken,
    ) -> (DownloadTask, FetchOutcome) {
        if token.is_cancelled() {
            return (task, FetchOutcome::Cancelled);
        }

        task.state = TaskState::InFlight;
        let staging = task.staging_path();
        let result = self
            .downloader
            .fetch(&task.descriptor, &staging, &self.config, token)
            .await;

        let result = match result {
            FetchOutcome::Complete { bytes } => {
                match tokio::fs::rename(&staging, &task.target_path).await {
                    Ok(()) => {
                        task.state = TaskState::Complete;
                        FetchOutcome::Complete { bytes }
                    }
                    Err(e) => {
                        task.state = TaskState::Failed;
                        FetchOutcome::Failed {
                            reason: format!("cannot move {} into place: {e}", staging.display()),
                        }
                    }
                }
            }
            FetchOutcome::Failed { reason } => {
                task.state = TaskState::Failed;
                FetchOutcome::Failed { reason }
            }
            FetchOutcome::Cancelled => FetchOutcome::Cancelled,
        };
        (task, result)
    }
}

async fn existing_files(dest_dir: &Path) -> Result<HashSet<String>, DownloadError> {
    let mut names = HashSet::new();
    let mut entries = tokio::fs::read_dir(dest_dir)
        .await
        .map_err(|e| DownloadError::directory_io(dest_dir, e))?;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| DownloadError::directory_io(dest_dir, e))?
    {
        if let Some(name) = entry.file_name().to_str() {
            names.insert(name.to_owned());
        }
    }
    Ok(names)
}

/// Target file name per descriptor, unique within the run. A name already taken by an
/// earlier descriptor falls back to the sequence file name.
fn assign_filenames(descriptors: &[SegmentDescriptor], use_original_filenames: bool) -> Vec<String> {
    let mut taken = HashSet::new();
    descriptors
        .iter()
        .map(|descriptor| {
            let preferred = descriptor.target_filename(use_original_filenames);
            let name = if taken.contains(&preferred) {
                let mut fallback = descriptor.sequence_filename();
                let mut attempt = 1;
                while taken.contains(&fallback) {
                    fallback = format!(
                        "{:0width$}_{attempt}.{}",
                        descriptor.sequence_index,
                        descriptor.extension(),
                        width = SEQUENCE_WIDTH
                    );
                    attempt += 1;
                }
                warn!(
                    segment = descriptor.sequence_index,
                    name = %preferred,
                    fallback = %fallback,
                    "File name already used by an earlier segment, storing under its sequence name"
                );
                fallback
            } else {
                preferred
            };
            taken.insert(name.clone());
            name
        })
        .collect()
}

/// How many descriptors could claim each file name, by assigned, suggested or
/// sequence name.
fn name_owners(descriptors: &[SegmentDescriptor], filenames: &[String]) -> HashMap<String, usize> {
    let mut owners = HashMap::new();
    for (descriptor, filename) in descriptors.iter().zip(filenames) {
        let mut names = HashSet::from([filename.clone(), descriptor.sequence_filename()]);
        if !descriptor.suggested_filename.is_empty() {
            names.insert(descriptor.suggested_filename.clone());
        }
        for name in names {
            *owners.entry(name).or_insert(0) += 1;
        }
    }
    owners
}

/// A segment is done when its assigned file exists, or a file under one of its other
/// names exists and no other segment could claim that name.
fn is_done(
    descriptor: &SegmentDescriptor,
    filename: &str,
    owners: &HashMap<String, usize>,
    existing: &HashSet<String>,
) -> bool {
    if existing.contains(filename) {
        return true;
    }
    let sequence = descriptor.sequence_filename();
    [descriptor.suggested_filename.as_str(), sequence.as_str()]
        .into_iter()
        .filter(|name| !name.is_empty() && *name != filename)
        .any(|name| owners.get(name).copied().unwrap_or(0) == 1 && existing.contains(name))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use url::Url;

    use super::*;
    use crate::hls::manifest::MANIFEST_FILENAME;
    use crate::hls::probe::FixedTier;

    #[derive(Default)]
    struct FakeDownloader {
        fail: HashSet<usize>,
        calls: AtomicUsize,
        targets: Mutex<Vec<PathBuf>>,
    }

    #[async_trait]
    impl SegmentDownloader for FakeDownloader {
        async fn fetch(
            &self,
            descriptor: &SegmentDescriptor,
            target: &Path,
            _config: &DownloadConfig,
            _token: &CancellationToken,
        ) -> FetchOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.targets.lock().unwrap().push(target.to_path_buf());
            if self.fail.contains(&descriptor.sequence_index) {
                return FetchOutcome::Failed {
                    reason: "always fails".into(),
                };
            }
            let body = format!("segment {}", descriptor.sequence_index);
            tokio::fs::write(target, &body).await.unwrap();
            FetchOutcome::Complete {
                bytes: body.len() as u64,
            }
        }
    }

    fn descriptors(n: usize) -> Vec<SegmentDescriptor> {
        (0..n)
            .map(|i| SegmentDescriptor {
                sequence_index: i,
                source_url: Url::parse(&format!("https://h/a/seg-{i}.ts")).unwrap(),
                suggested_filename: format!("seg-{i}.ts"),
            })
            .collect()
    }

    async fn dest_with_manifest() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join(MANIFEST_FILENAME), "#EXTM3U\n")
            .await
            .unwrap();
        dir
    }

    fn orchestrator(downloader: Arc<FakeDownloader>, tier: NetworkTier) -> DownloadOrchestrator {
        let config = DownloadConfig {
            max_threads: 4,
            ..DownloadConfig::default()
        };
        DownloadOrchestrator::new(downloader, Arc::new(FixedTier(tier)), config)
    }

    #[tokio::test]
    async fn missing_manifest_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(Arc::new(FakeDownloader::default()), NetworkTier::Fast);
        let err = orch
            .run(&descriptors(2), dir.path(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::ManifestMissing { .. }));
    }

    #[tokio::test]
    async fn partial_failure_is_accounted_not_raised() {
        let dir = dest_with_manifest().await;
        let downloader = Arc::new(FakeDownloader {
            fail: HashSet::from([3, 7]),
            ..FakeDownloader::default()
        });
        let orch = orchestrator(downloader.clone(), NetworkTier::Fast);
        let outcome = orch
            .run(&descriptors(10), dir.path(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.succeeded.len(), 8);
        let failed: Vec<usize> = outcome.failed.iter().map(|d| d.sequence_index).collect();
        assert_eq!(failed, vec![3, 7]);
        assert!(outcome.is_partial_failure());
        assert!(!dir.path().join("0003.ts").exists());
        assert!(dir.path().join("0004.ts").exists());
    }

    #[tokio::test]
    async fn second_run_fetches_nothing() {
        let dir = dest_with_manifest().await;
        let first = Arc::new(FakeDownloader::default());
        orchestrator(first.clone(), NetworkTier::Fast)
            .run(&descriptors(5), dir.path(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(first.calls.load(Ordering::SeqCst), 5);

        let second = Arc::new(FakeDownloader::default());
        let outcome = orchestrator(second.clone(), NetworkTier::Fast)
            .run(&descriptors(5), dir.path(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(second.calls.load(Ordering::SeqCst), 0);
        assert_eq!(outcome.succeeded.len(), 5);
        assert_eq!(outcome.skipped, 5);
        assert!(outcome.failed.is_empty());
        assert_eq!(outcome.tier, None);
    }

    #[tokio::test]
    async fn skips_files_under_either_name() {
        let dir = dest_with_manifest().await;
        tokio::fs::write(dir.path().join("seg-0.ts"), "x").await.unwrap();
        tokio::fs::write(dir.path().join("0001.ts"), "x").await.unwrap();
        let downloader = Arc::new(FakeDownloader::default());
        let outcome = orchestrator(downloader.clone(), NetworkTier::Fast)
            .run(&descriptors(3), dir.path(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.skipped, 2);
        assert_eq!(downloader.calls.load(Ordering::SeqCst), 1);
    }

    fn sharing_name(urls: &[&str], name: &str) -> Vec<SegmentDescriptor> {
        urls.iter()
            .enumerate()
            .map(|(i, url)| SegmentDescriptor {
                sequence_index: i,
                source_url: Url::parse(url).unwrap(),
                suggested_filename: name.to_string(),
            })
            .collect()
    }

    #[tokio::test]
    async fn shared_original_names_get_distinct_files() {
        let dir = dest_with_manifest().await;
        let shared = sharing_name(&["https://h/a/seg.ts", "https://h/b/seg.ts"], "seg.ts");
        let config = DownloadConfig {
            max_threads: 1,
            use_original_filenames: true,
            ..DownloadConfig::default()
        };
        let token = CancellationToken::new();

        let probe = Arc::new(FixedTier(NetworkTier::Fast));

        let first = Arc::new(FakeDownloader::default());
        let outcome = DownloadOrchestrator::new(first.clone(), probe.clone(), config.clone())
            .run(&shared, dir.path(), &token)
            .await
            .unwrap();
        assert_eq!(outcome.succeeded.len(), 2);
        assert_eq!(
            tokio::fs::read_to_string(dir.path().join("seg.ts")).await.unwrap(),
            "segment 0"
        );
        assert_eq!(
            tokio::fs::read_to_string(dir.path().join("0001.ts")).await.unwrap(),
            "segment 1"
        );

        let second = Arc::new(FakeDownloader::default());
        let outcome = DownloadOrchestrator::new(second.clone(), probe, config)
            .run(&shared, dir.path(), &token)
            .await
            .unwrap();
        assert_eq!(outcome.skipped, 2);
        assert_eq!(second.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn shared_name_on_disk_does_not_mark_every_segment_done() {
        let dir = dest_with_manifest().await;
        tokio::fs::write(dir.path().join("video.ts"), "x").await.unwrap();
        let shared = sharing_name(
            &["https://h/a/video.ts?part=1", "https://h/a/video.ts?part=2"],
            "video.ts",
        );
        let downloader = Arc::new(FakeDownloader::default());
        let outcome = orchestrator(downloader.clone(), NetworkTier::Fast)
            .run(&shared, dir.path(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.skipped, 0);
        assert_eq!(downloader.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn fallback_names_stay_unique() {
        let shared = sharing_name(&["https://h/a/0001.ts", "https://h/b/0001.ts"], "0001.ts");
        assert_eq!(assign_filenames(&shared, true), vec!["0001.ts", "0001_1.ts"]);
        assert_eq!(assign_filenames(&shared, false), vec!["0000.ts", "0001.ts"]);
    }

    #[tokio::test]
    async fn writes_through_staging_files() {
        let dir = dest_with_manifest().await;
        let downloader = Arc::new(FakeDownloader::default());
        let mut orch = orchestrator(downloader.clone(), NetworkTier::Fast);
        orch.config.use_original_filenames = true;
        orch.run(&descriptors(1), dir.path(), &CancellationToken::new())
            .await
            .unwrap();
        let targets = downloader.targets.lock().unwrap().clone();
        assert_eq!(targets, vec![dir.path().join("seg-0.ts.part")]);
        assert!(dir.path().join("seg-0.ts").exists());
        assert!(!dir.path().join("seg-0.ts.part").exists());
    }

    #[tokio::test]
    async fn partial_staging_file_is_not_mistaken_for_done() {
        let dir = dest_with_manifest().await;
        tokio::fs::write(dir.path().join("0000.ts.part"), "half").await.unwrap();
        let downloader = Arc::new(FakeDownloader::default());
        let outcome = orchestrator(downloader.clone(), NetworkTier::Fast)
            .run(&descriptors(1), dir.path(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.skipped, 0);
        assert_eq!(downloader.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrency_follows_tier() {
        let dir = dest_with_manifest().await;
        let config = DownloadConfig {
            max_threads: 15,
            ..DownloadConfig::default()
        };
        for (tier, expected) in [
            (NetworkTier::Fast, 15),
            (NetworkTier::Medium, 15),
            (NetworkTier::Slow, 10),
            (NetworkTier::Unknown, 15),
        ] {
            let sub = dir.path().join(tier.to_string());
            tokio::fs::create_dir(&sub).await.unwrap();
            tokio::fs::write(sub.join(MANIFEST_FILENAME), "#EXTM3U\n").await.unwrap();
            let orch = DownloadOrchestrator::new(
                Arc::new(FakeDownloader::default()),
                Arc::new(FixedTier(tier)),
                config.clone(),
            );
            let outcome = orch
                .run(&descriptors(2), &sub, &CancellationToken::new())
                .await
                .unwrap();
            assert_eq!(outcome.tier, Some(tier));
            assert_eq!(outcome.concurrency, expected);
        }
    }

    #[tokio::test]
    async fn cancelled_run_reports_interrupted_segments() {
        let dir = dest_with_manifest().await;
        let downloader = Arc::new(FakeDownloader::default());
        let token = CancellationToken::new();
        token.cancel();
        let outcome = orchestrator(downloader.clone(), NetworkTier::Fast)
            .run(&descriptors(3), dir.path(), &token)
            .await
            .unwrap();
        assert_eq!(outcome.interrupted.len(), 3);
        assert!(outcome.succeeded.is_empty());
        assert_eq!(downloader.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn progress_events_count_every_segment() {
        let dir = dest_with_manifest().await;
        tokio::fs::write(dir.path().join("0000.ts"), "x").await.unwrap();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let orch = orchestrator(Arc::new(FakeDownloader::default()), NetworkTier::Fast)
            .with_events(Arc::new(move |event| sink.lock().unwrap().push(event)));
        orch.run(&descriptors(3), dir.path(), &CancellationToken::new())
            .await
            .unwrap();

        let events = events.lock().unwrap();
        let progress: Vec<(usize, usize)> = events
            .iter()
            .filter_map(|e| match e {
                DownloadEvent::Progress { completed, total } => Some((*completed, *total)),
                DownloadEvent::Status(_) => None,
            })
            .collect();
        assert_eq!(progress, vec![(1, 3), (2, 3), (3, 3)]);
        assert!(events.iter().any(|e| matches!(
            e,
            DownloadEvent::Status(s) if s.starts_with("Downloaded: ")
        )));
    }

    #[test]
    fn speed_units() {
        assert_eq!(format_speed(512 * 1024, Duration::from_secs(1)), "512.00 KB/s");
        assert_eq!(format_speed(3 * 1024 * 1024, Duration::from_secs(2)), "1.50 MB/s");
    }

    #[test]
    fn throughput_reports_at_most_once_per_second() {
        let start = Instant::now();
        let mut meter = ThroughputMeter::new(start);
        meter.record(2048);
        assert!(meter.report(start + Duration::from_millis(10)).is_some());
        assert!(meter.report(start + Duration::from_millis(500)).is_none());
        assert!(meter.report(start + Duration::from_millis(1200)).is_some());
    }

    #[test]
    fn summary_mentions_failures() {
        let outcome = DownloadOutcome {
            succeeded: descriptors(8),
            failed: descriptors(2),
            ..DownloadOutcome::default()
        };
        assert_eq!(outcome.summary(), "8/10 segments downloaded, 2 failed; run again to resume");
    }
}
