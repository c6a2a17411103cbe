use std::sync::Arc;

/// Events emitted while a run is in progress.
///
/// Delivered from the orchestrator's aggregation loop; handlers must not block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadEvent {
    /// Fired once for segments skipped up front and after every finished task.
    Progress { completed: usize, total: usize },
    /// Human-readable status line, e.g. throughput.
    Status(String),
}

pub type EventCallback = Arc<dyn Fn(DownloadEvent) + Send + Sync>;

/// Callback that drops every event.
pub fn ignore_events() -> EventCallback {
    Arc::new(|_| {})
}
