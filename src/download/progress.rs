use std::time::Duration;

/// Snapshot of a running transfer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressEvent {
    /// Bytes on disk so far, including any resumed prefix
    pub downloaded: u64,
    /// Expected total when the server or catalog reported it
    pub total: Option<u64>,
    /// Time since `fetch` started
    pub elapsed: Duration,
}

impl ProgressEvent {
    pub fn fraction(&self) -> Option<f64> {
        self.total
            .filter(|t| *t > 0)
            .map(|t| (self.downloaded as f64 / t as f64).min(1.0))
    }
}

/// Receives progress events from the download coordinator.
pub trait ProgressSink: Send + Sync {
    fn update(&self, event: ProgressEvent);
}

impl<F> ProgressSink for F
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn update(&self, event: ProgressEvent) {
        self(event)
    }
}

/// Sink that ignores every event.
pub struct NoopSink;

impl ProgressSink for NoopSink {
    fn update(&self, _event: ProgressEvent) {}
}
