// Declare submodules
mod coordinator;
mod progress;

// Re-export types for external use
pub use coordinator::{part_path, DownloadCoordinator, FetchOptions, RetryPolicy};
pub use progress::{NoopSink, ProgressEvent, ProgressSink};
