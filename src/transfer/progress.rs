//! Progress reporting and cooperative cancellation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

/// Observer of a running transfer.
///
/// The engine reports through this trait only; it never prints. The CLI
/// renders to the terminal, tests record calls.
pub trait ProgressSink: Send + Sync {
    /// A phase with `total` steps begins.
    fn start(&self, label: &str, total: usize);
    fn update(&self, done: usize, total: usize);
    /// The current phase finished.
    fn stop(&self, message: &str);
    /// The current phase ended early.
    fn fail(&self, message: &str);
    fn log(&self, message: &str);
    fn warn(&self, message: &str);
}

/// Sink that forwards everything to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn start(&self, label: &str, total: usize) {
        info!(total, "{label}");
    }

    fn update(&self, done: usize, total: usize) {
        info!(done, total, "progress");
    }

    fn stop(&self, message: &str) {
        info!("{message}");
    }

    fn fail(&self, message: &str) {
        warn!("{message}");
    }

    fn log(&self, message: &str) {
        info!("{message}");
    }

    fn warn(&self, message: &str) {
        warn!("{message}");
    }
}

/// Shared cancellation flag counting how many times cancellation was requested.
///
/// The engine checks it between files and between batches. Whoever owns the
/// signal handler decides what a repeated request means.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    requests: Arc<AtomicUsize>,
}

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Returns how many requests have been made,
    /// including this one.
    pub fn cancel(&self) -> usize {
        self.requests.fetch_add(1, Ordering::SeqCst) + 1
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.requests.load(Ordering::SeqCst) > 0
    }
}
