//! Progress reporting for batch scrapes.
//!
//! The batch runner reports one unit per finished pool through
//! [`ProgressCallback`]; rendering is left to the binary (see
//! `park_api_cli_utils`).

use std::sync::Arc;

/// Receives progress of a multi-pool scrape.
pub trait ProgressCallback: Send + Sync {
    /// Sets the number of pools to scrape.
    fn set_total(&self, total: u64);

    /// Marks `delta` more pools as finished.
    fn inc(&self, delta: u64);

    /// Shows what is currently being worked on.
    fn set_message(&self, msg: String);

    /// Completes the progress display with a summary.
    fn finish(&self, msg: String);
}

/// Discards all progress updates.
pub struct NullProgress;

impl ProgressCallback for NullProgress {
    fn set_total(&self, _total: u64) {}
    fn inc(&self, _delta: u64) {}
    fn set_message(&self, _msg: String) {}
    fn finish(&self, _msg: String) {}
}

/// Shared [`NullProgress`] for tests and non-interactive callers.
#[must_use]
pub fn null_progress() -> Arc<dyn ProgressCallback> {
    Arc::new(NullProgress)
}
