//! Progress-callback trait for batch events.
//!
//! Inject an [`Arc<dyn BatchProgressCallback>`] into
//! [`crate::batch::rounds::BatchRunner::with_progress`] to receive events as
//! rounds start, jobs run and retry, and the batch finishes.
//!
//! # Why callbacks instead of channels?
//!
//! The callback approach is the least-invasive integration point: callers can
//! forward events to a channel, a log, or a terminal progress bar without the
//! library knowing anything about how the host application communicates. The
//! trait is `Send + Sync` because job events fire from concurrent workers.
//!
//! # Example
//!
//! ```rust
//! use pdf2questions::{BatchProgressCallback, JobSummary};
//! use std::path::Path;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! struct CountingCallback {
//!     questions: AtomicUsize,
//! }
//!
//! impl BatchProgressCallback for CountingCallback {
//!     fn on_job_complete(&self, source: &Path, summary: &JobSummary) {
//!         self.questions.fetch_add(summary.questions, Ordering::SeqCst);
//!         eprintln!("{} → {} questions", source.display(), summary.questions);
//!     }
//! }
//! ```

use crate::batch::rounds::BatchOutcome;
use crate::batch::JobSummary;
use std::path::Path;
use std::sync::Arc;

/// Called by the batch runner as it works through rounds and jobs.
///
/// All methods have default no-op implementations so callers only override
/// what they care about.
///
/// # Thread safety
///
/// `on_job_start`, `on_job_retry`, `on_job_complete` and `on_job_failed` are
/// called concurrently from different workers. Implementations must protect
/// shared mutable state with appropriate synchronisation primitives.
pub trait BatchProgressCallback: Send + Sync {
    /// Called before a round dispatches its first job.
    ///
    /// # Arguments
    /// * `round`   — 1-indexed round number
    /// * `pending` — jobs queued for this round
    fn on_round_start(&self, round: u32, pending: usize) {
        let _ = (round, pending);
    }

    /// Called when a worker picks up a job.
    fn on_job_start(&self, source: &Path) {
        let _ = source;
    }

    /// Called after a failed attempt, before the backoff sleep.
    ///
    /// # Arguments
    /// * `attempt`      — the attempt that just failed (1-indexed)
    /// * `max_attempts` — attempts allowed per round
    /// * `error`        — human-readable error description
    fn on_job_retry(&self, source: &Path, attempt: u32, max_attempts: u32, error: &str) {
        let _ = (source, attempt, max_attempts, error);
    }

    /// Called when a job succeeds and its outcome is persisted.
    fn on_job_complete(&self, source: &Path, summary: &JobSummary) {
        let _ = (source, summary);
    }

    /// Called when a job exhausts its attempts and the failure is persisted.
    fn on_job_failed(&self, source: &Path, attempts: u32, error: &str) {
        let _ = (source, attempts, error);
    }

    /// Called once every worker of a round has finished.
    fn on_round_complete(&self, round: u32, succeeded: usize, failed: usize) {
        let _ = (round, succeeded, failed);
    }

    /// Called once, after the last round.
    fn on_batch_complete(&self, outcome: &BatchOutcome) {
        let _ = outcome;
    }
}

/// A no-op implementation for callers that don't need progress events.
///
/// This is the default when no callback is configured.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

/// Convenience alias for the type held by the batch runner.
pub type ProgressCallback = Arc<dyn BatchProgressCallback>;
