//! One batch round: a fixed pool of workers draining a shared job queue.
//!
//! ## Why a worker pool instead of one task per job?
//!
//! `min(concurrency, jobs)` workers are spawned into a `JoinSet`; each pulls
//! the next job from the queue as soon as its current one finishes. The
//! number of documents in flight can never exceed the number of workers, so
//! the bound holds without any counters, and a slow document never holds up
//! the dispatch of the others.
//!
//! ## Retry Strategy
//!
//! A job is attempted up to `max_retries` times. Between attempts the worker
//! sleeps `job_backoff_ms * 2^(attempt-1)`, or the longer
//! `rate_limit_backoff_ms` base when the failure was a rate limit. Errors that
//! are not [`Pdf2QError::is_retryable`] end the job after one attempt. The
//! final outcome is written to the [`StateStore`] before the worker moves on.

use crate::batch::state::StateStore;
use crate::batch::{BatchJob, CancelFlag, DocumentProcessor, JobSummary};
use crate::config::BatchConfig;
use crate::error::Pdf2QError;
use crate::progress::ProgressCallback;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

/// Result of one round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoundReport {
    pub succeeded: Vec<PathBuf>,
    pub failed: Vec<PathBuf>,
    /// Jobs never dispatched because cancellation was requested.
    pub skipped: usize,
}

/// Everything a worker needs, shared by all workers of a round.
struct RoundContext {
    queue: Mutex<VecDeque<BatchJob>>,
    processor: Arc<dyn DocumentProcessor>,
    store: StateStore,
    config: BatchConfig,
    progress: ProgressCallback,
    cancel: CancelFlag,
}

/// Run `jobs` with at most `config.concurrency` in flight.
///
/// Document failures are recorded, never returned; the only errors are
/// infrastructure failures (state file, panicked worker).
pub async fn run_round(
    jobs: Vec<BatchJob>,
    processor: Arc<dyn DocumentProcessor>,
    store: StateStore,
    config: &BatchConfig,
    progress: ProgressCallback,
    cancel: CancelFlag,
) -> Result<RoundReport, Pdf2QError> {
    let workers = config.concurrency.max(1).min(jobs.len());
    debug!("Dispatching {} jobs to {} workers", jobs.len(), workers);

    let ctx = Arc::new(RoundContext {
        queue: Mutex::new(jobs.into_iter().collect()),
        processor,
        store,
        config: config.clone(),
        progress,
        cancel,
    });

    let mut set = JoinSet::new();
    for worker_id in 0..workers {
        let ctx = Arc::clone(&ctx);
        set.spawn(async move { worker(worker_id, ctx).await });
    }

    let mut report = RoundReport::default();
    let mut first_err = None;
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(Ok(part)) => {
                report.succeeded.extend(part.succeeded);
                report.failed.extend(part.failed);
            }
            Ok(Err(e)) => {
                first_err.get_or_insert(e);
            }
            Err(e) => {
                first_err.get_or_insert(Pdf2QError::Internal(format!("Worker panicked: {}", e)));
            }
        }
    }
    if let Some(e) = first_err {
        return Err(e);
    }

    report.skipped = ctx.queue.lock().await.len();
    report.succeeded.sort();
    report.failed.sort();
    Ok(report)
}

async fn worker(worker_id: usize, ctx: Arc<RoundContext>) -> Result<RoundReport, Pdf2QError> {
    let mut report = RoundReport::default();
    loop {
        if ctx.cancel.is_cancelled() {
            debug!("Worker {}: cancelled, not taking new jobs", worker_id);
            break;
        }
        let Some(job) = ctx.queue.lock().await.pop_front() else {
            break;
        };

        debug!("Worker {}: {}", worker_id, job.source.display());
        ctx.progress.on_job_start(&job.source);

        match run_job(&job, &ctx).await {
            Ok(summary) => {
                ctx.store.record_success(&job.key()).await?;
                info!(
                    "{}: done ({} questions)",
                    job.source.display(),
                    summary.questions
                );
                ctx.progress.on_job_complete(&job.source, &summary);
                report.succeeded.push(job.source);
            }
            Err((attempts, err)) => {
                let message = err.to_string();
                ctx.store.record_failure(&job.key(), attempts, &message).await?;
                warn!(
                    "{}: failed after {} attempts — {}",
                    job.source.display(),
                    attempts,
                    message
                );
                ctx.progress.on_job_failed(&job.source, attempts, &message);
                report.failed.push(job.source);
            }
        }
    }
    Ok(report)
}

/// Attempt one job until it succeeds or runs out of attempts.
async fn run_job(job: &BatchJob, ctx: &RoundContext) -> Result<JobSummary, (u32, Pdf2QError)> {
    let max_attempts = ctx.config.max_retries.max(1);
    let mut attempt = 1;
    loop {
        match ctx.processor.process(job).await {
            Ok(summary) => return Ok(summary),
            Err(e) if attempt >= max_attempts || !e.is_retryable() => return Err((attempt, e)),
            Err(e) => {
                let backoff = ctx.config.job_backoff(attempt, e.is_rate_limited());
                warn!(
                    "{}: attempt {}/{} failed — {}; retrying in {}ms",
                    job.source.display(),
                    attempt,
                    max_attempts,
                    e,
                    backoff
                );
                ctx.progress
                    .on_job_retry(&job.source, attempt, max_attempts, &e.to_string());
                sleep(Duration::from_millis(backoff)).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoopProgressCallback;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails each source a scripted number of times, then succeeds.
    struct Scripted {
        failures: HashMap<PathBuf, u32>,
        calls: std::sync::Mutex<HashMap<PathBuf, u32>>,
        total: AtomicU32,
    }

    #[async_trait]
    impl DocumentProcessor for Scripted {
        async fn process(&self, job: &BatchJob) -> Result<JobSummary, Pdf2QError> {
            self.total.fetch_add(1, Ordering::SeqCst);
            let n = {
                let mut calls = self.calls.lock().unwrap();
                let n = calls.entry(job.source.clone()).or_default();
                *n += 1;
                *n
            };
            if n <= self.failures.get(&job.source).copied().unwrap_or(0) {
                Err(Pdf2QError::Internal(format!("scripted failure {n}")))
            } else {
                Ok(JobSummary::default())
            }
        }
    }

    fn jobs(n: usize) -> Vec<BatchJob> {
        (1..=n)
            .map(|i| BatchJob::for_source(format!("in/doc{i}.pdf"), std::path::Path::new("out")))
            .collect()
    }

    fn config(dir: &std::path::Path, retries: u32) -> BatchConfig {
        BatchConfig::builder(dir.join("in"), dir.join("out"))
            .concurrency(2)
            .max_retries(retries)
            .job_backoff_ms(1)
            .rate_limit_backoff_ms(1)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn retries_until_success_within_limit() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path(), 3);
        let store = StateStore::spawn(&cfg.state_path).unwrap();
        let processor = Arc::new(Scripted {
            failures: HashMap::from([(PathBuf::from("in/doc1.pdf"), 2)]),
            calls: Default::default(),
            total: AtomicU32::new(0),
        });

        let report = run_round(
            jobs(2),
            processor.clone(),
            store.clone(),
            &cfg,
            Arc::new(NoopProgressCallback),
            CancelFlag::new(),
        )
        .await
        .unwrap();

        assert_eq!(report.succeeded.len(), 2);
        assert!(report.failed.is_empty());
        assert_eq!(processor.total.load(Ordering::SeqCst), 4);
        assert!(store.snapshot().await.unwrap().failed.is_empty());
    }

    #[tokio::test]
    async fn exhausted_job_is_recorded_with_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path(), 2);
        let store = StateStore::spawn(&cfg.state_path).unwrap();
        let processor = Arc::new(Scripted {
            failures: HashMap::from([(PathBuf::from("in/doc2.pdf"), u32::MAX)]),
            calls: Default::default(),
            total: AtomicU32::new(0),
        });

        let report = run_round(
            jobs(3),
            processor,
            store.clone(),
            &cfg,
            Arc::new(NoopProgressCallback),
            CancelFlag::new(),
        )
        .await
        .unwrap();

        assert_eq!(report.failed, vec![PathBuf::from("in/doc2.pdf")]);
        let state = store.snapshot().await.unwrap();
        assert_eq!(state.completed.len(), 2);
        let rec = &state.failed[&PathBuf::from("in/doc2.pdf").display().to_string()];
        assert_eq!(rec.attempts, 2);
        assert!(rec.last_error.contains("scripted failure 2"));
    }

    /// Fails every attempt with an environment error.
    struct Unbound {
        calls: AtomicU32,
    }

    #[async_trait]
    impl DocumentProcessor for Unbound {
        async fn process(&self, _job: &BatchJob) -> Result<JobSummary, Pdf2QError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(Pdf2QError::PdfiumBindingFailed("libpdfium.so not found".into()))
        }
    }

    #[tokio::test]
    async fn unretryable_error_is_recorded_after_one_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path(), 3);
        let store = StateStore::spawn(&cfg.state_path).unwrap();
        let processor = Arc::new(Unbound {
            calls: AtomicU32::new(0),
        });

        let report = run_round(
            jobs(2),
            processor.clone(),
            store.clone(),
            &cfg,
            Arc::new(NoopProgressCallback),
            CancelFlag::new(),
        )
        .await
        .unwrap();

        assert_eq!(report.failed.len(), 2);
        assert_eq!(processor.calls.load(Ordering::SeqCst), 2);
        let state = store.snapshot().await.unwrap();
        for rec in state.failed.values() {
            assert_eq!(rec.attempts, 1);
            assert!(rec.last_error.contains("PDFIUM_LIB_PATH"));
        }
    }

    #[tokio::test]
    async fn cancelled_round_dispatches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path(), 1);
        let store = StateStore::spawn(&cfg.state_path).unwrap();
        let processor = Arc::new(Scripted {
            failures: HashMap::new(),
            calls: Default::default(),
            total: AtomicU32::new(0),
        });
        let cancel = CancelFlag::new();
        cancel.cancel();

        let report = run_round(
            jobs(4),
            processor.clone(),
            store,
            &cfg,
            Arc::new(NoopProgressCallback),
            cancel,
        )
        .await
        .unwrap();

        assert_eq!(report.skipped, 4);
        assert_eq!(processor.total.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_round_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path(), 1);
        let store = StateStore::spawn(&cfg.state_path).unwrap();
        let processor = Arc::new(Scripted {
            failures: HashMap::new(),
            calls: Default::default(),
            total: AtomicU32::new(0),
        });
        let report = run_round(
            vec![],
            processor,
            store,
            &cfg,
            Arc::new(NoopProgressCallback),
            CancelFlag::new(),
        )
        .await
        .unwrap();
        assert_eq!(report, RoundReport::default());
    }
}
