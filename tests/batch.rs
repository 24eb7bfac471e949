//! Integration tests for the batch runner: worker bound, retries across
//! rounds, stop conditions and the persisted state file.

use async_trait::async_trait;
use pdf2questions::{
    BatchConfig, BatchJob, BatchProgressCallback, BatchRunner, BatchState, DocumentProcessor,
    JobSummary, Pdf2QError, StopReason,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Processor whose behaviour is decided per file name.
///
/// A document listed in `fail_times` fails that many attempts in total
/// before succeeding; `usize::MAX` means it never succeeds. Successful
/// attempts create the output directory, as the real extractor does.
#[derive(Default)]
struct Scripted {
    fail_times: HashMap<String, usize>,
    delay: Duration,
    attempts: Mutex<HashMap<String, usize>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl Scripted {
    fn failing(names: &[(&str, usize)]) -> Self {
        Self {
            fail_times: names.iter().map(|(n, t)| (n.to_string(), *t)).collect(),
            ..Default::default()
        }
    }

    fn attempts_for(&self, name: &str) -> usize {
        self.attempts.lock().unwrap().get(name).copied().unwrap_or(0)
    }
}

#[async_trait]
impl DocumentProcessor for Scripted {
    async fn process(&self, job: &BatchJob) -> Result<JobSummary, Pdf2QError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        let name = job
            .source
            .file_name()
            .unwrap()
            .to_string_lossy()
            .into_owned();
        let n = {
            let mut attempts = self.attempts.lock().unwrap();
            let n = attempts.entry(name.clone()).or_default();
            *n += 1;
            *n
        };
        if n <= self.fail_times.get(&name).copied().unwrap_or(0) {
            return Err(Pdf2QError::Internal(format!("{name}: scripted failure {n}")));
        }

        std::fs::create_dir_all(&job.output).unwrap();
        Ok(JobSummary {
            pages: 1,
            questions: 2,
            warnings: 0,
        })
    }
}

/// Counts the events the runner emits.
#[derive(Default)]
struct Events {
    rounds: AtomicUsize,
    retries: AtomicUsize,
    completes: AtomicUsize,
    failures: AtomicUsize,
    finished: AtomicUsize,
}

impl BatchProgressCallback for Events {
    fn on_round_start(&self, _round: u32, _pending: usize) {
        self.rounds.fetch_add(1, Ordering::SeqCst);
    }
    fn on_job_retry(&self, _source: &Path, _attempt: u32, _max: u32, _error: &str) {
        self.retries.fetch_add(1, Ordering::SeqCst);
    }
    fn on_job_complete(&self, _source: &Path, _summary: &JobSummary) {
        self.completes.fetch_add(1, Ordering::SeqCst);
    }
    fn on_job_failed(&self, _source: &Path, _attempts: u32, _error: &str) {
        self.failures.fetch_add(1, Ordering::SeqCst);
    }
    fn on_batch_complete(&self, _outcome: &pdf2questions::BatchOutcome) {
        self.finished.fetch_add(1, Ordering::SeqCst);
    }
}

fn input_dir(root: &Path, names: &[&str]) -> PathBuf {
    let input = root.join("papers");
    std::fs::create_dir_all(&input).unwrap();
    for name in names {
        std::fs::write(input.join(name), b"%PDF-1.4").unwrap();
    }
    input
}

fn config(root: &Path, input: PathBuf) -> BatchConfig {
    BatchConfig::builder(input, root.join("questions"))
        .concurrency(2)
        .max_retries(3)
        .job_backoff_ms(1)
        .rate_limit_backoff_ms(1)
        .build()
        .unwrap()
}

fn names(paths: &[PathBuf]) -> Vec<String> {
    paths
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect()
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn persistent_failure_stops_on_no_progress() {
    let root = tempfile::tempdir().unwrap();
    let input = input_dir(
        root.path(),
        &["doc1.pdf", "doc2.pdf", "doc3.pdf", "doc4.pdf", "doc5.pdf"],
    );
    let cfg = config(root.path(), input);
    let processor = Arc::new(Scripted::failing(&[("doc3.pdf", usize::MAX)]));
    let events = Arc::new(Events::default());

    let outcome = BatchRunner::new(processor.clone(), cfg.clone())
        .with_progress(events.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(
        names(&outcome.completed),
        ["doc1.pdf", "doc2.pdf", "doc4.pdf", "doc5.pdf"]
    );
    assert_eq!(names(&outcome.failed), ["doc3.pdf"]);
    assert_eq!(outcome.stop_reason, StopReason::NoProgress);
    assert_eq!(outcome.rounds, 2);
    assert!(!outcome.is_success());

    // Only the failing document is re-attempted in round 2.
    assert_eq!(processor.attempts_for("doc1.pdf"), 1);
    assert_eq!(processor.attempts_for("doc3.pdf"), 6);

    let state = BatchState::load(&cfg.state_path).unwrap();
    assert_eq!(state.completed.len(), 4);
    assert_eq!(state.failed.len(), 1);
    let (key, record) = state.failed.iter().next().unwrap();
    assert!(key.ends_with("doc3.pdf"));
    assert_eq!(record.attempts, 3);
    assert!(record.last_error.contains("scripted failure"));

    assert_eq!(events.rounds.load(Ordering::SeqCst), 2);
    assert_eq!(events.completes.load(Ordering::SeqCst), 4);
    assert_eq!(events.failures.load(Ordering::SeqCst), 2);
    assert_eq!(events.retries.load(Ordering::SeqCst), 4);
    assert_eq!(events.finished.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn state_file_on_disk_uses_camel_case() {
    let root = tempfile::tempdir().unwrap();
    let input = input_dir(root.path(), &["a.pdf", "b.pdf"]);
    let cfg = BatchConfig {
        max_retries: 1,
        ..config(root.path(), input)
    };
    let processor = Arc::new(Scripted::failing(&[("b.pdf", usize::MAX)]));

    BatchRunner::new(processor, cfg.clone()).run().await.unwrap();

    let raw: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&cfg.state_path).unwrap()).unwrap();
    let failed = raw["failed"].as_object().unwrap();
    let record = failed.values().next().unwrap();
    assert_eq!(record["attempts"], 1);
    assert!(record["lastError"].is_string());
    assert!(record["lastAttemptTime"].is_string());
    assert_eq!(raw["completed"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn flaky_document_recovers_in_second_round() {
    let root = tempfile::tempdir().unwrap();
    let input = input_dir(root.path(), &["a.pdf", "b.pdf", "c.pdf"]);
    let cfg = config(root.path(), input);
    // Fails all three attempts of round 1, succeeds on the first of round 2.
    let processor = Arc::new(Scripted::failing(&[("b.pdf", 3)]));

    let outcome = BatchRunner::new(processor.clone(), cfg.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(outcome.stop_reason, StopReason::AllSucceeded);
    assert_eq!(outcome.rounds, 2);
    assert_eq!(outcome.completed.len(), 3);
    assert!(outcome.failed.is_empty());
    assert!(outcome.is_success());
    assert_eq!(processor.attempts_for("b.pdf"), 4);
    // Clean finish removes the state file.
    assert!(!cfg.state_path.exists());
}

#[tokio::test]
async fn concurrency_bound_is_respected() {
    let root = tempfile::tempdir().unwrap();
    let files: Vec<String> = (0..8).map(|i| format!("doc{i}.pdf")).collect();
    let refs: Vec<&str> = files.iter().map(String::as_str).collect();
    let input = input_dir(root.path(), &refs);
    let cfg = BatchConfig {
        concurrency: 3,
        ..config(root.path(), input)
    };
    let processor = Arc::new(Scripted {
        delay: Duration::from_millis(30),
        ..Default::default()
    });

    let outcome = BatchRunner::new(processor.clone(), cfg).run().await.unwrap();

    assert_eq!(outcome.completed.len(), 8);
    let peak = processor.max_active.load(Ordering::SeqCst);
    assert!(peak <= 3, "peak concurrency {peak} exceeds bound");
    assert!(peak >= 2, "expected overlapping jobs, peak was {peak}");
}

#[tokio::test]
async fn rounds_never_exceed_max_rounds() {
    let root = tempfile::tempdir().unwrap();
    let input = input_dir(root.path(), &["a.pdf", "b.pdf", "c.pdf"]);
    let cfg = BatchConfig {
        max_retries: 1,
        max_rounds: 2,
        ..config(root.path(), input)
    };
    // One more document recovers each round, so the failure count keeps
    // changing and only the round limit stops the batch.
    let processor = Arc::new(Scripted::failing(&[
        ("a.pdf", 1),
        ("b.pdf", 2),
        ("c.pdf", 3),
    ]));

    let outcome = BatchRunner::new(processor, cfg.clone()).run().await.unwrap();

    assert_eq!(outcome.rounds, 2);
    assert_eq!(outcome.stop_reason, StopReason::MaxRounds);
    assert_eq!(names(&outcome.completed), ["a.pdf"]);
    assert_eq!(names(&outcome.failed), ["b.pdf", "c.pdf"]);
    assert!(cfg.state_path.exists());
}

#[tokio::test]
async fn empty_input_directory_is_nothing_pending() {
    let root = tempfile::tempdir().unwrap();
    let input = input_dir(root.path(), &[]);
    std::fs::write(input.join("readme.txt"), b"not a pdf").unwrap();
    let cfg = config(root.path(), input);

    let outcome = BatchRunner::new(Arc::new(Scripted::default()), cfg)
        .run()
        .await
        .unwrap();

    assert_eq!(outcome.stop_reason, StopReason::NothingPending);
    assert_eq!(outcome.rounds, 0);
    assert!(outcome.completed.is_empty());
}

#[tokio::test]
async fn cancellation_lets_running_jobs_finish() {
    let root = tempfile::tempdir().unwrap();
    let input = input_dir(root.path(), &["a.pdf", "b.pdf", "c.pdf", "d.pdf"]);
    let cfg = BatchConfig {
        concurrency: 1,
        ..config(root.path(), input)
    };
    let processor = Arc::new(Scripted {
        delay: Duration::from_millis(100),
        ..Default::default()
    });

    let runner = BatchRunner::new(processor.clone(), cfg);
    let cancel = runner.cancel_flag();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();
    });

    let outcome = runner.run().await.unwrap();

    assert_eq!(outcome.stop_reason, StopReason::Cancelled);
    assert_eq!(outcome.rounds, 1);
    // The job in flight at cancellation completes; nothing new starts.
    assert_eq!(names(&outcome.completed), ["a.pdf"]);
    assert_eq!(processor.attempts_for("b.pdf"), 0);
}
