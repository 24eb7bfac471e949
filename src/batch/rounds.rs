//! The round controller: keep running rounds while they make progress.
//!
//! A round re-lists the input directory, so files dropped in mid-run are
//! picked up by the next round. Documents are pending unless they already
//! succeeded during this run or (without `force`) already have an output
//! directory.
//!
//! The controller stops when:
//!
//! | Condition                                         | [`StopReason`]   |
//! |---------------------------------------------------|------------------|
//! | no document is pending                            | `NothingPending` |
//! | a round finished with zero failures               | `AllSucceeded`   |
//! | a round failed exactly as many as the one before  | `NoProgress`     |
//! | `max_rounds` rounds have run                      | `MaxRounds`      |
//! | cancellation was requested                        | `Cancelled`      |
//!
//! When the batch ends without outstanding failures the state file is
//! deleted; otherwise it stays on disk for inspection and the next run.

use crate::batch::scheduler::run_round;
use crate::batch::state::StateStore;
use crate::batch::{plan_jobs, BatchJob, CancelFlag, DocumentProcessor};
use crate::config::BatchConfig;
use crate::error::Pdf2QError;
use crate::pipeline::input::list_pdfs;
use crate::progress::{NoopProgressCallback, ProgressCallback};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Why the controller stopped running rounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    AllSucceeded,
    NothingPending,
    NoProgress,
    MaxRounds,
    Cancelled,
}

/// Summary of a whole batch run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOutcome {
    /// Rounds actually run.
    pub rounds: u32,
    /// Documents that succeeded during this run.
    pub completed: Vec<PathBuf>,
    /// Documents that failed in the last round they were attempted.
    pub failed: Vec<PathBuf>,
    pub stop_reason: StopReason,
}

impl BatchOutcome {
    /// True when nothing failed and the run was not cut short.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.stop_reason != StopReason::Cancelled
    }
}

/// Runs rounds of a batch until one of the stop conditions holds.
pub struct BatchRunner {
    processor: Arc<dyn DocumentProcessor>,
    config: BatchConfig,
    progress: ProgressCallback,
    cancel: CancelFlag,
}

impl std::fmt::Debug for BatchRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchRunner")
            .field("config", &self.config)
            .field("cancel", &self.cancel)
            .finish_non_exhaustive()
    }
}

impl BatchRunner {
    pub fn new(processor: Arc<dyn DocumentProcessor>, config: BatchConfig) -> Self {
        Self {
            processor,
            config,
            progress: Arc::new(NoopProgressCallback),
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Handle that stops the batch when set.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Jobs for the next round.
    ///
    /// Output names are planned over the whole listing, so a document keeps
    /// its output directory whichever of its stem-mates are still pending.
    pub fn pending_jobs(&self, succeeded: &BTreeSet<PathBuf>) -> Result<Vec<BatchJob>, Pdf2QError> {
        let listed = list_pdfs(&self.config.input_dir)?;
        let jobs = plan_jobs(listed, &self.config.output_dir)
            .into_iter()
            .filter(|job| !succeeded.contains(&job.source))
            .filter(|job| {
                let skip = !self.config.force && job.output_exists();
                if skip {
                    debug!("{}: output exists, skipping", job.source.display());
                }
                !skip
            })
            .collect();
        Ok(jobs)
    }

    /// Run rounds until done.
    ///
    /// Document failures are part of the outcome, not errors. `Err` means the
    /// batch itself could not run (unreadable input directory or state file).
    pub async fn run(&self) -> Result<BatchOutcome, Pdf2QError> {
        let store = StateStore::spawn(&self.config.state_path)?;

        let mut succeeded: BTreeSet<PathBuf> = BTreeSet::new();
        let mut failed: Vec<PathBuf> = Vec::new();
        let mut previous_failures: Option<usize> = None;
        let mut rounds = 0;

        let stop_reason = loop {
            if self.cancel.is_cancelled() {
                break StopReason::Cancelled;
            }
            if rounds >= self.config.max_rounds {
                break StopReason::MaxRounds;
            }

            let jobs = self.pending_jobs(&succeeded)?;
            if jobs.is_empty() {
                failed.clear();
                break StopReason::NothingPending;
            }

            rounds += 1;
            info!("Round {}: {} documents pending", rounds, jobs.len());
            self.progress.on_round_start(rounds, jobs.len());

            let report = run_round(
                jobs,
                Arc::clone(&self.processor),
                store.clone(),
                &self.config,
                Arc::clone(&self.progress),
                self.cancel.clone(),
            )
            .await?;

            info!(
                "Round {}: {} succeeded, {} failed",
                rounds,
                report.succeeded.len(),
                report.failed.len()
            );
            self.progress
                .on_round_complete(rounds, report.succeeded.len(), report.failed.len());

            succeeded.extend(report.succeeded);
            let failures = report.failed.len();
            failed = report.failed;

            if failures == 0 && report.skipped == 0 {
                break StopReason::AllSucceeded;
            }
            if self.cancel.is_cancelled() {
                break StopReason::Cancelled;
            }
            if previous_failures == Some(failures) {
                warn!(
                    "Round {}: no progress ({} failures again), stopping",
                    rounds, failures
                );
                break StopReason::NoProgress;
            }
            previous_failures = Some(failures);
        };

        if matches!(
            stop_reason,
            StopReason::AllSucceeded | StopReason::NothingPending
        ) {
            store.discard().await?;
        }

        let outcome = BatchOutcome {
            rounds,
            completed: succeeded.into_iter().collect(),
            failed,
            stop_reason,
        };
        info!(
            "Batch finished after {} rounds: {} completed, {} failed ({:?})",
            outcome.rounds,
            outcome.completed.len(),
            outcome.failed.len(),
            outcome.stop_reason
        );
        self.progress.on_batch_complete(&outcome);
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::JobSummary;
    use async_trait::async_trait;

    /// Writes the output directory, like a real processor would.
    struct WritesOutput;

    #[async_trait]
    impl DocumentProcessor for WritesOutput {
        async fn process(&self, job: &BatchJob) -> Result<JobSummary, Pdf2QError> {
            std::fs::create_dir_all(&job.output).map_err(|source| Pdf2QError::OutputWriteFailed {
                path: job.output.clone(),
                source,
            })?;
            Ok(JobSummary::default())
        }
    }

    fn setup(names: &[&str]) -> (tempfile::TempDir, BatchConfig) {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in");
        std::fs::create_dir_all(&input).unwrap();
        for name in names {
            std::fs::write(input.join(name), b"%PDF-1.4").unwrap();
        }
        let config = BatchConfig::builder(input, dir.path().join("out"))
            .job_backoff_ms(1)
            .build()
            .unwrap();
        (dir, config)
    }

    #[tokio::test]
    async fn existing_output_is_skipped_unless_forced() {
        let (_dir, config) = setup(&["a.pdf", "b.pdf"]);
        std::fs::create_dir_all(config.output_dir.join("a")).unwrap();

        let runner = BatchRunner::new(Arc::new(WritesOutput), config.clone());
        let pending = runner.pending_jobs(&BTreeSet::new()).unwrap();
        assert_eq!(pending.len(), 1);
        assert!(pending[0].source.ends_with("b.pdf"));

        let forced = BatchConfig { force: true, ..config };
        let runner = BatchRunner::new(Arc::new(WritesOutput), forced);
        assert_eq!(runner.pending_jobs(&BTreeSet::new()).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn stem_collisions_do_not_share_an_output() {
        let (_dir, config) = setup(&["a.pdf", "a.PDF", "b.pdf"]);
        if std::fs::read_dir(&config.input_dir).unwrap().count() < 3 {
            // Case-insensitive filesystem: both names are one file.
            return;
        }
        let runner = BatchRunner::new(Arc::new(WritesOutput), config.clone());

        let outcome = runner.run().await.unwrap();
        assert_eq!(outcome.stop_reason, StopReason::AllSucceeded);
        assert_eq!(outcome.completed.len(), 3);
        assert!(config.output_dir.join("a.pdf").is_dir());
        assert!(config.output_dir.join("a.PDF").is_dir());
        assert!(config.output_dir.join("b").is_dir());
        assert!(!config.output_dir.join("a").exists());

        let again = runner.run().await.unwrap();
        assert_eq!(again.stop_reason, StopReason::NothingPending);
    }

    #[tokio::test]
    async fn second_run_finds_nothing_pending() {
        let (_dir, config) = setup(&["a.pdf", "b.pdf"]);
        let runner = BatchRunner::new(Arc::new(WritesOutput), config.clone());

        let first = runner.run().await.unwrap();
        assert_eq!(first.stop_reason, StopReason::AllSucceeded);
        assert_eq!(first.rounds, 1);
        assert!(!config.state_path.exists());

        let second = runner.run().await.unwrap();
        assert_eq!(second.stop_reason, StopReason::NothingPending);
        assert_eq!(second.rounds, 0);
        assert!(second.is_success());
    }

    #[tokio::test]
    async fn forced_run_processes_each_document_once() {
        let (_dir, config) = setup(&["a.pdf"]);
        let forced = BatchConfig { force: true, ..config };
        let runner = BatchRunner::new(Arc::new(WritesOutput), forced);

        runner.run().await.unwrap();
        let again = runner.run().await.unwrap();
        assert_eq!(again.stop_reason, StopReason::AllSucceeded);
        assert_eq!(again.rounds, 1);
        assert_eq!(again.completed.len(), 1);
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let (_dir, config) = setup(&["a.pdf"]);
        let runner = BatchRunner::new(Arc::new(WritesOutput), config);
        runner.cancel_flag().cancel();
        let outcome = runner.run().await.unwrap();
        assert_eq!(outcome.stop_reason, StopReason::Cancelled);
        assert_eq!(outcome.rounds, 0);
        assert!(!outcome.is_success());
    }

    #[tokio::test]
    async fn missing_input_dir_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = BatchConfig::builder(dir.path().join("missing"), dir.path().join("out"))
            .build()
            .unwrap();
        let runner = BatchRunner::new(Arc::new(WritesOutput), config);
        assert!(matches!(
            runner.run().await,
            Err(Pdf2QError::InputDirUnreadable { .. })
        ));
    }
}
