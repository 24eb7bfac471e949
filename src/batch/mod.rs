//! Batch processing: many documents, bounded concurrency, repeated rounds.
//!
//! ```text
//! BatchRunner (rounds) ──▶ run_round (worker pool) ──▶ DocumentProcessor
//!          │                        │
//!          └──── StateStore ◀───────┘  (single-writer actor, JSON on disk)
//! ```
//!
//! * [`rounds`]    — the round controller: list inputs, pick pending jobs,
//!   run a round, decide whether another round is worthwhile.
//! * [`scheduler`] — one round: a fixed pool of workers draining a queue,
//!   retrying each job with backoff.
//! * [`state`]     — the persistent record of completed and failed documents.

pub mod rounds;
pub mod scheduler;
pub mod state;

use crate::error::Pdf2QError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

/// One document to process and where its output goes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BatchJob {
    pub source: PathBuf,
    pub output: PathBuf,
}

impl BatchJob {
    /// Job for `source` writing to `<output_dir>/<file stem>`.
    pub fn for_source(source: impl Into<PathBuf>, output_dir: &Path) -> Self {
        let source = source.into();
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());
        let output = output_dir.join(stem);
        Self { source, output }
    }

    /// Key under which the job is recorded in the batch state.
    pub fn key(&self) -> String {
        self.source.display().to_string()
    }

    /// Job for `source` writing to `<output_dir>/<file name>`, extension
    /// included.
    pub fn for_source_with_extension(source: impl Into<PathBuf>, output_dir: &Path) -> Self {
        let source = source.into();
        let name = source
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());
        let output = output_dir.join(name);
        Self { source, output }
    }

    pub fn output_exists(&self) -> bool {
        self.output.exists()
    }
}

/// Counters reported for one successfully processed document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSummary {
    pub pages: usize,
    pub questions: usize,
    pub warnings: usize,
}

/// Processes one document end to end. Implemented by
/// [`crate::extract::Extractor`]; tests substitute scripted processors.
#[async_trait]
pub trait DocumentProcessor: Send + Sync {
    async fn process(&self, job: &BatchJob) -> Result<JobSummary, Pdf2QError>;
}

/// Cooperative cancellation shared between the CLI's signal handler and the
/// batch loops.
///
/// Setting it stops new jobs from being dispatched and new rounds from
/// starting; jobs already running finish normally.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One job per source, each with its own output directory.
///
/// Sources normally map to `<output_dir>/<stem>`. When several sources share
/// a stem (`a.pdf` and `a.PDF` on a case-sensitive filesystem) every one of
/// them keeps its extension in the output name instead.
pub fn plan_jobs(sources: Vec<PathBuf>, output_dir: &Path) -> Vec<BatchJob> {
    let mut stems: HashMap<String, usize> = HashMap::new();
    for source in &sources {
        *stems.entry(stem_of(source)).or_default() += 1;
    }

    sources
        .into_iter()
        .map(|source| {
            if stems.get(&stem_of(&source)).copied().unwrap_or(0) > 1 {
                warn!(
                    "{}: file stem shared with another input; output keeps the extension",
                    source.display()
                );
                BatchJob::for_source_with_extension(source, output_dir)
            } else {
                BatchJob::for_source(source, output_dir)
            }
        })
        .collect()
}

fn stem_of(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}
