//! Persistent batch state and its single-writer actor.
//!
//! The state file records which documents finished and which failed (with
//! attempt count, last error and time), so an interrupted or partially failed
//! batch can be inspected and resumed.
//!
//! ```json
//! {
//!   "completed": ["in/a.pdf", "in/b.pdf"],
//!   "failed": {
//!     "in/c.pdf": { "attempts": 3, "lastError": "...", "lastAttemptTime": "2026-10-16T09:12:44Z" }
//!   }
//! }
//! ```
//!
//! ## Why an actor?
//!
//! Every job outcome is a read-modify-write of the same file. Workers send
//! commands over an mpsc channel to one task that owns the [`BatchState`]
//! and reply through a oneshot once the new state is on disk, so updates
//! never interleave and a job is not reported finished before its outcome is
//! persisted.

use crate::error::Pdf2QError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Last recorded failure of one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureRecord {
    /// Attempts made in the run that recorded this failure.
    pub attempts: u32,
    pub last_error: String,
    pub last_attempt_time: DateTime<Utc>,
}

/// Contents of the batch state file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchState {
    #[serde(default)]
    pub completed: Vec<String>,
    #[serde(default)]
    pub failed: BTreeMap<String, FailureRecord>,
}

impl BatchState {
    /// Load the state at `path`. A missing file is an empty state.
    pub fn load(path: &Path) -> Result<Self, Pdf2QError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(Pdf2QError::StateUnreadable {
                    path: path.to_path_buf(),
                    detail: e.to_string(),
                })
            }
        };
        serde_json::from_str(&text).map_err(|e| Pdf2QError::StateUnreadable {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })
    }

    /// Write the state to `path` via a temp file and rename.
    pub async fn save(&self, path: &Path) -> Result<(), Pdf2QError> {
        let fail = |source| Pdf2QError::StateWriteFailed {
            path: path.to_path_buf(),
            source,
        };
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| Pdf2QError::Internal(format!("Failed to serialise batch state: {}", e)))?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(fail)?;
        }
        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, &json).await.map_err(fail)?;
        tokio::fs::rename(&tmp_path, path).await.map_err(fail)?;
        Ok(())
    }

    pub fn is_completed(&self, key: &str) -> bool {
        self.completed.iter().any(|k| k == key)
    }

    /// Mark `key` completed and forget any earlier failure.
    pub fn record_success(&mut self, key: &str) {
        if !self.is_completed(key) {
            self.completed.push(key.to_string());
        }
        self.failed.remove(key);
    }

    /// Record this run's failure of `key`, replacing any earlier record.
    pub fn record_failure(&mut self, key: &str, attempts: u32, error: impl Into<String>) {
        self.completed.retain(|k| k != key);
        self.failed.insert(
            key.to_string(),
            FailureRecord {
                attempts,
                last_error: error.into(),
                last_attempt_time: Utc::now(),
            },
        );
    }
}

enum Command {
    Success {
        key: String,
        reply: oneshot::Sender<Result<(), Pdf2QError>>,
    },
    Failure {
        key: String,
        attempts: u32,
        error: String,
        reply: oneshot::Sender<Result<(), Pdf2QError>>,
    },
    Snapshot {
        reply: oneshot::Sender<BatchState>,
    },
    Discard {
        reply: oneshot::Sender<Result<(), Pdf2QError>>,
    },
}

/// Handle to the state actor. Cheap to clone; the actor stops when the last
/// handle is dropped.
#[derive(Debug, Clone)]
pub struct StateStore {
    tx: mpsc::Sender<Command>,
    path: PathBuf,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Command::Success { .. } => "Success",
            Command::Failure { .. } => "Failure",
            Command::Snapshot { .. } => "Snapshot",
            Command::Discard { .. } => "Discard",
        };
        f.write_str(name)
    }
}

impl StateStore {
    /// Load the state at `path` and start the actor. Must be called from
    /// within a tokio runtime.
    pub fn spawn(path: impl Into<PathBuf>) -> Result<Self, Pdf2QError> {
        let path = path.into();
        let state = BatchState::load(&path)?;
        debug!(
            "Loaded batch state: {} completed, {} failed",
            state.completed.len(),
            state.failed.len()
        );

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(run_actor(path.clone(), state, rx));
        Ok(Self { tx, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn record_success(&self, key: &str) -> Result<(), Pdf2QError> {
        let key = key.to_string();
        self.request(|reply| Command::Success { key, reply }).await?
    }

    pub async fn record_failure(
        &self,
        key: &str,
        attempts: u32,
        error: impl Into<String>,
    ) -> Result<(), Pdf2QError> {
        let key = key.to_string();
        let error = error.into();
        self.request(|reply| Command::Failure {
            key,
            attempts,
            error,
            reply,
        })
        .await?
    }

    /// A copy of the current state.
    pub async fn snapshot(&self) -> Result<BatchState, Pdf2QError> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// Delete the state file and reset the in-memory state.
    pub async fn discard(&self) -> Result<(), Pdf2QError> {
        self.request(|reply| Command::Discard { reply }).await?
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, Pdf2QError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| Pdf2QError::Internal("Batch state actor has stopped".into()))?;
        rx.await
            .map_err(|_| Pdf2QError::Internal("Batch state actor dropped a reply".into()))
    }
}

async fn run_actor(path: PathBuf, mut state: BatchState, mut rx: mpsc::Receiver<Command>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            Command::Success { key, reply } => {
                state.record_success(&key);
                let _ = reply.send(state.save(&path).await);
            }
            Command::Failure {
                key,
                attempts,
                error,
                reply,
            } => {
                state.record_failure(&key, attempts, error);
                let _ = reply.send(state.save(&path).await);
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(state.clone());
            }
            Command::Discard { reply } => {
                state = BatchState::default();
                let result = match tokio::fs::remove_file(&path).await {
                    Ok(()) => Ok(()),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                    Err(source) => {
                        warn!("Could not delete batch state {}: {}", path.display(), source);
                        Err(Pdf2QError::StateWriteFailed {
                            path: path.clone(),
                            source,
                        })
                    }
                };
                let _ = reply.send(result);
            }
        }
    }
    debug!("Batch state actor stopped");
}
