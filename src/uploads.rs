//! Upload orchestration: session-scoped tasks driven through
//! `pending → uploading → processing → {success | error | duplicate}`.
//!
//! ## Why a session container?
//!
//! The set of in-flight and completed uploads is per-user mutable state the
//! UI watches. Holding it in one explicit [`UploadManager`] (instead of
//! ambient globals) keeps it testable: a manager owns its tasks for the
//! lifetime of the session, files run concurrently with no cross-file
//! lock, and the collection is only ever emptied by an explicit
//! [`UploadManager::clear`] call.
//!
//! Failures never propagate out of a task run. A failed file parks in
//! `error` with its message retained for display; [`UploadManager::retry`]
//! is the only path out, resetting that one file to `pending` and
//! restarting its full upload+process sequence. `duplicate` is terminal
//! and deliberately not retryable — re-running it would be refused again.

use crate::error::IngestError;
use crate::ingest::Ingestor;
use crate::store::FileStore;
use futures::stream::{self, StreamExt};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

/// Per-file lifecycle state.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadStatus {
    /// Queued, not yet started (also the state `retry` resets to).
    Pending,
    /// Original file is being written to the object store.
    Uploading,
    /// Extraction pipeline is running.
    Processing,
    /// Terminal: results persisted.
    Success { records: usize },
    /// Terminal: refused by the duplicate guard. Not a failure.
    Duplicate,
    /// Terminal: failed; retry available.
    Error { message: String },
}

impl UploadStatus {
    pub fn label(&self) -> &'static str {
        match self {
            UploadStatus::Pending => "pending",
            UploadStatus::Uploading => "uploading",
            UploadStatus::Processing => "processing",
            UploadStatus::Success { .. } => "success",
            UploadStatus::Duplicate => "duplicate",
            UploadStatus::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UploadStatus::Success { .. } | UploadStatus::Duplicate | UploadStatus::Error { .. }
        )
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadStatus::Success { records } => write!(f, "success ({records} results)"),
            UploadStatus::Error { message } => write!(f, "error: {message}"),
            other => f.write_str(other.label()),
        }
    }
}

/// One file the user selected, as the UI sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadTask {
    pub id: Uuid,
    pub file_name: String,
    pub size: u64,
    pub status: UploadStatus,
}

/// Receives a notification on every task state change.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Implementations must be `Send + Sync`; different
/// files run concurrently, so calls may arrive from different tasks.
pub trait UploadObserver: Send + Sync {
    /// A new task entered the collection in `pending`.
    fn on_queued(&self, task: &UploadTask) {
        let _ = task;
    }

    /// A task changed status (including the reset to `pending` on retry).
    fn on_transition(&self, task: &UploadTask) {
        let _ = task;
    }

    /// The user cleared finished tasks.
    fn on_cleared(&self, removed: usize) {
        let _ = removed;
    }
}

/// Default observer for callers that don't surface notifications.
pub struct NoopUploadObserver;

impl UploadObserver for NoopUploadObserver {}

/// Convenience alias matching the type [`UploadManager`] stores.
pub type UploadObserverHandle = Arc<dyn UploadObserver>;

/// Why a retry request was refused.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RetryError {
    #[error("no upload task with id {0}")]
    UnknownTask(Uuid),
    #[error("task is '{status}'; only failed tasks can be retried")]
    NotRetryable { status: &'static str },
}

struct TaskEntry {
    task: UploadTask,
    /// Original bytes, retained so retry can restart from scratch.
    bytes: Arc<Vec<u8>>,
}

/// Session-scoped orchestrator for one owner's uploads.
pub struct UploadManager {
    owner_id: String,
    ingestor: Arc<Ingestor>,
    files: Arc<dyn FileStore>,
    observer: UploadObserverHandle,
    tasks: Mutex<Vec<TaskEntry>>,
    concurrency: usize,
}

impl UploadManager {
    /// Create a manager for one owner. Concurrency comes from the
    /// ingestor's config (`upload_concurrency`).
    pub fn new(
        owner_id: impl Into<String>,
        ingestor: Arc<Ingestor>,
        files: Arc<dyn FileStore>,
    ) -> Self {
        let concurrency = ingestor.config().upload_concurrency;
        Self {
            owner_id: owner_id.into(),
            ingestor,
            files,
            observer: Arc::new(NoopUploadObserver),
            tasks: Mutex::new(Vec::new()),
            concurrency,
        }
    }

    pub fn with_observer(mut self, observer: UploadObserverHandle) -> Self {
        self.observer = observer;
        self
    }

    /// Add a file to the session in `pending`. Does not start it; call
    /// [`UploadManager::run_all`] or [`UploadManager::run_task`].
    pub async fn queue(&self, file_name: impl Into<String>, bytes: Vec<u8>) -> Uuid {
        let task = UploadTask {
            id: Uuid::new_v4(),
            file_name: file_name.into(),
            size: bytes.len() as u64,
            status: UploadStatus::Pending,
        };
        let id = task.id;
        let snapshot = task.clone();
        self.tasks.lock().await.push(TaskEntry {
            task,
            bytes: Arc::new(bytes),
        });
        self.observer.on_queued(&snapshot);
        id
    }

    /// Drive every `pending` task to a terminal state, at most
    /// `concurrency` files in flight at once. Files are independent: one
    /// failing or parking in `duplicate` never affects the others.
    pub async fn run_all(&self) {
        let ids: Vec<Uuid> = self
            .tasks
            .lock()
            .await
            .iter()
            .filter(|t| t.task.status == UploadStatus::Pending)
            .map(|t| t.task.id)
            .collect();

        stream::iter(ids.into_iter().map(|id| self.run_task(id)))
            .buffer_unordered(self.concurrency)
            .collect::<Vec<()>>()
            .await;
    }

    /// Drive one task from `pending` to a terminal state. A task in any
    /// other state is left alone, so racing runs of the same id are safe.
    pub async fn run_task(&self, id: Uuid) {
        let Some((file_name, bytes)) = self.begin(id).await else {
            return;
        };

        // Upload first; extraction only starts once the original file is
        // durably stored.
        if let Err(e) = self.files.put(&self.owner_id, &file_name, &bytes).await {
            warn!(file = %file_name, "Upload to file store failed: {e}");
            let message = IngestError::Storage {
                file_name: file_name.clone(),
                detail: e.to_string(),
            }
            .to_string();
            self.set_status(id, UploadStatus::Error { message }).await;
            return;
        }

        self.set_status(id, UploadStatus::Processing).await;

        match self.ingestor.ingest(&self.owner_id, &file_name, &bytes).await {
            Ok(output) => {
                self.set_status(
                    id,
                    UploadStatus::Success {
                        records: output.results.len(),
                    },
                )
                .await;
            }
            Err(e) if e.is_duplicate() => {
                info!(file = %file_name, "Upload is a duplicate document");
                self.set_status(id, UploadStatus::Duplicate).await;
            }
            Err(e) => {
                warn!(file = %file_name, "Extraction failed: {e}");
                self.set_status(
                    id,
                    UploadStatus::Error {
                        message: e.to_string(),
                    },
                )
                .await;
            }
        }
    }

    /// Reset one failed task to `pending` and run it again.
    ///
    /// Only `error` is retryable: `success` and `duplicate` are final, and
    /// an in-flight task is already running. A retry supersedes the failed
    /// attempt's visible state; it does not cancel any straggling network
    /// call from that attempt.
    pub async fn retry(&self, id: Uuid) -> Result<(), RetryError> {
        let reset = {
            let mut tasks = self.tasks.lock().await;
            let entry = tasks
                .iter_mut()
                .find(|t| t.task.id == id)
                .ok_or(RetryError::UnknownTask(id))?;
            match entry.task.status {
                UploadStatus::Error { .. } => {
                    entry.task.status = UploadStatus::Pending;
                    entry.task.clone()
                }
                ref other => {
                    return Err(RetryError::NotRetryable {
                        status: other.label(),
                    })
                }
            }
        };
        self.observer.on_transition(&reset);
        self.run_task(id).await;
        Ok(())
    }

    /// Current view of every known task, in insertion order.
    pub async fn snapshot(&self) -> Vec<UploadTask> {
        self.tasks.lock().await.iter().map(|t| t.task.clone()).collect()
    }

    pub async fn get(&self, id: Uuid) -> Option<UploadTask> {
        self.tasks
            .lock()
            .await
            .iter()
            .find(|t| t.task.id == id)
            .map(|t| t.task.clone())
    }

    /// Remove finished tasks (terminal states only; in-flight tasks stay).
    /// Returns how many were removed.
    pub async fn clear(&self) -> usize {
        let removed = {
            let mut tasks = self.tasks.lock().await;
            let before = tasks.len();
            tasks.retain(|t| !t.task.status.is_terminal());
            before - tasks.len()
        };
        if removed > 0 {
            self.observer.on_cleared(removed);
        }
        removed
    }

    /// Transition `pending → uploading`, handing back what the run needs.
    /// `None` when the task is missing or not pending.
    async fn begin(&self, id: Uuid) -> Option<(String, Arc<Vec<u8>>)> {
        let (task, bytes) = {
            let mut tasks = self.tasks.lock().await;
            let entry = tasks.iter_mut().find(|t| t.task.id == id)?;
            if entry.task.status != UploadStatus::Pending {
                return None;
            }
            entry.task.status = UploadStatus::Uploading;
            (entry.task.clone(), entry.bytes.clone())
        };
        self.observer.on_transition(&task);
        Some((task.file_name, bytes))
    }

    async fn set_status(&self, id: Uuid, status: UploadStatus) {
        let updated = {
            let mut tasks = self.tasks.lock().await;
            let Some(entry) = tasks.iter_mut().find(|t| t.task.id == id) else {
                return;
            };
            entry.task.status = status;
            entry.task.clone()
        };
        self.observer.on_transition(&updated);
    }
}
