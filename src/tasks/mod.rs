//! Background jobs for long-running catalog work.
//!
//! A job runs on its own thread and reports through a [`StatusCell`]: the
//! worker publishes whole [`JobSnapshot`]s, readers clone the latest one.
//! Cancellation is a shared flag the worker polls once per unit of work.

pub mod manager;

use anyhow::Result;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, RwLock};

use crate::db::Database;

pub use manager::{JobError, JobManager};

/// Unique identifier for a job.
///
/// Seeded from the wall clock so ids stay unique in the catalog's job table
/// across process restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct JobId(pub u64);

impl JobId {
    pub fn new() -> Self {
        static COUNTER: OnceLock<AtomicU64> = OnceLock::new();
        let counter = COUNTER.get_or_init(|| {
            let seed = Local::now().timestamp_millis().max(1) as u64;
            AtomicU64::new(seed)
        });
        JobId(counter.fetch_add(1, Ordering::SeqCst))
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Index,
    Export,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Index => "index",
            JobKind::Export => "export",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            JobKind::Index => "Catalog Indexing",
            JobKind::Export => "Starred Export",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a job. Terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Complete,
    Cancelled,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Complete => "complete",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Complete | JobStatus::Cancelled | JobStatus::Error
        )
    }

    /// pending -> running -> {complete, cancelled, error}; pending may also end directly.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match (self, next) {
            (JobStatus::Pending, JobStatus::Pending) => false,
            (JobStatus::Pending, _) => true,
            (JobStatus::Running, JobStatus::Pending | JobStatus::Running) => false,
            (JobStatus::Running, _) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPhase {
    Pending,
    Scanning,
    Embedding,
    Clustering,
    Copying,
    Done,
}

impl JobPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobPhase::Pending => "pending",
            JobPhase::Scanning => "scanning",
            JobPhase::Embedding => "embedding",
            JobPhase::Clustering => "clustering",
            JobPhase::Copying => "copying",
            JobPhase::Done => "done",
        }
    }
}

/// Full state of a job at one instant.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub kind: JobKind,
    pub target: PathBuf,
    pub status: JobStatus,
    pub phase: JobPhase,
    pub current: usize,
    pub total: usize,
    pub copied: usize,
    pub skipped: usize,
    pub message: String,
    pub error: Option<String>,
    /// Non-fatal per-item failures (unreadable files, failed copies).
    pub errors: Vec<String>,
    pub started_at: DateTime<Local>,
    pub completed_at: Option<DateTime<Local>>,
}

impl JobSnapshot {
    pub fn new(id: JobId, kind: JobKind, target: PathBuf) -> Self {
        Self {
            id,
            kind,
            target,
            status: JobStatus::Pending,
            phase: JobPhase::Pending,
            current: 0,
            total: 0,
            copied: 0,
            skipped: 0,
            message: "Queued".to_string(),
            error: None,
            errors: Vec::new(),
            started_at: Local::now(),
            completed_at: None,
        }
    }

    /// Progress within the current phase (0-100).
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            if self.status == JobStatus::Complete {
                100
            } else {
                0
            }
        } else {
            ((self.current as f64 / self.total as f64) * 100.0).min(100.0) as u8
        }
    }

    pub fn index_view(&self) -> IndexStatusView {
        IndexStatusView {
            status: self.status,
            phase: self.phase,
            current: self.current,
            total: self.total,
            percent: self.percent(),
            message: self.message.clone(),
            error: self.error.clone(),
        }
    }

    pub fn export_view(&self) -> ExportStatusView {
        ExportStatusView {
            status: self.status,
            progress: self.current,
            total: self.total,
            skipped: self.skipped,
            copied: self.copied,
            error: self.error.clone().or_else(|| self.errors.last().cloned()),
            errors: self.errors.clone(),
        }
    }
}

/// Read contract for index jobs.
#[derive(Debug, Clone, Serialize)]
pub struct IndexStatusView {
    pub status: JobStatus,
    pub phase: JobPhase,
    pub current: usize,
    pub total: usize,
    pub percent: u8,
    pub message: String,
    pub error: Option<String>,
}

/// Read contract for export jobs.
#[derive(Debug, Clone, Serialize)]
pub struct ExportStatusView {
    pub status: JobStatus,
    pub progress: usize,
    pub total: usize,
    pub skipped: usize,
    pub copied: usize,
    pub error: Option<String>,
    pub errors: Vec<String>,
}

/// Latest-wins snapshot slot shared by one writer and any number of readers.
#[derive(Debug, Clone)]
pub struct StatusCell {
    inner: Arc<RwLock<JobSnapshot>>,
}

impl StatusCell {
    pub fn new(snapshot: JobSnapshot) -> Self {
        Self {
            inner: Arc::new(RwLock::new(snapshot)),
        }
    }

    pub fn snapshot(&self) -> JobSnapshot {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Replace the published snapshot. Ignored once the job is terminal or
    /// when `next` would move the status backwards.
    pub fn publish(&self, next: JobSnapshot) -> bool {
        let mut guard = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if guard.status.is_terminal() {
            return false;
        }
        if guard.status != next.status && !guard.status.can_transition_to(next.status) {
            return false;
        }
        *guard = next;
        true
    }
}

/// How a job body ended when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed(String),
    Cancelled,
}

/// A unit of background work the [`JobManager`] can run.
pub trait Job: Send + 'static {
    fn kind(&self) -> JobKind;

    /// Resource two jobs of the same kind must not share (catalog or destination).
    fn target(&self) -> PathBuf;

    /// Catalog that records the job row.
    fn catalog(&self) -> PathBuf;

    fn run(self: Box<Self>, ctx: &mut JobContext) -> Result<JobOutcome>;
}

/// Worker-side handle: progress publishing, cancellation and job-row persistence.
pub struct JobContext {
    snapshot: JobSnapshot,
    cell: StatusCell,
    cancel_flag: Arc<AtomicBool>,
    store: Option<Database>,
}

impl JobContext {
    pub fn new(cell: StatusCell, cancel_flag: Arc<AtomicBool>, store: Option<Database>) -> Self {
        Self {
            snapshot: cell.snapshot(),
            cell,
            cancel_flag,
            store,
        }
    }

    pub fn id(&self) -> JobId {
        self.snapshot.id
    }

    pub fn snapshot(&self) -> &JobSnapshot {
        &self.snapshot
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel_flag.load(Ordering::SeqCst)
    }

    pub(crate) fn start(&mut self) {
        self.snapshot.status = JobStatus::Running;
        self.snapshot.message = "Starting".to_string();
        self.publish();
        self.persist();
    }

    /// Begin a new phase with its own `(0, total)` progress.
    pub fn enter_phase(&mut self, phase: JobPhase, total: usize, message: impl Into<String>) {
        self.snapshot.phase = phase;
        self.snapshot.current = 0;
        self.snapshot.total = total;
        self.snapshot.message = message.into();
        tracing::info!(job = %self.snapshot.id, phase = phase.as_str(), total, "Job phase started");
        self.publish();
        self.persist();
    }

    pub fn set_total(&mut self, total: usize) {
        self.snapshot.total = total;
        self.publish();
    }

    pub fn progress(&mut self, current: usize, message: impl Into<String>) {
        self.snapshot.current = current;
        self.snapshot.message = message.into();
        self.publish();
    }

    pub fn set_message(&mut self, message: impl Into<String>) {
        self.snapshot.message = message.into();
        self.publish();
    }

    pub fn add_copied(&mut self) {
        self.snapshot.copied += 1;
    }

    pub fn add_skipped(&mut self) {
        self.snapshot.skipped += 1;
    }

    /// Record a non-fatal per-item failure.
    pub fn push_error(&mut self, error: impl Into<String>) {
        let error = error.into();
        tracing::warn!(job = %self.snapshot.id, error = %error, "Job item failed");
        self.snapshot.errors.push(error);
        self.publish();
    }

    pub(crate) fn finish(&mut self, status: JobStatus, message: String, error: Option<String>) {
        self.snapshot.status = status;
        self.snapshot.phase = JobPhase::Done;
        self.snapshot.message = message;
        self.snapshot.error = error;
        self.snapshot.completed_at = Some(Local::now());
        if status == JobStatus::Complete {
            self.snapshot.current = self.snapshot.total;
        }
        self.publish();
        self.persist();
    }

    fn publish(&self) {
        self.cell.publish(self.snapshot.clone());
    }

    fn persist(&self) {
        if let Some(ref db) = self.store {
            if let Err(e) = db.save_job(&self.snapshot) {
                tracing::warn!(job = %self.snapshot.id, error = %e, "Failed to persist job row");
            }
        }
    }
}

/// Normalize a path used as a conflict key.
pub fn target_key(path: &Path) -> PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}
