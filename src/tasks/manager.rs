//! Job manager for starting, tracking and cancelling background jobs.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use thiserror::Error;

use super::{
    target_key, Job, JobContext, JobId, JobKind, JobOutcome, JobSnapshot, JobStatus, StatusCell,
};
use crate::db::Database;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("{kind} job {existing} is already active for {}", target.display())]
    Conflict {
        kind: JobKind,
        target: PathBuf,
        existing: JobId,
    },

    #[error("unknown job {0}")]
    NotFound(JobId),

    #[error("job {0} has already finished")]
    AlreadyFinished(JobId),

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

struct JobEntry {
    kind: JobKind,
    target: PathBuf,
    cell: StatusCell,
    cancel_flag: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

/// Registry of jobs started by this process. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct JobManager {
    jobs: Arc<Mutex<HashMap<JobId, JobEntry>>>,
}

impl JobManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<JobId, JobEntry>> {
        match self.jobs.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Start `job` on a worker thread.
    ///
    /// Fails with [`JobError::Conflict`] when a non-terminal job of the same
    /// kind already holds the same target.
    pub fn start<J: Job>(&self, job: J) -> Result<JobId, JobError> {
        self.start_boxed(Box::new(job))
    }

    pub fn start_boxed(&self, job: Box<dyn Job>) -> Result<JobId, JobError> {
        let kind = job.kind();
        let target = target_key(&job.target());

        let mut jobs = self.lock();
        if let Some((existing, _)) = jobs.iter().find(|(_, entry)| {
            entry.kind == kind
                && entry.target == target
                && !entry.cell.snapshot().status.is_terminal()
        }) {
            return Err(JobError::Conflict {
                kind,
                target,
                existing: *existing,
            });
        }

        let id = JobId::new();
        let cell = StatusCell::new(JobSnapshot::new(id, kind, target.clone()));
        let cancel_flag = Arc::new(AtomicBool::new(false));

        let worker_cell = cell.clone();
        let worker_flag = cancel_flag.clone();
        let handle = thread::Builder::new()
            .name(format!("picbest-{}-{}", kind, id))
            .spawn(move || run_job(job, worker_cell, worker_flag))?;

        tracing::info!(job = %id, kind = kind.as_str(), target = %target.display(), "Job started");
        jobs.insert(
            id,
            JobEntry {
                kind,
                target,
                cell,
                cancel_flag,
                handle: Some(handle),
            },
        );
        Ok(id)
    }

    /// Latest published snapshot of a job.
    pub fn status(&self, id: JobId) -> Option<JobSnapshot> {
        let cell = self.lock().get(&id).map(|entry| entry.cell.clone())?;
        Some(cell.snapshot())
    }

    /// Request cancellation. The worker stops at its next unit boundary.
    pub fn cancel(&self, id: JobId) -> Result<(), JobError> {
        let jobs = self.lock();
        let entry = jobs.get(&id).ok_or(JobError::NotFound(id))?;
        if entry.cell.snapshot().status.is_terminal() {
            return Err(JobError::AlreadyFinished(id));
        }
        entry.cancel_flag.store(true, Ordering::SeqCst);
        tracing::info!(job = %id, "Job cancellation requested");
        Ok(())
    }

    /// Every tracked job, oldest first.
    pub fn list(&self) -> Vec<JobSnapshot> {
        let cells: Vec<StatusCell> = self.lock().values().map(|e| e.cell.clone()).collect();
        let mut snapshots: Vec<JobSnapshot> = cells.iter().map(StatusCell::snapshot).collect();
        snapshots.sort_by_key(|s| s.id);
        snapshots
    }

    /// Check if a job of the given kind is still active.
    pub fn is_running(&self, kind: JobKind) -> bool {
        self.lock()
            .values()
            .any(|e| e.kind == kind && !e.cell.snapshot().status.is_terminal())
    }

    /// Block until the worker exits and return its final snapshot.
    pub fn join(&self, id: JobId) -> Result<JobSnapshot, JobError> {
        let (handle, cell) = {
            let mut jobs = self.lock();
            let entry = jobs.get_mut(&id).ok_or(JobError::NotFound(id))?;
            (entry.handle.take(), entry.cell.clone())
        };
        if let Some(handle) = handle {
            // Panics are caught inside the worker.
            let _ = handle.join();
        }
        Ok(cell.snapshot())
    }

    /// Forget terminal jobs. Returns how many were removed.
    pub fn prune_finished(&self) -> usize {
        let mut jobs = self.lock();
        let before = jobs.len();
        jobs.retain(|_, entry| !entry.cell.snapshot().status.is_terminal());
        before - jobs.len()
    }
}

fn run_job(job: Box<dyn Job>, cell: StatusCell, cancel_flag: Arc<AtomicBool>) {
    let catalog = job.catalog();
    let store = match Database::open_initialized(&catalog) {
        Ok(db) => Some(db),
        Err(e) => {
            tracing::warn!(catalog = %catalog.display(), error = %e, "Job rows will not be persisted");
            None
        }
    };

    let mut ctx = JobContext::new(cell, cancel_flag, store);
    ctx.start();

    let result = panic::catch_unwind(AssertUnwindSafe(|| job.run(&mut ctx)));
    let id = ctx.id();
    match result {
        Ok(Ok(JobOutcome::Completed(message))) => {
            tracing::info!(job = %id, %message, "Job complete");
            ctx.finish(JobStatus::Complete, message, None);
        }
        Ok(Ok(JobOutcome::Cancelled)) => {
            tracing::info!(job = %id, "Job cancelled");
            ctx.finish(JobStatus::Cancelled, "Cancelled".to_string(), None);
        }
        Ok(Err(e)) => {
            let error = format!("{e:#}");
            tracing::error!(job = %id, error = %error, "Job failed");
            ctx.finish(JobStatus::Error, "Failed".to_string(), Some(error));
        }
        Err(payload) => {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!(job = %id, %reason, "Job worker panicked");
            ctx.finish(
                JobStatus::Error,
                "Failed".to_string(),
                Some(format!("worker panicked: {reason}")),
            );
        }
    }
}
