//! Job rows, written on phase changes and terminal transitions.

use anyhow::Result;
use chrono::Local;
use rusqlite::{params, OptionalExtension};
use serde::Serialize;

use super::Database;
use crate::tasks::JobSnapshot;

/// A job as recorded in the catalog.
#[derive(Debug, Clone, Serialize)]
pub struct JobRow {
    pub id: i64,
    pub kind: String,
    pub target: String,
    pub status: String,
    pub phase: String,
    pub current: i64,
    pub total: i64,
    pub copied: i64,
    pub skipped: i64,
    pub item_errors: i64,
    pub message: String,
    pub error: Option<String>,
    pub started_at: String,
    pub completed_at: Option<String>,
}

impl Database {
    pub fn save_job(&self, job: &JobSnapshot) -> Result<()> {
        let started = job.started_at.format("%Y-%m-%d %H:%M:%S").to_string();
        let completed = job
            .completed_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string());

        self.conn.execute(
            r#"
            INSERT OR REPLACE INTO jobs
                (id, kind, target, status, phase, current, total, copied, skipped,
                 item_errors, message, error, started_at, completed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                job.id.0 as i64,
                job.kind.as_str(),
                job.target.to_string_lossy(),
                job.status.as_str(),
                job.phase.as_str(),
                job.current as i64,
                job.total as i64,
                job.copied as i64,
                job.skipped as i64,
                job.errors.len() as i64,
                job.message,
                job.error,
                started,
                completed,
            ],
        )?;
        Ok(())
    }

    pub fn get_job(&self, id: i64) -> Result<Option<JobRow>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?"),
                [id],
                row_to_job,
            )
            .optional()?;
        Ok(row)
    }

    /// Most recent jobs first.
    pub fn recent_jobs(&self, limit: usize) -> Result<Vec<JobRow>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs ORDER BY started_at DESC, id DESC LIMIT ?"
        ))?;
        let rows = stmt
            .query_map([limit as i64], row_to_job)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Mark rows left `pending`/`running` by a process that is gone.
    ///
    /// Only call this when no other process is working on the catalog.
    pub fn fail_abandoned_jobs(&self) -> Result<usize> {
        let now = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let changed = self.conn.execute(
            r#"
            UPDATE jobs
            SET status = 'error', phase = 'done', error = 'interrupted', completed_at = ?
            WHERE status IN ('pending', 'running')
            "#,
            [now],
        )?;
        Ok(changed)
    }
}

const JOB_COLUMNS: &str = "id, kind, target, status, phase, current, total, copied, skipped, \
                           item_errors, message, error, started_at, completed_at";

fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<JobRow> {
    Ok(JobRow {
        id: row.get(0)?,
        kind: row.get(1)?,
        target: row.get(2)?,
        status: row.get(3)?,
        phase: row.get(4)?,
        current: row.get(5)?,
        total: row.get(6)?,
        copied: row.get(7)?,
        skipped: row.get(8)?,
        item_errors: row.get(9)?,
        message: row.get(10)?,
        error: row.get(11)?,
        started_at: row.get(12)?,
        completed_at: row.get(13)?,
    })
}
