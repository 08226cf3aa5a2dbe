//! Catalog store: photos, embeddings, clusters and job rows in SQLite.
//!
//! Every thread opens its own [`Database`]. The connection runs in WAL mode
//! with a busy timeout, so the single pipeline writer and short review-state
//! writes from other threads serialize on SQLite's write lock instead of
//! failing with `SQLITE_BUSY`.

mod schema;
pub mod clusters;
pub mod embeddings;
pub mod jobs;
pub mod photos;

use anyhow::Result;
use chrono::NaiveDateTime;
use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

pub use schema::SCHEMA;
pub use clusters::{ClusterDraft, ClusterRecord};
pub use embeddings::{bytes_to_embedding, embedding_to_bytes};
pub use jobs::JobRow;
pub use photos::{
    CatalogStats, ClusterInput, DedupInput, PhotoRecord, ReviewError, ReviewState,
    ScanState, UpsertOutcome,
};

/// Storage format for capture timestamps.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

pub struct Database {
    pub(crate) conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        Ok(Self { conn })
    }

    /// Open and make sure the schema exists.
    pub fn open_initialized(path: &Path) -> Result<Self> {
        let db = Self::open(path)?;
        db.initialize()?;
        Ok(db)
    }

    pub fn initialize(&self) -> Result<()> {
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Run `f` inside one transaction; commits on `Ok`, rolls back on `Err`.
    pub fn batch<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let tx = self.conn.unchecked_transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a stored timestamp. Accepts the storage format and ISO-8601 with a `T`.
pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S"))
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timestamp_formats() {
        assert!(parse_timestamp("2024-05-01 10:00:00").is_some());
        assert!(parse_timestamp("2024-05-01T10:00:00").is_some());
        assert!(parse_timestamp("2024-05-01T10:00:00.250").is_some());
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn test_batch_rolls_back_on_error() {
        let (_dir, _path, db) = test_support::temp_db();
        let result: Result<()> = db.batch(|conn| {
            conn.execute(
                "INSERT INTO clusters (member_count) VALUES (1)",
                [],
            )?;
            anyhow::bail!("abort");
        });
        assert!(result.is_err());

        let count: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM clusters", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
