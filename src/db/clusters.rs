//! Cluster rows. A clustering run replaces all of them in one transaction.

use anyhow::Result;
use chrono::NaiveDateTime;
use rusqlite::params;
use serde::Serialize;

use super::{format_timestamp, parse_timestamp, Database, PhotoRecord};

/// A cluster computed by the pipeline, not yet persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterDraft {
    pub members: Vec<i64>,
    pub representative: i64,
    pub mean_taken_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClusterRecord {
    pub id: i64,
    pub member_count: i64,
    pub representative_photo_id: Option<i64>,
    pub mean_taken_at: Option<NaiveDateTime>,
}

impl Database {
    /// Drop every cluster and write `drafts` in their place.
    ///
    /// Readers see either the old assignment or the new one, never a mix.
    /// Returns the new cluster ids in draft order.
    pub fn replace_clusters(&self, drafts: &[ClusterDraft]) -> Result<Vec<i64>> {
        self.batch(|conn| {
            conn.execute("DELETE FROM clusters", [])?;
            conn.execute(
                "UPDATE photos SET cluster_id = NULL, is_representative = 0 \
                 WHERE cluster_id IS NOT NULL OR is_representative != 0",
                [],
            )?;

            let mut insert_cluster = conn.prepare(
                "INSERT INTO clusters (member_count, representative_photo_id, mean_taken_at) \
                 VALUES (?, ?, ?)",
            )?;
            let mut assign = conn.prepare(
                "UPDATE photos SET cluster_id = ?, is_representative = ? WHERE id = ?",
            )?;

            let mut ids = Vec::with_capacity(drafts.len());
            for draft in drafts {
                let mean = draft.mean_taken_at.as_ref().map(format_timestamp);
                insert_cluster.execute(params![
                    draft.members.len() as i64,
                    draft.representative,
                    mean
                ])?;
                let cluster_id = conn.last_insert_rowid();

                for &photo_id in &draft.members {
                    assign.execute(params![
                        cluster_id,
                        photo_id == draft.representative,
                        photo_id
                    ])?;
                }
                ids.push(cluster_id);
            }
            Ok(ids)
        })
    }

    pub fn clusters(&self) -> Result<Vec<ClusterRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, member_count, representative_photo_id, mean_taken_at
            FROM clusters
            ORDER BY mean_taken_at IS NULL, mean_taken_at, id
            "#,
        )?;
        let clusters = stmt
            .query_map([], |row| {
                let mean: Option<String> = row.get(3)?;
                Ok(ClusterRecord {
                    id: row.get(0)?,
                    member_count: row.get(1)?,
                    representative_photo_id: row.get(2)?,
                    mean_taken_at: mean.as_deref().and_then(parse_timestamp),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(clusters)
    }

    pub fn cluster_members(&self, cluster_id: i64) -> Result<Vec<PhotoRecord>> {
        let mut members = Vec::new();
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM photos WHERE cluster_id = ? ORDER BY taken_at, path")?;
        let ids = stmt
            .query_map([cluster_id], |row| row.get::<_, i64>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        for id in ids {
            if let Some(photo) = self.get_photo(id)? {
                members.push(photo);
            }
        }
        Ok(members)
    }

    /// Photo id -> cluster id for every clustered photo.
    pub fn cluster_assignments(&self) -> Result<Vec<(i64, i64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, cluster_id FROM photos WHERE cluster_id IS NOT NULL ORDER BY id",
        )?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}
