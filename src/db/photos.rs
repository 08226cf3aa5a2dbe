//! Photo rows: scanner upserts, pipeline reads and review-state writes.

use anyhow::Result;
use chrono::NaiveDateTime;
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;
use thiserror::Error;

use super::{embeddings::bytes_to_embedding, format_timestamp, parse_timestamp, Database};
use crate::scanner::ScannedPhoto;

const PHOTO_COLUMNS: &str = "id, path, filename, folder, size_bytes, content_hash, fingerprint, \
     taken_at, width, height, dedup_group_id, cluster_id, is_representative, \
     is_starred, is_rejected, rating, notes";

#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("rating must be between 0 and 5, got {0}")]
    InvalidRating(i32),
    #[error("photo {0} not found")]
    PhotoNotFound(i64),
}

/// Reviewer verdict on a photo. Starring and rejecting are mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewState {
    Unrated,
    Starred,
    Rejected,
}

#[derive(Debug, Clone, Serialize)]
pub struct PhotoRecord {
    pub id: i64,
    pub path: String,
    pub filename: String,
    pub folder: String,
    pub size_bytes: i64,
    pub content_hash: String,
    pub fingerprint: Option<String>,
    pub taken_at: Option<NaiveDateTime>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub dedup_group_id: Option<i64>,
    pub cluster_id: Option<i64>,
    pub is_representative: bool,
    pub is_starred: bool,
    pub is_rejected: bool,
    pub rating: i32,
    pub notes: Option<String>,
}

impl PhotoRecord {
    pub fn review_state(&self) -> ReviewState {
        if self.is_starred {
            ReviewState::Starred
        } else if self.is_rejected {
            ReviewState::Rejected
        } else {
            ReviewState::Unrated
        }
    }
}

fn row_to_photo(row: &Row) -> rusqlite::Result<PhotoRecord> {
    let taken_at: Option<String> = row.get(7)?;
    Ok(PhotoRecord {
        id: row.get(0)?,
        path: row.get(1)?,
        filename: row.get(2)?,
        folder: row.get(3)?,
        size_bytes: row.get(4)?,
        content_hash: row.get(5)?,
        fingerprint: row.get(6)?,
        taken_at: taken_at.as_deref().and_then(parse_timestamp),
        width: row.get(8)?,
        height: row.get(9)?,
        dedup_group_id: row.get(10)?,
        cluster_id: row.get(11)?,
        is_representative: row.get::<_, i32>(12)? != 0,
        is_starred: row.get::<_, i32>(13)? != 0,
        is_rejected: row.get::<_, i32>(14)? != 0,
        rating: row.get(15)?,
        notes: row.get(16)?,
    })
}

/// What the catalog already knows about a path, for change detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanState {
    pub id: i64,
    pub size_bytes: i64,
    pub modified_at: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted(i64),
    Updated(i64),
}

impl UpsertOutcome {
    pub fn id(&self) -> i64 {
        match *self {
            UpsertOutcome::Inserted(id) | UpsertOutcome::Updated(id) => id,
        }
    }
}

/// Photo identity as seen by the near-duplicate stage.
#[derive(Debug, Clone)]
pub struct DedupInput {
    pub id: i64,
    pub content_hash: String,
    pub fingerprint: Option<String>,
}

/// Photo as seen by the semantic clustering stage.
#[derive(Debug, Clone)]
pub struct ClusterInput {
    pub id: i64,
    pub path: String,
    pub taken_at: Option<NaiveDateTime>,
    pub dedup_group_id: Option<i64>,
    pub embedding: Option<Vec<f32>>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CatalogStats {
    pub total_photos: i64,
    pub total_clusters: i64,
    pub multi_photo_clusters: i64,
    pub duplicate_groups: i64,
    pub photos_in_duplicate_groups: i64,
    pub embedded: i64,
    pub rated: i64,
    pub starred: i64,
    pub rejected: i64,
}

impl Database {
    pub fn photo_scan_state(&self, path: &str) -> Result<Option<ScanState>> {
        let state = self
            .conn
            .query_row(
                "SELECT id, size_bytes, modified_at FROM photos WHERE path = ?",
                [path],
                |row| {
                    Ok(ScanState {
                        id: row.get(0)?,
                        size_bytes: row.get(1)?,
                        modified_at: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(state)
    }

    /// Insert a new photo or refresh the scan metadata of a known path.
    /// Review state and pipeline output are left untouched.
    pub fn upsert_scanned_photo(&self, photo: &ScannedPhoto) -> Result<UpsertOutcome> {
        let path_str = photo.path.to_string_lossy();
        let existing = self.photo_scan_state(&path_str)?;
        let taken_at = photo.taken_at.as_ref().map(format_timestamp);

        match existing {
            Some(state) => {
                self.conn.execute(
                    r#"
                    UPDATE photos SET
                        filename = ?, folder = ?, size_bytes = ?, modified_at = ?,
                        content_hash = ?, fingerprint = ?,
                        taken_at = ?, width = ?, height = ?,
                        scanned_at = CURRENT_TIMESTAMP
                    WHERE id = ?
                    "#,
                    params![
                        photo.filename,
                        photo.folder,
                        photo.size_bytes as i64,
                        photo.modified_at,
                        photo.content_hash,
                        photo.fingerprint,
                        taken_at,
                        photo.width,
                        photo.height,
                        state.id,
                    ],
                )?;
                Ok(UpsertOutcome::Updated(state.id))
            }
            None => {
                self.conn.execute(
                    r#"
                    INSERT INTO photos (
                        path, filename, folder, size_bytes, modified_at,
                        content_hash, fingerprint, taken_at, width, height
                    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                    params![
                        path_str.as_ref(),
                        photo.filename,
                        photo.folder,
                        photo.size_bytes as i64,
                        photo.modified_at,
                        photo.content_hash,
                        photo.fingerprint,
                        taken_at,
                        photo.width,
                        photo.height,
                    ],
                )?;
                Ok(UpsertOutcome::Inserted(self.conn.last_insert_rowid()))
            }
        }
    }

    /// Number of other paths carrying the same content hash.
    pub fn count_same_content(&self, content_hash: &str, path: &str) -> Result<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM photos WHERE content_hash = ? AND path != ?",
            params![content_hash, path],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn get_photo(&self, photo_id: i64) -> Result<Option<PhotoRecord>> {
        let sql = format!("SELECT {} FROM photos WHERE id = ?", PHOTO_COLUMNS);
        let photo = self.conn.query_row(&sql, [photo_id], row_to_photo).optional()?;
        Ok(photo)
    }

    pub fn get_photo_by_path(&self, path: &str) -> Result<Option<PhotoRecord>> {
        let sql = format!("SELECT {} FROM photos WHERE path = ?", PHOTO_COLUMNS);
        let photo = self.conn.query_row(&sql, [path], row_to_photo).optional()?;
        Ok(photo)
    }

    pub fn count_photos(&self) -> Result<i64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM photos", [], |row| row.get(0))?;
        Ok(count)
    }

    pub fn photos_for_dedup(&self) -> Result<Vec<DedupInput>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, content_hash, fingerprint FROM photos ORDER BY id")?;
        let inputs = stmt
            .query_map([], |row| {
                Ok(DedupInput {
                    id: row.get(0)?,
                    content_hash: row.get(1)?,
                    fingerprint: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(inputs)
    }

    pub fn set_dedup_groups(&self, assignments: &[(i64, i64)]) -> Result<()> {
        self.batch(|conn| {
            let mut stmt = conn.prepare("UPDATE photos SET dedup_group_id = ? WHERE id = ?")?;
            for (photo_id, group_id) in assignments {
                stmt.execute(params![group_id, photo_id])?;
            }
            Ok(())
        })
    }

    pub fn cluster_inputs(&self) -> Result<Vec<ClusterInput>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT p.id, p.path, p.taken_at, p.dedup_group_id, e.embedding
            FROM photos p
            LEFT JOIN embeddings e ON p.id = e.photo_id
            ORDER BY p.id
            "#,
        )?;
        let inputs = stmt
            .query_map([], |row| {
                let taken_at: Option<String> = row.get(2)?;
                let bytes: Option<Vec<u8>> = row.get(4)?;
                Ok(ClusterInput {
                    id: row.get(0)?,
                    path: row.get(1)?,
                    taken_at: taken_at.as_deref().and_then(parse_timestamp),
                    dedup_group_id: row.get(3)?,
                    embedding: bytes.map(|b| bytes_to_embedding(&b)),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(inputs)
    }

    // ========================================================================
    // Review state: single-statement writes, safe while a job is running
    // ========================================================================

    pub fn set_starred(&self, photo_id: i64, starred: bool) -> Result<()> {
        // Starring withdraws a rejection and vice versa.
        let changed = self.conn.execute(
            r#"
            UPDATE photos
            SET is_starred = ?1,
                is_rejected = CASE WHEN ?1 THEN 0 ELSE is_rejected END,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = ?2
            "#,
            params![starred, photo_id],
        )?;
        if changed == 0 {
            return Err(ReviewError::PhotoNotFound(photo_id).into());
        }
        Ok(())
    }

    pub fn set_rejected(&self, photo_id: i64, rejected: bool) -> Result<()> {
        let changed = self.conn.execute(
            r#"
            UPDATE photos
            SET is_rejected = ?1,
                is_starred = CASE WHEN ?1 THEN 0 ELSE is_starred END,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = ?2
            "#,
            params![rejected, photo_id],
        )?;
        if changed == 0 {
            return Err(ReviewError::PhotoNotFound(photo_id).into());
        }
        Ok(())
    }

    pub fn set_rating(&self, photo_id: i64, rating: i32) -> Result<()> {
        if !(0..=5).contains(&rating) {
            return Err(ReviewError::InvalidRating(rating).into());
        }
        let changed = self.conn.execute(
            "UPDATE photos SET rating = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
            params![rating, photo_id],
        )?;
        if changed == 0 {
            return Err(ReviewError::PhotoNotFound(photo_id).into());
        }
        Ok(())
    }

    pub fn set_notes(&self, photo_id: i64, notes: &str) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE photos SET notes = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
            params![notes, photo_id],
        )?;
        if changed == 0 {
            return Err(ReviewError::PhotoNotFound(photo_id).into());
        }
        Ok(())
    }

    /// Apply one rating to every member of a cluster. Returns the number of photos touched.
    pub fn rate_cluster(&self, cluster_id: i64, rating: i32) -> Result<usize> {
        if !(0..=5).contains(&rating) {
            return Err(ReviewError::InvalidRating(rating).into());
        }
        let affected = self.conn.execute(
            "UPDATE photos SET rating = ?, updated_at = CURRENT_TIMESTAMP WHERE cluster_id = ?",
            params![rating, cluster_id],
        )?;
        Ok(affected)
    }

    /// Clear every star and rejection.
    pub fn reset_selections(&self) -> Result<usize> {
        let affected = self.conn.execute(
            r#"
            UPDATE photos
            SET is_starred = 0, is_rejected = 0, updated_at = CURRENT_TIMESTAMP
            WHERE is_starred = 1 OR is_rejected = 1
            "#,
            [],
        )?;
        Ok(affected)
    }

    pub fn starred_photos(&self) -> Result<Vec<PhotoRecord>> {
        self.flagged_photos("is_starred")
    }

    pub fn rejected_photos(&self) -> Result<Vec<PhotoRecord>> {
        self.flagged_photos("is_rejected")
    }

    fn flagged_photos(&self, flag: &str) -> Result<Vec<PhotoRecord>> {
        let sql = format!(
            "SELECT {} FROM photos WHERE {} = 1 ORDER BY folder, taken_at, filename",
            PHOTO_COLUMNS, flag
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let photos = stmt
            .query_map([], row_to_photo)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(photos)
    }

    pub fn stats(&self) -> Result<CatalogStats> {
        let count = |sql: &str| -> Result<i64> {
            Ok(self.conn.query_row(sql, [], |row| row.get(0))?)
        };

        Ok(CatalogStats {
            total_photos: count("SELECT COUNT(*) FROM photos")?,
            total_clusters: count("SELECT COUNT(*) FROM clusters")?,
            multi_photo_clusters: count("SELECT COUNT(*) FROM clusters WHERE member_count > 1")?,
            duplicate_groups: count(
                r#"
                SELECT COUNT(*) FROM (
                    SELECT dedup_group_id FROM photos
                    WHERE dedup_group_id IS NOT NULL
                    GROUP BY dedup_group_id HAVING COUNT(*) > 1
                )
                "#,
            )?,
            photos_in_duplicate_groups: count(
                r#"
                SELECT COUNT(*) FROM photos WHERE dedup_group_id IN (
                    SELECT dedup_group_id FROM photos
                    WHERE dedup_group_id IS NOT NULL
                    GROUP BY dedup_group_id HAVING COUNT(*) > 1
                )
                "#,
            )?,
            embedded: count("SELECT COUNT(*) FROM embeddings")?,
            rated: count("SELECT COUNT(*) FROM photos WHERE rating > 0")?,
            starred: count("SELECT COUNT(*) FROM photos WHERE is_starred = 1")?,
            rejected: count("SELECT COUNT(*) FROM photos WHERE is_rejected = 1")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{scanned, temp_db};

    #[test]
    fn test_upsert_is_keyed_by_path() {
        let (_dir, _path, db) = temp_db();
        let photo = scanned("/photos/a.jpg", "h1", Some("00ff"));

        let first = db.upsert_scanned_photo(&photo).unwrap();
        assert!(matches!(first, UpsertOutcome::Inserted(_)));

        let second = db.upsert_scanned_photo(&photo).unwrap();
        assert_eq!(second, UpsertOutcome::Updated(first.id()));
        assert_eq!(db.count_photos().unwrap(), 1);
    }

    #[test]
    fn test_same_content_at_new_path_is_distinct_photo() {
        let (_dir, _path, db) = temp_db();
        db.upsert_scanned_photo(&scanned("/photos/a.jpg", "same", None)).unwrap();
        db.upsert_scanned_photo(&scanned("/backup/a.jpg", "same", None)).unwrap();

        assert_eq!(db.count_photos().unwrap(), 2);
        assert_eq!(db.count_same_content("same", "/backup/a.jpg").unwrap(), 1);
    }

    #[test]
    fn test_rescan_preserves_review_state() {
        let (_dir, _path, db) = temp_db();
        let photo = scanned("/photos/a.jpg", "h1", None);
        let id = db.upsert_scanned_photo(&photo).unwrap().id();

        db.set_starred(id, true).unwrap();
        db.set_rating(id, 4).unwrap();
        db.upsert_scanned_photo(&photo).unwrap();

        let record = db.get_photo(id).unwrap().unwrap();
        assert!(record.is_starred);
        assert_eq!(record.rating, 4);
    }

    #[test]
    fn test_star_and_reject_are_exclusive() {
        let (_dir, _path, db) = temp_db();
        let id = db
            .upsert_scanned_photo(&scanned("/photos/a.jpg", "h1", None))
            .unwrap()
            .id();

        db.set_starred(id, true).unwrap();
        db.set_rejected(id, true).unwrap();
        let record = db.get_photo(id).unwrap().unwrap();
        assert_eq!(record.review_state(), ReviewState::Rejected);

        db.set_starred(id, true).unwrap();
        let record = db.get_photo(id).unwrap().unwrap();
        assert_eq!(record.review_state(), ReviewState::Starred);

        db.set_starred(id, false).unwrap();
        let record = db.get_photo(id).unwrap().unwrap();
        assert_eq!(record.review_state(), ReviewState::Unrated);
    }

    #[test]
    fn test_rating_validation() {
        let (_dir, _path, db) = temp_db();
        let id = db
            .upsert_scanned_photo(&scanned("/photos/a.jpg", "h1", None))
            .unwrap()
            .id();

        let err = db.set_rating(id, 6).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ReviewError>(),
            Some(ReviewError::InvalidRating(6))
        ));

        let err = db.set_rating(id + 100, 3).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ReviewError>(),
            Some(ReviewError::PhotoNotFound(_))
        ));
    }

    #[test]
    fn test_starred_photos_and_reset() {
        let (_dir, _path, db) = temp_db();
        let a = db.upsert_scanned_photo(&scanned("/p/a.jpg", "h1", None)).unwrap().id();
        let b = db.upsert_scanned_photo(&scanned("/p/b.jpg", "h2", None)).unwrap().id();
        db.upsert_scanned_photo(&scanned("/p/c.jpg", "h3", None)).unwrap();

        db.set_starred(a, true).unwrap();
        db.set_rejected(b, true).unwrap();

        let starred = db.starred_photos().unwrap();
        assert_eq!(starred.len(), 1);
        assert_eq!(starred[0].id, a);

        let stats = db.stats().unwrap();
        assert_eq!(stats.starred, 1);
        assert_eq!(stats.rejected, 1);

        assert_eq!(db.reset_selections().unwrap(), 2);
        assert!(db.starred_photos().unwrap().is_empty());
    }

    #[test]
    fn test_notes_round_trip_and_unknown_photo() {
        let (_dir, _path, db) = temp_db();
        let id = db.upsert_scanned_photo(&scanned("/p/a.jpg", "h1", None)).unwrap().id();

        db.set_notes(id, "bride's left eye closed").unwrap();
        let record = db.get_photo(id).unwrap().unwrap();
        assert_eq!(record.notes.as_deref(), Some("bride's left eye closed"));

        let err = db.set_notes(id + 100, "x").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ReviewError>(),
            Some(ReviewError::PhotoNotFound(_))
        ));
    }

    #[test]
    fn test_rate_cluster() {
        let (_dir, _path, db) = temp_db();
        let a = db.upsert_scanned_photo(&scanned("/p/a.jpg", "h1", None)).unwrap().id();
        let b = db.upsert_scanned_photo(&scanned("/p/b.jpg", "h2", None)).unwrap().id();
        let c = db.upsert_scanned_photo(&scanned("/p/c.jpg", "h3", None)).unwrap().id();
        let ids = db
            .replace_clusters(&[
                crate::db::ClusterDraft {
                    members: vec![a, b],
                    representative: a,
                    mean_taken_at: None,
                },
                crate::db::ClusterDraft {
                    members: vec![c],
                    representative: c,
                    mean_taken_at: None,
                },
            ])
            .unwrap();

        assert_eq!(db.rate_cluster(ids[0], 4).unwrap(), 2);
        assert_eq!(db.get_photo(a).unwrap().unwrap().rating, 4);
        assert_eq!(db.get_photo(b).unwrap().unwrap().rating, 4);
        assert_eq!(db.get_photo(c).unwrap().unwrap().rating, 0);

        // a cluster id with no members touches nothing
        assert_eq!(db.rate_cluster(ids[1] + 100, 3).unwrap(), 0);

        let err = db.rate_cluster(ids[0], -1).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ReviewError>(),
            Some(ReviewError::InvalidRating(-1))
        ));
        assert_eq!(db.get_photo(a).unwrap().unwrap().rating, 4);
    }

    #[test]
    fn test_rejected_photos() {
        let (_dir, _path, db) = temp_db();
        let a = db.upsert_scanned_photo(&scanned("/p/a.jpg", "h1", None)).unwrap().id();
        let b = db.upsert_scanned_photo(&scanned("/p/b.jpg", "h2", None)).unwrap().id();
        db.set_starred(a, true).unwrap();
        db.set_rejected(b, true).unwrap();

        let rejected: Vec<i64> = db.rejected_photos().unwrap().iter().map(|p| p.id).collect();
        assert_eq!(rejected, vec![b]);
    }
}
