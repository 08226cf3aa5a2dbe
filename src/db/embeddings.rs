//! Embedding vector storage.

use anyhow::Result;
use rusqlite::{params, OptionalExtension};

use super::Database;

impl Database {
    /// Store (or replace) the embedding for a photo.
    pub fn store_embedding(&self, photo_id: i64, embedding: &[f32]) -> Result<()> {
        let bytes = embedding_to_bytes(embedding);

        self.conn.execute(
            r#"
            INSERT OR REPLACE INTO embeddings (photo_id, embedding, embedding_dim, created_at)
            VALUES (?, ?, ?, CURRENT_TIMESTAMP)
            "#,
            params![photo_id, bytes, embedding.len() as i64],
        )?;

        Ok(())
    }

    pub fn get_embedding(&self, photo_id: i64) -> Result<Option<Vec<f32>>> {
        let bytes: Option<Vec<u8>> = self
            .conn
            .query_row(
                "SELECT embedding FROM embeddings WHERE photo_id = ?",
                [photo_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(bytes.map(|b| bytes_to_embedding(&b)))
    }

    /// Photos still waiting for a vector, as `(id, path)` in id order.
    pub fn photos_without_embeddings(&self) -> Result<Vec<(i64, String)>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT p.id, p.path
            FROM photos p
            LEFT JOIN embeddings e ON p.id = e.photo_id
            WHERE e.photo_id IS NULL
            ORDER BY p.id
            "#,
        )?;

        let results = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(results)
    }

    pub fn count_embeddings(&self) -> Result<i64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM embeddings", [], |row| row.get(0))?;
        Ok(count)
    }
}

/// Convert f32 slice to little-endian bytes for storage
pub fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for &val in embedding {
        bytes.extend_from_slice(&val.to_le_bytes());
    }
    bytes
}

/// Convert stored bytes back to an f32 vector. Trailing partial values are dropped.
pub fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
