pub const SCHEMA: &str = r#"
-- Photos table: one row per absolute path
CREATE TABLE IF NOT EXISTS photos (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    path TEXT NOT NULL UNIQUE,
    filename TEXT NOT NULL,
    folder TEXT NOT NULL,
    size_bytes INTEGER NOT NULL,
    modified_at TEXT,
    scanned_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,

    -- Identity and similarity
    content_hash TEXT NOT NULL,
    fingerprint TEXT,          -- hex-encoded gradient hash, NULL if undecodable

    -- Image metadata
    taken_at TEXT,             -- 'YYYY-MM-DD HH:MM:SS', NULL when unknown
    width INTEGER,
    height INTEGER,

    -- Pipeline output
    dedup_group_id INTEGER,
    cluster_id INTEGER,
    is_representative INTEGER NOT NULL DEFAULT 0,

    -- Review state (never written by the pipeline)
    is_starred INTEGER NOT NULL DEFAULT 0,
    is_rejected INTEGER NOT NULL DEFAULT 0,
    rating INTEGER NOT NULL DEFAULT 0,
    notes TEXT,
    updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,

    FOREIGN KEY (cluster_id) REFERENCES clusters(id) ON DELETE SET NULL
);

CREATE INDEX IF NOT EXISTS idx_photos_folder ON photos(folder);
CREATE INDEX IF NOT EXISTS idx_photos_content_hash ON photos(content_hash);
CREATE INDEX IF NOT EXISTS idx_photos_cluster ON photos(cluster_id);
CREATE INDEX IF NOT EXISTS idx_photos_dedup_group ON photos(dedup_group_id);
CREATE INDEX IF NOT EXISTS idx_photos_starred ON photos(is_starred);
CREATE INDEX IF NOT EXISTS idx_photos_rating ON photos(rating);

-- Embedding vectors, kept apart from photos to keep row scans cheap
CREATE TABLE IF NOT EXISTS embeddings (
    photo_id INTEGER PRIMARY KEY,
    embedding BLOB NOT NULL,   -- float32 array, little endian
    embedding_dim INTEGER NOT NULL,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (photo_id) REFERENCES photos(id) ON DELETE CASCADE
);

-- Clusters: fully replaced on every clustering run
CREATE TABLE IF NOT EXISTS clusters (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    member_count INTEGER NOT NULL DEFAULT 0,
    representative_photo_id INTEGER,
    mean_taken_at TEXT,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (representative_photo_id) REFERENCES photos(id)
);

-- Background jobs (index and export)
CREATE TABLE IF NOT EXISTS jobs (
    id INTEGER PRIMARY KEY,
    kind TEXT NOT NULL,        -- 'index' or 'export'
    target TEXT NOT NULL,
    status TEXT NOT NULL,      -- pending/running/complete/cancelled/error
    phase TEXT NOT NULL,
    current INTEGER NOT NULL DEFAULT 0,
    total INTEGER NOT NULL DEFAULT 0,
    copied INTEGER NOT NULL DEFAULT 0,
    skipped INTEGER NOT NULL DEFAULT 0,
    item_errors INTEGER NOT NULL DEFAULT 0,
    message TEXT NOT NULL DEFAULT '',
    error TEXT,
    started_at TEXT NOT NULL,
    completed_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
"#;
