pub mod change_detection;
pub mod discovery;
pub mod hashing;
pub mod metadata;

use anyhow::{bail, Context, Result};
use chrono::NaiveDateTime;
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::config::ScannerConfig;
use crate::db::{Database, UpsertOutcome};

pub use discovery::{discover_images, walk_images};
pub use hashing::{Fingerprint, FINGERPRINT_BITS};
pub use metadata::ImageMetadata;

/// Everything the scanner learns about one file.
#[derive(Debug, Clone)]
pub struct ScannedPhoto {
    pub path: PathBuf,
    pub filename: String,
    pub folder: String,
    pub size_bytes: u64,
    pub modified_at: Option<String>,
    pub content_hash: String,
    /// Hex fingerprint; `None` when the file could not be decoded.
    pub fingerprint: Option<String>,
    pub taken_at: Option<NaiveDateTime>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[derive(Debug)]
pub enum ScanOutcome {
    /// Size and mtime match the catalog; nothing was read.
    Unchanged(i64),
    Scanned(ScannedPhoto),
}

/// Tally of one directory scan.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanReport {
    pub found: usize,
    pub new: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub errors: usize,
    /// New or changed photos whose content already exists at another path.
    pub exact_duplicates: usize,
}

impl ScanReport {
    pub fn record(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Inserted(_) => self.new += 1,
            UpsertOutcome::Updated(_) => self.updated += 1,
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "{} found, {} new, {} updated, {} unchanged, {} errors",
            self.found, self.new, self.updated, self.unchanged, self.errors
        )
    }
}

pub struct Scanner {
    extensions: Vec<String>,
}

impl Scanner {
    pub fn new(config: &ScannerConfig) -> Self {
        Self {
            extensions: config.image_extensions.clone(),
        }
    }

    /// Lazily enumerate candidate files under `root` as absolute paths.
    pub fn walk(&self, root: &Path) -> Result<impl Iterator<Item = PathBuf> + '_> {
        let root = root
            .canonicalize()
            .with_context(|| format!("Cannot open photo directory {}", root.display()))?;
        if !root.is_dir() {
            bail!("{} is not a directory", root.display());
        }
        Ok(walk_images(&root, &self.extensions))
    }

    /// Count candidates without reading them.
    pub fn count(&self, root: &Path) -> Result<usize> {
        Ok(self.walk(root)?.count())
    }

    /// Scan one path unless the catalog already has it unchanged.
    pub fn scan_path(&self, db: &Database, path: &Path) -> Result<ScanOutcome> {
        let fs_meta = std::fs::metadata(path)
            .with_context(|| format!("Cannot stat {}", path.display()))?;
        let modified_at = change_detection::file_modified_at(&fs_meta);

        let path_str = path.to_string_lossy();
        if let Some(state) = db.photo_scan_state(&path_str)? {
            if change_detection::is_unchanged(&state, fs_meta.len(), modified_at.as_deref()) {
                return Ok(ScanOutcome::Unchanged(state.id));
            }
        }

        scan_file(path, modified_at).map(ScanOutcome::Scanned)
    }
}

/// Read and fingerprint a single file.
///
/// Fails when the file cannot be read or does not decode as an image, so
/// corrupt files never reach the catalog. Missing metadata leaves fields empty.
pub fn scan_file(path: &Path, modified_at: Option<String>) -> Result<ScannedPhoto> {
    let bytes = std::fs::read(path).with_context(|| format!("Cannot read {}", path.display()))?;

    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let folder = path
        .parent()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_default();

    let content_hash = hashing::content_hash_bytes(&bytes);
    let meta = metadata::extract_metadata(&bytes);

    let img = image::load_from_memory(&bytes)
        .with_context(|| format!("Cannot decode {}", path.display()))?;
    let fingerprint = match hashing::compute_fingerprint(&img) {
        Ok(fp) => Some(fp.to_hex()),
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "Fingerprint failed");
            None
        }
    };

    Ok(ScannedPhoto {
        path: path.to_path_buf(),
        filename,
        folder,
        size_bytes: bytes.len() as u64,
        modified_at,
        content_hash,
        fingerprint,
        taken_at: meta.taken_at,
        width: meta.width,
        height: meta.height,
    })
}
