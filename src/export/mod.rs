use anyhow::{bail, Context, Result};
use chrono::Local;
use serde::Serialize;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::config::Config;
use crate::db::{format_timestamp, Database, PhotoRecord};
use crate::tasks::{Job, JobContext, JobKind, JobOutcome, JobPhase};

const MANIFEST_NAME: &str = "manifest.json";
const WRITE_CHECK_NAME: &str = ".picbest-write-check";

/// File list format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListFormat {
    Txt,
    Json,
    Csv,
    /// Bare file names under a short header, for sharing with a photographer.
    Names,
}

impl ListFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ListFormat::Txt | ListFormat::Names => "txt",
            ListFormat::Json => "json",
            ListFormat::Csv => "csv",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ListFormat::Txt => "plain text",
            ListFormat::Json => "JSON",
            ListFormat::Csv => "CSV",
            ListFormat::Names => "file names",
        }
    }
}

impl FromStr for ListFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "txt" | "text" => Ok(ListFormat::Txt),
            "json" => Ok(ListFormat::Json),
            "csv" => Ok(ListFormat::Csv),
            "names" => Ok(ListFormat::Names),
            other => bail!(
                "Unknown list format '{}' (expected txt, json, csv or names)",
                other
            ),
        }
    }
}

/// Which review verdict a file list covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Selection {
    #[default]
    Starred,
    Rejected,
}

impl Selection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Selection::Starred => "starred",
            Selection::Rejected => "rejected",
        }
    }

    fn photos(&self, db: &Database) -> Result<Vec<PhotoRecord>> {
        match self {
            Selection::Starred => db.starred_photos(),
            Selection::Rejected => db.rejected_photos(),
        }
    }
}

/// One photo as written to file lists and the export manifest.
#[derive(Debug, Clone, Serialize)]
pub struct ListedPhoto {
    pub filepath: String,
    pub filename: String,
    pub folder: String,
    pub starred: bool,
    pub rejected: bool,
    pub rating: i32,
    pub taken_at: Option<String>,
}

impl From<&PhotoRecord> for ListedPhoto {
    fn from(photo: &PhotoRecord) -> Self {
        Self {
            filepath: photo.path.clone(),
            filename: photo.filename.clone(),
            folder: photo.folder.clone(),
            starred: photo.is_starred,
            rejected: photo.is_rejected,
            rating: photo.rating,
            taken_at: photo.taken_at.as_ref().map(format_timestamp),
        }
    }
}

#[derive(Debug, Serialize)]
struct ManifestEntry {
    #[serde(flatten)]
    photo: ListedPhoto,
    exported_as: String,
}

#[derive(Debug, Serialize)]
struct Manifest<'a> {
    exported_at: String,
    total: usize,
    copied: usize,
    skipped: usize,
    source_db: String,
    files: &'a [ManifestEntry],
}

/// Starred and rejected counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionSummary {
    pub starred: i64,
    pub rejected: i64,
}

pub fn selection_summary(db: &Database) -> Result<SelectionSummary> {
    let stats = db.stats()?;
    Ok(SelectionSummary {
        starred: stats.starred,
        rejected: stats.rejected,
    })
}

/// Write the starred or rejected set to `output_path`. Returns the number of photos listed.
pub fn export_file_list(
    db: &Database,
    output_path: &Path,
    format: ListFormat,
    selection: Selection,
) -> Result<usize> {
    let photos: Vec<ListedPhoto> = selection.photos(db)?.iter().map(ListedPhoto::from).collect();

    match format {
        ListFormat::Txt => {
            let mut file = File::create(output_path)
                .with_context(|| format!("Cannot create {}", output_path.display()))?;
            for photo in &photos {
                writeln!(file, "{}", photo.filepath)?;
            }
        }
        ListFormat::Names => {
            let mut file = File::create(output_path)
                .with_context(|| format!("Cannot create {}", output_path.display()))?;
            let source = photos.first().map(|p| p.folder.as_str()).unwrap_or("Unknown");
            writeln!(file, "# Selected Photos ({})", selection.as_str())?;
            writeln!(file, "# Source: {}", source)?;
            writeln!(file, "# Count: {}", photos.len())?;
            writeln!(file, "# Exported: {}", Local::now().format("%Y-%m-%d %H:%M:%S"))?;
            writeln!(file)?;
            for photo in &photos {
                writeln!(file, "{}", photo.filename)?;
            }
        }
        ListFormat::Json => {
            let json = serde_json::to_string_pretty(&photos)?;
            fs::write(output_path, json)
                .with_context(|| format!("Cannot write {}", output_path.display()))?;
        }
        ListFormat::Csv => {
            let mut wtr = csv::Writer::from_path(output_path)
                .with_context(|| format!("Cannot create {}", output_path.display()))?;
            for photo in &photos {
                wtr.serialize(photo)?;
            }
            wtr.flush()?;
        }
    }

    tracing::info!(
        count = photos.len(),
        format = format.name(),
        selection = selection.as_str(),
        path = %output_path.display(),
        "Wrote file list"
    );
    Ok(photos.len())
}

/// Rating written to a sidecar. An unrated pick counts as five stars.
pub fn xmp_rating(photo: &PhotoRecord) -> i32 {
    if photo.is_starred && photo.rating == 0 {
        5
    } else {
        photo.rating
    }
}

/// Minimal XMP packet carrying a rating and the "Select" label.
pub fn xmp_sidecar(rating: i32) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<x:xmpmeta xmlns:x="adobe:ns:meta/">
  <rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#">
    <rdf:Description rdf:about=""
      xmlns:xmp="http://ns.adobe.com/xap/1.0/"
      xmp:Rating="{}"
      xmp:Label="Select"/>
  </rdf:RDF>
</x:xmpmeta>
"#,
        rating
    )
}

/// The filesystem side of an export.
pub trait Destination: Send {
    fn root(&self) -> &Path;

    /// Byte length of the regular file `name`, if there is one.
    fn existing_len(&self, name: &str) -> Option<u64>;

    /// Copy `src` in as `name`. A failed copy leaves nothing under `name`.
    fn place(&self, src: &Path, name: &str) -> Result<()>;

    fn write(&self, name: &str, contents: &[u8]) -> Result<()>;
}

/// A plain directory on the local filesystem.
pub struct DirectoryDestination {
    root: PathBuf,
}

impl DirectoryDestination {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Destination for DirectoryDestination {
    fn root(&self) -> &Path {
        &self.root
    }

    fn existing_len(&self, name: &str) -> Option<u64> {
        fs::metadata(self.root.join(name))
            .ok()
            .filter(|m| m.is_file())
            .map(|m| m.len())
    }

    fn place(&self, src: &Path, name: &str) -> Result<()> {
        // Copy beside the target, then rename, so readers never see a partial file
        let dest = self.root.join(name);
        let part = self.root.join(format!(".{}.part", name));
        if let Err(e) = fs::copy(src, &part) {
            let _ = fs::remove_file(&part);
            return Err(e).with_context(|| format!("Copy failed for {}", src.display()));
        }
        if let Err(e) = fs::rename(&part, &dest) {
            let _ = fs::remove_file(&part);
            return Err(e).with_context(|| format!("Cannot place {}", dest.display()));
        }
        Ok(())
    }

    fn write(&self, name: &str, contents: &[u8]) -> Result<()> {
        let path = self.root.join(name);
        fs::write(&path, contents).with_context(|| format!("Cannot write {}", path.display()))
    }
}

/// Copies every starred photo into one flat destination directory.
///
/// A file already at the destination with the same name and byte size is
/// skipped, so re-running an export only copies what is new. Per-file
/// failures are collected on the job; only an unwritable destination ends
/// the job in error.
pub struct ExportJob {
    catalog: PathBuf,
    destination: Box<dyn Destination>,
    include_manifest: bool,
    write_xmp: bool,
}

impl ExportJob {
    pub fn new(config: &Config, destination: impl Into<PathBuf>) -> Self {
        Self::with_destination(config, Box::new(DirectoryDestination::new(destination)))
    }

    pub fn with_destination(config: &Config, destination: Box<dyn Destination>) -> Self {
        Self {
            catalog: config.db_path.clone(),
            destination,
            include_manifest: config.export.include_manifest,
            write_xmp: config.export.write_xmp,
        }
    }

    pub fn include_manifest(mut self, include: bool) -> Self {
        self.include_manifest = include;
        self
    }

    pub fn write_xmp(mut self, write: bool) -> Self {
        self.write_xmp = write;
        self
    }
}

impl Job for ExportJob {
    fn kind(&self) -> JobKind {
        JobKind::Export
    }

    fn target(&self) -> PathBuf {
        self.destination.root().to_path_buf()
    }

    fn catalog(&self) -> PathBuf {
        self.catalog.clone()
    }

    fn run(self: Box<Self>, ctx: &mut JobContext) -> Result<JobOutcome> {
        let db = Database::open_initialized(&self.catalog)
            .with_context(|| format!("Cannot open catalog {}", self.catalog.display()))?;
        let photos = db.starred_photos()?;
        let names = destination_names(&photos);
        let root = self.destination.root().to_path_buf();

        ensure_writable(&root)?;
        ctx.enter_phase(
            JobPhase::Copying,
            photos.len(),
            format!("Exporting {} photos to {}", photos.len(), root.display()),
        );

        let mut copied = 0;
        let mut skipped = 0;
        let mut manifest = Vec::with_capacity(photos.len());
        let mut sidecars: HashSet<String> = HashSet::new();

        for (i, (photo, name)) in photos.iter().zip(&names).enumerate() {
            if ctx.is_cancelled() {
                tracing::info!(copied, skipped, "Export cancelled");
                return Ok(JobOutcome::Cancelled);
            }

            match self.copy_if_needed(Path::new(&photo.path), name) {
                Ok(result) => {
                    match result {
                        CopyResult::Copied => {
                            copied += 1;
                            ctx.add_copied();
                        }
                        CopyResult::Skipped => {
                            skipped += 1;
                            ctx.add_skipped();
                        }
                    }
                    if self.write_xmp {
                        let sidecar = sidecar_name(name, &sidecars);
                        let xmp = xmp_sidecar(xmp_rating(photo));
                        match self.destination.write(&sidecar, xmp.as_bytes()) {
                            Ok(()) => {
                                sidecars.insert(sidecar);
                            }
                            Err(e) => ctx.push_error(format!("{}: {:#}", sidecar, e)),
                        }
                    }
                    manifest.push(ManifestEntry {
                        photo: ListedPhoto::from(photo),
                        exported_as: name.clone(),
                    });
                }
                Err(e) => ctx.push_error(format!("{}: {:#}", photo.path, e)),
            }

            ctx.progress(i + 1, format!("Exported {} of {}", i + 1, photos.len()));
        }

        if self.include_manifest {
            ctx.set_message("Writing manifest");
            let doc = Manifest {
                exported_at: Local::now().to_rfc3339(),
                total: photos.len(),
                copied,
                skipped,
                source_db: self.catalog.to_string_lossy().to_string(),
                files: &manifest,
            };
            let written = serde_json::to_vec_pretty(&doc)
                .map_err(anyhow::Error::from)
                .and_then(|json| self.destination.write(MANIFEST_NAME, &json));
            if let Err(e) = written {
                ctx.push_error(format!("manifest: {:#}", e));
            }
        }

        let errors = ctx.snapshot().errors.len();
        Ok(JobOutcome::Completed(format!(
            "{} copied, {} skipped, {} errors",
            copied, skipped, errors
        )))
    }
}

impl ExportJob {
    fn copy_if_needed(&self, src: &Path, name: &str) -> Result<CopyResult> {
        let src_len = fs::metadata(src)
            .with_context(|| format!("Source missing: {}", src.display()))?
            .len();
        if self.destination.existing_len(name) == Some(src_len) {
            return Ok(CopyResult::Skipped);
        }
        self.destination.place(src, name)?;
        Ok(CopyResult::Copied)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CopyResult {
    Copied,
    Skipped,
}

/// Flat destination name for each photo, unique within the set.
///
/// The first photo with a given file name keeps it; later ones are prefixed
/// with their parent folder's name, then with their id until free. The
/// starred set is ordered by folder, time and name, so reruns pick the same
/// names.
fn destination_names(photos: &[PhotoRecord]) -> Vec<String> {
    let mut taken: HashSet<String> = HashSet::new();
    photos
        .iter()
        .map(|photo| {
            let mut name = photo.filename.clone();
            if taken.contains(&name) {
                let parent = Path::new(&photo.folder)
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                if !parent.is_empty() {
                    name = format!("{}_{}", parent, photo.filename);
                }
                while taken.contains(&name) {
                    name = format!("{}_{}", photo.id, name);
                }
            }
            taken.insert(name.clone());
            name
        })
        .collect()
}

/// `<stem>.xmp`, or `<name>.xmp` when another photo in the run already took the stem.
fn sidecar_name(name: &str, taken: &HashSet<String>) -> String {
    let stem = Path::new(name)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| name.to_string());
    let short = format!("{}.xmp", stem);
    if taken.contains(&short) {
        format!("{}.xmp", name)
    } else {
        short
    }
}

/// Create `dir` if needed and prove a file can be written into it.
fn ensure_writable(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Cannot create destination {}", dir.display()))?;
    let check = dir.join(WRITE_CHECK_NAME);
    File::create(&check)
        .and_then(|mut f| f.write_all(b"ok"))
        .with_context(|| format!("Destination {} is not writable", dir.display()))?;
    let _ = fs::remove_file(&check);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::scanned;
    use crate::tasks::{JobId, JobManager, JobSnapshot, JobStatus, StatusCell};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{mpsc, Arc, Mutex};
    use std::time::Duration;

    struct Fixture {
        _dir: tempfile::TempDir,
        root: PathBuf,
        config: Config,
        db: Database,
    }

    /// Catalog with `count` photos on disk, all starred.
    fn fixture(count: usize) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let photos = root.join("photos");
        fs::create_dir_all(&photos).unwrap();

        let mut config = Config::default();
        config.db_path = root.join("catalog.db");
        let db = Database::open_initialized(&config.db_path).unwrap();

        for i in 0..count {
            let path = photos.join(format!("img{:02}.jpg", i));
            fs::write(&path, vec![i as u8; 100 + i]).unwrap();
            let id = db
                .upsert_scanned_photo(&scanned(&path.to_string_lossy(), &format!("h{i}"), None))
                .unwrap()
                .id();
            db.set_starred(id, true).unwrap();
        }

        Fixture {
            _dir: dir,
            root,
            config,
            db,
        }
    }

    fn run(job: ExportJob) -> (Result<JobOutcome>, JobSnapshot) {
        run_with_flag(job, Arc::new(AtomicBool::new(false)))
    }

    fn run_with_flag(job: ExportJob, flag: Arc<AtomicBool>) -> (Result<JobOutcome>, JobSnapshot) {
        let cell = StatusCell::new(JobSnapshot::new(JobId::new(), JobKind::Export, job.target()));
        let mut ctx = JobContext::new(cell, flag, None);
        let outcome = Box::new(job).run(&mut ctx);
        let snapshot = ctx.snapshot().clone();
        (outcome, snapshot)
    }

    fn files_in(dest: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dest)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    fn exported_photos(dest: &Path) -> Vec<String> {
        files_in(dest).into_iter().filter(|n| n.ends_with(".jpg")).collect()
    }

    /// Directory that stops after `after` placements until the test releases it.
    struct GatedDestination {
        inner: DirectoryDestination,
        after: usize,
        placed: AtomicUsize,
        reached: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl Destination for GatedDestination {
        fn root(&self) -> &Path {
            self.inner.root()
        }

        fn existing_len(&self, name: &str) -> Option<u64> {
            self.inner.existing_len(name)
        }

        fn place(&self, src: &Path, name: &str) -> Result<()> {
            self.inner.place(src, name)?;
            if self.placed.fetch_add(1, Ordering::SeqCst) + 1 == self.after {
                let _ = self.reached.lock().unwrap().send(());
                let _ = self.release.lock().unwrap().recv_timeout(Duration::from_secs(5));
            }
            Ok(())
        }

        fn write(&self, name: &str, contents: &[u8]) -> Result<()> {
            self.inner.write(name, contents)
        }
    }

    #[test]
    fn test_export_copies_then_skips_on_rerun() {
        let fx = fixture(3);
        let dest = fx.root.join("out");

        let (outcome, snap) = run(ExportJob::new(&fx.config, &dest));
        assert!(matches!(outcome.unwrap(), JobOutcome::Completed(_)));
        assert_eq!(snap.copied, 3);
        assert_eq!(snap.skipped, 0);
        assert_eq!(exported_photos(&dest).len(), 3);
        assert!(dest.join(MANIFEST_NAME).exists());
        assert_eq!(snap.message, "Writing manifest");
        assert!(!dest.join(WRITE_CHECK_NAME).exists());

        let (_, snap) = run(ExportJob::new(&fx.config, &dest));
        assert_eq!(snap.copied, 0);
        assert_eq!(snap.skipped, snap.total);
        assert_eq!(snap.total, 3);
    }

    #[test]
    fn test_size_mismatch_is_recopied() {
        let fx = fixture(1);
        let dest = fx.root.join("out");
        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join("img00.jpg"), b"stale").unwrap();

        let (_, snap) = run(ExportJob::new(&fx.config, &dest).include_manifest(false));
        assert_eq!(snap.copied, 1);
        assert_eq!(fs::metadata(dest.join("img00.jpg")).unwrap().len(), 100);
        assert!(!dest.join(MANIFEST_NAME).exists());
    }

    #[test]
    fn test_missing_source_is_recorded_not_fatal() {
        let fx = fixture(3);
        fs::remove_file(fx.root.join("photos").join("img01.jpg")).unwrap();
        let dest = fx.root.join("out");

        let (outcome, snap) = run(ExportJob::new(&fx.config, &dest));
        assert!(matches!(outcome.unwrap(), JobOutcome::Completed(_)));
        assert_eq!(snap.copied, 2);
        assert_eq!(snap.errors.len(), 1);
        assert!(snap.errors[0].contains("img01.jpg"));
    }

    #[test]
    fn test_same_name_from_two_folders_gets_folder_prefix() {
        let fx = fixture(1);
        let other = fx.root.join("other");
        fs::create_dir_all(&other).unwrap();
        let twin = other.join("img00.jpg");
        fs::write(&twin, vec![9u8; 500]).unwrap();
        let id = fx
            .db
            .upsert_scanned_photo(&scanned(&twin.to_string_lossy(), "twin", None))
            .unwrap()
            .id();
        fx.db.set_starred(id, true).unwrap();

        let dest = fx.root.join("out");
        let (_, snap) = run(ExportJob::new(&fx.config, &dest));
        assert_eq!(snap.copied, 2);
        assert!(snap.errors.is_empty());
        // "other" sorts before "photos", so the twin keeps the plain name
        assert_eq!(
            exported_photos(&dest),
            vec!["img00.jpg".to_string(), "photos_img00.jpg".to_string()]
        );
        assert_eq!(fs::metadata(dest.join("img00.jpg")).unwrap().len(), 500);
        assert_eq!(fs::metadata(dest.join("photos_img00.jpg")).unwrap().len(), 100);

        let (_, snap) = run(ExportJob::new(&fx.config, &dest));
        assert_eq!(snap.copied, 0);
        assert_eq!(snap.skipped, snap.total);
        assert!(snap.errors.is_empty());
    }

    #[test]
    fn test_destination_names_are_unique() {
        let fx = fixture(0);
        let mut ids = Vec::new();
        for path in ["/a/x/p.jpg", "/b/x/p.jpg", "/c/p.jpg"] {
            ids.push(
                fx.db
                    .upsert_scanned_photo(&scanned(path, path, None))
                    .unwrap()
                    .id(),
            );
        }
        let photos: Vec<PhotoRecord> = ids
            .iter()
            .map(|id| fx.db.get_photo(*id).unwrap().unwrap())
            .collect();

        let names = destination_names(&photos);
        assert_eq!(names[0], "p.jpg");
        assert_eq!(names[1], "x_p.jpg");
        assert_eq!(names[2], "c_p.jpg");

        let mut clash = photos.clone();
        clash[2].folder = "/z/x".to_string();
        let names = destination_names(&clash);
        assert_eq!(names[2], format!("{}_x_p.jpg", clash[2].id));
    }

    #[test]
    fn test_unwritable_destination_is_fatal() {
        let fx = fixture(1);
        // a regular file where the directory should be
        let dest = fx.root.join("blocked");
        fs::write(&dest, b"x").unwrap();

        let manager = JobManager::new();
        let id = manager.start(ExportJob::new(&fx.config, &dest)).unwrap();
        let done = manager.join(id).unwrap();
        assert_eq!(done.status, JobStatus::Error);
        assert!(done.error.is_some());
    }

    #[test]
    fn test_cancel_before_start_copies_nothing() {
        let fx = fixture(4);
        let dest = fx.root.join("out");
        let flag = Arc::new(AtomicBool::new(true));

        let (outcome, snap) = run_with_flag(ExportJob::new(&fx.config, &dest), flag);
        assert_eq!(outcome.unwrap(), JobOutcome::Cancelled);
        assert_eq!(snap.copied, 0);
        assert!(files_in(&dest).is_empty(), "no partial or manifest files");
    }

    #[test]
    fn test_cancel_mid_run_keeps_copied_files_only() {
        let fx = fixture(5);
        let dest = fx.root.join("out");
        let (reached_tx, reached_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let gated = GatedDestination {
            inner: DirectoryDestination::new(&dest),
            after: 2,
            placed: AtomicUsize::new(0),
            reached: Mutex::new(reached_tx),
            release: Mutex::new(release_rx),
        };

        let manager = JobManager::new();
        let id = manager
            .start(ExportJob::with_destination(&fx.config, Box::new(gated)))
            .unwrap();
        reached_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        manager.cancel(id).unwrap();
        release_tx.send(()).unwrap();

        let done = manager.join(id).unwrap();
        assert_eq!(done.status, JobStatus::Cancelled);
        assert_eq!(done.copied, 2);
        assert_eq!(
            exported_photos(&dest),
            vec!["img00.jpg".to_string(), "img01.jpg".to_string()]
        );
        assert_eq!(files_in(&dest).len(), 2, "no manifest or partial files");
    }

    #[test]
    fn test_xmp_sidecars_carry_rating() {
        let fx = fixture(2);
        let photos = fx.db.starred_photos().unwrap();
        fx.db.set_rating(photos[1].id, 3).unwrap();
        let dest = fx.root.join("out");

        let (_, snap) = run(ExportJob::new(&fx.config, &dest).write_xmp(true));
        assert!(snap.errors.is_empty());
        let first = fs::read_to_string(dest.join("img00.xmp")).unwrap();
        let second = fs::read_to_string(dest.join("img01.xmp")).unwrap();
        assert!(first.contains(r#"xmp:Rating="5""#));
        assert!(second.contains(r#"xmp:Rating="3""#));
        assert!(second.contains(r#"xmp:Label="Select""#));
    }

    #[test]
    fn test_sidecar_name_falls_back_to_full_name() {
        let mut taken = HashSet::new();
        assert_eq!(sidecar_name("a.jpg", &taken), "a.xmp");
        taken.insert("a.xmp".to_string());
        assert_eq!(sidecar_name("a.png", &taken), "a.png.xmp");
    }

    #[test]
    fn test_export_file_list_formats() {
        let fx = fixture(2);

        let txt = fx.root.join("list.txt");
        assert_eq!(
            export_file_list(&fx.db, &txt, ListFormat::Txt, Selection::Starred).unwrap(),
            2
        );
        let lines: Vec<String> = fs::read_to_string(&txt)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("img00.jpg"));

        let json = fx.root.join("list.json");
        export_file_list(&fx.db, &json, ListFormat::Json, Selection::Starred).unwrap();
        let parsed: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&json).unwrap()).unwrap();
        assert_eq!(parsed.as_array().unwrap().len(), 2);
        assert_eq!(parsed[0]["starred"], serde_json::Value::Bool(true));

        let csv_path = fx.root.join("list.csv");
        export_file_list(&fx.db, &csv_path, ListFormat::Csv, Selection::Starred).unwrap();
        let mut reader = csv::Reader::from_path(&csv_path).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(&headers[0], "filepath");
        assert_eq!(reader.records().count(), 2);

        let names = fx.root.join("names.txt");
        export_file_list(&fx.db, &names, ListFormat::Names, Selection::Starred).unwrap();
        let content = fs::read_to_string(&names).unwrap();
        assert!(content.contains("# Count: 2"));
        assert!(content.lines().any(|l| l == "img01.jpg"));
    }

    #[test]
    fn test_rejected_list() {
        let fx = fixture(3);
        let first = fx.db.starred_photos().unwrap()[0].id;
        fx.db.set_rejected(first, true).unwrap();

        let out = fx.root.join("rejected.txt");
        assert_eq!(
            export_file_list(&fx.db, &out, ListFormat::Txt, Selection::Rejected).unwrap(),
            1
        );
        let content = fs::read_to_string(&out).unwrap();
        assert!(content.trim_end().ends_with("img00.jpg"));
    }

    #[test]
    fn test_list_format_parsing() {
        assert_eq!("CSV".parse::<ListFormat>().unwrap(), ListFormat::Csv);
        assert_eq!("text".parse::<ListFormat>().unwrap(), ListFormat::Txt);
        assert_eq!("names".parse::<ListFormat>().unwrap(), ListFormat::Names);
        assert!("html".parse::<ListFormat>().is_err());
    }

    #[test]
    fn test_selection_summary() {
        let fx = fixture(3);
        let first = fx.db.starred_photos().unwrap()[0].id;
        fx.db.set_rejected(first, true).unwrap();
        let summary = selection_summary(&fx.db).unwrap();
        assert_eq!(summary, SelectionSummary { starred: 2, rejected: 1 });
    }
}
