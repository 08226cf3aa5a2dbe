//! The index job: scan a directory, embed new photos, then recluster the
//! whole catalog.
//!
//! Scanned photos are committed in small batches so readers see them while
//! the job is still running. Cancellation is checked once per photo while
//! scanning, once per provider batch while embedding, and between the
//! clustering steps. Already committed rows stay valid after a cancel.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::cluster::{
    cluster_groups, mean_timestamp, mean_vector, select_representative, select_strategy,
    Candidate, ClusterStrategy, GroupPoint, TemporalBias,
};
use crate::config::Config;
use crate::db::{ClusterDraft, ClusterInput, Database};
use crate::dedup::find_duplicate_groups;
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::scanner::{ScanOutcome, ScanReport, ScannedPhoto, Scanner};
use crate::tasks::{Job, JobContext, JobKind, JobOutcome, JobPhase};

/// What the embedding phase achieved.
#[derive(Debug, Clone, Default)]
pub struct EmbedReport {
    pub embedded: usize,
    /// Photos left without a vector after a failed batch and its retry.
    pub pending: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ClusterReport {
    pub photos: usize,
    pub dedup_groups: usize,
    pub duplicate_groups: usize,
    pub clusters: usize,
    pub multi_photo_clusters: usize,
}

pub struct IndexJob {
    config: Config,
    /// `None` reclusters the existing catalog without scanning or embedding.
    root: Option<PathBuf>,
    provider: Box<dyn EmbeddingProvider>,
    strategy: Box<dyn ClusterStrategy>,
}

impl IndexJob {
    pub fn new(config: Config, root: impl Into<PathBuf>) -> Self {
        let provider = create_provider(&config.embedding);
        let strategy = select_strategy(&config.clustering);
        Self {
            config,
            root: Some(root.into()),
            provider,
            strategy,
        }
    }

    /// Recompute dedup groups and clusters only.
    pub fn recluster(config: Config) -> Self {
        let provider = create_provider(&config.embedding);
        let strategy = select_strategy(&config.clustering);
        Self {
            config,
            root: None,
            provider,
            strategy,
        }
    }

    pub fn with_provider(mut self, provider: Box<dyn EmbeddingProvider>) -> Self {
        self.provider = provider;
        self
    }

    fn scan(&self, db: &Database, root: &Path, ctx: &mut JobContext) -> Result<Option<ScanReport>> {
        let scanner = Scanner::new(&self.config.scanner);
        let mut total = scanner.count(root)?;
        ctx.enter_phase(JobPhase::Scanning, total, format!("Scanning {} files", total));
        tracing::info!(root = %root.display(), total, "Scanning photos");

        let commit_every = self.config.scanner.commit_every.max(1);
        let mut report = ScanReport::default();
        let mut pending: Vec<ScannedPhoto> = Vec::with_capacity(commit_every);

        for (index, path) in scanner.walk(root)?.enumerate() {
            if ctx.is_cancelled() {
                commit_scanned(db, &mut pending, &mut report)?;
                return Ok(None);
            }

            report.found += 1;
            match scanner.scan_path(db, &path) {
                Ok(ScanOutcome::Unchanged(_)) => report.unchanged += 1,
                Ok(ScanOutcome::Scanned(photo)) => pending.push(photo),
                Err(e) => {
                    report.errors += 1;
                    tracing::warn!(path = %path.display(), error = %format!("{e:#}"), "Skipping unreadable file");
                }
            }

            if pending.len() >= commit_every {
                commit_scanned(db, &mut pending, &mut report)?;
            }

            if index + 1 > total {
                total = index + 1;
                ctx.set_total(total);
            }
            ctx.progress(index + 1, format!("Scanned {} of {}", index + 1, total));
        }
        commit_scanned(db, &mut pending, &mut report)?;

        tracing::info!(
            found = report.found,
            new = report.new,
            updated = report.updated,
            unchanged = report.unchanged,
            errors = report.errors,
            exact_duplicates = report.exact_duplicates,
            "Scan finished"
        );
        Ok(Some(report))
    }

    fn embed(&self, db: &Database, ctx: &mut JobContext) -> Result<Option<EmbedReport>> {
        let todo = db.photos_without_embeddings()?;
        ctx.enter_phase(
            JobPhase::Embedding,
            todo.len(),
            format!("Embedding {} photos with {}", todo.len(), self.provider.name()),
        );

        let batch_size = self.config.embedding.batch_size.max(1);
        let mut report = EmbedReport::default();
        let mut done = 0;

        for chunk in todo.chunks(batch_size) {
            if ctx.is_cancelled() {
                return Ok(None);
            }

            let paths: Vec<PathBuf> = chunk.iter().map(|(_, p)| PathBuf::from(p)).collect();
            match self.embed_with_retry(&paths) {
                Some(vectors) => {
                    store_vectors(db, chunk.iter().map(|(id, _)| *id), &vectors)?;
                    report.embedded += vectors.len();
                }
                None if chunk.len() > 1 => {
                    // Narrow the failure down to the photos that cause it
                    for (id, path) in chunk {
                        if ctx.is_cancelled() {
                            return Ok(None);
                        }
                        match self.provider.embed(&[PathBuf::from(path)]) {
                            Ok(vectors) if vectors.len() == 1 => {
                                store_vectors(db, std::iter::once(*id), &vectors)?;
                                report.embedded += 1;
                            }
                            _ => report.pending += 1,
                        }
                    }
                }
                None => report.pending += chunk.len(),
            }

            done += chunk.len();
            ctx.progress(done, format!("Embedded {} of {}", done, todo.len()));
        }

        if report.pending > 0 {
            tracing::warn!(pending = report.pending, "Some photos are still waiting for embeddings");
        }
        Ok(Some(report))
    }

    /// One attempt plus one retry.
    fn embed_with_retry(&self, paths: &[PathBuf]) -> Option<Vec<Vec<f32>>> {
        match self.provider.embed(paths) {
            Ok(vectors) if vectors.len() == paths.len() => return Some(vectors),
            Ok(vectors) => tracing::warn!(
                expected = paths.len(),
                got = vectors.len(),
                "Embedding batch returned wrong count; retrying"
            ),
            Err(e) => tracing::warn!(error = %format!("{e:#}"), "Embedding batch failed; retrying"),
        }
        match self.provider.embed(paths) {
            Ok(vectors) if vectors.len() == paths.len() => Some(vectors),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(error = %format!("{e:#}"), batch = paths.len(), "Embedding batch failed again");
                None
            }
        }
    }

    fn cluster(&self, db: &Database, ctx: &mut JobContext) -> Result<Option<ClusterReport>> {
        ctx.enter_phase(JobPhase::Clustering, 3, "Finding near-duplicates");

        let dedup_inputs = db.photos_for_dedup()?;
        let dedup = find_duplicate_groups(&dedup_inputs, self.config.scanner.dedup_threshold);
        db.set_dedup_groups(&dedup.assignments)?;
        tracing::info!(
            photos = dedup_inputs.len(),
            groups = dedup.group_count,
            duplicate_groups = dedup.duplicate_groups,
            pairs_compared = dedup.pairs_compared,
            "Near-duplicate grouping finished"
        );
        ctx.progress(1, format!("Clustering {} groups", dedup.group_count));
        if ctx.is_cancelled() {
            return Ok(None);
        }

        let inputs = db.cluster_inputs()?;
        let mut by_group: BTreeMap<i64, Vec<&ClusterInput>> = BTreeMap::new();
        for input in &inputs {
            by_group
                .entry(input.dedup_group_id.unwrap_or(input.id))
                .or_default()
                .push(input);
        }

        let members: Vec<Vec<&ClusterInput>> = by_group.into_values().collect();
        let points: Vec<GroupPoint> = members.iter().map(|group| summarize(group)).collect();

        let clustering = self.config.clustering.normalized();
        let bias = TemporalBias {
            weight: clustering.time_weight as f32,
            window_secs: clustering.time_window_secs,
        };
        let clusters = cluster_groups(&points, self.strategy.as_ref(), bias);
        ctx.progress(2, format!("Selecting representatives for {} clusters", clusters.len()));
        if ctx.is_cancelled() {
            return Ok(None);
        }

        let drafts: Vec<ClusterDraft> = clusters
            .iter()
            .filter_map(|group_indices| {
                let photos: Vec<&ClusterInput> = group_indices
                    .iter()
                    .flat_map(|&g| members[g].iter().copied())
                    .collect();
                draft_cluster(&photos)
            })
            .collect();

        db.replace_clusters(&drafts)?;
        ctx.progress(3, format!("{} clusters", drafts.len()));

        Ok(Some(ClusterReport {
            photos: inputs.len(),
            dedup_groups: dedup.group_count,
            duplicate_groups: dedup.duplicate_groups,
            clusters: drafts.len(),
            multi_photo_clusters: drafts.iter().filter(|d| d.members.len() > 1).count(),
        }))
    }
}

impl Job for IndexJob {
    fn kind(&self) -> JobKind {
        JobKind::Index
    }

    fn target(&self) -> PathBuf {
        self.config.db_path.clone()
    }

    fn catalog(&self) -> PathBuf {
        self.config.db_path.clone()
    }

    fn run(self: Box<Self>, ctx: &mut JobContext) -> Result<JobOutcome> {
        let db = Database::open_initialized(&self.config.db_path).with_context(|| {
            format!("Cannot open catalog {}", self.config.db_path.display())
        })?;

        let mut summary = Vec::new();
        if let Some(ref root) = self.root {
            let Some(scan) = self.scan(&db, root, ctx)? else {
                return Ok(JobOutcome::Cancelled);
            };
            summary.push(scan.summary());

            let Some(embed) = self.embed(&db, ctx)? else {
                return Ok(JobOutcome::Cancelled);
            };
            summary.push(format!("{} embedded, {} pending", embed.embedded, embed.pending));
        }

        let Some(clusters) = self.cluster(&db, ctx)? else {
            return Ok(JobOutcome::Cancelled);
        };
        summary.push(format!(
            "{} photos in {} clusters ({} with several photos)",
            clusters.photos, clusters.clusters, clusters.multi_photo_clusters
        ));

        Ok(JobOutcome::Completed(summary.join("; ")))
    }
}

fn commit_scanned(
    db: &Database,
    pending: &mut Vec<ScannedPhoto>,
    report: &mut ScanReport,
) -> Result<()> {
    if pending.is_empty() {
        return Ok(());
    }
    let batch = std::mem::take(pending);
    db.batch(|_| {
        for photo in &batch {
            let outcome = db.upsert_scanned_photo(photo)?;
            report.record(outcome);
            let path = photo.path.to_string_lossy();
            if db.count_same_content(&photo.content_hash, &path)? > 0 {
                report.exact_duplicates += 1;
            }
        }
        Ok(())
    })?;
    tracing::debug!(photos = batch.len(), "Committed scan batch");
    Ok(())
}

fn store_vectors(
    db: &Database,
    ids: impl Iterator<Item = i64>,
    vectors: &[Vec<f32>],
) -> Result<()> {
    db.batch(|_| {
        for (id, vector) in ids.zip(vectors) {
            db.store_embedding(id, vector)?;
        }
        Ok(())
    })
}

fn summarize(group: &[&ClusterInput]) -> GroupPoint {
    let vectors: Vec<&[f32]> = group.iter().filter_map(|p| p.embedding.as_deref()).collect();
    let times: Vec<_> = group.iter().filter_map(|p| p.taken_at).collect();
    GroupPoint {
        group_id: group.first().map(|p| p.dedup_group_id.unwrap_or(p.id)).unwrap_or_default(),
        embedding: mean_vector(&vectors),
        taken_at: mean_timestamp(&times),
    }
}

fn draft_cluster(photos: &[&ClusterInput]) -> Option<ClusterDraft> {
    let candidates: Vec<Candidate> = photos
        .iter()
        .map(|p| Candidate {
            id: p.id,
            path: &p.path,
            taken_at: p.taken_at,
            embedding: p.embedding.as_deref(),
        })
        .collect();
    let representative = select_representative(&candidates)?;
    let times: Vec<_> = photos.iter().filter_map(|p| p.taken_at).collect();
    Some(ClusterDraft {
        members: photos.iter().map(|p| p.id).collect(),
        representative,
        mean_taken_at: mean_timestamp(&times),
    })
}
