//! Semantic clustering of dedup groups.
//!
//! Each dedup group is summarized by the mean of its members' embeddings and
//! the mean of their capture times. Groups are clustered with a
//! [`ClusterStrategy`] over temporally biased cosine distance; noise and
//! groups without any embedding become clusters of their own, so every
//! group lands in exactly one cluster.

pub mod dbscan;
pub mod distance;
pub mod hdbscan;
pub mod representative;
pub mod strategy;

use chrono::{DateTime, NaiveDateTime};
use std::collections::HashMap;
use thiserror::Error;

pub use distance::{PointSet, TemporalBias};
pub use representative::{select_representative, Candidate};
pub use strategy::{select_strategy, ClusterStrategy, FallbackStrategy};

/// Per-point cluster label; `None` is noise.
pub type Labels = Vec<Option<usize>>;

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("clustering algorithm unavailable: {0}")]
    Unavailable(String),

    #[error("invalid clustering input: {0}")]
    InvalidInput(String),
}

/// Summary of one dedup group.
#[derive(Debug, Clone)]
pub struct GroupPoint {
    pub group_id: i64,
    pub embedding: Option<Vec<f32>>,
    pub taken_at: Option<NaiveDateTime>,
}

/// Mean of the member vectors sharing the first vector's dimension.
pub fn mean_vector(vectors: &[&[f32]]) -> Option<Vec<f32>> {
    let dim = vectors.first()?.len();
    let same: Vec<&&[f32]> = vectors.iter().filter(|v| v.len() == dim).collect();
    if dim == 0 {
        return None;
    }
    let mut mean = vec![0.0f32; dim];
    for v in &same {
        for (m, x) in mean.iter_mut().zip(v.iter()) {
            *m += x;
        }
    }
    let count = same.len() as f32;
    mean.iter_mut().for_each(|m| *m /= count);
    Some(mean)
}

pub fn mean_timestamp(times: &[NaiveDateTime]) -> Option<NaiveDateTime> {
    if times.is_empty() {
        return None;
    }
    let total: i128 = times.iter().map(|t| t.and_utc().timestamp() as i128).sum();
    let mean = (total / times.len() as i128) as i64;
    DateTime::from_timestamp(mean, 0).map(|dt| dt.naive_utc())
}

/// Partition `groups` into clusters of indices into `groups`.
///
/// Clusters come back ordered by their smallest index; each index appears
/// exactly once.
pub fn cluster_groups(
    groups: &[GroupPoint],
    strategy: &dyn ClusterStrategy,
    bias: TemporalBias,
) -> Vec<Vec<usize>> {
    let dim = dominant_dimension(groups);

    let mut embedded = Vec::new();
    let mut clusters: Vec<Vec<usize>> = Vec::new();
    for (i, group) in groups.iter().enumerate() {
        match (&group.embedding, dim) {
            (Some(e), Some(d)) if e.len() == d => embedded.push(i),
            (Some(_), _) => {
                tracing::warn!(group = group.group_id, "Embedding dimension mismatch; clustering alone");
                clusters.push(vec![i]);
            }
            (None, _) => clusters.push(vec![i]),
        }
    }

    if !embedded.is_empty() {
        let labels = label_embedded(groups, &embedded, strategy, bias);
        let mut by_label: HashMap<usize, Vec<usize>> = HashMap::new();
        for (&index, label) in embedded.iter().zip(labels) {
            match label {
                Some(label) => by_label.entry(label).or_default().push(index),
                None => clusters.push(vec![index]),
            }
        }
        clusters.extend(by_label.into_values());
    }

    for cluster in clusters.iter_mut() {
        cluster.sort_unstable();
    }
    clusters.sort_by_key(|c| c.first().copied());
    clusters
}

fn label_embedded(
    groups: &[GroupPoint],
    embedded: &[usize],
    strategy: &dyn ClusterStrategy,
    bias: TemporalBias,
) -> Labels {
    let vectors = embedded
        .iter()
        .filter_map(|&i| groups[i].embedding.clone())
        .collect();
    let times = embedded.iter().map(|&i| groups[i].taken_at).collect();

    let result = PointSet::new(vectors, times, bias).and_then(|points| strategy.cluster(&points));
    match result {
        Ok(labels) => labels,
        Err(e) => {
            tracing::warn!(error = %e, strategy = strategy.name(), "Clustering failed; every group kept alone");
            vec![None; embedded.len()]
        }
    }
}

fn dominant_dimension(groups: &[GroupPoint]) -> Option<usize> {
    let mut counts: HashMap<usize, usize> = HashMap::new();
    for e in groups.iter().filter_map(|g| g.embedding.as_ref()) {
        if !e.is_empty() {
            *counts.entry(e.len()).or_default() += 1;
        }
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
        .map(|(dim, _)| dim)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClusteringConfig;
    use chrono::Duration;

    fn at(secs: i64) -> Option<NaiveDateTime> {
        NaiveDateTime::parse_from_str("2024-06-01 12:00:00", "%Y-%m-%d %H:%M:%S")
            .ok()
            .map(|base| base + Duration::seconds(secs))
    }

    fn group(id: i64, embedding: Option<Vec<f32>>, taken_at: Option<NaiveDateTime>) -> GroupPoint {
        GroupPoint {
            group_id: id,
            embedding,
            taken_at,
        }
    }

    fn bias() -> TemporalBias {
        TemporalBias {
            weight: 0.3,
            window_secs: 300,
        }
    }

    #[test]
    fn test_scenes_cluster_and_loners_stay_alone() {
        // Burst group at t=0, then two scenes of two groups each at t=600s
        let groups = vec![
            group(1, Some(vec![-0.6, -0.6, 0.5]), at(0)),
            group(3, Some(vec![1.0, 0.02, 0.0]), at(600)),
            group(4, Some(vec![0.98, 0.0, 0.05]), at(610)),
            group(5, Some(vec![0.0, 1.0, 0.03]), at(620)),
            group(6, Some(vec![0.05, 0.97, 0.0]), at(630)),
        ];
        let strategy = select_strategy(&ClusteringConfig::default());
        let clusters = cluster_groups(&groups, strategy.as_ref(), bias());

        assert_eq!(clusters, vec![vec![0], vec![1, 2], vec![3, 4]]);
    }

    #[test]
    fn test_every_group_in_exactly_one_cluster() {
        let groups: Vec<_> = (0..12)
            .map(|i| {
                let angle = (i as f32 * 29.0).to_radians();
                let embedding = if i % 5 == 4 { None } else { Some(vec![angle.cos(), angle.sin()]) };
                group(i, embedding, at(i * 100))
            })
            .collect();

        let strategy = select_strategy(&ClusteringConfig::default());
        let clusters = cluster_groups(&groups, strategy.as_ref(), bias());
        let mut seen: Vec<usize> = clusters.iter().flatten().copied().collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..12).collect::<Vec<_>>());
        assert!(clusters.iter().all(|c| !c.is_empty()));
    }

    #[test]
    fn test_time_proximity_pulls_borderline_groups_together() {
        // 1 - cos(35°) ≈ 0.18: just outside eps = 0.15 without the bonus
        let a = vec![1.0, 0.0];
        let r = 35f32.to_radians();
        let b = vec![r.cos(), r.sin()];

        let mut config = ClusteringConfig::default();
        config.algorithm = crate::config::ClusterAlgorithm::Dbscan;
        let strategy = select_strategy(&config);

        let far = vec![group(1, Some(a.clone()), at(0)), group(2, Some(b.clone()), at(3600))];
        assert_eq!(cluster_groups(&far, strategy.as_ref(), bias()).len(), 2);

        let near = vec![group(1, Some(a), at(0)), group(2, Some(b), at(60))];
        assert_eq!(cluster_groups(&near, strategy.as_ref(), bias()), vec![vec![0, 1]]);
    }

    #[test]
    fn test_mixed_dimensions_do_not_fail() {
        let groups = vec![
            group(1, Some(vec![1.0, 0.0]), None),
            group(2, Some(vec![1.0, 0.0]), None),
            group(3, Some(vec![1.0, 0.0, 0.0]), None),
        ];
        let strategy = select_strategy(&ClusteringConfig::default());
        let clusters = cluster_groups(&groups, strategy.as_ref(), bias());
        assert!(clusters.contains(&vec![2]));
        assert_eq!(clusters.iter().map(Vec::len).sum::<usize>(), 3);
    }

    #[test]
    fn test_mean_timestamp() {
        let times = [at(0).unwrap(), at(10).unwrap()];
        assert_eq!(mean_timestamp(&times), at(5));
        assert_eq!(mean_timestamp(&[]), None);
    }

    #[test]
    fn test_mean_vector() {
        let a = [1.0, 0.0];
        let b = [0.0, 1.0];
        assert_eq!(mean_vector(&[&a, &b]), Some(vec![0.5, 0.5]));
        assert_eq!(mean_vector(&[]), None);
    }
}
