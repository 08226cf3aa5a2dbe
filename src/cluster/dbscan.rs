//! Fixed-radius density clustering. Distances are computed on demand, so
//! memory stays linear in the number of neighbour links rather than n².

use rayon::prelude::*;
use std::collections::VecDeque;

use super::distance::PointSet;
use super::Labels;

/// A point is core when at least `min_samples` points (itself included)
/// lie within `eps`. Border points join the first cluster that reaches them.
pub fn dbscan(points: &PointSet, eps: f32, min_samples: usize) -> Labels {
    let n = points.len();
    let min_samples = min_samples.max(1);

    let neighbours: Vec<Vec<usize>> = (0..n)
        .into_par_iter()
        .map(|i| points.neighbours(i, eps))
        .collect();
    let is_core: Vec<bool> = neighbours.iter().map(|nb| nb.len() >= min_samples).collect();

    let mut labels: Labels = vec![None; n];
    let mut next_label = 0;
    for start in 0..n {
        if labels[start].is_some() || !is_core[start] {
            continue;
        }
        let label = next_label;
        next_label += 1;
        labels[start] = Some(label);

        let mut queue: VecDeque<usize> = VecDeque::from([start]);
        while let Some(p) = queue.pop_front() {
            if !is_core[p] {
                continue;
            }
            for &q in &neighbours[p] {
                if labels[q].is_none() {
                    labels[q] = Some(label);
                    queue.push_back(q);
                }
            }
        }
    }
    labels
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::distance::TemporalBias;

    fn points(degrees: &[f32]) -> PointSet {
        let embeddings = degrees
            .iter()
            .map(|d| {
                let r = d.to_radians();
                vec![r.cos(), r.sin()]
            })
            .collect();
        PointSet::new(embeddings, vec![None; degrees.len()], TemporalBias::none()).unwrap()
    }

    #[test]
    fn test_min_samples_one_is_connected_components() {
        // 1 - cos(10°) ≈ 0.015, 1 - cos(80°) ≈ 0.83
        let labels = dbscan(&points(&[0.0, 10.0, 20.0, 100.0, 110.0]), 0.15, 1);
        assert_eq!(labels[0], labels[2]);
        assert_eq!(labels[3], labels[4]);
        assert_ne!(labels[0], labels[3]);
        assert!(labels.iter().all(Option::is_some));
    }

    #[test]
    fn test_sparse_points_are_noise() {
        let labels = dbscan(&points(&[0.0, 5.0, 10.0, 120.0]), 0.15, 3);
        assert_eq!(labels[0], Some(0));
        assert_eq!(labels[1], Some(0));
        assert_eq!(labels[2], Some(0));
        assert_eq!(labels[3], None);
    }

    #[test]
    fn test_empty_input() {
        assert!(dbscan(&points(&[]), 0.15, 1).is_empty());
    }
}
