//! HDBSCAN over a precomputed distance matrix.
//!
//! Core distances, mutual reachability, a Prim minimum spanning tree, the
//! single-linkage hierarchy, the condensed tree for `min_cluster_size`, and
//! excess-of-mass selection. The root is never selected, so a dataset with
//! no real split comes back as all noise.

use rayon::prelude::*;

use super::distance::DistanceMatrix;
use super::Labels;

/// Smallest distance used when converting to lambda = 1 / distance.
const MIN_DISTANCE: f64 = 1e-10;

struct Merge {
    left: usize,
    right: usize,
    distance: f32,
    size: usize,
}

struct CondensedCluster {
    parent: Option<usize>,
    birth_lambda: f64,
    size: usize,
    children: Vec<usize>,
}

pub fn hdbscan(matrix: &DistanceMatrix, min_cluster_size: usize, min_samples: usize) -> Labels {
    let n = matrix.len();
    let min_cluster_size = min_cluster_size.max(2);
    if n < min_cluster_size {
        return vec![None; n];
    }

    let core = core_distances(matrix, min_samples);
    let edges = minimum_spanning_tree(matrix, &core);
    let merges = single_linkage(n, edges);
    label_condensed(n, &merges, min_cluster_size)
}

/// Distance to the `min_samples`-th neighbour, the point itself counting as the 0th.
fn core_distances(matrix: &DistanceMatrix, min_samples: usize) -> Vec<f32> {
    let n = matrix.len();
    let k = min_samples.min(n - 1);
    (0..n)
        .into_par_iter()
        .map(|i| {
            let mut row = matrix.row(i).to_vec();
            let (_, kth, _) = row.select_nth_unstable_by(k, |a, b| a.total_cmp(b));
            *kth
        })
        .collect()
}

/// Dense Prim over mutual reachability distances. Returns `(a, b, weight)` edges.
fn minimum_spanning_tree(matrix: &DistanceMatrix, core: &[f32]) -> Vec<(usize, usize, f32)> {
    let n = matrix.len();
    let mut in_tree = vec![false; n];
    let mut best = vec![f32::INFINITY; n];
    let mut from = vec![0usize; n];
    let mut edges = Vec::with_capacity(n.saturating_sub(1));

    let mut current = 0;
    in_tree[0] = true;
    for _ in 1..n {
        let mut next = usize::MAX;
        let mut next_weight = f32::INFINITY;
        for j in 0..n {
            if in_tree[j] {
                continue;
            }
            let reach = matrix.get(current, j).max(core[current]).max(core[j]);
            if reach < best[j] {
                best[j] = reach;
                from[j] = current;
            }
            if next == usize::MAX || best[j] < next_weight {
                next = j;
                next_weight = best[j];
            }
        }
        edges.push((from[next], next, next_weight));
        in_tree[next] = true;
        current = next;
    }

    edges.sort_by(|a, b| a.2.total_cmp(&b.2));
    edges
}

/// Kruskal-style merge order. Node `n + i` is the result of merge `i`.
fn single_linkage(n: usize, edges: Vec<(usize, usize, f32)>) -> Vec<Merge> {
    let mut parent: Vec<usize> = (0..2 * n - 1).collect();
    let mut size = vec![1usize; 2 * n - 1];
    let mut merges = Vec::with_capacity(n - 1);

    fn find(parent: &mut [usize], mut x: usize) -> usize {
        while parent[x] != x {
            parent[x] = parent[parent[x]];
            x = parent[x];
        }
        x
    }

    for (a, b, distance) in edges {
        let ra = find(&mut parent, a);
        let rb = find(&mut parent, b);
        let node = n + merges.len();
        size[node] = size[ra] + size[rb];
        parent[ra] = node;
        parent[rb] = node;
        merges.push(Merge {
            left: ra,
            right: rb,
            distance,
            size: size[node],
        });
    }
    merges
}

fn lambda(distance: f32) -> f64 {
    1.0 / (distance as f64).max(MIN_DISTANCE)
}

fn label_condensed(n: usize, merges: &[Merge], min_cluster_size: usize) -> Labels {
    let node_size = |node: usize| if node < n { 1 } else { merges[node - n].size };

    let mut clusters = vec![CondensedCluster {
        parent: None,
        birth_lambda: 0.0,
        size: n,
        children: Vec::new(),
    }];
    let mut point_cluster = vec![0usize; n];
    let mut point_lambda = vec![0f64; n];

    let fall_out = |node: usize, cluster: usize, lam: f64, pc: &mut [usize], pl: &mut [f64]| {
        let mut stack = vec![node];
        while let Some(x) = stack.pop() {
            if x < n {
                pc[x] = cluster;
                pl[x] = lam;
            } else {
                let m = &merges[x - n];
                stack.push(m.left);
                stack.push(m.right);
            }
        }
    };

    let root = 2 * n - 2;
    let mut stack = vec![(root, 0usize)];
    while let Some((node, cluster)) = stack.pop() {
        if node < n {
            point_cluster[node] = cluster;
            point_lambda[node] = clusters[cluster].birth_lambda;
            continue;
        }
        let m = &merges[node - n];
        let lam = lambda(m.distance);
        let left_big = node_size(m.left) >= min_cluster_size;
        let right_big = node_size(m.right) >= min_cluster_size;

        match (left_big, right_big) {
            (true, true) => {
                for child in [m.left, m.right] {
                    let id = clusters.len();
                    clusters.push(CondensedCluster {
                        parent: Some(cluster),
                        birth_lambda: lam,
                        size: node_size(child),
                        children: Vec::new(),
                    });
                    clusters[cluster].children.push(id);
                    stack.push((child, id));
                }
            }
            (true, false) => {
                fall_out(m.right, cluster, lam, &mut point_cluster, &mut point_lambda);
                stack.push((m.left, cluster));
            }
            (false, true) => {
                fall_out(m.left, cluster, lam, &mut point_cluster, &mut point_lambda);
                stack.push((m.right, cluster));
            }
            (false, false) => {
                fall_out(m.left, cluster, lam, &mut point_cluster, &mut point_lambda);
                fall_out(m.right, cluster, lam, &mut point_cluster, &mut point_lambda);
            }
        }
    }

    let selected = select_excess_of_mass(&clusters, &point_cluster, &point_lambda);

    let mut dense = vec![None; clusters.len()];
    let mut next_label = 0;
    for (id, is_selected) in selected.iter().enumerate() {
        if *is_selected {
            dense[id] = Some(next_label);
            next_label += 1;
        }
    }

    (0..n)
        .map(|p| {
            let mut c = Some(point_cluster[p]);
            while let Some(id) = c {
                if let Some(label) = dense[id] {
                    return Some(label);
                }
                c = clusters[id].parent;
            }
            None
        })
        .collect()
}

fn select_excess_of_mass(
    clusters: &[CondensedCluster],
    point_cluster: &[usize],
    point_lambda: &[f64],
) -> Vec<bool> {
    let m = clusters.len();
    let mut stability = vec![0f64; m];
    for (p, &c) in point_cluster.iter().enumerate() {
        stability[c] += point_lambda[p] - clusters[c].birth_lambda;
    }
    for cluster in clusters.iter() {
        if let Some(parent) = cluster.parent {
            stability[parent] +=
                cluster.size as f64 * (cluster.birth_lambda - clusters[parent].birth_lambda);
        }
    }

    let mut selected = vec![false; m];
    let mut subtree = vec![0f64; m];
    // Children always have larger ids than their parent; the root (0) is excluded.
    for c in (1..m).rev() {
        let children_total: f64 = clusters[c].children.iter().map(|&ch| subtree[ch]).sum();
        if clusters[c].children.is_empty() || stability[c] >= children_total {
            selected[c] = true;
            subtree[c] = stability[c];
            let mut stack = clusters[c].children.clone();
            while let Some(d) = stack.pop() {
                selected[d] = false;
                stack.extend(clusters[d].children.iter().copied());
            }
        } else {
            subtree[c] = children_total;
        }
    }
    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::distance::{PointSet, TemporalBias};

    fn at_angles(degrees: &[f32]) -> DistanceMatrix {
        let embeddings = degrees
            .iter()
            .map(|d| {
                let r = d.to_radians();
                vec![r.cos(), r.sin()]
            })
            .collect::<Vec<_>>();
        let times = vec![None; degrees.len()];
        PointSet::new(embeddings, times, TemporalBias::none())
            .unwrap()
            .matrix()
    }

    #[test]
    fn test_two_blobs_and_an_outlier() {
        let matrix = at_angles(&[0.0, 2.0, 4.0, 90.0, 92.0, 94.0, 200.0]);
        let labels = hdbscan(&matrix, 2, 1);

        assert!(labels[0].is_some());
        assert_eq!(labels[0], labels[1]);
        assert_eq!(labels[1], labels[2]);
        assert!(labels[3].is_some());
        assert_eq!(labels[3], labels[4]);
        assert_eq!(labels[4], labels[5]);
        assert_ne!(labels[0], labels[3]);
        assert_eq!(labels[6], None);
    }

    #[test]
    fn test_too_few_points_are_noise() {
        let matrix = at_angles(&[0.0]);
        assert_eq!(hdbscan(&matrix, 2, 1), vec![None]);
        let matrix = at_angles(&[0.0, 1.0, 2.0]);
        assert_eq!(hdbscan(&matrix, 5, 1), vec![None, None, None]);
    }

    #[test]
    fn test_labels_are_dense() {
        let matrix = at_angles(&[0.0, 1.0, 60.0, 61.0, 120.0, 121.0, 180.0, 181.0]);
        let labels = hdbscan(&matrix, 2, 1);
        let mut seen: Vec<usize> = labels.iter().flatten().copied().collect();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen, (0..seen.len()).collect::<Vec<_>>());
        assert!(seen.len() >= 2);
    }
}
