//! Near-duplicate grouping over perceptual fingerprints.
//!
//! Two photos are near-duplicates when their fingerprints differ in fewer
//! than `threshold` bits; identical content hashes are always grouped.
//! Groups are the connected components of that relation.
//!
//! Candidate pairs come from a pigeonhole prefilter: split the fingerprint
//! into `k > threshold - 1` blocks, and any pair within distance
//! `threshold - 1` must agree exactly on at least one block. Only pairs
//! sharing a block bucket are compared bit by bit.

use std::collections::HashMap;

use crate::db::DedupInput;
use crate::scanner::{Fingerprint, FINGERPRINT_BITS};

/// Disjoint-set forest with path halving and union by size.
#[derive(Debug, Clone)]
pub struct UnionFind {
    parent: Vec<usize>,
    size: Vec<usize>,
}

impl UnionFind {
    pub fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            size: vec![1; n],
        }
    }

    pub fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    /// Merge the sets holding `a` and `b`. Returns false if already joined.
    pub fn union(&mut self, a: usize, b: usize) -> bool {
        let (mut ra, mut rb) = (self.find(a), self.find(b));
        if ra == rb {
            return false;
        }
        if self.size[ra] < self.size[rb] {
            std::mem::swap(&mut ra, &mut rb);
        }
        self.parent[rb] = ra;
        self.size[ra] += self.size[rb];
        true
    }

    pub fn set_size(&mut self, x: usize) -> usize {
        let root = self.find(x);
        self.size[root]
    }
}

/// Partition of photos into dedup groups.
#[derive(Debug, Clone, Default)]
pub struct DedupResult {
    /// `(photo_id, group_id)` for every input photo; the group id is the
    /// smallest photo id in the group.
    pub assignments: Vec<(i64, i64)>,
    pub group_count: usize,
    /// Groups with more than one member.
    pub duplicate_groups: usize,
    pub pairs_compared: usize,
}

impl DedupResult {
    pub fn group_of(&self, photo_id: i64) -> Option<i64> {
        self.assignments
            .iter()
            .find(|(id, _)| *id == photo_id)
            .map(|(_, group)| *group)
    }
}

/// Group `photos` into near-duplicate sets.
pub fn find_duplicate_groups(photos: &[DedupInput], threshold: u32) -> DedupResult {
    let n = photos.len();
    let mut uf = UnionFind::new(n);

    // Exact copies at different paths
    let mut by_hash: HashMap<&str, usize> = HashMap::new();
    for (i, photo) in photos.iter().enumerate() {
        if let Some(&first) = by_hash.get(photo.content_hash.as_str()) {
            uf.union(first, i);
        } else {
            by_hash.insert(photo.content_hash.as_str(), i);
        }
    }

    let fingerprints: Vec<(usize, Fingerprint)> = photos
        .iter()
        .enumerate()
        .filter_map(|(i, photo)| {
            let hex = photo.fingerprint.as_deref()?;
            match Fingerprint::from_hex(hex) {
                Ok(fp) => Some((i, fp)),
                Err(e) => {
                    tracing::warn!(photo_id = photo.id, error = %e, "Ignoring malformed fingerprint");
                    None
                }
            }
        })
        .collect();

    let pairs_compared = if threshold == 0 {
        0
    } else if threshold > FINGERPRINT_BITS {
        union_all_pairs(&fingerprints, threshold, &mut uf)
    } else {
        union_bucketed_pairs(&fingerprints, threshold, &mut uf)
    };

    build_result(photos, &mut uf, pairs_compared)
}

/// Every pair, for thresholds the prefilter cannot cover.
fn union_all_pairs(fps: &[(usize, Fingerprint)], threshold: u32, uf: &mut UnionFind) -> usize {
    let mut compared = 0;
    for a in 0..fps.len() {
        for b in (a + 1)..fps.len() {
            compared += 1;
            if fps[a].1.hamming(&fps[b].1) < threshold {
                uf.union(fps[a].0, fps[b].0);
            }
        }
    }
    compared
}

fn union_bucketed_pairs(fps: &[(usize, Fingerprint)], threshold: u32, uf: &mut UnionFind) -> usize {
    let blocks = block_count(threshold);
    let mut buckets: HashMap<(usize, u64), Vec<usize>> = HashMap::new();
    for (pos, (_, fp)) in fps.iter().enumerate() {
        for block in 0..blocks {
            buckets
                .entry((block, block_value(fp, block, blocks)))
                .or_default()
                .push(pos);
        }
    }

    let mut compared = 0;
    let mut seen: std::collections::HashSet<(usize, usize)> = std::collections::HashSet::new();
    for members in buckets.values() {
        for (i, &a) in members.iter().enumerate() {
            for &b in &members[i + 1..] {
                if !seen.insert((a, b)) {
                    continue;
                }
                compared += 1;
                if fps[a].1.hamming(&fps[b].1) < threshold {
                    uf.union(fps[a].0, fps[b].0);
                }
            }
        }
    }
    compared
}

/// At least `threshold` blocks, and blocks no wider than 64 bits.
fn block_count(threshold: u32) -> usize {
    let min_for_width = FINGERPRINT_BITS.div_ceil(64);
    threshold.max(min_for_width).min(FINGERPRINT_BITS) as usize
}

fn block_value(fp: &Fingerprint, block: usize, blocks: usize) -> u64 {
    let bits = FINGERPRINT_BITS as usize;
    let start = block * bits / blocks;
    let end = (block + 1) * bits / blocks;
    let bytes = fp.as_bytes();
    let mut value = 0u64;
    for bit in start..end {
        let set = (bytes[bit / 8] >> (7 - bit % 8)) & 1;
        value = (value << 1) | set as u64;
    }
    value
}

fn build_result(photos: &[DedupInput], uf: &mut UnionFind, pairs_compared: usize) -> DedupResult {
    let mut min_id: HashMap<usize, i64> = HashMap::new();
    for (i, photo) in photos.iter().enumerate() {
        let root = uf.find(i);
        let entry = min_id.entry(root).or_insert(photo.id);
        *entry = (*entry).min(photo.id);
    }

    let assignments = photos
        .iter()
        .enumerate()
        .map(|(i, photo)| {
            let root = uf.find(i);
            (photo.id, min_id.get(&root).copied().unwrap_or(photo.id))
        })
        .collect();

    let duplicate_groups = min_id.keys().filter(|&&root| uf.set_size(root) > 1).count();

    DedupResult {
        assignments,
        group_count: min_id.len(),
        duplicate_groups,
        pairs_compared,
    }
}
