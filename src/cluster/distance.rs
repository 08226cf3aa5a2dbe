//! Temporally biased cosine distance between group summaries.

use chrono::NaiveDateTime;
use rayon::prelude::*;

use super::ClusterError;

/// Distance reduction for pairs captured close together in time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemporalBias {
    pub weight: f32,
    pub window_secs: i64,
}

impl TemporalBias {
    pub fn none() -> Self {
        Self {
            weight: 0.0,
            window_secs: 0,
        }
    }

    /// Bonus for a pair; unknown timestamps never earn one.
    pub fn bonus(&self, a: Option<NaiveDateTime>, b: Option<NaiveDateTime>) -> f32 {
        match (a, b) {
            (Some(a), Some(b)) if (a - b).num_seconds().abs() < self.window_secs => self.weight,
            _ => 0.0,
        }
    }
}

/// `1 - cos(a, b)` for unit vectors, clamped to `[0, 2]`.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    (1.0 - dot).clamp(0.0, 2.0)
}

pub fn normalize(v: &[f32]) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON && norm.is_finite() {
        v.iter().map(|x| x / norm).collect()
    } else {
        vec![0.0; v.len()]
    }
}

/// Points to cluster: unit embeddings with capture times and the temporal bias.
#[derive(Debug, Clone)]
pub struct PointSet {
    vectors: Vec<Vec<f32>>,
    times: Vec<Option<NaiveDateTime>>,
    bias: TemporalBias,
}

impl PointSet {
    pub fn new(
        embeddings: Vec<Vec<f32>>,
        times: Vec<Option<NaiveDateTime>>,
        bias: TemporalBias,
    ) -> Result<Self, ClusterError> {
        if embeddings.len() != times.len() {
            return Err(ClusterError::InvalidInput(format!(
                "{} embeddings but {} timestamps",
                embeddings.len(),
                times.len()
            )));
        }
        if let Some(dim) = embeddings.first().map(Vec::len) {
            if dim == 0 || embeddings.iter().any(|e| e.len() != dim) {
                return Err(ClusterError::InvalidInput(
                    "embeddings have inconsistent dimensions".to_string(),
                ));
            }
        }
        Ok(Self {
            vectors: embeddings.iter().map(|e| normalize(e)).collect(),
            times,
            bias,
        })
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// `max(0, cosine_distance - bonus)`; zero on the diagonal.
    pub fn distance(&self, i: usize, j: usize) -> f32 {
        if i == j {
            return 0.0;
        }
        let base = cosine_distance(&self.vectors[i], &self.vectors[j]);
        (base - self.bias.bonus(self.times[i], self.times[j])).max(0.0)
    }

    /// Dense symmetric matrix, rows computed in parallel.
    pub fn matrix(&self) -> DistanceMatrix {
        let n = self.len();
        let mut data = vec![0.0f32; n * n];
        data.par_chunks_mut(n.max(1))
            .enumerate()
            .for_each(|(i, row)| {
                for (j, cell) in row.iter_mut().enumerate() {
                    *cell = self.distance(i, j);
                }
            });
        DistanceMatrix { n, data }
    }

    /// Indices within `eps` of point `i` (inclusive, `i` itself included).
    pub fn neighbours(&self, i: usize, eps: f32) -> Vec<usize> {
        (0..self.len()).filter(|&j| self.distance(i, j) <= eps).collect()
    }
}

#[derive(Debug, Clone)]
pub struct DistanceMatrix {
    n: usize,
    data: Vec<f32>,
}

impl DistanceMatrix {
    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    pub fn get(&self, i: usize, j: usize) -> f32 {
        self.data[i * self.n + j]
    }

    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.n..(i + 1) * self.n]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn t(secs: i64) -> Option<NaiveDateTime> {
        NaiveDateTime::parse_from_str("2024-06-01 12:00:00", "%Y-%m-%d %H:%M:%S")
            .ok()
            .map(|base| base + Duration::seconds(secs))
    }

    fn bias() -> TemporalBias {
        TemporalBias {
            weight: 0.3,
            window_secs: 300,
        }
    }

    #[test]
    fn test_bonus_applies_inside_window_only() {
        let b = bias();
        assert_eq!(b.bonus(t(0), t(299)), 0.3);
        assert_eq!(b.bonus(t(0), t(300)), 0.0);
        assert_eq!(b.bonus(t(0), None), 0.0);
        assert_eq!(b.bonus(None, None), 0.0);
    }

    #[test]
    fn test_distance_never_negative() {
        let points = PointSet::new(
            vec![vec![1.0, 0.0], vec![0.99, 0.1]],
            vec![t(0), t(10)],
            bias(),
        )
        .unwrap();
        assert_eq!(points.distance(0, 1), 0.0);
        assert_eq!(points.distance(0, 0), 0.0);
    }

    #[test]
    fn test_temporal_bias_is_monotone() {
        // Moving a pair closer in time never increases their distance
        let embeddings = vec![vec![1.0, 0.2, 0.0], vec![0.3, 1.0, 0.5]];
        let far = PointSet::new(embeddings.clone(), vec![t(0), t(3600)], bias()).unwrap();
        let near = PointSet::new(embeddings.clone(), vec![t(0), t(60)], bias()).unwrap();
        let unbiased = PointSet::new(embeddings, vec![t(0), t(60)], TemporalBias::none()).unwrap();

        assert!(near.distance(0, 1) <= far.distance(0, 1));
        assert_eq!(far.distance(0, 1), unbiased.distance(0, 1));
        assert!((unbiased.distance(0, 1) - near.distance(0, 1) - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_matrix_is_symmetric() {
        let points = PointSet::new(
            vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![-1.0, 0.0]],
            vec![t(0), None, t(100)],
            bias(),
        )
        .unwrap();
        let m = points.matrix();
        for i in 0..3 {
            assert_eq!(m.get(i, i), 0.0);
            for j in 0..3 {
                assert_eq!(m.get(i, j), m.get(j, i));
            }
        }
        assert!((m.get(0, 2) - 1.7).abs() < 1e-6);
        assert_eq!(points.neighbours(0, 0.5), vec![0]);
    }

    #[test]
    fn test_rejects_mixed_dimensions() {
        let err = PointSet::new(vec![vec![1.0], vec![1.0, 0.0]], vec![None, None], bias());
        assert!(matches!(err, Err(ClusterError::InvalidInput(_))));
    }
}
