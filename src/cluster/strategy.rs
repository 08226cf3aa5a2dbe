//! Pluggable clustering strategies, chosen once from configuration.

use crate::config::{ClusterAlgorithm, ClusteringConfig};

use super::dbscan::dbscan;
use super::distance::PointSet;
use super::hdbscan::hdbscan;
use super::{ClusterError, Labels};

pub trait ClusterStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// One label per point; `None` marks noise.
    fn cluster(&self, points: &PointSet) -> Result<Labels, ClusterError>;
}

pub struct HdbscanStrategy {
    pub min_cluster_size: usize,
    pub min_samples: usize,
    /// Inputs larger than this are refused as unavailable (the dense matrix is n²).
    pub max_points: usize,
}

impl ClusterStrategy for HdbscanStrategy {
    fn name(&self) -> &'static str {
        "hdbscan"
    }

    fn cluster(&self, points: &PointSet) -> Result<Labels, ClusterError> {
        if points.len() > self.max_points {
            return Err(ClusterError::Unavailable(format!(
                "{} points exceeds the hdbscan limit of {}",
                points.len(),
                self.max_points
            )));
        }
        let matrix = points.matrix();
        Ok(hdbscan(&matrix, self.min_cluster_size, self.min_samples))
    }
}

pub struct DbscanStrategy {
    pub eps: f32,
    pub min_samples: usize,
}

impl ClusterStrategy for DbscanStrategy {
    fn name(&self) -> &'static str {
        "dbscan"
    }

    fn cluster(&self, points: &PointSet) -> Result<Labels, ClusterError> {
        Ok(dbscan(points, self.eps, self.min_samples))
    }
}

/// Try `primary`; when it reports itself unavailable, log and run `fallback`.
pub struct FallbackStrategy {
    primary: Box<dyn ClusterStrategy>,
    fallback: Box<dyn ClusterStrategy>,
}

impl FallbackStrategy {
    pub fn new(primary: Box<dyn ClusterStrategy>, fallback: Box<dyn ClusterStrategy>) -> Self {
        Self { primary, fallback }
    }
}

impl ClusterStrategy for FallbackStrategy {
    fn name(&self) -> &'static str {
        self.primary.name()
    }

    fn cluster(&self, points: &PointSet) -> Result<Labels, ClusterError> {
        match self.primary.cluster(points) {
            Err(ClusterError::Unavailable(reason)) => {
                tracing::warn!(
                    primary = self.primary.name(),
                    fallback = self.fallback.name(),
                    %reason,
                    "Clustering degraded to fallback"
                );
                self.fallback.cluster(points)
            }
            other => other,
        }
    }
}

pub fn select_strategy(config: &ClusteringConfig) -> Box<dyn ClusterStrategy> {
    let config = config.normalized();
    let make_dbscan = || -> Box<dyn ClusterStrategy> {
        Box::new(DbscanStrategy {
            eps: config.dbscan_eps as f32,
            min_samples: config.min_samples,
        })
    };
    let make_hdbscan = |max_points: usize| -> Box<dyn ClusterStrategy> {
        Box::new(HdbscanStrategy {
            min_cluster_size: config.min_cluster_size,
            min_samples: config.min_samples,
            max_points,
        })
    };

    match config.algorithm {
        ClusterAlgorithm::Auto => Box::new(FallbackStrategy::new(
            make_hdbscan(config.hdbscan_max_points),
            make_dbscan(),
        )),
        ClusterAlgorithm::Hdbscan => {
            Box::new(FallbackStrategy::new(make_hdbscan(usize::MAX), make_dbscan()))
        }
        ClusterAlgorithm::Dbscan => make_dbscan(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::distance::TemporalBias;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Unavailable;

    impl ClusterStrategy for Unavailable {
        fn name(&self) -> &'static str {
            "unavailable"
        }

        fn cluster(&self, _points: &PointSet) -> Result<Labels, ClusterError> {
            Err(ClusterError::Unavailable("not installed".into()))
        }
    }

    struct Counting(Arc<AtomicUsize>);

    impl ClusterStrategy for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn cluster(&self, points: &PointSet) -> Result<Labels, ClusterError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(vec![Some(0); points.len()])
        }
    }

    fn three_points() -> PointSet {
        PointSet::new(
            vec![vec![1.0, 0.0], vec![0.9, 0.1], vec![0.0, 1.0]],
            vec![None; 3],
            TemporalBias::none(),
        )
        .unwrap()
    }

    #[test]
    fn test_fallback_runs_when_primary_unavailable() {
        let calls = Arc::new(AtomicUsize::new(0));
        let strategy =
            FallbackStrategy::new(Box::new(Unavailable), Box::new(Counting(calls.clone())));
        let labels = strategy.cluster(&three_points()).unwrap();
        assert_eq!(labels.len(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_fallback_skipped_when_primary_succeeds() {
        let calls = Arc::new(AtomicUsize::new(0));
        let strategy = FallbackStrategy::new(
            Box::new(Counting(Arc::new(AtomicUsize::new(0)))),
            Box::new(Counting(calls.clone())),
        );
        strategy.cluster(&three_points()).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_hdbscan_capability_limit_triggers_fallback() {
        let mut config = ClusteringConfig::default();
        config.hdbscan_max_points = 2;
        config.dbscan_eps = 0.15;
        let strategy = select_strategy(&config);
        assert_eq!(strategy.name(), "hdbscan");

        // dbscan with min_samples = 1 never yields noise
        let labels = strategy.cluster(&three_points()).unwrap();
        assert!(labels.iter().all(Option::is_some));
        assert_eq!(labels[0], labels[1]);
        assert_ne!(labels[0], labels[2]);
    }

    #[test]
    fn test_explicit_dbscan() {
        let mut config = ClusteringConfig::default();
        config.algorithm = ClusterAlgorithm::Dbscan;
        assert_eq!(select_strategy(&config).name(), "dbscan");
    }
}
