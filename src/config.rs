use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default)]
    pub scanner: ScannerConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub clustering: ClusteringConfig,

    #[serde(default)]
    pub export: ExportConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    #[serde(default = "default_image_extensions")]
    pub image_extensions: Vec<String>,

    /// Fingerprints closer than this many differing bits are near-duplicates.
    #[serde(default = "default_dedup_threshold")]
    pub dedup_threshold: u32,

    /// Photos per committed batch during scanning.
    #[serde(default = "default_commit_every")]
    pub commit_every: usize,
}

fn default_image_extensions() -> Vec<String> {
    vec![
        "jpg".to_string(),
        "jpeg".to_string(),
        "png".to_string(),
        "webp".to_string(),
        "heic".to_string(),
    ]
}

fn default_dedup_threshold() -> u32 {
    12 // bits out of 256
}

fn default_commit_every() -> usize {
    10
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            image_extensions: default_image_extensions(),
            dedup_threshold: default_dedup_threshold(),
            commit_every: default_commit_every(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderType {
    #[default]
    Pixel,
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub provider: EmbeddingProviderType,

    #[serde(default = "default_embedding_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_embedding_endpoint() -> String {
    "http://127.0.0.1:1234/v1".to_string()
}

fn default_embedding_model() -> String {
    "clip-ViT-B-32".to_string()
}

fn default_batch_size() -> usize {
    32
}

fn default_timeout_secs() -> u64 {
    120
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderType::default(),
            endpoint: default_embedding_endpoint(),
            model: default_embedding_model(),
            api_key: None,
            batch_size: default_batch_size(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ClusterAlgorithm {
    /// HDBSCAN, falling back to DBSCAN when it cannot run.
    #[default]
    Auto,
    Hdbscan,
    Dbscan,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusteringConfig {
    #[serde(default)]
    pub algorithm: ClusterAlgorithm,

    /// Distance subtracted from pairs captured within `time_window_secs`.
    #[serde(default = "default_time_weight")]
    pub time_weight: f64,

    #[serde(default = "default_time_window_secs")]
    pub time_window_secs: i64,

    #[serde(default = "default_min_cluster_size")]
    pub min_cluster_size: usize,

    #[serde(default = "default_min_samples")]
    pub min_samples: usize,

    /// Neighbourhood radius for the fixed-radius fallback.
    #[serde(default = "default_dbscan_eps")]
    pub dbscan_eps: f64,

    /// Largest input the HDBSCAN strategy accepts before reporting itself unavailable.
    #[serde(default = "default_hdbscan_max_points")]
    pub hdbscan_max_points: usize,
}

fn default_time_weight() -> f64 {
    0.3
}

fn default_time_window_secs() -> i64 {
    5 * 60
}

fn default_min_cluster_size() -> usize {
    2
}

fn default_min_samples() -> usize {
    1
}

fn default_dbscan_eps() -> f64 {
    0.15
}

fn default_hdbscan_max_points() -> usize {
    8_000
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            algorithm: ClusterAlgorithm::default(),
            time_weight: default_time_weight(),
            time_window_secs: default_time_window_secs(),
            min_cluster_size: default_min_cluster_size(),
            min_samples: default_min_samples(),
            dbscan_eps: default_dbscan_eps(),
            hdbscan_max_points: default_hdbscan_max_points(),
        }
    }
}

impl ClusteringConfig {
    /// Clamp the tunables into the ranges the clustering stage accepts.
    pub fn normalized(&self) -> Self {
        let mut cfg = self.clone();
        if !cfg.time_weight.is_finite() {
            cfg.time_weight = default_time_weight();
        }
        cfg.time_weight = cfg.time_weight.clamp(0.0, 1.0);
        cfg.time_window_secs = cfg.time_window_secs.max(0);
        cfg.min_cluster_size = cfg.min_cluster_size.max(2);
        cfg.min_samples = cfg.min_samples.max(1);
        if !cfg.dbscan_eps.is_finite() || cfg.dbscan_eps < 0.0 {
            cfg.dbscan_eps = default_dbscan_eps();
        }
        cfg
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    #[serde(default = "default_include_manifest")]
    pub include_manifest: bool,

    /// Write an XMP sidecar with the rating next to each exported photo.
    #[serde(default)]
    pub write_xmp: bool,
}

fn default_include_manifest() -> bool {
    true
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            include_manifest: default_include_manifest(),
            write_xmp: false,
        }
    }
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("picbest")
        .join("photos.db")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            scanner: ScannerConfig::default(),
            embedding: EmbeddingConfig::default(),
            clustering: ClusteringConfig::default(),
            export: ExportConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            // Create default config
            let config = Config::default();
            config.save_to(&config_path)?;
            Ok(config)
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("picbest")
    }

    fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("PICBEST_CONFIG") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            db_path = "/tmp/catalog.db"

            [clustering]
            time_weight = 0.5
            "#,
        )
        .unwrap();

        assert_eq!(config.db_path, PathBuf::from("/tmp/catalog.db"));
        assert_eq!(config.clustering.time_weight, 0.5);
        assert_eq!(config.clustering.time_window_secs, 300);
        assert_eq!(config.scanner.dedup_threshold, 12);
        assert_eq!(config.embedding.provider, EmbeddingProviderType::Pixel);
        assert!(config.export.include_manifest);
        assert!(!config.export.write_xmp);
    }

    #[test]
    fn test_normalized_clamps_tunables() {
        let cfg = ClusteringConfig {
            time_weight: 3.0,
            time_window_secs: -5,
            min_cluster_size: 0,
            min_samples: 0,
            dbscan_eps: f64::NAN,
            ..Default::default()
        }
        .normalized();

        assert_eq!(cfg.time_weight, 1.0);
        assert_eq!(cfg.time_window_secs, 0);
        assert_eq!(cfg.min_cluster_size, 2);
        assert_eq!(cfg.min_samples, 1);
        assert_eq!(cfg.dbscan_eps, 0.15);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config.toml");

        let mut config = Config::default();
        config.clustering.algorithm = ClusterAlgorithm::Dbscan;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.clustering.algorithm, ClusterAlgorithm::Dbscan);
    }
}
