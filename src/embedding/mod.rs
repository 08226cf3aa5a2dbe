//! Embedding providers: anything that turns a batch of images into vectors.

pub mod http;
pub mod pixel;

use anyhow::{anyhow, Result};
use image::DynamicImage;
use std::path::{Path, PathBuf};

use crate::config::{EmbeddingConfig, EmbeddingProviderType};

pub use http::HttpEmbeddingProvider;
pub use pixel::PixelEmbeddingProvider;

/// Longest edge of the image handed to a model.
pub const EMBED_MAX_DIMENSION: u32 = 336;

/// Opaque vector-producing capability.
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// One vector per path, in input order. A failure fails the whole batch.
    fn embed(&self, paths: &[PathBuf]) -> Result<Vec<Vec<f32>>>;
}

pub fn create_provider(config: &EmbeddingConfig) -> Box<dyn EmbeddingProvider> {
    match config.provider {
        EmbeddingProviderType::Pixel => Box::new(PixelEmbeddingProvider::new()),
        EmbeddingProviderType::Http => Box::new(HttpEmbeddingProvider::new(
            &config.endpoint,
            &config.model,
            config.api_key.as_deref(),
            config.timeout_secs,
        )),
    }
}

/// Decode an image and shrink it for embedding.
pub fn load_for_embedding(path: &Path) -> Result<DynamicImage> {
    let img = image::open(path)
        .map_err(|e| anyhow!("Failed to open image {}: {}", path.display(), e))?;
    Ok(img.thumbnail(EMBED_MAX_DIMENSION, EMBED_MAX_DIMENSION))
}

/// Check that a provider answered with one finite vector per input.
pub(crate) fn validate_batch(expected: usize, vectors: &[Vec<f32>]) -> Result<()> {
    if vectors.len() != expected {
        return Err(anyhow!(
            "provider returned {} vectors for {} images",
            vectors.len(),
            expected
        ));
    }
    if let Some(dim) = vectors.first().map(Vec::len) {
        if dim == 0 || vectors.iter().any(|v| v.len() != dim) {
            return Err(anyhow!("provider returned vectors of inconsistent dimension"));
        }
    }
    if vectors.iter().flatten().any(|x| !x.is_finite()) {
        return Err(anyhow!("provider returned non-finite values"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_batch() {
        assert!(validate_batch(2, &[vec![1.0, 0.0], vec![0.0, 1.0]]).is_ok());
        assert!(validate_batch(3, &[vec![1.0, 0.0], vec![0.0, 1.0]]).is_err());
        assert!(validate_batch(2, &[vec![1.0, 0.0], vec![0.0]]).is_err());
        assert!(validate_batch(1, &[vec![f32::NAN]]).is_err());
    }

    #[test]
    fn test_create_provider_honours_config() {
        let mut config = EmbeddingConfig::default();
        assert_eq!(create_provider(&config).name(), "pixel");
        config.provider = EmbeddingProviderType::Http;
        assert_eq!(create_provider(&config).name(), "http");
    }
}
