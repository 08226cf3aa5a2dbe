use anyhow::Result;
use image::imageops::FilterType;
use std::path::PathBuf;

use super::{load_for_embedding, EmbeddingProvider};

/// Grid side of the colour layout.
const GRID: u32 = 12;

/// Model-free provider: a centred, unit-length colour layout vector.
///
/// Two shots of the same scene land close in cosine distance; it knows
/// nothing about semantics, but needs no network or weights.
#[derive(Debug, Default, Clone)]
pub struct PixelEmbeddingProvider;

impl PixelEmbeddingProvider {
    pub fn new() -> Self {
        Self
    }

    pub fn embed_image(&self, img: &image::DynamicImage) -> Vec<f32> {
        let small = img.resize_exact(GRID, GRID, FilterType::Triangle).to_rgb8();
        let mut vector: Vec<f32> = small.into_raw().into_iter().map(|v| v as f32 / 255.0).collect();

        let mean = vector.iter().sum::<f32>() / vector.len() as f32;
        for v in vector.iter_mut() {
            *v -= mean;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for v in vector.iter_mut() {
                *v /= norm;
            }
        }
        vector
    }
}

impl EmbeddingProvider for PixelEmbeddingProvider {
    fn name(&self) -> &'static str {
        "pixel"
    }

    fn embed(&self, paths: &[PathBuf]) -> Result<Vec<Vec<f32>>> {
        paths
            .iter()
            .map(|path| load_for_embedding(path).map(|img| self.embed_image(&img)))
            .collect()
    }
}
