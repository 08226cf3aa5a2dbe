use anyhow::{anyhow, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::{load_for_embedding, validate_batch, EmbeddingProvider};

/// OpenAI-compatible `/embeddings` endpoint serving an image model (CLIP and friends).
///
/// Images are sent as base64 JPEG data URLs in the `input` array.
pub struct HttpEmbeddingProvider {
    endpoint: String,
    model: String,
    api_key: Option<String>,
    agent: ureq::Agent,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: Option<usize>,
}

impl HttpEmbeddingProvider {
    pub fn new(endpoint: &str, model: &str, api_key: Option<&str>, timeout_secs: u64) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(timeout_secs))
            .build();
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.map(|s| s.to_string()),
            agent,
        }
    }
}

impl EmbeddingProvider for HttpEmbeddingProvider {
    fn name(&self) -> &'static str {
        "http"
    }

    fn embed(&self, paths: &[PathBuf]) -> Result<Vec<Vec<f32>>> {
        if paths.is_empty() {
            return Ok(Vec::new());
        }

        let input = paths
            .iter()
            .map(|path| encode_data_url(path))
            .collect::<Result<Vec<_>>>()?;

        let request = EmbeddingRequest {
            model: self.model.clone(),
            input,
        };

        let url = format!("{}/embeddings", self.endpoint);
        let mut req = self.agent.post(&url).set("Content-Type", "application/json");

        if let Some(ref api_key) = self.api_key {
            req = req.set("Authorization", &format!("Bearer {}", api_key));
        }

        let response = req
            .send_json(&request)
            .map_err(|e| anyhow!("Embedding request failed: {}", e))?;

        let embedding_response: EmbeddingResponse = response
            .into_json()
            .map_err(|e| anyhow!("Failed to parse embedding response: {}", e))?;

        let vectors = order_by_index(embedding_response.data);
        validate_batch(paths.len(), &vectors)?;
        Ok(vectors)
    }
}

/// Servers may answer out of order; honour `index` when every item carries one.
fn order_by_index(mut data: Vec<EmbeddingData>) -> Vec<Vec<f32>> {
    if data.iter().all(|d| d.index.is_some()) {
        data.sort_by_key(|d| d.index);
    }
    data.into_iter().map(|d| d.embedding).collect()
}

fn encode_data_url(path: &Path) -> Result<String> {
    let img = load_for_embedding(path)?;
    let base64_image = encode_jpeg(&img)?;
    Ok(format!("data:image/jpeg;base64,{}", base64_image))
}

fn encode_jpeg(img: &DynamicImage) -> Result<String> {
    let mut buf = Cursor::new(Vec::new());
    let encoder = JpegEncoder::new_with_quality(&mut buf, 85);
    // JPEG has no alpha channel
    DynamicImage::ImageRgb8(img.to_rgb8())
        .write_with_encoder(encoder)
        .map_err(|e| anyhow!("Failed to encode image as JPEG: {}", e))?;
    Ok(BASE64.encode(buf.into_inner()))
}
