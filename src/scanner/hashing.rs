use anyhow::{anyhow, bail, Result};
use image::DynamicImage;
use sha2::{Digest, Sha256};
use std::fmt;

/// Side length of the gradient hash grid.
const HASH_SIZE: u32 = 16;

/// Fingerprint length in bits.
pub const FINGERPRINT_BITS: u32 = HASH_SIZE * HASH_SIZE;

const FINGERPRINT_BYTES: usize = (FINGERPRINT_BITS / 8) as usize;

/// Perceptual fingerprint: a row-wise luminance gradient signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; FINGERPRINT_BYTES]);

impl Fingerprint {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let array: [u8; FINGERPRINT_BYTES] = bytes.try_into().map_err(|_| {
            anyhow!(
                "fingerprint must be {} bytes, got {}",
                FINGERPRINT_BYTES,
                bytes.len()
            )
        })?;
        Ok(Self(array))
    }

    pub fn from_hex(hex: &str) -> Result<Self> {
        if hex.len() != FINGERPRINT_BYTES * 2 || !hex.is_ascii() {
            bail!("invalid fingerprint: {:?}", hex);
        }
        let mut bytes = [0u8; FINGERPRINT_BYTES];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
                .map_err(|e| anyhow!("invalid fingerprint {:?}: {}", hex, e))?;
        }
        Ok(Self(bytes))
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn hamming(&self, other: &Fingerprint) -> u32 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// SHA-256 of the file contents, hex encoded.
pub fn content_hash_bytes(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Gradient hash of a decoded image.
pub fn compute_fingerprint(img: &DynamicImage) -> Result<Fingerprint> {
    use img_hash::{HashAlg, HasherConfig};

    // Hash a small thumbnail; the hasher downsamples further anyway
    let thumbnail = img.thumbnail(64, 64);

    let hasher = HasherConfig::new()
        .hash_alg(HashAlg::Gradient)
        .hash_size(HASH_SIZE, HASH_SIZE)
        .to_hasher();

    // img_hash links its own copy of the image crate, so hand it raw pixels
    let rgba = thumbnail.to_rgba8();
    let (width, height) = rgba.dimensions();
    let img_hash_image = img_hash::image::RgbaImage::from_raw(width, height, rgba.into_raw())
        .ok_or_else(|| anyhow!("Failed to create image for hashing"))?;

    let hash = hasher.hash_image(&img_hash::image::DynamicImage::ImageRgba8(img_hash_image));
    Fingerprint::from_bytes(hash.as_bytes())
}
