use anyhow::Context;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, RgbImage};

pub const DEFAULT_QUALITY: u8 = 80;

/// Decodes any supported encoded image (jpeg/png).
pub fn decode(bytes: &[u8]) -> anyhow::Result<DynamicImage> {
    image::load_from_memory(bytes).context("Failed to decode image bytes")
}

pub fn encode(image: &RgbImage, quality: u8) -> anyhow::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(image.as_raw().len() / 8);
    JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
        .encode_image(image)
        .context("Failed to encode jpeg")?;
    Ok(out)
}
