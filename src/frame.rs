//! Owned video frames.
//!
//! A `Frame` lives for exactly one pass through the pipeline: acquired from a
//! source, borrowed immutably by the detector, drawn on by the renderer, then
//! encoded and dropped.

use anyhow::{anyhow, Result};
use image::RgbImage;
use std::time::Instant;

pub struct Frame {
    image: RgbImage,
    /// Per-source sequence number, starting at 1.
    pub sequence: u64,
    captured_at: Instant,
}

impl Frame {
    pub fn new(image: RgbImage, sequence: u64) -> Self {
        Self {
            image,
            sequence,
            captured_at: Instant::now(),
        }
    }

    /// Wrap a packed RGB24 buffer.
    pub fn from_rgb(pixels: Vec<u8>, width: u32, height: u32, sequence: u64) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        let actual = pixels.len();
        let image = RgbImage::from_raw(width, height, pixels).ok_or_else(|| {
            anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                actual
            )
        })?;
        Ok(Self::new(image, sequence))
    }

    /// Solid-colour frame, mostly for tests.
    pub fn blank(width: u32, height: u32, sequence: u64) -> Self {
        Self::new(RgbImage::new(width, height), sequence)
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn image_mut(&mut self) -> &mut RgbImage {
        &mut self.image
    }

    /// Packed RGB24 pixels, row-major.
    pub fn pixels(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn age_ms(&self) -> u128 {
        self.captured_at.elapsed().as_millis()
    }
}
