//! JPEG encoding and multipart MJPEG framing.

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder as ImageJpegEncoder;
use std::io::Write;

use crate::frame::Frame;

pub const BOUNDARY: &str = "frame";
pub const STREAM_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JpegEncoder {
    quality: u8,
}

impl JpegEncoder {
    /// Quality is clamped to 1..=100.
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    pub fn encode(&self, frame: &Frame) -> Result<Vec<u8>> {
        if frame.width() == 0 || frame.height() == 0 {
            return Err(anyhow!("cannot encode empty frame {}", frame.sequence));
        }
        let mut out = Vec::with_capacity(frame.pixels().len() / 8);
        ImageJpegEncoder::new_with_quality(&mut out, self.quality)
            .encode_image(frame.image())
            .with_context(|| format!("encode frame {} as jpeg", frame.sequence))?;
        Ok(out)
    }
}

impl Default for JpegEncoder {
    fn default() -> Self {
        Self::new(80)
    }
}

/// Response head for a never-ending multipart stream.
pub fn write_stream_header<W: Write>(out: &mut W) -> std::io::Result<()> {
    write!(
        out,
        "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        STREAM_CONTENT_TYPE
    )?;
    out.flush()
}

/// One multipart part carrying a single JPEG.
pub fn write_part<W: Write>(out: &mut W, jpeg: &[u8]) -> std::io::Result<()> {
    write!(
        out,
        "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        BOUNDARY,
        jpeg.len()
    )?;
    out.write_all(jpeg)?;
    out.write_all(b"\r\n")?;
    out.flush()
}
