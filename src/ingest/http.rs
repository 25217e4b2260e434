//! HTTP camera source.
//!
//! Reads `multipart/x-mixed-replace` MJPEG streams, or polls a single-JPEG
//! snapshot endpoint when the camera answers with a plain image. Frames are
//! decoded in memory and decimated to the configured rate.

use anyhow::{anyhow, Context, Result};
use std::io::Read;
use std::time::{Duration, Instant};

use url::Url;

use super::normalize::{decode_jpeg, find_jpeg_bounds};
use super::{FrameSource, SourceSettings, SourceStats};
use crate::frame::Frame;

const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;

pub struct HttpSource {
    settings: SourceSettings,
    stream: Option<HttpStream>,
    last_frame_at: Option<Instant>,
    connected_at: Option<Instant>,
    frame_count: u64,
    failures: u64,
    last_error: Option<String>,
}

enum HttpStream {
    Mjpeg(MjpegReader),
    SingleJpeg,
}

impl HttpSource {
    pub fn new(settings: SourceSettings) -> Result<Self> {
        let url = Url::parse(&settings.uri).context("parse http source url")?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(anyhow!(
                "unsupported http source scheme '{}'; expected http(s)",
                url.scheme()
            ));
        }
        Ok(Self {
            settings,
            stream: None,
            last_frame_at: None,
            connected_at: None,
            frame_count: 0,
            failures: 0,
            last_error: None,
        })
    }

    fn read_jpeg(&mut self) -> Result<Vec<u8>> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| anyhow!("http source not connected; call connect() first"))?;
        match stream {
            HttpStream::Mjpeg(reader) => reader.read_next_jpeg(),
            HttpStream::SingleJpeg => fetch_single_jpeg(&self.settings.uri),
        }
    }
}

impl FrameSource for HttpSource {
    fn connect(&mut self) -> Result<()> {
        let response = ureq::get(&self.settings.uri)
            .call()
            .with_context(|| format!("connect to http stream {}", self.settings.uri))?;
        let content_type = response.header("Content-Type").unwrap_or("");
        if content_type.to_lowercase().contains("multipart") {
            self.stream = Some(HttpStream::Mjpeg(MjpegReader::new(response.into_reader())));
        } else {
            self.stream = Some(HttpStream::SingleJpeg);
        }
        self.connected_at = Some(Instant::now());
        self.last_error = None;
        log::info!("HttpSource: connected to {}", self.settings.uri);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        let min_interval = frame_interval(self.settings.target_fps);
        loop {
            let jpeg_bytes = match self.read_jpeg() {
                Ok(bytes) => bytes,
                Err(err) => {
                    self.failures += 1;
                    self.last_error = Some(err.to_string());
                    return Err(err);
                }
            };

            let now = Instant::now();
            if let Some(last) = self.last_frame_at {
                if now.duration_since(last) < min_interval {
                    continue;
                }
            }

            let (pixels, width, height) = decode_jpeg(&jpeg_bytes).inspect_err(|_| {
                self.failures += 1;
            })?;
            self.frame_count += 1;
            self.last_frame_at = Some(now);
            self.last_error = None;
            return Frame::from_rgb(pixels, width, height, self.frame_count);
        }
    }

    fn is_healthy(&self) -> bool {
        if self.last_error.is_some() {
            return false;
        }
        let Some(connected_at) = self.connected_at else {
            return false;
        };
        let Some(last_frame_at) = self.last_frame_at else {
            return connected_at.elapsed() <= Duration::from_secs(5);
        };
        last_frame_at.elapsed() <= health_grace(self.settings.target_fps)
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            failures: self.failures,
            source: self.settings.uri.clone(),
        }
    }
}

struct MjpegReader {
    reader: Box<dyn Read + Send>,
    buffer: Vec<u8>,
}

impl MjpegReader {
    fn new(reader: Box<dyn Read + Send>) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(64 * 1024),
        }
    }

    fn read_next_jpeg(&mut self) -> Result<Vec<u8>> {
        let mut chunk = vec![0u8; 8192];
        loop {
            if let Some((start, end)) = find_jpeg_bounds(&self.buffer) {
                let frame = self.buffer[start..end].to_vec();
                self.buffer.drain(..end);
                return Ok(frame);
            }

            let read = self.reader.read(&mut chunk).context("read mjpeg chunk")?;
            if read == 0 {
                return Err(anyhow!("mjpeg stream ended"));
            }
            self.buffer.extend_from_slice(&chunk[..read]);

            if self.buffer.len() > MAX_JPEG_BYTES * 2 {
                let keep = 2.min(self.buffer.len());
                let drain_len = self.buffer.len() - keep;
                self.buffer.drain(..drain_len);
            }
        }
    }
}

fn fetch_single_jpeg(url: &str) -> Result<Vec<u8>> {
    let response = ureq::get(url)
        .call()
        .with_context(|| format!("fetch jpeg snapshot from {}", url))?;
    let mut bytes = Vec::new();
    response
        .into_reader()
        .take(MAX_JPEG_BYTES as u64)
        .read_to_end(&mut bytes)
        .context("read jpeg snapshot")?;
    if bytes.is_empty() {
        return Err(anyhow!("empty jpeg snapshot"));
    }
    Ok(bytes)
}

fn frame_interval(target_fps: u32) -> Duration {
    if target_fps == 0 {
        Duration::from_millis(0)
    } else {
        Duration::from_millis((1000 / target_fps).max(1) as u64)
    }
}

fn health_grace(target_fps: u32) -> Duration {
    let base_ms = if target_fps == 0 {
        2_000
    } else {
        (1000 / target_fps).saturating_mul(6)
    };
    Duration::from_millis(base_ms.max(2_000) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn mjpeg_reader_splits_concatenated_parts() -> Result<()> {
        let body = [
            b"--frame\r\nContent-Type: image/jpeg\r\n\r\n".as_slice(),
            &[0xFF, 0xD8, 0x01, 0xFF, 0xD9],
            b"\r\n--frame\r\n\r\n",
            &[0xFF, 0xD8, 0x02, 0x03, 0xFF, 0xD9],
        ]
        .concat();
        let mut reader = MjpegReader::new(Box::new(Cursor::new(body)));
        assert_eq!(reader.read_next_jpeg()?, vec![0xFF, 0xD8, 0x01, 0xFF, 0xD9]);
        assert_eq!(
            reader.read_next_jpeg()?,
            vec![0xFF, 0xD8, 0x02, 0x03, 0xFF, 0xD9]
        );
        assert!(reader.read_next_jpeg().is_err());
        Ok(())
    }

    #[test]
    fn rejects_non_http_urls() {
        let settings = SourceSettings {
            uri: "udp://127.0.0.1:9000".to_string(),
            ..SourceSettings::default()
        };
        assert!(HttpSource::new(settings).is_err());
    }

    #[test]
    fn frame_interval_handles_zero_fps() {
        assert_eq!(frame_interval(0), Duration::from_millis(0));
        assert_eq!(frame_interval(10), Duration::from_millis(100));
    }
}
