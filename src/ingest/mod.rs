//! Frame ingestion sources.
//!
//! This module provides the sources a stream can pull frames from:
//! - Synthetic test pattern (`stub://` URIs)
//! - USB/V4L2 cameras (feature: ingest-v4l2)
//! - HTTP MJPEG/JPEG cameras (feature: ingest-http)
//!
//! Every source is a blocking, pull-based handle. A failed `next_frame` is a
//! transient fault: the caller backs off and asks again. Sources are never
//! shared between streams; each stream opens (or borrows from the pool) its
//! own handle.

#[cfg(feature = "ingest-http")]
pub mod http;
#[cfg(any(feature = "ingest-v4l2", feature = "ingest-http"))]
mod normalize;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use anyhow::{anyhow, Result};

use crate::frame::Frame;

#[cfg(feature = "ingest-http")]
pub use http::HttpSource;
pub use synthetic::SyntheticSource;
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Source;

/// Blocking frame source.
pub trait FrameSource: Send {
    /// Open the underlying device or stream.
    fn connect(&mut self) -> Result<()>;

    /// Capture the next frame.
    fn next_frame(&mut self) -> Result<Frame>;

    /// Check if the source is healthy.
    fn is_healthy(&self) -> bool;

    /// Get frame statistics.
    fn stats(&self) -> SourceStats;
}

/// Statistics for a frame source.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub failures: u64,
    pub source: String,
}

/// Where and how to capture frames.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceSettings {
    /// `stub://name`, `http(s)://host/stream` or a V4L2 device path.
    pub uri: String,
    pub width: u32,
    pub height: u32,
    /// Target frame rate. Sources decimate to this rate where they can.
    pub target_fps: u32,
}

impl SourceSettings {
    /// Device path for a numbered local camera.
    pub fn camera_uri(index: u32) -> String {
        format!("/dev/video{}", index)
    }
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            uri: Self::camera_uri(0),
            width: 640,
            height: 480,
            target_fps: 10,
        }
    }
}

/// Build an unconnected source for the configured URI.
pub fn open_source(settings: &SourceSettings) -> Result<Box<dyn FrameSource>> {
    let uri = settings.uri.trim();
    if uri.is_empty() {
        return Err(anyhow!("frame source uri must not be empty"));
    }
    if uri.starts_with("stub://") {
        return Ok(Box::new(SyntheticSource::new(settings.clone())));
    }
    if uri.starts_with("http://") || uri.starts_with("https://") {
        #[cfg(feature = "ingest-http")]
        {
            return Ok(Box::new(HttpSource::new(settings.clone())?));
        }
        #[cfg(not(feature = "ingest-http"))]
        {
            return Err(anyhow!("http sources require the ingest-http feature"));
        }
    }
    if uri.contains("://") {
        return Err(anyhow!("unsupported frame source uri '{}'", uri));
    }
    #[cfg(feature = "ingest-v4l2")]
    {
        Ok(Box::new(V4l2Source::new(settings.clone())?))
    }
    #[cfg(not(feature = "ingest-v4l2"))]
    {
        Err(anyhow!(
            "camera device {} requires the ingest-v4l2 feature",
            uri
        ))
    }
}

/// Open and connect a source in one step. Failure here is a startup error.
pub fn connect_source(settings: &SourceSettings) -> Result<Box<dyn FrameSource>> {
    let mut source = open_source(settings)?;
    source
        .connect()
        .map_err(|e| anyhow!("failed to open frame source {}: {}", settings.uri, e))?;
    Ok(source)
}
