//! V4L2 camera source.
//!
//! Opens a local device node (e.g. /dev/video0), asks for RGB3 at the
//! configured size and rate, and falls back to whatever the driver settles on
//! (YUYV, NV12 or MJPG), converting every capture to RGB24.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;
use std::time::{Duration, Instant};

use super::normalize::{normalize_to_rgb, PixelFormat};
use super::{FrameSource, SourceSettings, SourceStats};
use crate::frame::Frame;

pub struct V4l2Source {
    settings: SourceSettings,
    state: Option<DeviceState>,
    format: PixelFormat,
    frame_count: u64,
    failures: u64,
    last_frame_at: Option<Instant>,
    last_error: Option<String>,
    active_width: u32,
    active_height: u32,
}

#[self_referencing]
struct DeviceState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Source {
    pub fn new(settings: SourceSettings) -> Result<Self> {
        Ok(Self {
            active_width: settings.width,
            active_height: settings.height,
            settings,
            state: None,
            format: PixelFormat::Rgb24,
            frame_count: 0,
            failures: 0,
            last_frame_at: None,
            last_error: None,
        })
    }

    fn health_grace(&self) -> Duration {
        let base_ms = if self.settings.target_fps == 0 {
            2_000
        } else {
            (1000 / self.settings.target_fps).saturating_mul(6)
        };
        Duration::from_millis(base_ms.max(2_000) as u64)
    }
}

impl FrameSource for V4l2Source {
    fn connect(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&self.settings.uri)
            .with_context(|| format!("open v4l2 device {}", self.settings.uri))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = self.settings.width;
        format.height = self.settings.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Source: failed to set format on {}: {}",
                    self.settings.uri,
                    err
                );
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };
        self.format = PixelFormat::from_fourcc(&format.fourcc.repr).ok_or_else(|| {
            anyhow!(
                "v4l2 device {} settled on unsupported pixel format {}",
                self.settings.uri,
                format.fourcc
            )
        })?;

        if self.settings.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.settings.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "V4l2Source: failed to set fps on {}: {}",
                    self.settings.uri,
                    err
                );
            }
        }

        self.active_width = format.width;
        self.active_height = format.height;
        self.last_error = None;

        let state = DeviceStateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()
        .map_err(|err| {
            self.last_error = Some(err.to_string());
            err
        })?;
        self.state = Some(state);

        log::info!(
            "V4l2Source: connected to {} ({}x{} {:?})",
            self.settings.uri,
            self.active_width,
            self.active_height,
            self.format
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        use v4l::io::traits::CaptureStream;

        let state = self.state.as_mut().context("v4l2 device not connected")?;
        let captured = state.with_mut(|fields| {
            fields
                .stream
                .next()
                .map(|(buf, meta)| buf[..(meta.bytesused as usize).min(buf.len())].to_vec())
        });
        let buf = match captured {
            Ok(buf) => buf,
            Err(err) => {
                self.failures += 1;
                self.last_error = Some(err.to_string());
                return Err(anyhow::Error::new(err).context("capture v4l2 frame"));
            }
        };

        let (pixels, width, height) =
            normalize_to_rgb(&buf, self.active_width, self.active_height, self.format)
                .inspect_err(|_| self.failures += 1)?;
        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        self.last_error = None;

        Frame::from_rgb(pixels, width, height, self.frame_count)
    }

    fn is_healthy(&self) -> bool {
        if self.last_error.is_some() {
            return false;
        }
        let Some(last_frame_at) = self.last_frame_at else {
            return true;
        };
        last_frame_at.elapsed() <= self.health_grace()
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            failures: self.failures,
            source: self.settings.uri.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_device_fails_to_connect() -> Result<()> {
        let mut source = V4l2Source::new(SourceSettings {
            uri: "/dev/video-does-not-exist".to_string(),
            ..SourceSettings::default()
        })?;
        assert!(source.connect().is_err());
        assert!(source.next_frame().is_err());
        Ok(())
    }
}
