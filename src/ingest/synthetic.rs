//! Synthetic frame source (`stub://` URIs).
//!
//! Produces a deterministic moving test pattern so the full pipeline can run
//! without a camera. Always connected, always healthy. With a non-zero
//! `target_fps` frames are paced like a live camera; at 0 they come as fast
//! as they are asked for.

use anyhow::{anyhow, Result};
use std::time::{Duration, Instant};

use super::{FrameSource, SourceSettings, SourceStats};
use crate::frame::Frame;

pub struct SyntheticSource {
    settings: SourceSettings,
    frame_count: u64,
    connected: bool,
    last_frame_at: Option<Instant>,
}

impl SyntheticSource {
    pub fn new(settings: SourceSettings) -> Self {
        Self {
            settings,
            frame_count: 0,
            connected: false,
            last_frame_at: None,
        }
    }

    fn wait_for_next_slot(&self) {
        if self.settings.target_fps == 0 {
            return;
        }
        let Some(last) = self.last_frame_at else {
            return;
        };
        let interval = Duration::from_secs(1) / self.settings.target_fps;
        let due = last + interval;
        let now = Instant::now();
        if due > now {
            std::thread::sleep(due - now);
        }
    }

    fn generate_pixels(&self) -> Vec<u8> {
        let width = self.settings.width as usize;
        let height = self.settings.height as usize;
        let shift = self.frame_count as usize;
        let mut pixels = vec![0u8; width * height * 3];
        for (i, px) in pixels.chunks_exact_mut(3).enumerate() {
            let x = i % width;
            let y = i / width;
            px[0] = ((x + shift) % 256) as u8;
            px[1] = ((y + shift / 2) % 256) as u8;
            px[2] = 96;
        }
        pixels
    }
}

impl FrameSource for SyntheticSource {
    fn connect(&mut self) -> Result<()> {
        if self.settings.width == 0 || self.settings.height == 0 {
            return Err(anyhow!(
                "synthetic source needs a non-zero frame size, got {}x{}",
                self.settings.width,
                self.settings.height
            ));
        }
        self.connected = true;
        log::info!(
            "SyntheticSource: connected to {} ({}x{})",
            self.settings.uri,
            self.settings.width,
            self.settings.height
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        if !self.connected {
            return Err(anyhow!("synthetic source not connected; call connect() first"));
        }
        self.wait_for_next_slot();
        self.last_frame_at = Some(Instant::now());
        self.frame_count += 1;
        let pixels = self.generate_pixels();
        Frame::from_rgb(
            pixels,
            self.settings.width,
            self.settings.height,
            self.frame_count,
        )
    }

    fn is_healthy(&self) -> bool {
        self.connected
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            failures: 0,
            source: self.settings.uri.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_settings() -> SourceSettings {
        SourceSettings {
            uri: "stub://test".to_string(),
            width: 64,
            height: 48,
            target_fps: 10,
        }
    }

    #[test]
    fn synthetic_source_produces_sequenced_frames() -> Result<()> {
        let mut source = SyntheticSource::new(stub_settings());
        source.connect()?;

        let first = source.next_frame()?;
        let second = source.next_frame()?;
        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);
        assert_ne!(first.pixels(), second.pixels());
        assert_eq!(source.stats().frames_captured, 2);
        Ok(())
    }

    #[test]
    fn frames_are_paced_to_target_fps() -> Result<()> {
        let mut settings = stub_settings();
        settings.target_fps = 20;
        let mut source = SyntheticSource::new(settings);
        source.connect()?;

        let started = Instant::now();
        for _ in 0..3 {
            source.next_frame()?;
        }
        // the first frame is immediate, the next two wait 50ms each
        assert!(started.elapsed() >= Duration::from_millis(100));
        Ok(())
    }

    #[test]
    fn unpaced_source_does_not_wait() -> Result<()> {
        let mut settings = stub_settings();
        settings.target_fps = 0;
        let mut source = SyntheticSource::new(settings);
        source.connect()?;

        let started = Instant::now();
        for _ in 0..20 {
            source.next_frame()?;
        }
        assert!(started.elapsed() < Duration::from_secs(1));
        Ok(())
    }

    #[test]
    fn synthetic_source_requires_connect() {
        let mut source = SyntheticSource::new(stub_settings());
        assert!(!source.is_healthy());
        assert!(source.next_frame().is_err());
    }

    #[test]
    fn zero_sized_source_fails_to_connect() {
        let mut settings = stub_settings();
        settings.width = 0;
        assert!(SyntheticSource::new(settings).connect().is_err());
    }
}
