use anyhow::Result;

use crate::detect::result::Detection;
use crate::frame::Frame;

/// Object detector backend.
///
/// Backends receive the frame by shared reference and must not keep pixel data
/// beyond the `detect` call. Boxes are returned in frame pixel coordinates.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;

    /// Optional warm-up hook, run once before the first stream starts.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
