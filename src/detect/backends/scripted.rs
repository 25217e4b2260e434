use anyhow::Result;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;
use crate::frame::Frame;

/// Replays a fixed script of per-frame detections, cycling when it runs out.
///
/// An empty script detects nothing. Used by tests and the headless demo.
#[derive(Clone, Debug, Default)]
pub struct ScriptedBackend {
    script: Vec<Vec<Detection>>,
    cursor: usize,
}

impl ScriptedBackend {
    pub fn new(script: Vec<Vec<Detection>>) -> Self {
        Self { script, cursor: 0 }
    }

    /// Detect the same set on every frame.
    pub fn repeating(detections: Vec<Detection>) -> Self {
        Self::new(vec![detections])
    }

    pub fn frames_served(&self) -> usize {
        self.cursor
    }
}

impl DetectorBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
        if self.script.is_empty() {
            return Ok(Vec::new());
        }
        let detections = self.script[self.cursor % self.script.len()].clone();
        self.cursor += 1;
        Ok(detections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::BoundingBox;

    #[test]
    fn scripted_backend_cycles() -> Result<()> {
        let person = Detection::new("person", BoundingBox::new(0.0, 0.0, 10.0, 10.0)?);
        let mut backend = ScriptedBackend::new(vec![vec![person.clone()], vec![]]);
        let frame = Frame::blank(16, 16, 1);

        assert_eq!(backend.detect(&frame)?, vec![person.clone()]);
        assert!(backend.detect(&frame)?.is_empty());
        assert_eq!(backend.detect(&frame)?, vec![person]);
        assert_eq!(backend.frames_served(), 3);
        Ok(())
    }

    #[test]
    fn empty_script_detects_nothing() -> Result<()> {
        let mut backend = ScriptedBackend::default();
        assert!(backend.detect(&Frame::blank(1, 1, 1))?.is_empty());
        Ok(())
    }
}
