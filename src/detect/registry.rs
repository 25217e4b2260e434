use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

use crate::detect::result::Detection;
use crate::frame::Frame;

use super::backend::DetectorBackend;

/// A detector shared between stream sessions.
///
/// `DetectorBackend::detect` takes `&mut self`, so concurrent sessions take
/// turns on the lock.
pub type SharedDetector = Arc<Mutex<dyn DetectorBackend>>;

/// Thread-safe registry of detector backends.
pub struct BackendRegistry {
    backends: HashMap<String, SharedDetector>,
    default_name: Option<String>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            backends: HashMap::new(),
            default_name: None,
        }
    }

    /// Register a backend. The first registered backend becomes the default.
    pub fn register<B: DetectorBackend + 'static>(&mut self, backend: B) {
        let name = backend.name().to_string();
        if self.default_name.is_none() {
            self.default_name = Some(name.clone());
        }
        self.backends.insert(name, Arc::new(Mutex::new(backend)));
    }

    /// Set default backend by name.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.backends.contains_key(name) {
            return Err(anyhow!("backend '{}' not registered", name));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    /// Get backend by name.
    pub fn get(&self, name: &str) -> Option<SharedDetector> {
        self.backends.get(name).cloned()
    }

    /// Get default backend.
    pub fn default_backend(&self) -> Option<SharedDetector> {
        self.default_name.as_ref().and_then(|name| self.get(name))
    }

    /// List registered backends, sorted by name.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.backends.keys().cloned().collect();
        names.sort();
        names
    }

    /// Warm up every registered backend.
    pub fn warm_up_all(&self) -> Result<()> {
        for (name, backend) in &self.backends {
            let mut guard = backend
                .lock()
                .map_err(|_| anyhow!("backend '{}' lock poisoned", name))?;
            guard.warm_up()?;
        }
        Ok(())
    }

    /// Run detection on the default backend.
    pub fn detect(&self, frame: &Frame) -> Result<Vec<Detection>> {
        let backend = self
            .default_backend()
            .ok_or_else(|| anyhow!("no detector backend registered"))?;
        let mut guard = backend
            .lock()
            .map_err(|_| anyhow!("backend lock poisoned"))?;
        guard.detect(frame)
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::ScriptedBackend;
    use crate::geometry::BoundingBox;

    struct FixedBackend;

    impl DetectorBackend for FixedBackend {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
            Ok(vec![Detection::new(
                "person",
                BoundingBox::new(0.0, 0.0, 1.0, 1.0)?,
            )])
        }
    }

    #[test]
    fn first_registered_backend_is_default() -> Result<()> {
        let mut registry = BackendRegistry::new();
        registry.register(ScriptedBackend::default());
        registry.register(FixedBackend);
        assert_eq!(registry.list(), vec!["fixed", "scripted"]);

        let frame = Frame::blank(4, 4, 1);
        assert!(registry.detect(&frame)?.is_empty());

        registry.set_default("fixed")?;
        assert_eq!(registry.detect(&frame)?.len(), 1);
        Ok(())
    }

    #[test]
    fn unknown_default_is_rejected() {
        let mut registry = BackendRegistry::new();
        assert!(registry.detect(&Frame::blank(1, 1, 1)).is_err());
        assert!(registry.set_default("tract").is_err());
        assert!(registry.get("tract").is_none());
    }
}
