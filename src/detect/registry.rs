use std::collections::HashMap;
use std::path::Path;

use anyhow::{anyhow, Result};

use super::backend::FaceDetector;
use super::backends::StubBackend;

/// Name that selects the default backend.
pub const AUTO_BACKEND: &str = "auto";

/// Name of the scripted/synthetic backend.
pub const STUB_BACKEND: &str = "stub";

/// Registry of face detector backends, keyed by backend name.
///
/// A run uses exactly one backend, so selecting a backend moves it out of the
/// registry.
pub struct BackendRegistry {
    backends: HashMap<String, Box<dyn FaceDetector>>,
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
    pub fn register<B: FaceDetector + 'static>(&mut self, backend: B) {
        let name = backend.name().to_string();
        if self.default_name.is_none() {
            self.default_name = Some(name.clone());
        }
        self.backends.insert(name, Box::new(backend));
    }

    /// Set default backend by name.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.backends.contains_key(name) {
            return Err(anyhow!("backend '{}' not registered", name));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.backends.contains_key(name)
    }

    pub fn default_name(&self) -> Option<&str> {
        self.default_name.as_deref()
    }

    /// List registered backends, sorted by name.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.backends.keys().cloned().collect();
        names.sort();
        names
    }

    /// Take the backend named `name`, or the default for [`AUTO_BACKEND`].
    pub fn select(&mut self, name: &str) -> Result<Box<dyn FaceDetector>> {
        let resolved = if name == AUTO_BACKEND {
            self.default_name
                .clone()
                .ok_or_else(|| anyhow!("no detector backend registered"))?
        } else {
            name.to_string()
        };

        self.backends.remove(&resolved).ok_or_else(|| {
            anyhow!(
                "backend '{}' not registered (available: {})",
                resolved,
                self.list().join(", ")
            )
        })
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Backends usable for one input.
///
/// With a model path the tract backend is registered first and becomes the
/// default. A model path in a build without the `backend-tract` feature is an
/// error rather than a silent fallback. The stub backend never looks at
/// pixels, so it is only registered when `with_stub` is set (synthetic
/// streams or an explicit `stub` selection).
pub fn available_backends(
    model_path: Option<&Path>,
    inference_size: Option<(u32, u32)>,
    with_stub: bool,
) -> Result<BackendRegistry> {
    let mut registry = BackendRegistry::new();

    #[cfg(feature = "backend-tract")]
    if let Some(path) = model_path {
        let mut tract = super::backends::TractBackend::new(path)?;
        if let Some((width, height)) = inference_size {
            tract = tract.with_inference_size(width, height);
        }
        registry.register(tract);
    }
    #[cfg(not(feature = "backend-tract"))]
    if let Some(path) = model_path {
        let _ = inference_size;
        return Err(anyhow!(
            "cannot load model {}: built without the backend-tract feature",
            path.display()
        ));
    }

    if with_stub {
        registry.register(StubBackend::default());
    }
    Ok(registry)
}
