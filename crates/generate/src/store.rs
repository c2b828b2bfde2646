//! Where generated Specs go once a pass succeeds.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use kiln_core::{Error, Result, Spec};
use metrics::histogram;
use tracing::info;

/// Serialization of a Spec on disk or stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecFormat {
    Json,
    Yaml,
}

impl SpecFormat {
    /// `.json` files are JSON, everything else YAML.
    pub fn for_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => SpecFormat::Json,
            _ => SpecFormat::Yaml,
        }
    }

    pub fn render(self, spec: &Spec) -> Result<String> {
        let out = match self {
            SpecFormat::Json => serde_json::to_string_pretty(spec).map_err(|e| e.to_string()),
            SpecFormat::Yaml => serde_yaml::to_string(spec).map_err(|e| e.to_string()),
        };
        out.map_err(|reason| Error::Decode { context: "encoding spec".to_string(), reason })
    }
}

/// Receiver of complete Specs. Only ever called with the result of a successful pass.
pub trait SpecStore {
    fn apply(&self, spec: &Spec) -> Result<()>;
}

/// Writes each Spec to one file, replacing the previous one.
#[derive(Debug, Clone)]
pub struct FileSpecStore {
    path: PathBuf,
    format: SpecFormat,
}

impl FileSpecStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let format = SpecFormat::for_path(&path);
        Self { path, format }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SpecStore for FileSpecStore {
    fn apply(&self, spec: &Spec) -> Result<()> {
        let started = std::time::Instant::now();
        let body = self.format.render(spec)?;
        let io_err = |source| Error::Io { context: format!("writing spec to {}", self.path.display()), source };
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(io_err)?;
        }
        // write-then-rename so readers never see a half-written spec
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, body).map_err(io_err)?;
        std::fs::rename(&tmp, &self.path).map_err(io_err)?;
        histogram!("spec_store_write_ms", started.elapsed().as_secs_f64() * 1000.0);
        info!(path = %self.path.display(), resources = spec.len(), "spec written");
        Ok(())
    }
}

/// Keeps every applied Spec in memory.
#[derive(Debug, Default)]
pub struct MemorySpecStore {
    specs: Mutex<Vec<Spec>>,
}

impl MemorySpecStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn specs(&self) -> Vec<Spec> {
        self.specs.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn last(&self) -> Option<Spec> {
        self.specs.lock().unwrap_or_else(|e| e.into_inner()).last().cloned()
    }
}

impl SpecStore for MemorySpecStore {
    fn apply(&self, spec: &Spec) -> Result<()> {
        self.specs.lock().unwrap_or_else(|e| e.into_inner()).push(spec.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::Resource;
    use serde_json::json;

    fn spec() -> Spec {
        Spec::new(vec![Resource::kubernetes("v1:ConfigMap:ns:a", json!({ "apiVersion": "v1", "kind": "ConfigMap" }))])
    }

    #[test]
    fn file_store_writes_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = FileSpecStore::new(dir.path().join("out/spec.yaml"));
        yaml.apply(&spec()).unwrap();
        let back: Spec = serde_yaml::from_str(&std::fs::read_to_string(yaml.path()).unwrap()).unwrap();
        assert_eq!(back, spec());

        let js = FileSpecStore::new(dir.path().join("spec.json"));
        js.apply(&spec()).unwrap();
        let back: Spec = serde_json::from_str(&std::fs::read_to_string(js.path()).unwrap()).unwrap();
        assert_eq!(back, spec());
        assert!(!dir.path().join("spec.tmp").exists());
    }

    #[test]
    fn memory_store_keeps_order() {
        let store = MemorySpecStore::new();
        assert!(store.last().is_none());
        store.apply(&Spec::default()).unwrap();
        store.apply(&spec()).unwrap();
        assert_eq!(store.specs().len(), 2);
        assert_eq!(store.last().unwrap(), spec());
    }
}
