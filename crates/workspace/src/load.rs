//! Reading workspace, project, app configuration and dependency manifest files.
//! `.json` files are parsed as JSON, everything else as YAML.

use std::path::Path;

use kiln_core::{AppConfiguration, DependencyManifest, Error, Project, Result, Workspace};
use serde::de::DeserializeOwned;
use tracing::debug;

fn max_config_bytes() -> u64 {
    std::env::var("KILN_MAX_CONFIG_BYTES")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(4_000_000)
}

pub fn load_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let context = format!("reading {}", path.display());
    let len = std::fs::metadata(path).map_err(|source| Error::Io { context: context.clone(), source })?.len();
    if len > max_config_bytes() {
        return Err(Error::Decode { context, reason: format!("file too large (>{} bytes)", max_config_bytes()) });
    }
    let text = std::fs::read_to_string(path).map_err(|source| Error::Io { context: context.clone(), source })?;
    debug!(path = %path.display(), bytes = text.len(), "config file read");
    parse_str(&text, is_json(path)).map_err(|reason| Error::Decode { context: format!("parsing {}", path.display()), reason })
}

fn is_json(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()).map(|e| e.eq_ignore_ascii_case("json")).unwrap_or(false)
}

fn parse_str<T: DeserializeOwned>(text: &str, json: bool) -> std::result::Result<T, String> {
    if json {
        serde_json::from_str(text).map_err(|e| e.to_string())
    } else {
        serde_yaml::from_str(text).map_err(|e| e.to_string())
    }
}

pub fn load_workspace(path: &Path) -> Result<Workspace> {
    load_file(path)
}

pub fn load_project(path: &Path) -> Result<Project> {
    load_file(path)
}

pub fn load_app_configuration(path: &Path) -> Result<AppConfiguration> {
    load_file(path)
}

pub fn load_dependency_manifest(path: &Path) -> Result<DependencyManifest> {
    load_file(path)
}
