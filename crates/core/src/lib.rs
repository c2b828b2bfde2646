//! kiln core types: workspace/module configuration, app configuration, Spec resources and patchers.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

pub mod error;
pub mod resource;

pub use error::{ConfigViolation, Error, Result, SelectorViolation};
pub use resource::{kubernetes_id, JsonPatcher, PatchKind, Patcher, Resource, ResourceType, Spec, REMOVE_ENV_SENTINEL};

/// Untyped key/value payload used for every module and accessory config.
pub type GenericConfig = BTreeMap<String, Json>;

/// Blocks of one module's workspace config, keyed by block name.
/// `default` is reserved; every other block is a patcher block carrying `projectSelector`.
pub type ModuleConfig = BTreeMap<String, GenericConfig>;

/// Workspace module configs keyed by module name.
pub type ModuleConfigs = BTreeMap<String, ModuleConfig>;

pub const DEFAULT_BLOCK: &str = "default";
pub const PROJECT_SELECTOR: &str = "projectSelector";

/// Platform-owned configuration shared by all stacks of a project.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Workspace {
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub modules: ModuleConfigs,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtimes: Option<RuntimeConfigs>,
    /// Backend config (local/oss/s3); opaque here and only passed through.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backends: Option<GenericConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RuntimeConfigs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubernetes: Option<GenericConfig>,
    /// Terraform provider configs keyed by provider name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terraform: Option<BTreeMap<String, GenericConfig>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Project {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extensions: Vec<ProjectExtension>,
}

impl Project {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Default::default() }
    }

    /// Namespace override declared by a `kubernetesNamespace` extension, if any.
    pub fn kubernetes_namespace(&self) -> Option<&str> {
        self.extensions.iter().find_map(|e| match e {
            ProjectExtension::KubernetesNamespace { namespace } if !namespace.is_empty() => Some(namespace.as_str()),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ProjectExtension {
    KubernetesNamespace { namespace: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Stack {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl Stack {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), path: None }
    }
}

/// Developer-facing description of one application.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfiguration {
    pub workload: Workload,
    /// Accessory configs keyed by accessory name. Each carries `_type` = `<module>.<Kind>`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub accessories: BTreeMap<String, GenericConfig>,
}

pub const ACCESSORY_TYPE: &str = "_type";

impl AppConfiguration {
    /// Module name an accessory is generated by, taken from the `_type` prefix.
    pub fn accessory_module(name: &str, config: &GenericConfig) -> Result<String> {
        let ty = match config.get(ACCESSORY_TYPE) {
            Some(Json::String(s)) => s.as_str(),
            Some(_) => return Err(Error::InvalidAccessory { accessory: name.to_string(), reason: format!("{} must be a string", ACCESSORY_TYPE) }),
            None => return Err(Error::InvalidAccessory { accessory: name.to_string(), reason: format!("missing {}", ACCESSORY_TYPE) }),
        };
        match ty.split_once('.') {
            Some((module, kind)) if !module.is_empty() && !kind.is_empty() => Ok(module.to_string()),
            _ => Err(Error::InvalidAccessory { accessory: name.to_string(), reason: format!("{} {:?} is not of the form <module>.<Kind>", ACCESSORY_TYPE, ty) }),
        }
    }
}

/// The workload of an application. Exactly one shape is present.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Workload {
    Service(ServiceSpec),
    Job(JobSpec),
}

impl Workload {
    /// Module key the workload is generated by.
    pub fn module_name(&self) -> &'static str {
        match self {
            Workload::Service(_) => "service",
            Workload::Job(_) => "job",
        }
    }

    pub fn base(&self) -> &WorkloadBase {
        match self {
            Workload::Service(s) => &s.base,
            Workload::Job(j) => &j.base,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadBase {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub containers: BTreeMap<String, Container>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    pub image: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ServiceSpec {
    #[serde(flatten)]
    pub base: WorkloadBase,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<Port>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JobSpec {
    #[serde(flatten)]
    pub base: WorkloadBase,
    /// Cron schedule; a one-shot Job when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Port {
    pub port: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_port: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
}

/// Where a module's generator binary comes from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Dependency {
    Local {
        path: PathBuf,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<String>,
    },
    Oci {
        oci: String,
        tag: String,
    },
}

impl Dependency {
    pub fn version(&self) -> &str {
        match self {
            Dependency::Local { version, .. } => version.as_deref().unwrap_or("local"),
            Dependency::Oci { tag, .. } => tag.as_str(),
        }
    }
}

/// Module name -> dependency, as produced by package management.
pub type DependencyManifest = BTreeMap<String, Dependency>;

/// Identity of one generator: module name plus resolved version.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ModuleKey {
    pub name: String,
    pub version: String,
}

impl ModuleKey {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self { name: name.into(), version: version.into() }
    }
}

impl fmt::Display for ModuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

pub mod prelude {
    pub use super::{
        AppConfiguration, Dependency, DependencyManifest, Error, GenericConfig, JsonPatcher, ModuleConfig, ModuleConfigs, ModuleKey,
        PatchKind, Patcher, Project, Resource, ResourceType, Result, Spec, Stack, Workload, Workspace,
    };
}
