//! Wire contract between kiln and module generator processes.
//! One JSON request on the plugin's stdin, one JSON response on its stdout.

use kiln_core::{GenericConfig, Patcher, Resource, RuntimeConfigs, Workload, Workspace};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GeneratorRequest {
    /// Correlates plugin-side logs with the invoking generation pass.
    pub request_id: Uuid,
    pub project: String,
    pub stack: String,
    pub app: String,
    /// Module being invoked.
    pub module: String,
    /// The app's workload, so accessories and traits can refer to it.
    pub workload: Workload,
    /// Developer config of the workload or accessory this call generates.
    pub dev_config: Json,
    /// Workspace module config resolved for the project.
    #[serde(default)]
    pub platform_config: GenericConfig,
    #[serde(default)]
    pub context: WorkspaceContext,
    /// Resources produced by earlier generators of this pass.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prior_resources: Vec<Resource>,
}

/// Workspace data passed through to generators untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WorkspaceContext {
    pub workspace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtimes: Option<RuntimeConfigs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backends: Option<GenericConfig>,
}

impl From<&Workspace> for WorkspaceContext {
    fn from(ws: &Workspace) -> Self {
        Self { workspace: ws.name.clone(), runtimes: ws.runtimes.clone(), backends: ws.backends.clone() }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GeneratorResponse {
    /// Serialized resources; decoded by the client so a bad blob is attributed to the module.
    #[serde(default)]
    pub resources: Vec<Json>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patcher: Option<Patcher>,
    /// Set by the plugin when generation failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GeneratorResponse {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self { error: Some(reason.into()), ..Default::default() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_uses_camel_case_wire_names() {
        let req = GeneratorRequest {
            request_id: Uuid::nil(),
            project: "p".into(),
            stack: "dev".into(),
            app: "web".into(),
            module: "mysql".into(),
            workload: Workload::Service(Default::default()),
            dev_config: serde_json::json!({ "_type": "mysql.MySQL" }),
            platform_config: GenericConfig::new(),
            context: WorkspaceContext::default(),
            prior_resources: vec![],
        };
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["devConfig"]["_type"], "mysql.MySQL");
        assert_eq!(v["workload"]["type"], "Service");
        assert!(v.get("priorResources").is_none());
        let back: GeneratorRequest = serde_json::from_value(v).unwrap();
        assert_eq!(back, req);
    }

    #[test]
    fn minimal_response_decodes() {
        let r: GeneratorResponse = serde_json::from_str("{}").unwrap();
        assert!(r.resources.is_empty() && r.patcher.is_none() && r.error.is_none());
    }
}
