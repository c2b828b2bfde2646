//! Spec resources and the patchers generators emit alongside them.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::EnvVar;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value as Json;

use crate::GenericConfig;

/// Env value that deletes a matching container env entry instead of setting it.
pub const REMOVE_ENV_SENTINEL: &str = "ops://kusionstack.io/remove";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ResourceType {
    Kubernetes,
    Terraform,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ResourceType,
    pub attributes: Json,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extensions: GenericConfig,
}

impl Resource {
    pub fn kubernetes(id: impl Into<String>, attributes: Json) -> Self {
        Self { id: id.into(), kind: ResourceType::Kubernetes, attributes, depends_on: Vec::new(), extensions: GenericConfig::new() }
    }

    pub fn is_kubernetes(&self) -> bool {
        self.kind == ResourceType::Kubernetes
    }

    /// `kind` of a Kubernetes resource, read from its attributes.
    pub fn kubernetes_kind(&self) -> Option<&str> {
        if !self.is_kubernetes() {
            return None;
        }
        self.attributes.get("kind").and_then(|v| v.as_str())
    }

    pub fn api_version(&self) -> Option<&str> {
        self.attributes.get("apiVersion").and_then(|v| v.as_str())
    }
}

/// ID of a Kubernetes resource: `apiVersion:Kind:namespace:name`, or `apiVersion:Kind:name` when cluster-scoped.
pub fn kubernetes_id(api_version: &str, kind: &str, namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(ns) if !ns.is_empty() => format!("{}:{}:{}:{}", api_version, kind, ns, name),
        _ => format!("{}:{}:{}", api_version, kind, name),
    }
}

/// The compiled desired state: resources in generation order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Spec {
    pub resources: Vec<Resource>,
}

impl Spec {
    pub fn new(resources: Vec<Resource>) -> Self {
        Self { resources }
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Resource> {
        self.resources.iter().find(|r| r.id == id)
    }
}

/// Workload-aware overrides returned by a generator and applied after all generators ran.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Patcher {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pod_labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pod_annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub environments: Vec<EnvVar>,
    /// Free-form patches keyed by target resource ID.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty", rename = "jsonPatchers")]
    pub json_patchers: BTreeMap<String, JsonPatcher>,
}

impl Patcher {
    /// True when nothing touches the workload itself (JSON patchers aside).
    pub fn is_workload_noop(&self) -> bool {
        self.labels.is_empty()
            && self.annotations.is_empty()
            && self.pod_labels.is_empty()
            && self.pod_annotations.is_empty()
            && self.environments.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JsonPatcher {
    #[serde(rename = "type")]
    pub kind: PatchKind,
    /// Raw patch document. On the wire either a string holding the document or the document inline.
    #[serde(serialize_with = "payload_as_text", deserialize_with = "payload_from_json")]
    pub payload: Vec<u8>,
}

impl JsonPatcher {
    pub fn merge(payload: impl Into<Vec<u8>>) -> Self {
        Self { kind: PatchKind::MergePatch, payload: payload.into() }
    }

    pub fn json_patch(payload: impl Into<Vec<u8>>) -> Self {
        Self { kind: PatchKind::JsonPatch, payload: payload.into() }
    }
}

/// RFC 7396 merge patch or RFC 6902 JSON patch. Unknown names are kept so the
/// patch engine can reject them with a resource-attributed error.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PatchKind {
    MergePatch,
    JsonPatch,
    Other(String),
}

impl From<String> for PatchKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "MergePatch" => PatchKind::MergePatch,
            "JSONPatch" => PatchKind::JsonPatch,
            _ => PatchKind::Other(s),
        }
    }
}

impl From<PatchKind> for String {
    fn from(k: PatchKind) -> Self {
        match k {
            PatchKind::MergePatch => "MergePatch".to_string(),
            PatchKind::JsonPatch => "JSONPatch".to_string(),
            PatchKind::Other(s) => s,
        }
    }
}

fn payload_as_text<S: Serializer>(payload: &[u8], s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&String::from_utf8_lossy(payload))
}

fn payload_from_json<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
    match Json::deserialize(d)? {
        Json::String(s) => Ok(s.into_bytes()),
        other => serde_json::to_vec(&other).map_err(serde::de::Error::custom),
    }
}
