//! kiln patch engine: applies generator-emitted patchers to resources of a generated Spec.

#![forbid(unsafe_code)]

use kiln_core::{Error, JsonPatcher, PatchKind, Patcher, Resource, Result};
use metrics::counter;
use serde_json::{Map, Value as Json};
use tracing::{debug, warn};

pub mod workload;

pub use workload::{is_workload, patch_env, patch_workload, WORKLOAD_KINDS};

/// Apply every `(resource id, patch)` entry of `patcher` to the matching resource's attributes.
/// Entries whose id matches no resource are skipped.
pub fn json_patch(resources: &mut [Resource], patcher: &Patcher) -> Result<()> {
    for (id, jp) in &patcher.json_patchers {
        let Some(resource) = resources.iter_mut().find(|r| &r.id == id) else {
            warn!(resource = %id, "json patch target not in spec; skipping");
            continue;
        };
        apply_json_patcher(&mut resource.attributes, jp).map_err(|reason| Error::Patch { resource_id: id.clone(), reason })?;
        counter!("patch_applied_total", 1u64);
        debug!(resource = %id, kind = ?jp.kind, "json patch applied");
    }
    Ok(())
}

/// RFC 7396 merge patch or RFC 6902 patch of one document. A failed RFC 6902 patch leaves `doc` untouched.
pub fn apply_json_patcher(doc: &mut Json, jp: &JsonPatcher) -> std::result::Result<(), String> {
    match &jp.kind {
        PatchKind::MergePatch => {
            let patch: Json = serde_json::from_slice(&jp.payload).map_err(|e| format!("invalid merge patch: {}", e))?;
            json_patch::merge(doc, &patch);
            Ok(())
        }
        PatchKind::JsonPatch => {
            let patch: json_patch::Patch = serde_json::from_slice(&jp.payload).map_err(|e| format!("invalid JSON patch: {}", e))?;
            json_patch::patch(doc, &patch.0).map_err(|e| format!("applying JSON patch: {}", e))
        }
        PatchKind::Other(kind) => Err(format!("unsupported patch type {:?}", kind)),
    }
}

/// `metadata` object of a Kubernetes document, created when absent. None if `doc` is not an object.
pub fn metadata_mut(doc: &mut Json) -> Option<&mut Map<String, Json>> {
    let meta = doc.as_object_mut()?.entry("metadata").or_insert_with(|| Json::Object(Map::new()));
    if !meta.is_object() {
        *meta = Json::Object(Map::new());
    }
    meta.as_object_mut()
}
