//! Labels, annotations and env overrides on generated workloads.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{EnvVar, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::Metadata;
use kiln_core::{Error, Patcher, Resource, Result, REMOVE_ENV_SENTINEL};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as Json;
use tracing::{debug, warn};

/// Kubernetes kinds that own a pod template.
pub const WORKLOAD_KINDS: &[&str] = &["Deployment", "StatefulSet", "DaemonSet", "Job", "CronJob"];

pub fn is_workload(resource: &Resource) -> bool {
    resource.kubernetes_kind().map(|k| WORKLOAD_KINDS.contains(&k)).unwrap_or(false)
}

/// Merge `patcher`'s labels/annotations into the resource metadata and its
/// pod-level labels/annotations/env into the pod template. Existing keys are
/// overwritten; env entries valued with the remove sentinel delete by name.
pub fn patch_workload(resource: &mut Resource, patcher: &Patcher) -> Result<()> {
    if patcher.is_workload_noop() {
        return Ok(());
    }
    let id = resource.id.clone();
    let patch_err = |reason: String| Error::Patch { resource_id: id.clone(), reason };
    let kind = match resource.kubernetes_kind() {
        Some(k) => k.to_string(),
        None => return Err(patch_err("not a Kubernetes resource".to_string())),
    };
    let attrs = &mut resource.attributes;
    match kind.as_str() {
        "Deployment" => patch_typed::<Deployment>(attrs, patcher, |d| d.spec.as_mut().map(|s| &mut s.template)),
        "StatefulSet" => patch_typed::<StatefulSet>(attrs, patcher, |s| s.spec.as_mut().map(|s| &mut s.template)),
        "DaemonSet" => patch_typed::<DaemonSet>(attrs, patcher, |d| d.spec.as_mut().map(|s| &mut s.template)),
        "Job" => patch_typed::<Job>(attrs, patcher, |j| j.spec.as_mut().map(|s| &mut s.template)),
        "CronJob" => patch_typed::<CronJob>(attrs, patcher, |c| {
            c.spec.as_mut().and_then(|s| s.job_template.spec.as_mut()).map(|s| &mut s.template)
        }),
        other => {
            if !(patcher.pod_labels.is_empty() && patcher.pod_annotations.is_empty() && patcher.environments.is_empty()) {
                warn!(resource = %id, kind = %other, "kind has no pod template; only metadata is patched");
            }
            patch_untyped_metadata(attrs, patcher);
            Ok(())
        }
    }
    .map_err(patch_err)?;
    debug!(resource = %id, kind = %kind, "workload patched");
    Ok(())
}

fn patch_typed<K>(attrs: &mut Json, patcher: &Patcher, template: impl FnOnce(&mut K) -> Option<&mut PodTemplateSpec>) -> std::result::Result<(), String>
where
    K: Metadata<Ty = ObjectMeta> + Serialize + DeserializeOwned,
{
    let mut obj: K = serde_json::from_value(attrs.clone()).map_err(|e| format!("decoding workload: {}", e))?;
    merge_meta(obj.metadata_mut(), &patcher.labels, &patcher.annotations);
    match template(&mut obj) {
        Some(tpl) => patch_pod_template(tpl, patcher),
        None if !(patcher.pod_labels.is_empty() && patcher.pod_annotations.is_empty() && patcher.environments.is_empty()) => {
            return Err("workload has no pod template".to_string())
        }
        None => {}
    }
    *attrs = serde_json::to_value(&obj).map_err(|e| format!("encoding workload: {}", e))?;
    Ok(())
}

fn patch_pod_template(tpl: &mut PodTemplateSpec, patcher: &Patcher) {
    if !(patcher.pod_labels.is_empty() && patcher.pod_annotations.is_empty()) {
        merge_meta(tpl.metadata.get_or_insert_with(Default::default), &patcher.pod_labels, &patcher.pod_annotations);
    }
    if patcher.environments.is_empty() {
        return;
    }
    if let Some(spec) = tpl.spec.as_mut() {
        for c in spec.containers.iter_mut() {
            patch_env(&mut c.env, &patcher.environments);
        }
    }
}

fn merge_meta(meta: &mut ObjectMeta, labels: &BTreeMap<String, String>, annotations: &BTreeMap<String, String>) {
    merge_strings(&mut meta.labels, labels);
    merge_strings(&mut meta.annotations, annotations);
}

fn merge_strings(target: &mut Option<BTreeMap<String, String>>, patch: &BTreeMap<String, String>) {
    if patch.is_empty() {
        return;
    }
    let t = target.get_or_insert_with(BTreeMap::new);
    for (k, v) in patch {
        t.insert(k.clone(), v.clone());
    }
}

/// Upsert env entries by name; a sentinel value removes the entry instead.
pub fn patch_env(env: &mut Option<Vec<EnvVar>>, patches: &[EnvVar]) {
    let list = env.get_or_insert_with(Vec::new);
    for p in patches {
        let pos = list.iter().position(|e| e.name == p.name);
        if p.value.as_deref() == Some(REMOVE_ENV_SENTINEL) {
            if let Some(i) = pos {
                list.remove(i);
            }
            continue;
        }
        match pos {
            Some(i) => list[i] = p.clone(),
            None => list.push(p.clone()),
        }
    }
    if list.is_empty() {
        *env = None;
    }
}

/// Metadata-only merge for kinds without a typed model.
fn patch_untyped_metadata(attrs: &mut Json, patcher: &Patcher) {
    let Some(meta) = crate::metadata_mut(attrs) else { return };
    for (field, patch) in [("labels", &patcher.labels), ("annotations", &patcher.annotations)] {
        if patch.is_empty() {
            continue;
        }
        let entry = meta.entry(field).or_insert_with(|| Json::Object(Default::default()));
        if !entry.is_object() {
            *entry = Json::Object(Default::default());
        }
        if let Some(obj) = entry.as_object_mut() {
            for (k, v) in patch {
                obj.insert(k.clone(), Json::String(v.clone()));
            }
        }
    }
}
