//! Project-level namespace override of a generated Spec.

use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value as Json;
use tracing::debug;

use kiln_core::{kubernetes_id, Error, Resource, Result, Spec};

/// Pod template metadata locations that carry their own namespace.
const TEMPLATE_METADATA: &[&[&str]] = &[&["spec", "template", "metadata"], &["spec", "jobTemplate", "metadata"], &["spec", "jobTemplate", "spec", "template", "metadata"]];

/// Built-in kinds that live outside any namespace.
pub const CLUSTER_SCOPED_KINDS: &[&str] = &[
    "Namespace",
    "Node",
    "PersistentVolume",
    "StorageClass",
    "ClusterRole",
    "ClusterRoleBinding",
    "CustomResourceDefinition",
    "PriorityClass",
    "IngressClass",
    "RuntimeClass",
    "CSIDriver",
    "VolumeSnapshotClass",
    "APIService",
    "MutatingWebhookConfiguration",
    "ValidatingWebhookConfiguration",
];

pub fn is_cluster_scoped(kind: &str) -> bool {
    CLUSTER_SCOPED_KINDS.contains(&kind)
}

/// Move every namespaced Kubernetes resource into `namespace`.
///
/// Kinds outside [`CLUSTER_SCOPED_KINDS`] get the new namespace whether or not
/// the generator set one, Namespace resources are renamed to it. Conventional
/// IDs are recomputed and `dependsOn` follows the rename. Namespace resources
/// that collapse onto the same ID are merged; any other collision is a
/// `DuplicateResource` error attributed through `owners` (module per resource,
/// parallel to `spec.resources`). The Spec must be discarded on error.
pub fn rewrite_namespace(spec: &mut Spec, namespace: &str, owners: &[String]) -> Result<()> {
    let mut renamed: FxHashMap<String, String> = FxHashMap::default();
    for r in spec.resources.iter_mut().filter(|r| r.is_kubernetes()) {
        if let Some(new_id) = rewrite_resource(r, namespace) {
            if new_id != r.id {
                renamed.insert(std::mem::replace(&mut r.id, new_id.clone()), new_id);
            }
        }
    }
    if renamed.is_empty() {
        return Ok(());
    }
    debug!(namespace, renamed = renamed.len(), "namespace override applied");

    let mut index: FxHashMap<String, usize> = FxHashMap::default();
    let mut out: Vec<Resource> = Vec::with_capacity(spec.resources.len());
    for (i, mut r) in std::mem::take(&mut spec.resources).into_iter().enumerate() {
        remap_dependencies(&mut r, &renamed);
        match index.get(&r.id) {
            Some(&k) if is_namespace(&out[k]) && is_namespace(&r) => {
                let kept = &mut out[k];
                for d in r.depends_on {
                    if d != kept.id && !kept.depends_on.contains(&d) {
                        kept.depends_on.push(d);
                    }
                }
            }
            Some(_) => {
                let module = owners.get(i).cloned().unwrap_or_default();
                return Err(Error::DuplicateResource { module, id: r.id });
            }
            None => {
                index.insert(r.id.clone(), out.len());
                out.push(r);
            }
        }
    }
    spec.resources = out;
    Ok(())
}

fn is_namespace(r: &Resource) -> bool {
    r.kubernetes_kind() == Some("Namespace")
}

/// Rewrites one resource in place. Returns its ID after the rewrite when the ID is
/// conventional (derived from apiVersion, kind, namespace and name).
fn rewrite_resource(r: &mut Resource, namespace: &str) -> Option<String> {
    let api_version = r.api_version()?.to_string();
    let kind = r.kubernetes_kind()?.to_string();
    let meta = r.attributes.get_mut("metadata")?.as_object_mut()?;
    let name = meta.get("name")?.as_str()?.to_string();

    if kind == "Namespace" {
        let conventional = r.id == kubernetes_id(&api_version, &kind, None, &name);
        meta.insert("name".into(), Json::String(namespace.to_string()));
        return conventional.then(|| kubernetes_id(&api_version, &kind, None, namespace));
    }
    if is_cluster_scoped(&kind) {
        return None;
    }

    let old_ns = meta.get("namespace").and_then(Json::as_str).map(str::to_string);
    let conventional = r.id == kubernetes_id(&api_version, &kind, old_ns.as_deref(), &name);
    meta.insert("namespace".into(), Json::String(namespace.to_string()));
    for path in TEMPLATE_METADATA {
        if let Some(tpl) = lookup_mut(&mut r.attributes, path).and_then(Json::as_object_mut) {
            if tpl.contains_key("namespace") {
                tpl.insert("namespace".into(), Json::String(namespace.to_string()));
            }
        }
    }
    conventional.then(|| kubernetes_id(&api_version, &kind, Some(namespace), &name))
}

fn lookup_mut<'a>(doc: &'a mut Json, path: &[&str]) -> Option<&'a mut Json> {
    path.iter().try_fold(doc, |cur, key| cur.get_mut(*key))
}

fn remap_dependencies(r: &mut Resource, renamed: &FxHashMap<String, String>) {
    let mut seen: FxHashSet<String> = FxHashSet::default();
    let deps = std::mem::take(&mut r.depends_on);
    for d in deps {
        let d = renamed.get(&d).cloned().unwrap_or(d);
        if d != r.id && seen.insert(d.clone()) {
            r.depends_on.push(d);
        }
    }
}
