//! Reference module: renders the invoking config into a ConfigMap.
//!
//! Recognised keys (platform or dev config): `namespace`, `data` (map of strings),
//! `patcher` (returned as-is), `dependsOnPrior`, and the test hooks
//! `failWith`, `sleepMillis`, `exitCode`.

use std::process::ExitCode;

use kiln_core::{kubernetes_id, GenericConfig, Patcher, Resource};
use kiln_plugin::{serve, GeneratorRequest, GeneratorResponse};
use serde_json::{json, Value as Json};

fn lookup<'a>(req: &'a GeneratorRequest, key: &str) -> Option<&'a Json> {
    req.dev_config.get(key).or_else(|| req.platform_config.get(key))
}

fn generate(req: GeneratorRequest) -> Result<GeneratorResponse, String> {
    if let Some(ms) = lookup(&req, "sleepMillis").and_then(|v| v.as_u64()) {
        std::thread::sleep(std::time::Duration::from_millis(ms));
    }
    if let Some(reason) = lookup(&req, "failWith").and_then(|v| v.as_str()) {
        return Err(reason.to_string());
    }

    let namespace = lookup(&req, "namespace").and_then(|v| v.as_str()).unwrap_or(req.project.as_str()).to_string();
    let name = format!("{}-{}", req.app, req.module);
    let mut data = GenericConfig::new();
    if let Some(Json::Object(m)) = lookup(&req, "data") {
        for (k, v) in m {
            let s = match v { Json::String(s) => s.clone(), other => other.to_string() };
            data.insert(k.clone(), Json::String(s));
        }
    }
    let mut resource = Resource::kubernetes(
        kubernetes_id("v1", "ConfigMap", Some(&namespace), &name),
        json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": { "name": name, "namespace": namespace },
            "data": data,
        }),
    );
    if lookup(&req, "dependsOnPrior").and_then(|v| v.as_bool()).unwrap_or(false) {
        resource.depends_on = req.prior_resources.iter().map(|r| r.id.clone()).collect();
    }
    let patcher = match lookup(&req, "patcher") {
        Some(p) => Some(serde_json::from_value::<Patcher>(p.clone()).map_err(|e| format!("invalid patcher: {}", e))?),
        None => None,
    };
    let resource = serde_json::to_value(&resource).map_err(|e| e.to_string())?;
    Ok(GeneratorResponse { resources: vec![resource], patcher, error: None })
}

fn main() -> ExitCode {
    let mut exit_code = None;
    let code = serve(|req| {
        exit_code = lookup(&req, "exitCode").and_then(|v| v.as_u64()).map(|c| c as u8);
        generate(req)
    });
    match exit_code {
        Some(c) => ExitCode::from(c),
        None => code,
    }
}
