use std::path::PathBuf;
use std::time::Duration;

use kiln_core::{Dependency, Error, GenericConfig, ModuleKey, Workload};
use kiln_plugin::{invoke, ExecLoader, GeneratorRequest, WorkspaceContext};
use serde_json::json;

fn module_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_kiln-module-configmap"))
}

fn dep() -> Dependency {
    Dependency::Local { path: module_bin(), version: Some("0.0.0".into()) }
}

fn key() -> ModuleKey {
    ModuleKey::new("configmap", "0.0.0")
}

fn req(platform: serde_json::Value) -> GeneratorRequest {
    let platform_config: GenericConfig = serde_json::from_value(platform).unwrap();
    GeneratorRequest {
        request_id: uuid::Uuid::new_v4(),
        project: "foo".into(),
        stack: "dev".into(),
        app: "web".into(),
        module: "configmap".into(),
        workload: Workload::Service(Default::default()),
        dev_config: json!({ "_type": "configmap.ConfigMap", "data": { "LOG_LEVEL": "debug", "PORT": 8080 } }),
        platform_config,
        context: WorkspaceContext { workspace: "dev".into(), ..Default::default() },
        prior_resources: vec![],
    }
}

#[tokio::test]
async fn generates_through_a_real_process() {
    let loader = ExecLoader::new("/unused");
    let inv = invoke(&loader, &key(), &dep(), &req(json!({ "namespace": "team-a" })), Some(Duration::from_secs(30)))
        .await
        .unwrap();
    assert_eq!(inv.resources.len(), 1);
    let cm = &inv.resources[0];
    assert_eq!(cm.id, "v1:ConfigMap:team-a:web-configmap");
    assert_eq!(cm.attributes["data"]["PORT"], "8080");
    assert!(inv.patcher.is_none());
}

#[tokio::test]
async fn patcher_is_passed_back() {
    let loader = ExecLoader::new("/unused");
    let platform = json!({ "patcher": { "labels": { "team": "a" }, "environments": [ { "name": "X", "value": "1" } ] } });
    let inv = invoke(&loader, &key(), &dep(), &req(platform), None).await.unwrap();
    let p = inv.patcher.unwrap();
    assert_eq!(p.labels["team"], "a");
    assert_eq!(p.environments[0].name, "X");
}

#[tokio::test]
async fn plugin_error_is_a_generation_error() {
    let loader = ExecLoader::new("/unused");
    let e = invoke(&loader, &key(), &dep(), &req(json!({ "failWith": "no capacity" })), None).await.unwrap_err();
    match e {
        Error::ModuleGeneration { module, reason } => {
            assert_eq!(module, "configmap");
            assert_eq!(reason, "no capacity");
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn slow_plugin_times_out() {
    let loader = ExecLoader::new("/unused");
    let e = invoke(&loader, &key(), &dep(), &req(json!({ "sleepMillis": 10_000 })), Some(Duration::from_millis(200)))
        .await
        .unwrap_err();
    assert!(matches!(e, Error::ModuleTimeout { ref module, .. } if module == "configmap"), "e={:?}", e);
}

#[tokio::test]
async fn failing_exit_after_response_is_a_teardown_error() {
    let loader = ExecLoader::new("/unused");
    let e = invoke(&loader, &key(), &dep(), &req(json!({ "exitCode": 3 })), None).await.unwrap_err();
    assert!(matches!(e, Error::PluginTeardown { ref module, .. } if module == "configmap"), "e={:?}", e);
}

#[tokio::test]
async fn missing_binary_is_a_load_error() {
    let loader = ExecLoader::new("/unused");
    let dep = Dependency::Local { path: "/definitely/not/here/kiln-module-x".into(), version: None };
    let e = invoke(&loader, &ModuleKey::new("x", "local"), &dep, &req(json!({})), None).await.unwrap_err();
    assert!(matches!(e, Error::ModuleLoad { ref module, .. } if module == "x"));
}
