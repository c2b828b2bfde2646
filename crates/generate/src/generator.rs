//! Compiles one application into a Spec: one generator call per workload/accessory,
//! then deferred patching, then the project namespace override.

use std::ops::Range;
use std::time::Duration;

use futures::StreamExt;
use kiln_core::{
    AppConfiguration, Dependency, DependencyManifest, Error, GenericConfig, ModuleKey, Patcher, Project, Resource, Result, Spec, Stack,
    Workspace,
};
use kiln_patch::{is_workload, json_patch, patch_workload};
use kiln_plugin::{invoke, GeneratorLoader, GeneratorRequest, Invocation, WorkspaceContext};
use kiln_workspace::ValidatedModuleConfigs;
use metrics::counter;
use rustc_hash::FxHashSet;
use serde_json::Value as Json;
use tracing::{debug, info};
use uuid::Uuid;

use crate::namespace::rewrite_namespace;

/// Knobs of a generation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateOptions {
    /// Deadline of each generator call; `None` waits indefinitely.
    pub timeout: Option<Duration>,
    /// Accessory generators run at most this many at a time.
    pub max_concurrency: usize,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self { timeout: Some(Duration::from_secs(60)), max_concurrency: 4 }
    }
}

impl GenerateOptions {
    /// Defaults overridden by `KILN_PLUGIN_TIMEOUT_SECS` (0 disables) and `KILN_MAX_CONCURRENCY`.
    pub fn from_env() -> Self {
        let mut opts = Self::default();
        if let Some(secs) = std::env::var("KILN_PLUGIN_TIMEOUT_SECS").ok().and_then(|s| s.parse::<u64>().ok()) {
            opts.timeout = if secs == 0 { None } else { Some(Duration::from_secs(secs)) };
        }
        if let Some(n) = std::env::var("KILN_MAX_CONCURRENCY").ok().and_then(|s| s.parse::<usize>().ok()) {
            opts.max_concurrency = n.max(1);
        }
        opts
    }
}

/// One planned generator call.
#[derive(Debug, Clone)]
struct Call {
    key: ModuleKey,
    dependency: Dependency,
    dev_config: Json,
    platform_config: GenericConfig,
}

pub struct AppConfigurationGenerator<'a> {
    pub project: &'a Project,
    pub stack: &'a Stack,
    pub app: &'a str,
    pub config: &'a AppConfiguration,
    pub workspace: &'a Workspace,
    pub dependencies: &'a DependencyManifest,
    pub loader: &'a dyn GeneratorLoader,
    pub options: GenerateOptions,
}

impl<'a> AppConfigurationGenerator<'a> {
    /// Generate the app's Spec. Any failure aborts the whole pass; no partial Spec is returned.
    #[tracing::instrument(skip_all, fields(project = %self.project.name, stack = %self.stack.name, app = %self.app))]
    pub async fn generate(&self) -> Result<Spec> {
        let modules = ValidatedModuleConfigs::new(self.workspace.modules.clone())?;
        let request_id = Uuid::new_v4();
        let context = WorkspaceContext::from(self.workspace);

        let workload_call = self.plan_call(&modules, self.config.workload.module_name(), self.workload_dev_config()?)?;
        let mut accessory_calls = Vec::with_capacity(self.config.accessories.len());
        for (name, cfg) in &self.config.accessories {
            let module = AppConfiguration::accessory_module(name, cfg)?;
            let dev_config = Json::Object(cfg.clone().into_iter().collect());
            accessory_calls.push(self.plan_call(&modules, &module, dev_config)?);
        }
        debug!(%request_id, accessories = accessory_calls.len(), "generation planned");

        // workload first: accessories and traits may read what it produced
        let workload = self.run(&workload_call, request_id, &context, &[]).await?;
        let prior = workload.resources.clone();

        // accessories depend only on the workload; results keep plan order whatever finishes first.
        // Every call runs to completion so each loaded generator is closed, even after a sibling failed.
        let results: Vec<Result<Invocation>> = futures::stream::iter(accessory_calls.iter())
            .map(|call| self.run(call, request_id, &context, &prior))
            .buffered(self.options.max_concurrency.max(1))
            .collect()
            .await;
        let accessories = results.into_iter().collect::<Result<Vec<Invocation>>>()?;

        let mut spec = Spec::default();
        let mut patchers = Vec::new();
        let mut seen: FxHashSet<String> = FxHashSet::default();
        let mut owners: Vec<String> = Vec::new();
        let mut workload_range: Range<usize> = 0..0;
        let invocations = std::iter::once((&workload_call, workload)).chain(accessory_calls.iter().zip(accessories));
        for (i, (call, inv)) in invocations.enumerate() {
            let start = spec.resources.len();
            append_resources(&mut spec, &mut seen, &mut owners, &call.key, inv.resources)?;
            if i == 0 {
                workload_range = start..spec.resources.len();
            }
            if let Some(p) = inv.patcher {
                patchers.push(p);
            }
        }

        apply_patchers(&mut spec, workload_range, &patchers)?;

        if let Some(ns) = self.project.kubernetes_namespace() {
            rewrite_namespace(&mut spec, ns, &owners)?;
        }

        counter!("spec_resources_total", spec.len() as u64);
        info!(%request_id, resources = spec.len(), patchers = patchers.len(), "spec generated");
        Ok(spec)
    }

    fn workload_dev_config(&self) -> Result<Json> {
        serde_json::to_value(&self.config.workload).map_err(|e| Error::ModuleGeneration {
            module: self.config.workload.module_name().to_string(),
            reason: format!("encoding workload: {}", e),
        })
    }

    fn plan_call(&self, modules: &ValidatedModuleConfigs, module: &str, dev_config: Json) -> Result<Call> {
        let dependency = self.dependencies.get(module).cloned().ok_or_else(|| Error::ModuleLoad {
            module: module.to_string(),
            reason: "module not found in dependency manifest".to_string(),
        })?;
        let key = ModuleKey::new(module, dependency.version());
        let platform_config = modules.module_config(module, &self.project.name)?;
        Ok(Call { key, dependency, dev_config, platform_config })
    }

    async fn run(&self, call: &Call, request_id: Uuid, context: &WorkspaceContext, prior: &[Resource]) -> Result<Invocation> {
        let req = GeneratorRequest {
            request_id,
            project: self.project.name.clone(),
            stack: self.stack.name.clone(),
            app: self.app.to_string(),
            module: call.key.name.clone(),
            workload: self.config.workload.clone(),
            dev_config: call.dev_config.clone(),
            platform_config: call.platform_config.clone(),
            context: context.clone(),
            prior_resources: prior.to_vec(),
        };
        invoke(self.loader, &call.key, &call.dependency, &req, self.options.timeout).await
    }
}

fn append_resources(spec: &mut Spec, seen: &mut FxHashSet<String>, owners: &mut Vec<String>, key: &ModuleKey, resources: Vec<Resource>) -> Result<()> {
    for r in resources {
        if !seen.insert(r.id.clone()) {
            return Err(Error::DuplicateResource { module: key.name.clone(), id: r.id });
        }
        spec.resources.push(r);
        owners.push(key.name.clone());
    }
    Ok(())
}

/// Second phase: every patcher, in generator order, over the finished resource list.
/// Workload patches only touch pod-owning resources of the workload generator.
pub fn apply_patchers(spec: &mut Spec, workload: Range<usize>, patchers: &[Patcher]) -> Result<()> {
    for p in patchers {
        if !p.is_workload_noop() {
            for r in spec.resources[workload.clone()].iter_mut().filter(|r| is_workload(r)) {
                patch_workload(r, p)?;
            }
        }
        json_patch(&mut spec.resources, p)?;
    }
    Ok(())
}
