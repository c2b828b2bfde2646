//! kiln plugin: loading, invoking and tearing down out-of-process module generators.

#![forbid(unsafe_code)]

use std::time::{Duration, Instant};

use kiln_core::{Dependency, Error, ModuleKey, Patcher, Resource, Result};
use metrics::{counter, histogram};
use tracing::{debug, info, warn};

pub mod exec;
pub mod protocol;
pub mod serve;

pub use exec::{ExecGenerator, ExecLoader};
pub use protocol::{GeneratorRequest, GeneratorResponse, WorkspaceContext};
pub use serve::serve;

/// A loaded generator. Used for exactly one `generate` and then closed.
#[async_trait::async_trait]
pub trait ModuleGenerator: Send {
    async fn generate(&mut self, req: &GeneratorRequest) -> Result<GeneratorResponse>;

    /// Release the generator. `invoke` always calls it, also after a failed or timed-out `generate`.
    async fn close(self: Box<Self>) -> Result<()>;
}

/// Factory of generators keyed by module name and version.
#[async_trait::async_trait]
pub trait GeneratorLoader: Send + Sync {
    async fn load(&self, key: &ModuleKey, dependency: &Dependency) -> Result<Box<dyn ModuleGenerator>>;
}

/// Decoded output of one module call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Invocation {
    pub resources: Vec<Resource>,
    pub patcher: Option<Patcher>,
}

/// Load, generate, close. Close runs on every exit path; `deadline` bounds `generate` only.
///
/// Error precedence: load, then generate (including timeout and undecodable
/// output), then teardown. A teardown failure after a good response still fails the call.
pub async fn invoke(
    loader: &dyn GeneratorLoader,
    key: &ModuleKey,
    dependency: &Dependency,
    req: &GeneratorRequest,
    deadline: Option<Duration>,
) -> Result<Invocation> {
    let t0 = Instant::now();
    counter!("generator_invocations_total", 1u64);
    let mut handle = match loader.load(key, dependency).await {
        Ok(h) => h,
        Err(e) => {
            counter!("generator_errors_total", 1u64);
            return Err(e);
        }
    };
    debug!(module = %key, request_id = %req.request_id, "generator loaded");

    let generated = match deadline {
        Some(d) => match tokio::time::timeout(d, handle.generate(req)).await {
            Ok(r) => r,
            Err(_) => {
                counter!("generator_timeouts_total", 1u64);
                Err(Error::ModuleTimeout { module: key.name.clone(), after: d })
            }
        },
        None => handle.generate(req).await,
    };
    let decoded = generated.and_then(|resp| decode(key, resp));
    let closed = handle.close().await;
    histogram!("generator_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);

    match (decoded, closed) {
        (Ok(inv), Ok(())) => {
            info!(module = %key.name, version = %key.version, resources = inv.resources.len(), patcher = inv.patcher.is_some(), "module generated");
            Ok(inv)
        }
        (Err(e), closed) => {
            if let Err(ce) = closed {
                warn!(module = %key, error = %ce, "teardown failed after generate error");
            }
            counter!("generator_errors_total", 1u64);
            Err(e)
        }
        (Ok(_), Err(ce)) => {
            counter!("generator_errors_total", 1u64);
            Err(match ce {
                e @ Error::PluginTeardown { .. } => e,
                other => Error::PluginTeardown { module: key.name.clone(), reason: other.to_string() },
            })
        }
    }
}

fn decode(key: &ModuleKey, resp: GeneratorResponse) -> Result<Invocation> {
    if let Some(reason) = resp.error {
        return Err(Error::ModuleGeneration { module: key.name.clone(), reason });
    }
    let resources = resp
        .resources
        .into_iter()
        .enumerate()
        .map(|(i, raw)| {
            serde_json::from_value::<Resource>(raw)
                .map_err(|e| Error::ModuleGeneration { module: key.name.clone(), reason: format!("resource #{} is not a valid resource: {}", i, e) })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Invocation { resources, patcher: resp.patcher })
}
