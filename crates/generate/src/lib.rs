//! kiln generate: turns an application configuration into a patched, namespace-scoped Spec.

#![forbid(unsafe_code)]

pub mod generator;
pub mod namespace;
pub mod store;

pub use generator::{apply_patchers, AppConfigurationGenerator, GenerateOptions};
pub use namespace::{is_cluster_scoped, rewrite_namespace, CLUSTER_SCOPED_KINDS};
pub use store::{FileSpecStore, MemorySpecStore, SpecFormat, SpecStore};

use kiln_core::Result;

/// Generate with `generator` and hand the Spec to `store`. The store sees nothing when generation fails.
pub async fn generate_into(generator: &AppConfigurationGenerator<'_>, store: &dyn SpecStore) -> Result<kiln_core::Spec> {
    let spec = generator.generate().await?;
    store.apply(&spec)?;
    Ok(spec)
}
