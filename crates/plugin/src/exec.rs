//! Generators run as child processes: request on stdin, response on stdout.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use kiln_core::{Dependency, Error, ModuleKey, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::{GeneratorLoader, GeneratorRequest, GeneratorResponse, ModuleGenerator};

/// File name of a module's generator binary.
pub fn binary_name(module: &str) -> String {
    format!("kiln-module-{}", module)
}

fn teardown_grace() -> Duration {
    let ms = std::env::var("KILN_PLUGIN_TEARDOWN_MS").ok().and_then(|s| s.parse::<u64>().ok()).unwrap_or(5_000);
    Duration::from_millis(ms)
}

/// Resolves module binaries from the dependency manifest and spawns them.
#[derive(Debug, Clone)]
pub struct ExecLoader {
    modules_dir: PathBuf,
}

impl ExecLoader {
    /// `modules_dir` holds pulled OCI modules as `<name>/<tag>/kiln-module-<name>`.
    pub fn new(modules_dir: impl Into<PathBuf>) -> Self {
        Self { modules_dir: modules_dir.into() }
    }

    /// `$KILN_HOME/modules`, defaulting `KILN_HOME` to `$HOME/.kiln`.
    pub fn from_env() -> Self {
        Self::new(default_home().join("modules"))
    }

    pub fn modules_dir(&self) -> &Path {
        &self.modules_dir
    }

    /// Path of the executable for `key`. Fails with `ModuleLoad` when it is not there.
    pub fn binary_path(&self, key: &ModuleKey, dependency: &Dependency) -> Result<PathBuf> {
        let path = match dependency {
            Dependency::Local { path, .. } if path.is_dir() => path.join(binary_name(&key.name)),
            Dependency::Local { path, .. } => path.clone(),
            Dependency::Oci { tag, .. } => self.modules_dir.join(&key.name).join(tag).join(binary_name(&key.name)),
        };
        if !path.is_file() {
            let hint = match dependency {
                Dependency::Oci { oci, .. } => format!(" (pull {} first)", oci),
                Dependency::Local { .. } => String::new(),
            };
            return Err(Error::ModuleLoad { module: key.name.clone(), reason: format!("generator binary not found at {}{}", path.display(), hint) });
        }
        Ok(path)
    }
}

fn default_home() -> PathBuf {
    if let Some(home) = std::env::var_os("KILN_HOME") {
        return PathBuf::from(home);
    }
    if let Some(home) = std::env::var_os("HOME") {
        let mut p = PathBuf::from(home);
        p.push(".kiln");
        return p;
    }
    PathBuf::from(".kiln")
}

#[async_trait::async_trait]
impl GeneratorLoader for ExecLoader {
    async fn load(&self, key: &ModuleKey, dependency: &Dependency) -> Result<Box<dyn ModuleGenerator>> {
        let path = self.binary_path(key, dependency)?;
        let child = Command::new(&path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env("KILN_MODULE_NAME", &key.name)
            .env("KILN_MODULE_VERSION", &key.version)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::ModuleLoad { module: key.name.clone(), reason: format!("failed to spawn {}: {}", path.display(), e) })?;
        debug!(module = %key, pid = ?child.id(), path = %path.display(), "generator process spawned");
        Ok(Box::new(ExecGenerator { module: key.name.clone(), child, responded: false, stderr: String::new() }))
    }
}

/// One running generator process.
pub struct ExecGenerator {
    module: String,
    child: Child,
    responded: bool,
    stderr: String,
}

impl ExecGenerator {
    fn stderr_suffix(&self) -> String {
        if self.stderr.is_empty() { String::new() } else { format!("; stderr: {}", self.stderr) }
    }
}

#[async_trait::async_trait]
impl ModuleGenerator for ExecGenerator {
    async fn generate(&mut self, req: &GeneratorRequest) -> Result<GeneratorResponse> {
        let module = self.module.clone();
        let gen_err = |reason: String| Error::ModuleGeneration { module: module.clone(), reason };
        let body = serde_json::to_vec(req).map_err(|e| gen_err(format!("encoding request: {}", e)))?;
        let (mut stdin, mut stdout, mut stderr) = match (self.child.stdin.take(), self.child.stdout.take(), self.child.stderr.take()) {
            (Some(i), Some(o), Some(e)) => (i, o, e),
            _ => return Err(gen_err("generator pipes already consumed".to_string())),
        };

        let write = async move {
            let res = stdin.write_all(&body).await;
            drop(stdin);
            res
        };
        let mut out = Vec::new();
        let mut err = Vec::new();
        let (written, read, _) = tokio::join!(write, stdout.read_to_end(&mut out), stderr.read_to_end(&mut err));
        self.stderr = String::from_utf8_lossy(&err).trim().to_string();
        if let Err(e) = written {
            // the plugin may answer without reading its input
            debug!(module = %self.module, error = %e, "writing request to generator failed");
        }
        read.map_err(|e| gen_err(format!("reading generator output: {}", e)))?;
        self.responded = true;

        serde_json::from_slice::<GeneratorResponse>(&out).map_err(|e| gen_err(format!("invalid generator response: {}{}", e, self.stderr_suffix())))
    }

    async fn close(mut self: Box<Self>) -> Result<()> {
        if !self.responded {
            // abandoned mid-call (timeout, cancelled pass): the process is not waited on gracefully
            if let Err(e) = self.child.kill().await {
                warn!(module = %self.module, error = %e, "failed to kill generator process");
            }
            return Ok(());
        }
        let grace = teardown_grace();
        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) if status.success() => Ok(()),
            Ok(Ok(status)) => Err(Error::PluginTeardown { module: self.module.clone(), reason: format!("generator exited with {}{}", status, self.stderr_suffix()) }),
            Ok(Err(e)) => Err(Error::PluginTeardown { module: self.module.clone(), reason: format!("waiting for generator: {}", e) }),
            Err(_) => {
                let _ = self.child.kill().await;
                Err(Error::PluginTeardown { module: self.module.clone(), reason: format!("generator did not exit within {:?} of responding", grace) })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oci_modules_resolve_under_modules_dir() {
        let loader = ExecLoader::new("/var/lib/kiln/modules");
        let dep = Dependency::Oci { oci: "oci://ghcr.io/kiln/mysql".into(), tag: "0.1.0".into() };
        let e = loader.binary_path(&ModuleKey::new("mysql", "0.1.0"), &dep).unwrap_err();
        let msg = e.to_string();
        assert!(msg.contains("/var/lib/kiln/modules/mysql/0.1.0/kiln-module-mysql"), "msg={}", msg);
        assert!(msg.contains("pull oci://ghcr.io/kiln/mysql first"), "msg={}", msg);
        assert!(matches!(e, Error::ModuleLoad { ref module, .. } if module == "mysql"));
    }

    #[test]
    fn local_dir_resolves_conventional_binary_name() {
        let dir = std::env::temp_dir();
        let dep = Dependency::Local { path: dir.clone(), version: None };
        let e = ExecLoader::new("/unused").binary_path(&ModuleKey::new("redis", "local"), &dep).unwrap_err();
        assert!(e.to_string().contains("kiln-module-redis"), "e={}", e);
    }
}
