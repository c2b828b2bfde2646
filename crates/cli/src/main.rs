use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use kiln_core::{Project, Spec, Stack};
use kiln_generate::{generate_into, AppConfigurationGenerator, FileSpecStore, GenerateOptions, SpecFormat};
use kiln_plugin::ExecLoader;
use kiln_workspace::{load_app_configuration, load_dependency_manifest, load_project, load_workspace, validate, ValidatedModuleConfigs};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "kilnctl", version, about = "Compile app configurations into desired-state Specs")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Yaml)]
    output: Output,

    /// Workspace file (YAML or JSON)
    #[arg(short = 'w', long = "workspace", global = true, default_value = "workspace.yaml")]
    workspace: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output {
    Yaml,
    Json,
}

impl From<Output> for SpecFormat {
    fn from(o: Output) -> Self {
        match o {
            Output::Yaml => SpecFormat::Yaml,
            Output::Json => SpecFormat::Json,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check the workspace module configs
    Validate,
    /// Print the module configs a project resolves to
    Resolve {
        /// Project name
        project: String,
    },
    /// Generate the Spec of one application
    Generate {
        /// Project file
        #[arg(long = "project")]
        project: PathBuf,
        /// Stack name
        #[arg(long = "stack")]
        stack: String,
        /// Application name
        #[arg(long = "app")]
        app: String,
        /// AppConfiguration file
        #[arg(long = "app-config")]
        app_config: PathBuf,
        /// Module dependency manifest
        #[arg(long = "manifest", default_value = "kcl.mod.yaml")]
        manifest: PathBuf,
        /// Write the Spec here instead of stdout; format follows the extension
        #[arg(long = "out")]
        out: Option<PathBuf>,
        /// Directory of pulled modules (default: $KILN_HOME/modules)
        #[arg(long = "modules-dir")]
        modules_dir: Option<PathBuf>,
        /// Per-generator deadline in seconds, 0 disables (default: KILN_PLUGIN_TIMEOUT_SECS or 60)
        #[arg(long = "timeout-secs")]
        timeout_secs: Option<u64>,
        /// Accessory generators run in parallel (default: KILN_MAX_CONCURRENCY or 4)
        #[arg(long = "max-concurrency")]
        max_concurrency: Option<usize>,
    },
}

fn init_tracing() {
    let env = std::env::var("KILN_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    // stdout carries the Spec
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("KILN_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid KILN_METRICS_ADDR; expected host:port");
        }
    }
}

fn print<T: serde::Serialize>(output: Output, value: &T) -> Result<()> {
    match output {
        Output::Json => println!("{}", serde_json::to_string_pretty(value)?),
        Output::Yaml => print!("{}", serde_yaml::to_string(value)?),
    }
    Ok(())
}

/// Log the module a generation failure is attributed to, then pass the error on.
fn report(e: kiln_core::Error) -> kiln_core::Error {
    match e.module() {
        Some(module) => error!(module, error = %e, "generation failed"),
        None => error!(error = %e, "generation failed"),
    }
    e
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    let workspace = load_workspace(&cli.workspace).with_context(|| format!("loading workspace {}", cli.workspace.display()))?;

    match cli.command {
        Commands::Validate => {
            validate(&workspace.modules).with_context(|| format!("workspace {} is invalid", workspace.name))?;
            info!(workspace = %workspace.name, modules = workspace.modules.len(), "workspace valid");
            println!("workspace {}: {} module(s) valid", workspace.name, workspace.modules.len());
        }
        Commands::Resolve { project } => {
            let modules = ValidatedModuleConfigs::new(workspace.modules).context("validating workspace modules")?;
            let resolved = modules.project_module_configs(&project).with_context(|| format!("resolving module configs for project {:?}", project))?;
            print(cli.output, &resolved)?;
        }
        Commands::Generate { project, stack, app, app_config, manifest, out, modules_dir, timeout_secs, max_concurrency } => {
            let project: Project = load_project(&project).with_context(|| format!("loading project {}", project.display()))?;
            let stack = Stack::new(stack);
            let config = load_app_configuration(&app_config).with_context(|| format!("loading app configuration {}", app_config.display()))?;
            let dependencies = load_dependency_manifest(&manifest).with_context(|| format!("loading dependency manifest {}", manifest.display()))?;
            let loader = match modules_dir {
                Some(dir) => ExecLoader::new(dir),
                None => ExecLoader::from_env(),
            };
            let mut options = GenerateOptions::from_env();
            if let Some(secs) = timeout_secs {
                options.timeout = if secs == 0 { None } else { Some(Duration::from_secs(secs)) };
            }
            if let Some(n) = max_concurrency {
                options.max_concurrency = n.max(1);
            }
            info!(project = %project.name, stack = %stack.name, app = %app, modules_dir = %loader.modules_dir().display(), "generate invoked");

            let generator = AppConfigurationGenerator {
                project: &project,
                stack: &stack,
                app: &app,
                config: &config,
                workspace: &workspace,
                dependencies: &dependencies,
                loader: &loader,
                options,
            };
            let spec: Spec = match out {
                Some(path) => {
                    let store = FileSpecStore::new(path);
                    generate_into(&generator, &store).await.map_err(report).with_context(|| format!("generating {}/{}/{}", project.name, stack.name, app))?
                }
                None => {
                    let spec = generator.generate().await.map_err(report).with_context(|| format!("generating {}/{}/{}", project.name, stack.name, app))?;
                    println!("{}", SpecFormat::from(cli.output).render(&spec)?.trim_end());
                    spec
                }
            };
            info!(resources = spec.len(), "done");
        }
    }
    Ok(())
}
