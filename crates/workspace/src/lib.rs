//! kiln workspace: module config validation, per-project resolution and config file loading.

#![forbid(unsafe_code)]

pub mod load;
pub mod resolver;

pub use load::{load_app_configuration, load_dependency_manifest, load_file, load_project, load_workspace};
pub use resolver::{get_project_module_config, get_project_module_configs, parse_project_selector, validate, ProjectSelector, ValidatedModuleConfigs};
