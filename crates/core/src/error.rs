//! Error taxonomy of the generation pipeline.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced by the Spec generation pipeline. Every variant carries the
/// module/block/resource it is attributed to so the CLI can print it verbatim.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid config of module {module:?}{}: {violation}", block_suffix(.block))]
    ConfigValidation { module: String, block: Option<String>, violation: ConfigViolation },

    #[error("invalid projectSelector in block {block:?} of module {module:?}: {violation}")]
    ProjectSelector { module: String, block: String, violation: SelectorViolation },

    #[error("empty project name in module config query")]
    EmptyQueryProjectName,

    #[error("failed to load module {module}: {reason}")]
    ModuleLoad { module: String, reason: String },

    #[error("module {module} failed to generate: {reason}")]
    ModuleGeneration { module: String, reason: String },

    #[error("module {module} timed out after {after:?}")]
    ModuleTimeout { module: String, after: Duration },

    #[error("failed to tear down module {module}: {reason}")]
    PluginTeardown { module: String, reason: String },

    #[error("failed to patch resource {resource_id:?}: {reason}")]
    Patch { resource_id: String, reason: String },

    #[error("invalid accessory {accessory:?}: {reason}")]
    InvalidAccessory { accessory: String, reason: String },

    #[error("module {module} produced duplicate resource id {id:?}")]
    DuplicateResource { module: String, id: String },

    #[error("{context}: {source}")]
    Io { context: String, #[source] source: std::io::Error },

    #[error("{context}: {reason}")]
    Decode { context: String, reason: String },
}

fn block_suffix(block: &Option<String>) -> String {
    match block {
        Some(b) => format!(" block {:?}", b),
        None => String::new(),
    }
}

impl Error {
    /// Module key the error is attributed to, when there is one.
    pub fn module(&self) -> Option<&str> {
        match self {
            Error::ConfigValidation { module, .. }
            | Error::ProjectSelector { module, .. }
            | Error::ModuleLoad { module, .. }
            | Error::ModuleGeneration { module, .. }
            | Error::ModuleTimeout { module, .. }
            | Error::PluginTeardown { module, .. }
            | Error::DuplicateResource { module, .. } => Some(module.as_str()),
            _ => None,
        }
    }
}

/// Structural violations of a module config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigViolation {
    EmptyModuleName,
    EmptyModuleConfig,
    MissingDefaultBlock,
    EmptyDefaultBlock,
    DefaultBlockHasProjectSelector,
    EmptyPatcherBlock,
    MissingProjectSelector,
    OnlyProjectSelector,
}

impl fmt::Display for ConfigViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConfigViolation::EmptyModuleName => "empty module name",
            ConfigViolation::EmptyModuleConfig => "empty module config",
            ConfigViolation::MissingDefaultBlock => "missing default block",
            ConfigViolation::EmptyDefaultBlock => "empty default block",
            ConfigViolation::DefaultBlockHasProjectSelector => "default block must not contain projectSelector",
            ConfigViolation::EmptyPatcherBlock => "empty patcher block",
            ConfigViolation::MissingProjectSelector => "patcher block must contain projectSelector",
            ConfigViolation::OnlyProjectSelector => "patcher block contains only projectSelector",
        };
        f.write_str(s)
    }
}

/// Violations of a patcher block's `projectSelector`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectorViolation {
    NotStringList(String),
    Empty,
    EmptyProjectName,
    DuplicateProject { project: String },
    ConflictingBlocks { project: String, other_block: String },
}

impl fmt::Display for SelectorViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectorViolation::NotStringList(e) => write!(f, "not a list of project names: {}", e),
            SelectorViolation::Empty => f.write_str("empty projectSelector"),
            SelectorViolation::EmptyProjectName => f.write_str("empty project name"),
            SelectorViolation::DuplicateProject { project } => write!(f, "project {:?} listed more than once", project),
            SelectorViolation::ConflictingBlocks { project, other_block } => {
                write!(f, "project {:?} is also selected by block {:?}", project, other_block)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_module_block_and_project() {
        let e = Error::ConfigValidation {
            module: "mysql".into(),
            block: Some("default".into()),
            violation: ConfigViolation::DefaultBlockHasProjectSelector,
        };
        assert_eq!(e.to_string(), "invalid config of module \"mysql\" block \"default\": default block must not contain projectSelector");

        let e = Error::ProjectSelector {
            module: "mysql".into(),
            block: "small".into(),
            violation: SelectorViolation::ConflictingBlocks { project: "foo".into(), other_block: "large".into() },
        };
        let s = e.to_string();
        assert!(s.contains("\"small\"") && s.contains("\"large\"") && s.contains("\"foo\""), "s={}", s);
        assert_eq!(e.module(), Some("mysql"));

        let e = Error::ConfigValidation { module: "".into(), block: None, violation: ConfigViolation::EmptyModuleName };
        assert_eq!(e.to_string(), "invalid config of module \"\": empty module name");
    }
}
