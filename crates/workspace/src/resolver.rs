//! Validation of workspace module configs and per-project resolution of their blocks.

use std::collections::BTreeMap;

use kiln_core::{ConfigViolation, Error, GenericConfig, ModuleConfig, ModuleConfigs, Result, SelectorViolation, DEFAULT_BLOCK, PROJECT_SELECTOR};
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value as Json;
use smallvec::SmallVec;
use tracing::debug;

pub type ProjectSelector = SmallVec<[String; 4]>;

/// Check every module config: a non-empty `default` block without `projectSelector`,
/// non-empty patcher blocks each with a non-empty selector plus at least one field,
/// and each project selected by at most one patcher block per module.
pub fn validate(configs: &ModuleConfigs) -> Result<()> {
    for (module, config) in configs {
        validate_module(module, config)?;
    }
    Ok(())
}

fn validate_module(module: &str, config: &ModuleConfig) -> Result<()> {
    let violation = |block: Option<&str>, violation| Error::ConfigValidation {
        module: module.to_string(),
        block: block.map(str::to_string),
        violation,
    };
    if module.is_empty() {
        return Err(violation(None, ConfigViolation::EmptyModuleName));
    }
    if config.is_empty() {
        return Err(violation(None, ConfigViolation::EmptyModuleConfig));
    }
    match config.get(DEFAULT_BLOCK) {
        None => return Err(violation(None, ConfigViolation::MissingDefaultBlock)),
        Some(d) if d.is_empty() => return Err(violation(Some(DEFAULT_BLOCK), ConfigViolation::EmptyDefaultBlock)),
        Some(d) if d.contains_key(PROJECT_SELECTOR) => {
            return Err(violation(Some(DEFAULT_BLOCK), ConfigViolation::DefaultBlockHasProjectSelector))
        }
        Some(_) => {}
    }

    // project -> block that claimed it, across the whole module
    let mut claimed: FxHashMap<String, &str> = FxHashMap::default();
    for (block, fields) in config.iter().filter(|(b, _)| b.as_str() != DEFAULT_BLOCK) {
        if fields.is_empty() {
            return Err(violation(Some(block.as_str()), ConfigViolation::EmptyPatcherBlock));
        }
        let raw = fields
            .get(PROJECT_SELECTOR)
            .ok_or_else(|| violation(Some(block.as_str()), ConfigViolation::MissingProjectSelector))?;
        if fields.len() == 1 {
            return Err(violation(Some(block.as_str()), ConfigViolation::OnlyProjectSelector));
        }
        let selector_err = |violation| Error::ProjectSelector { module: module.to_string(), block: block.clone(), violation };
        let projects = parse_project_selector(raw).map_err(selector_err)?;
        if projects.is_empty() {
            return Err(selector_err(SelectorViolation::Empty));
        }
        let mut seen: FxHashSet<&str> = FxHashSet::default();
        for project in projects.iter() {
            if project.is_empty() {
                return Err(selector_err(SelectorViolation::EmptyProjectName));
            }
            if !seen.insert(project.as_str()) {
                return Err(selector_err(SelectorViolation::DuplicateProject { project: project.clone() }));
            }
            if let Some(other) = claimed.insert(project.clone(), block.as_str()) {
                return Err(selector_err(SelectorViolation::ConflictingBlocks { project: project.clone(), other_block: other.to_string() }));
            }
        }
    }
    Ok(())
}

/// Decode a `projectSelector` value as a list of project names.
pub fn parse_project_selector(raw: &Json) -> std::result::Result<ProjectSelector, SelectorViolation> {
    let arr = raw.as_array().ok_or_else(|| SelectorViolation::NotStringList(format!("expected a list, got {}", json_type(raw))))?;
    arr.iter()
        .map(|v| match v {
            Json::String(s) => Ok(s.clone()),
            other => Err(SelectorViolation::NotStringList(format!("expected a string, got {}", json_type(other)))),
        })
        .collect()
}

fn json_type(v: &Json) -> &'static str {
    match v {
        Json::Null => "null",
        Json::Bool(_) => "bool",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "list",
        Json::Object(_) => "map",
    }
}

/// Resolve one module's config for `project`: the `default` block, overlaid with the
/// fields (minus `projectSelector`) of the first patcher block selecting the project.
///
/// First-match is only unambiguous for configs that passed [`validate`];
/// [`ValidatedModuleConfigs`] carries that guarantee in the type.
pub fn get_project_module_config(config: &ModuleConfig, project: &str) -> Result<GenericConfig> {
    resolve_module(None, config, project)
}

/// Resolve every module for `project`, leaving out modules that resolve to an empty config.
pub fn get_project_module_configs(configs: &ModuleConfigs, project: &str) -> Result<BTreeMap<String, GenericConfig>> {
    if project.is_empty() {
        return Err(Error::EmptyQueryProjectName);
    }
    let mut out = BTreeMap::new();
    for (module, config) in configs {
        let resolved = resolve_module(Some(module), config, project)?;
        if !resolved.is_empty() {
            out.insert(module.clone(), resolved);
        }
    }
    Ok(out)
}

fn resolve_module(module: Option<&str>, config: &ModuleConfig, project: &str) -> Result<GenericConfig> {
    if project.is_empty() {
        return Err(Error::EmptyQueryProjectName);
    }
    let mut resolved = config.get(DEFAULT_BLOCK).cloned().unwrap_or_default();
    for (block, fields) in config.iter().filter(|(b, _)| b.as_str() != DEFAULT_BLOCK) {
        let Some(raw) = fields.get(PROJECT_SELECTOR) else { continue };
        let projects = parse_project_selector(raw).map_err(|violation| Error::ProjectSelector {
            module: module.unwrap_or_default().to_string(),
            block: block.clone(),
            violation,
        })?;
        if projects.iter().any(|p| p == project) {
            debug!(module = ?module, block = %block, project = %project, "patcher block selected");
            for (k, v) in fields.iter().filter(|(k, _)| k.as_str() != PROJECT_SELECTOR) {
                resolved.insert(k.clone(), v.clone());
            }
            break;
        }
    }
    Ok(resolved)
}

/// Module configs that passed [`validate`]. Resolution through this type is deterministic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidatedModuleConfigs(ModuleConfigs);

impl ValidatedModuleConfigs {
    pub fn new(configs: ModuleConfigs) -> Result<Self> {
        validate(&configs)?;
        Ok(Self(configs))
    }

    /// Resolved config of `module` for `project`; empty when the workspace doesn't configure the module.
    pub fn module_config(&self, module: &str, project: &str) -> Result<GenericConfig> {
        match self.0.get(module) {
            Some(config) => resolve_module(Some(module), config, project),
            None if project.is_empty() => Err(Error::EmptyQueryProjectName),
            None => Ok(GenericConfig::new()),
        }
    }

    pub fn project_module_configs(&self, project: &str) -> Result<BTreeMap<String, GenericConfig>> {
        get_project_module_configs(&self.0, project)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn module_config(v: Json) -> ModuleConfig {
        serde_json::from_value(v).unwrap()
    }

    fn configs(v: Json) -> ModuleConfigs {
        serde_json::from_value(v).unwrap()
    }

    fn mysql() -> ModuleConfig {
        module_config(json!({
            "default": { "type": "aws", "instanceType": "db.t3.micro" },
            "small": { "instanceType": "db.t3.small", "projectSelector": ["foo", "bar"] }
        }))
    }

    #[test]
    fn patcher_block_overrides_default_for_selected_project() {
        let foo = get_project_module_config(&mysql(), "foo").unwrap();
        assert_eq!(Json::Object(foo.into_iter().collect()), json!({ "type": "aws", "instanceType": "db.t3.small" }));
        let baz = get_project_module_config(&mysql(), "baz").unwrap();
        assert_eq!(Json::Object(baz.into_iter().collect()), json!({ "type": "aws", "instanceType": "db.t3.micro" }));
    }

    #[test]
    fn empty_project_name_is_rejected() {
        assert!(matches!(get_project_module_config(&mysql(), ""), Err(Error::EmptyQueryProjectName)));
        let all = configs(json!({ "mysql": mysql() }));
        assert!(matches!(get_project_module_configs(&all, ""), Err(Error::EmptyQueryProjectName)));
    }

    #[test]
    fn missing_default_resolves_from_empty() {
        let cfg = module_config(json!({ "large": { "size": 3, "projectSelector": ["foo"] } }));
        let foo = get_project_module_config(&cfg, "foo").unwrap();
        assert_eq!(foo.len(), 1);
        assert_eq!(foo["size"], json!(3));
        assert!(get_project_module_config(&cfg, "bar").unwrap().is_empty());
    }

    #[test]
    fn modules_resolving_empty_are_omitted() {
        let all = configs(json!({
            "mysql": mysql(),
            "monitoring": { "prod": { "interval": "30s", "projectSelector": ["prod-app"] } }
        }));
        let foo = get_project_module_configs(&all, "foo").unwrap();
        assert_eq!(foo.keys().collect::<Vec<_>>(), vec!["mysql"]);
        let prod = get_project_module_configs(&all, "prod-app").unwrap();
        assert_eq!(prod.len(), 2);
    }

    #[test]
    fn resolution_is_repeatable() {
        let all = configs(json!({ "mysql": mysql() }));
        let a = get_project_module_configs(&all, "bar").unwrap();
        let b = get_project_module_configs(&all, "bar").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn unparsable_selector_fails_resolution_with_module_name() {
        let all = configs(json!({ "mysql": { "default": { "a": 1 }, "x": { "b": 2, "projectSelector": "foo" } } }));
        let e = get_project_module_configs(&all, "foo").unwrap_err();
        assert!(matches!(e, Error::ProjectSelector { ref module, ref block, .. } if module == "mysql" && block == "x"));
    }

    #[test]
    fn validated_wrapper_resolves_unconfigured_modules_as_empty() {
        let v = ValidatedModuleConfigs::new(configs(json!({ "mysql": mysql() }))).unwrap();
        assert!(v.module_config("redis", "foo").unwrap().is_empty());
        assert_eq!(v.module_config("mysql", "bar").unwrap()["instanceType"], json!("db.t3.small"));
        assert!(ValidatedModuleConfigs::new(configs(json!({ "mysql": {} }))).is_err());
    }
}
