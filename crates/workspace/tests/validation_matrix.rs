use kiln_core::{ConfigViolation, Error, ModuleConfigs, SelectorViolation};
use kiln_workspace::validate;
use serde_json::json;

fn configs(v: serde_json::Value) -> ModuleConfigs {
    serde_json::from_value(v).unwrap()
}

fn config_violation(v: serde_json::Value) -> (Option<String>, ConfigViolation) {
    match validate(&configs(v)) {
        Err(Error::ConfigValidation { block, violation, .. }) => (block, violation),
        other => panic!("expected ConfigValidation, got {:?}", other),
    }
}

fn selector_violation(v: serde_json::Value) -> (String, SelectorViolation) {
    match validate(&configs(v)) {
        Err(Error::ProjectSelector { block, violation, .. }) => (block, violation),
        other => panic!("expected ProjectSelector, got {:?}", other),
    }
}

#[test]
fn valid_config_passes() {
    let ok = configs(json!({
        "mysql": {
            "default": { "type": "aws", "instanceType": "db.t3.micro" },
            "small": { "instanceType": "db.t3.small", "projectSelector": ["foo", "bar"] },
            "large": { "instanceType": "db.t3.large", "projectSelector": ["baz"] }
        },
        "redis": { "default": { "version": "7" } }
    }));
    validate(&ok).unwrap();
    validate(&ModuleConfigs::new()).unwrap();
}

#[test]
fn empty_module_name() {
    let (_, v) = config_violation(json!({ "": { "default": { "a": 1 } } }));
    assert_eq!(v, ConfigViolation::EmptyModuleName);
}

#[test]
fn empty_module_config() {
    let (_, v) = config_violation(json!({ "mysql": {} }));
    assert_eq!(v, ConfigViolation::EmptyModuleConfig);
}

#[test]
fn missing_default_block() {
    let (_, v) = config_violation(json!({ "mysql": { "small": { "a": 1, "projectSelector": ["foo"] } } }));
    assert_eq!(v, ConfigViolation::MissingDefaultBlock);
}

#[test]
fn empty_default_block() {
    let (block, v) = config_violation(json!({ "mysql": { "default": {} } }));
    assert_eq!(block.as_deref(), Some("default"));
    assert_eq!(v, ConfigViolation::EmptyDefaultBlock);
}

#[test]
fn default_block_with_selector() {
    let (_, v) = config_violation(json!({ "mysql": { "default": { "a": 1, "projectSelector": ["foo"] } } }));
    assert_eq!(v, ConfigViolation::DefaultBlockHasProjectSelector);
}

#[test]
fn empty_patcher_block() {
    let (block, v) = config_violation(json!({ "mysql": { "default": { "a": 1 }, "small": {} } }));
    assert_eq!(block.as_deref(), Some("small"));
    assert_eq!(v, ConfigViolation::EmptyPatcherBlock);
}

#[test]
fn patcher_block_without_selector() {
    let (block, v) = config_violation(json!({ "mysql": { "default": { "a": 1 }, "small": { "a": 2 } } }));
    assert_eq!(block.as_deref(), Some("small"));
    assert_eq!(v, ConfigViolation::MissingProjectSelector);
}

#[test]
fn patcher_block_with_only_selector() {
    let (_, v) = config_violation(json!({ "mysql": { "default": { "a": 1 }, "small": { "projectSelector": ["foo"] } } }));
    assert_eq!(v, ConfigViolation::OnlyProjectSelector);
}

#[test]
fn selector_not_a_string_list() {
    let (block, v) = selector_violation(json!({ "mysql": { "default": { "a": 1 }, "small": { "a": 2, "projectSelector": "foo" } } }));
    assert_eq!(block, "small");
    assert!(matches!(v, SelectorViolation::NotStringList(_)));

    let (_, v) = selector_violation(json!({ "mysql": { "default": { "a": 1 }, "small": { "a": 2, "projectSelector": ["foo", 3] } } }));
    assert!(matches!(v, SelectorViolation::NotStringList(_)));
}

#[test]
fn empty_selector() {
    let (_, v) = selector_violation(json!({ "mysql": { "default": { "a": 1 }, "small": { "a": 2, "projectSelector": [] } } }));
    assert_eq!(v, SelectorViolation::Empty);
}

#[test]
fn project_repeated_in_one_selector() {
    let (_, v) = selector_violation(json!({ "mysql": { "default": { "a": 1 }, "small": { "a": 2, "projectSelector": ["foo", "foo"] } } }));
    assert_eq!(v, SelectorViolation::DuplicateProject { project: "foo".into() });
}

#[test]
fn project_claimed_by_two_blocks_names_both() {
    let e = validate(&configs(json!({
        "mysql": {
            "default": { "a": 1 },
            "large": { "a": 3, "projectSelector": ["bar", "foo"] },
            "small": { "a": 2, "projectSelector": ["foo"] }
        }
    })))
    .unwrap_err();
    match &e {
        Error::ProjectSelector { module, block, violation } => {
            assert_eq!(module, "mysql");
            assert_eq!(block, "small");
            assert_eq!(violation, &SelectorViolation::ConflictingBlocks { project: "foo".into(), other_block: "large".into() });
        }
        other => panic!("unexpected {:?}", other),
    }
    let msg = e.to_string();
    assert!(msg.contains("large") && msg.contains("small") && msg.contains("foo"), "msg={}", msg);
}

#[test]
fn empty_project_name_in_selector() {
    let (_, v) = selector_violation(json!({ "mysql": { "default": { "a": 1 }, "small": { "a": 2, "projectSelector": [""] } } }));
    assert_eq!(v, SelectorViolation::EmptyProjectName);
}
