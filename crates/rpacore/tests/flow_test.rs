// crates/rpacore/tests/flow_test.rs

use rpacore::{
    parse_device_ids, Condition, FlowDefinition, FlowError, StepResultStore, Value, VariableStore,
};
use std::collections::HashMap;

const FLOW_YAML: &str = r#"
name: order
version: 1
description: place an order
app_name: store
device:
  ip: "192.168.1.10:5555, 192.168.1.11:5555 ,"
variables:
  keyword: coffee
prerequisites:
  account:
    user: alice
steps:
  - name: open
    action: start_app
    params:
      package: com.example.store
  - name: search
    action: input_text
    params:
      text: "${keyword}"
    conditions:
      - type: step_result
        step: open
        value: true
  - name: pages
    action: loop
    params:
      max_iterations: 3
    break_conditions:
      - type: variables
        variable: done
        value: true
    steps:
      - name: scroll
        action: scroll
        params: { direction: up, distance: 500 }
"#;

#[test]
fn test_numeric_version_keeps_written_form() {
    for (written, expected) in [("1", "1"), ("1.0", "1.0"), ("2.5", "2.5"), ("'1.10'", "1.10")] {
        let yaml = format!("name: v\nversion: {}\nsteps: []", written);
        let flow = FlowDefinition::from_yaml_str(&yaml).unwrap();
        assert_eq!(flow.version.as_deref(), Some(expected));
    }

    let flow = FlowDefinition::from_json_str(r#"{"name":"v","version":3.0,"steps":[]}"#).unwrap();
    assert_eq!(flow.version.as_deref(), Some("3.0"));
}

#[test]
fn test_parse_yaml_flow() {
    let flow = FlowDefinition::from_yaml_str(FLOW_YAML).unwrap();
    flow.validate().unwrap();

    assert_eq!(flow.display_name(), "order");
    assert_eq!(flow.version.as_deref(), Some("1"));
    assert_eq!(flow.app_name.as_deref(), Some("store"));
    assert_eq!(
        flow.candidate_devices(),
        vec!["192.168.1.10:5555".to_string(), "192.168.1.11:5555".to_string()]
    );
    assert_eq!(flow.steps().len(), 3);

    let search = &flow.steps()[1];
    assert_eq!(search.conditions, vec![Condition::step_result("open", true)]);

    let pages = &flow.steps()[2];
    assert_eq!(pages.steps.len(), 1);
    assert_eq!(pages.break_conditions, vec![Condition::variable("done", true)]);
}

#[test]
fn test_device_spec_forms() {
    let bare: FlowDefinition =
        FlowDefinition::from_yaml_str("name: a\nversion: '1'\nsteps: []\ndevice: [ dev1 , dev2 ]").unwrap();
    assert_eq!(bare.candidate_devices(), vec!["dev1", "dev2"]);

    let csv = FlowDefinition::from_json_str(r#"{"device": "dev3,dev4"}"#).unwrap();
    assert_eq!(csv.candidate_devices(), vec!["dev3", "dev4"]);

    assert_eq!(parse_device_ids(" a, ,b ,"), vec!["a", "b"]);
}

#[test]
fn test_validation_reports_missing_fields() {
    for (doc, field) in [
        ("version: 1\nsteps: []", "name"),
        ("name: x\nsteps: []", "version"),
        ("name: x\nversion: 1", "steps"),
    ] {
        let flow = FlowDefinition::from_yaml_str(doc).unwrap();
        match flow.validate() {
            Err(FlowError::Configuration(msg)) => assert!(msg.contains(field), "{}", msg),
            other => panic!("expected configuration error for {}, got {:?}", field, other),
        }
    }
}

#[test]
fn test_from_file_by_extension() {
    let dir = tempfile::tempdir().unwrap();
    let json_path = dir.path().join("flow.json");
    std::fs::write(&json_path, r#"{"name":"j","version":"2","steps":[]}"#).unwrap();
    let yaml_path = dir.path().join("flow.yaml");
    std::fs::write(&yaml_path, FLOW_YAML).unwrap();

    assert_eq!(FlowDefinition::from_file(&json_path).unwrap().display_name(), "j");
    assert_eq!(FlowDefinition::from_file(&yaml_path).unwrap().display_name(), "order");
}

#[test]
fn test_variable_condition() {
    let mut vars = VariableStore::new();
    let results = StepResultStore::new();
    let cond = Condition::variable("mode", "fast");

    assert!(!cond.evaluate(&vars, &results));
    vars.set("mode", "fast");
    assert!(cond.evaluate(&vars, &results));
    vars.set("mode", "slow");
    assert!(!cond.evaluate(&vars, &results));
}

#[test]
fn test_step_result_condition_equality() {
    let vars = VariableStore::new();
    let mut results = StepResultStore::new();
    let cond = Condition::step_result("s1", true);

    assert!(!cond.evaluate(&vars, &results));
    results.record("s1", Value::Bool(false));
    assert!(!cond.evaluate(&vars, &results));
    results.record("s1", Value::Bool(true));
    assert!(cond.evaluate(&vars, &results));
}

#[test]
fn test_step_result_condition_map_key() {
    let vars = VariableStore::new();
    let mut results = StepResultStore::new();
    let mut found = HashMap::new();
    found.insert("installed".to_string(), Value::Bool(true));
    found.insert("updated".to_string(), Value::Bool(false));
    results.record("check", Value::Object(found));

    assert!(Condition::step_result("check", "installed").evaluate(&vars, &results));
    assert!(!Condition::step_result("check", "updated").evaluate(&vars, &results));
    assert!(!Condition::step_result("check", "missing").evaluate(&vars, &results));
}

#[test]
fn test_condition_combinators() {
    let mut vars = VariableStore::new();
    let results = StepResultStore::new();
    vars.set("a", 1i64);

    let conds = vec![Condition::variable("a", 1i64), Condition::variable("b", 2i64)];
    assert!(!Condition::all(&conds, &vars, &results));
    assert!(Condition::any(&conds, &vars, &results));
    assert!(Condition::all(&[], &vars, &results));
    assert!(!Condition::any(&[], &vars, &results));
}
