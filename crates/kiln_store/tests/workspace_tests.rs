//! Integration tests for workspace loading.

use std::fs;
use std::path::Path;

use kiln_store::{
    load_ledger, save_ledger, InstanceKey, InstanceLedger, InstanceState, ResolutionTarget,
    ResourceKind, StoreError, WorkspaceLoader,
};
use tempfile::tempdir;

const WORKSPACE: &str = r#"
clusters:
  - id: c1
    version: v1.24.3
projects:
  - id: p1
    cc_app_id: "1001"
    registry_domain: registry.acme.io
    log_pipeline_ids: ["lp-std", "lp-nonstd"]
namespaces:
  - id: ns1
    name: default
    cluster_id: c1
    project_id: p1
variables:
  - id: 1
    key: REPLICA_COUNT
    scope: namespace
    default_value: "1"
  - id: 2
    key: LOG_LEVEL
    default_value: info
overrides:
  - variable_id: 1
    target_id: ns1
    value: "3"
templates:
  - id: 10
    kind: ConfigMap
    file: cm1.json
  - id: 11
    kind: Deployment
    file: web/deploy.yaml
snapshots:
  - id: 2
    template_group_id: g1
    parent_snapshot_id: 1
    entity_map:
      ConfigMap: [10]
      Deployment: [11]
  - id: 1
    template_group_id: g1
    entity_map:
      ConfigMap: [10]
show_versions:
  - name: stable
    template_group_id: g1
    current_snapshot_id: 2
"#;

fn write_workspace(root: &Path) {
    fs::write(root.join("kiln.yaml"), WORKSPACE).unwrap();
    fs::create_dir_all(root.join("templates/web")).unwrap();
    fs::write(
        root.join("templates/cm1.json"),
        r#"{"kind":"ConfigMap","metadata":{"name":"cm1"},"data":{"k":"v"}}"#,
    )
    .unwrap();
    fs::write(
        root.join("templates/web/deploy.yaml"),
        "kind: Deployment\nmetadata:\n  name: web\nspec:\n  replicas: \"{{REPLICA_COUNT}}\"\n",
    )
    .unwrap();
}

#[test]
fn test_load_workspace() {
    let dir = tempdir().unwrap();
    write_workspace(dir.path());

    let workspace = WorkspaceLoader::new(dir.path()).load().unwrap();

    assert_eq!(workspace.namespace("default").unwrap().id, "ns1");
    assert_eq!(workspace.namespace("ns1").unwrap().name, "default");

    let cm = workspace.templates.get_template(10).unwrap();
    assert_eq!(cm.name, "cm1");
    let deploy = workspace.templates.get_template(11).unwrap();
    assert_eq!(deploy.name, "web");
    assert_eq!(deploy.kind, ResourceKind::Deployment);

    let snapshot = workspace.templates.get_snapshot(2).unwrap();
    assert!(snapshot.contains(ResourceKind::Deployment, 11));
    assert_eq!(workspace.templates.lineage(2).unwrap(), vec![2, 1]);
    assert_eq!(
        workspace.templates.get_show_version("stable").unwrap().current_snapshot_id,
        2
    );
}

#[test]
fn test_loaded_overrides_resolve() {
    let dir = tempdir().unwrap();
    write_workspace(dir.path());
    let workspace = WorkspaceLoader::new(dir.path()).load().unwrap();

    let replicas = workspace.variables.find_by_key("REPLICA_COUNT").unwrap();
    let target = ResolutionTarget::new("c1", "ns1");
    assert_eq!(workspace.variables.resolve_value(&replicas, &target), "3");

    let other = ResolutionTarget::new("c1", "ns2");
    assert_eq!(workspace.variables.resolve_value(&replicas, &other), "1");
}

#[test]
fn test_missing_template_file() {
    let dir = tempdir().unwrap();
    write_workspace(dir.path());
    fs::remove_file(dir.path().join("templates/cm1.json")).unwrap();

    let result = WorkspaceLoader::new(dir.path()).load();
    assert!(matches!(result, Err(StoreError::InvalidWorkspace { .. })));
}

#[test]
fn test_ledger_round_trip_through_disk() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("out/instances.yaml");

    let ledger = InstanceLedger::new();
    let key = InstanceKey::new("cm1", "default", ResourceKind::ConfigMap);
    ledger.upsert(&key, InstanceState::Succeeded, None, None);
    ledger.upsert(&key, InstanceState::UpdateFailed, None, Some("conflict".into()));
    save_ledger(&path, &ledger).unwrap();

    let reloaded = load_ledger(&path).unwrap();
    assert_eq!(reloaded.history(&key).len(), 2);
    let current = reloaded.current(&key).unwrap();
    assert_eq!(current.state, InstanceState::UpdateFailed);
    assert_eq!(current.message.as_deref(), Some("conflict"));
}
