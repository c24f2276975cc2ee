//! Workspace loading.
//!
//! A workspace is a directory holding `kiln.yaml` plus the template bodies it
//! references under `templates/`:
//!
//! ```text
//! my-workspace/
//! ├── kiln.yaml
//! └── templates/
//!     ├── web-deploy.json
//!     └── web-svc.yaml
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{StoreError, StoreResult};
use crate::instances::InstanceLedger;
use crate::models::{
    ClusterRecord, InstanceRecord, NamespaceRecord, ProjectRecord, ResourceKind, ResourceTemplate,
    ShowVersion, SnapshotId, TemplateId, Variable, VariableOverride, VersionedEntity,
};
use crate::templates::TemplateRepository;
use crate::variables::VariableStore;

pub const WORKSPACE_FILE: &str = "kiln.yaml";
pub const TEMPLATES_DIR: &str = "templates";

/// Template entry in `kiln.yaml`; the body lives in `templates/<file>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateEntry {
    pub id: TemplateId,
    pub kind: ResourceKind,
    pub file: String,
}

/// Snapshot entry in `kiln.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub id: SnapshotId,
    pub template_group_id: String,
    pub entity_map: BTreeMap<ResourceKind, Vec<TemplateId>>,
    #[serde(default)]
    pub parent_snapshot_id: Option<SnapshotId>,
}

/// On-disk layout of `kiln.yaml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceFile {
    /// Engine settings, interpreted by the engine crate.
    pub engine: Option<serde_yaml::Value>,
    pub clusters: Vec<ClusterRecord>,
    pub projects: Vec<ProjectRecord>,
    pub namespaces: Vec<NamespaceRecord>,
    pub variables: Vec<Variable>,
    pub overrides: Vec<VariableOverride>,
    pub templates: Vec<TemplateEntry>,
    pub snapshots: Vec<SnapshotEntry>,
    pub show_versions: Vec<ShowVersion>,
}

/// A loaded workspace.
pub struct Workspace {
    pub root: PathBuf,
    pub engine: Option<serde_yaml::Value>,
    pub clusters: Vec<ClusterRecord>,
    pub projects: Vec<ProjectRecord>,
    pub namespaces: Vec<NamespaceRecord>,
    pub variables: VariableStore,
    pub templates: TemplateRepository,
}

impl Workspace {
    pub fn namespace(&self, id_or_name: &str) -> Option<&NamespaceRecord> {
        self.namespaces
            .iter()
            .find(|n| n.id == id_or_name)
            .or_else(|| self.namespaces.iter().find(|n| n.name == id_or_name))
    }
}

/// Loads workspaces from disk.
pub struct WorkspaceLoader {
    root: PathBuf,
}

impl WorkspaceLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn invalid(&self, message: impl Into<String>) -> StoreError {
        StoreError::InvalidWorkspace {
            path: self.root.clone(),
            message: message.into(),
        }
    }

    /// Read `kiln.yaml` and every template body it references.
    pub fn load(&self) -> StoreResult<Workspace> {
        let manifest_path = self.root.join(WORKSPACE_FILE);
        if !manifest_path.exists() {
            return Err(self.invalid(format!("missing {}", WORKSPACE_FILE)));
        }

        debug!("Loading workspace from {:?}", manifest_path);
        let content = fs::read_to_string(&manifest_path)?;
        let file: WorkspaceFile = serde_yaml::from_str(&content)?;

        let bodies = self.read_template_bodies()?;

        let variables = VariableStore::new();
        for variable in file.variables {
            variables.import(variable)?;
        }
        for o in file.overrides {
            variables.set_override(o.variable_id, o.target_id, o.value)?;
        }

        let templates = TemplateRepository::new();
        for entry in &file.templates {
            let body = bodies
                .get(&entry.file)
                .ok_or_else(|| self.invalid(format!("template file not found: {}", entry.file)))?;
            templates.import_template(ResourceTemplate {
                id: entry.id,
                kind: entry.kind,
                name: String::new(),
                body: body.clone(),
                created_at: Utc::now(),
                superseded_by: None,
            });
        }

        let mut snapshots = file.snapshots;
        // parents must exist before their children are checked
        snapshots.sort_by_key(|s| s.id);
        for entry in snapshots {
            templates.import_snapshot(VersionedEntity {
                id: entry.id,
                template_group_id: entry.template_group_id,
                entity_map: entry.entity_map,
                parent_snapshot_id: entry.parent_snapshot_id,
                created_at: Utc::now(),
            })?;
        }
        for show in file.show_versions {
            templates.import_show_version(show)?;
        }

        info!(
            "Loaded workspace: {} templates, {} variables, {} namespaces",
            file.templates.len(),
            variables.list().len(),
            file.namespaces.len()
        );

        Ok(Workspace {
            root: self.root.clone(),
            engine: file.engine,
            clusters: file.clusters,
            projects: file.projects,
            namespaces: file.namespaces,
            variables,
            templates,
        })
    }

    /// Read every file under `templates/`, keyed by path relative to it.
    fn read_template_bodies(&self) -> StoreResult<HashMap<String, String>> {
        let dir = self.root.join(TEMPLATES_DIR);
        let mut bodies = HashMap::new();
        if !dir.exists() {
            warn!("Workspace has no {} directory", TEMPLATES_DIR);
            return Ok(bodies);
        }

        for entry in WalkDir::new(&dir)
            .min_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let relative = entry
                .path()
                .strip_prefix(&dir)
                .map_err(|e| self.invalid(e.to_string()))?
                .to_string_lossy()
                .replace('\\', "/");
            bodies.insert(relative, fs::read_to_string(entry.path())?);
        }
        Ok(bodies)
    }
}

/// Write the ledger rows to `path` as YAML.
pub fn save_ledger(path: &Path, ledger: &InstanceLedger) -> StoreResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_yaml::to_string(&ledger.records())?)?;
    Ok(())
}

/// Read a ledger written by [`save_ledger`]; a missing file yields an empty ledger.
pub fn load_ledger(path: &Path) -> StoreResult<InstanceLedger> {
    if !path.exists() {
        return Ok(InstanceLedger::new());
    }
    let records: Vec<InstanceRecord> = serde_yaml::from_str(&fs::read_to_string(path)?)?;
    Ok(InstanceLedger::from_records(records))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_manifest() {
        let temp = tempdir().unwrap();
        let result = WorkspaceLoader::new(temp.path()).load();
        assert!(matches!(result, Err(StoreError::InvalidWorkspace { .. })));
    }

    #[test]
    fn test_missing_ledger_is_empty() {
        let temp = tempdir().unwrap();
        let ledger = load_ledger(&temp.path().join("instances.yaml")).unwrap();
        assert!(ledger.records().is_empty());
    }
}
