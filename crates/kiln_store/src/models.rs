//! Data models for variables, templates, snapshots and instance records.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type VariableId = u64;
pub type TemplateId = u64;
pub type SnapshotId = u64;

/// Maximum length of a variable key.
pub const MAX_KEY_LEN: usize = 64;

/// Check a variable key against `[A-Za-z][A-Za-z0-9_-]{0,63}`.
pub fn is_valid_key(key: &str) -> bool {
    static KEY_PATTERN: OnceLock<Regex> = OnceLock::new();
    KEY_PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_-]{0,63}$").expect("static key pattern"))
        .is_match(key)
}

/// Workload resource kinds the engine knows how to compile.
///
/// Declaration order is the generation order inside one namespace: the
/// pod-bearing kinds come first so that services can bind to their ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Deployment,
    StatefulSet,
    DaemonSet,
    Job,
    ConfigMap,
    Secret,
    Service,
    Ingress,
    HorizontalPodAutoscaler,
}

impl ResourceKind {
    pub fn all() -> [ResourceKind; 9] {
        use ResourceKind::*;
        [
            Deployment,
            StatefulSet,
            DaemonSet,
            Job,
            ConfigMap,
            Secret,
            Service,
            Ingress,
            HorizontalPodAutoscaler,
        ]
    }

    /// The orchestrator's `kind` string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deployment => "Deployment",
            Self::StatefulSet => "StatefulSet",
            Self::DaemonSet => "DaemonSet",
            Self::Job => "Job",
            Self::ConfigMap => "ConfigMap",
            Self::Secret => "Secret",
            Self::Service => "Service",
            Self::Ingress => "Ingress",
            Self::HorizontalPodAutoscaler => "HorizontalPodAutoscaler",
        }
    }

    /// Short name used as the bundle key.
    pub fn abbreviation(&self) -> &'static str {
        match self {
            Self::Deployment => "deploy",
            Self::StatefulSet => "sts",
            Self::DaemonSet => "ds",
            Self::Job => "job",
            Self::ConfigMap => "cm",
            Self::Secret => "secret",
            Self::Service => "svc",
            Self::Ingress => "ing",
            Self::HorizontalPodAutoscaler => "hpa",
        }
    }

    /// Whether manifests of this kind carry a pod template.
    pub fn is_pod_bearing(&self) -> bool {
        matches!(
            self,
            Self::Deployment | Self::StatefulSet | Self::DaemonSet | Self::Job
        )
    }

    /// Parse a kind from its full name or abbreviation, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        let lower = s.to_ascii_lowercase();
        Self::all()
            .into_iter()
            .find(|k| k.as_str().to_ascii_lowercase() == lower || k.abbreviation() == lower)
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Scope a variable's overrides are keyed by.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum VariableScope {
    #[default]
    Global,
    Cluster,
    Namespace,
}

impl std::fmt::Display for VariableScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Global => "global",
            Self::Cluster => "cluster",
            Self::Namespace => "namespace",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum VariableCategory {
    System,
    #[default]
    Custom,
}

/// A named variable that templates reference as `{{KEY}}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Variable {
    pub id: VariableId,
    pub key: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub scope: VariableScope,
    #[serde(default)]
    pub default_value: String,
    #[serde(default)]
    pub category: VariableCategory,
    #[serde(default)]
    pub is_deleted: bool,
}

impl Variable {
    pub fn is_system(&self) -> bool {
        self.category == VariableCategory::System
    }
}

/// A per-target value replacing a variable's default.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VariableOverride {
    pub variable_id: VariableId,
    pub target_id: String,
    pub value: String,
}

/// The cluster and namespace a resolution is performed for.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ResolutionTarget {
    pub cluster_id: String,
    pub namespace_id: String,
}

impl ResolutionTarget {
    pub fn new(cluster_id: impl Into<String>, namespace_id: impl Into<String>) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            namespace_id: namespace_id.into(),
        }
    }

    /// The override target id that applies to a variable of `scope`.
    pub fn target_for(&self, scope: VariableScope) -> Option<&str> {
        match scope {
            VariableScope::Global => None,
            VariableScope::Cluster => Some(&self.cluster_id),
            VariableScope::Namespace => Some(&self.namespace_id),
        }
    }
}

/// One stored revision of a resource template.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceTemplate {
    pub id: TemplateId,
    pub kind: ResourceKind,
    /// Mirrors `body.metadata.name` as of this revision.
    pub name: String,
    /// Raw template text, placeholders included.
    pub body: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub superseded_by: Option<TemplateId>,
}

impl ResourceTemplate {
    pub fn is_current(&self) -> bool {
        self.superseded_by.is_none()
    }
}

/// Immutable snapshot of the templates making up one edit of a group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VersionedEntity {
    pub id: SnapshotId,
    pub template_group_id: String,
    pub entity_map: BTreeMap<ResourceKind, Vec<TemplateId>>,
    #[serde(default)]
    pub parent_snapshot_id: Option<SnapshotId>,
    pub created_at: DateTime<Utc>,
}

impl VersionedEntity {
    pub fn contains(&self, kind: ResourceKind, template_id: TemplateId) -> bool {
        self.entity_map
            .get(&kind)
            .is_some_and(|ids| ids.contains(&template_id))
    }

    /// All (kind, template id) pairs in generation order.
    pub fn entries(&self) -> impl Iterator<Item = (ResourceKind, TemplateId)> + '_ {
        self.entity_map
            .iter()
            .flat_map(|(kind, ids)| ids.iter().map(move |id| (*kind, *id)))
    }
}

/// Mutable, user-facing pointer into the snapshot chain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShowVersion {
    pub name: String,
    pub template_group_id: String,
    pub current_snapshot_id: SnapshotId,
    #[serde(default)]
    pub revision_history: Vec<SnapshotId>,
}

/// Lifecycle state of an instantiated resource.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum InstanceState {
    #[default]
    NotInstantiated,
    Failed,
    Succeeded,
    UpdateFailed,
    UpdateSucceeded,
    DeletedExternally,
}

/// Identity of an instance record; at most one live record exists per key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceKey {
    pub name: String,
    pub namespace: String,
    pub kind: ResourceKind,
}

impl InstanceKey {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>, kind: ResourceKind) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            kind,
        }
    }
}

impl std::fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.kind.abbreviation(), self.name)
    }
}

/// Persisted outcome of submitting one manifest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstanceRecord {
    pub id: Uuid,
    pub name: String,
    pub namespace: String,
    pub kind: ResourceKind,
    pub state: InstanceState,
    #[serde(default)]
    pub manifest: Option<serde_json::Value>,
    #[serde(default)]
    pub message: Option<String>,
    pub recorded_at: DateTime<Utc>,
    #[serde(default)]
    pub superseded_by: Option<Uuid>,
}

impl InstanceRecord {
    pub fn key(&self) -> InstanceKey {
        InstanceKey::new(&self.name, &self.namespace, self.kind)
    }

    pub fn is_live(&self) -> bool {
        self.superseded_by.is_none()
    }
}

/// Namespace entry in the project registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NamespaceRecord {
    pub id: String,
    pub name: String,
    pub cluster_id: String,
    pub project_id: String,
    #[serde(default)]
    pub has_image_secret: bool,
    #[serde(default)]
    pub creator: String,
    #[serde(default)]
    pub updater: String,
}

/// Project entry in the project registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectRecord {
    pub id: String,
    #[serde(default)]
    pub cc_app_id: String,
    #[serde(default)]
    pub registry_domain: String,
    #[serde(default)]
    pub log_pipeline_ids: Vec<String>,
}

/// Cluster entry with its detected orchestrator version.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusterRecord {
    pub id: String,
    #[serde(default)]
    pub version: String,
}
