//! System context assembled once per namespace before generation.

use std::collections::BTreeMap;
use std::sync::Arc;

use kiln_store::{NamespaceRecord, ProjectRecord, ResolutionTarget, VersionedEntity};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::collaborators::{ClusterVersionProbe, ProjectRegistry};
use crate::error::{EngineError, EngineResult};
use crate::instantiation::Instantiation;

pub const PROJECT_ID: &str = "PROJECT_ID";
pub const CC_APP_ID: &str = "CC_APP_ID";
pub const CLUSTER_ID: &str = "CLUSTER_ID";
pub const CLUSTER_VERSION: &str = "CLUSTER_VERSION";
pub const NAMESPACE: &str = "NAMESPACE";
pub const NAMESPACE_ID: &str = "NAMESPACE_ID";
pub const CREATOR: &str = "CREATOR";
pub const UPDATER: &str = "UPDATER";
pub const CREATE_TIME: &str = "CREATE_TIME";
pub const UPDATE_TIME: &str = "UPDATE_TIME";
pub const REGISTRY_DOMAIN: &str = "REGISTRY_DOMAIN";
pub const LOG_PIPELINE_IDS: &str = "LOG_PIPELINE_IDS";
pub const STD_LOG_PIPELINE_ID: &str = "STD_LOG_PIPELINE_ID";
pub const NON_STD_LOG_PIPELINE_ID: &str = "NON_STD_LOG_PIPELINE_ID";
pub const TEMPLATE_GROUP_ID: &str = "TEMPLATE_GROUP_ID";
pub const SNAPSHOT_ID: &str = "SNAPSHOT_ID";

/// Every key the context builder fills in.
pub const CONTEXT_KEYS: &[&str] = &[
    PROJECT_ID,
    CC_APP_ID,
    CLUSTER_ID,
    CLUSTER_VERSION,
    NAMESPACE,
    NAMESPACE_ID,
    CREATOR,
    UPDATER,
    CREATE_TIME,
    UPDATE_TIME,
    REGISTRY_DOMAIN,
    LOG_PIPELINE_IDS,
    STD_LOG_PIPELINE_ID,
    NON_STD_LOG_PIPELINE_ID,
    TEMPLATE_GROUP_ID,
    SNAPSHOT_ID,
];

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// `major.minor` of the target orchestrator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct ClusterVersion {
    pub major: u32,
    pub minor: u32,
}

impl ClusterVersion {
    pub fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Parse `v1.24.3`, `1.19`, `1.22.5-gke.100` and the like.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim().trim_start_matches(['v', 'V']);
        let mut parts = s.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor_raw = parts.next()?;
        let digits: String = minor_raw.chars().take_while(|c| c.is_ascii_digit()).collect();
        let minor = digits.parse().ok()?;
        Some(Self { major, minor })
    }

    pub fn at_least(&self, major: u32, minor: u32) -> bool {
        *self >= Self::new(major, minor)
    }
}

/// Everything a generator needs to know about the target besides variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Context {
    pub namespace: NamespaceRecord,
    pub project: ProjectRecord,
    pub cluster_version: Option<ClusterVersion>,
    pub template_group_id: String,
    pub snapshot_id: u64,
    pub actor: String,
    /// Flat `KEY -> value` view substituted into templates.
    pub values: BTreeMap<String, String>,
}

impl Context {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn target(&self) -> ResolutionTarget {
        ResolutionTarget::new(&self.namespace.cluster_id, &self.namespace.id)
    }

    pub fn namespace_name(&self) -> &str {
        &self.namespace.name
    }

    pub fn registry_domain(&self) -> &str {
        &self.project.registry_domain
    }

    /// Pipeline collecting logs from paths outside stdout/stderr.
    pub fn non_standard_log_pipeline(&self) -> Option<&str> {
        self.get(NON_STD_LOG_PIPELINE_ID).filter(|s| !s.is_empty())
    }
}

/// Builds a [`Context`] from the project registry and the version probe.
pub struct ContextBuilder {
    registry: Arc<dyn ProjectRegistry>,
    probe: Arc<dyn ClusterVersionProbe>,
}

impl ContextBuilder {
    pub fn new(registry: Arc<dyn ProjectRegistry>, probe: Arc<dyn ClusterVersionProbe>) -> Self {
        Self { registry, probe }
    }

    /// Look up the namespace and its project; either missing aborts the
    /// instantiation with `NotFound`.
    pub async fn build(
        &self,
        snapshot: &VersionedEntity,
        instantiation: &Instantiation,
    ) -> EngineResult<Context> {
        let namespace = self
            .registry
            .get_namespace(&instantiation.namespace_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Namespace", &instantiation.namespace_id))?;
        let project = self
            .registry
            .get_project(&namespace.project_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Project", &namespace.project_id))?;

        let raw_version = self.probe.cluster_version(&namespace.cluster_id).await?;
        let cluster_version = ClusterVersion::parse(&raw_version);
        if cluster_version.is_none() && !raw_version.is_empty() {
            warn!(
                "Unrecognized version '{}' for cluster {}, apiVersion rewrite disabled",
                raw_version, namespace.cluster_id
            );
        }

        let timestamp = instantiation.requested_at.format(TIMESTAMP_FORMAT).to_string();
        let mut values = BTreeMap::new();
        values.insert(PROJECT_ID.to_string(), project.id.clone());
        values.insert(CC_APP_ID.to_string(), project.cc_app_id.clone());
        values.insert(CLUSTER_ID.to_string(), namespace.cluster_id.clone());
        values.insert(CLUSTER_VERSION.to_string(), raw_version);
        values.insert(NAMESPACE.to_string(), namespace.name.clone());
        values.insert(NAMESPACE_ID.to_string(), namespace.id.clone());
        values.insert(CREATOR.to_string(), instantiation.actor.clone());
        values.insert(UPDATER.to_string(), instantiation.actor.clone());
        values.insert(CREATE_TIME.to_string(), timestamp.clone());
        values.insert(UPDATE_TIME.to_string(), timestamp);
        values.insert(REGISTRY_DOMAIN.to_string(), project.registry_domain.clone());
        values.insert(LOG_PIPELINE_IDS.to_string(), project.log_pipeline_ids.join(","));
        values.insert(
            STD_LOG_PIPELINE_ID.to_string(),
            project.log_pipeline_ids.first().cloned().unwrap_or_default(),
        );
        values.insert(
            NON_STD_LOG_PIPELINE_ID.to_string(),
            project.log_pipeline_ids.get(1).cloned().unwrap_or_default(),
        );
        values.insert(TEMPLATE_GROUP_ID.to_string(), snapshot.template_group_id.clone());
        values.insert(SNAPSHOT_ID.to_string(), snapshot.id.to_string());

        debug!(
            "Built context for namespace {} (cluster {}, version {:?})",
            namespace.name, namespace.cluster_id, cluster_version
        );

        Ok(Context {
            namespace,
            project,
            cluster_version,
            template_group_id: snapshot.template_group_id.clone(),
            snapshot_id: snapshot.id,
            actor: instantiation.actor.clone(),
            values,
        })
    }
}
