//! Interfaces to the services the engine depends on but does not own.

use async_trait::async_trait;
use kiln_store::{ClusterRecord, NamespaceRecord, ProjectRecord, ResourceKind};
use serde::{Deserialize, Serialize};

use crate::error::EngineResult;
use crate::manifest::Manifest;

/// Namespace and project lookups. Synchronous in effect and side-effect free.
#[async_trait]
pub trait ProjectRegistry: Send + Sync {
    async fn get_namespace(&self, id: &str) -> EngineResult<Option<NamespaceRecord>>;

    async fn get_project(&self, id: &str) -> EngineResult<Option<ProjectRecord>>;
}

/// Reports the orchestrator version of a cluster; `""` when unknown.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClusterVersionProbe: Send + Sync {
    async fn cluster_version(&self, cluster_id: &str) -> EngineResult<String>;
}

/// Decides whether an actor may instantiate a template group.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PermissionGate: Send + Sync {
    async fn can_instantiate(&self, actor: &str, template_group: &str) -> EngineResult<bool>;
}

/// Result of submitting one manifest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubmissionOutcome {
    pub kind: ResourceKind,
    pub name: String,
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
}

impl SubmissionOutcome {
    pub fn success(manifest: &Manifest) -> Self {
        Self {
            kind: manifest.kind,
            name: manifest.name.clone(),
            success: true,
            message: None,
        }
    }

    pub fn failure(manifest: &Manifest, message: impl Into<String>) -> Self {
        Self {
            kind: manifest.kind,
            name: manifest.name.clone(),
            success: false,
            message: Some(message.into()),
        }
    }
}

/// Hands manifests to the orchestrator. Retries and partial-failure handling
/// are the implementation's business.
#[async_trait]
pub trait ManifestSubmitter: Send + Sync {
    async fn apply(
        &self,
        namespace: &str,
        manifests: &[Manifest],
    ) -> EngineResult<Vec<SubmissionOutcome>>;
}

/// Registry and version probe backed by fixed records.
#[derive(Debug, Clone, Default)]
pub struct StaticRegistry {
    namespaces: Vec<NamespaceRecord>,
    projects: Vec<ProjectRecord>,
    clusters: Vec<ClusterRecord>,
}

impl StaticRegistry {
    pub fn new(
        namespaces: Vec<NamespaceRecord>,
        projects: Vec<ProjectRecord>,
        clusters: Vec<ClusterRecord>,
    ) -> Self {
        Self {
            namespaces,
            projects,
            clusters,
        }
    }

    pub fn with_namespace(mut self, namespace: NamespaceRecord) -> Self {
        self.namespaces.push(namespace);
        self
    }

    pub fn with_project(mut self, project: ProjectRecord) -> Self {
        self.projects.push(project);
        self
    }

    pub fn with_cluster(mut self, cluster: ClusterRecord) -> Self {
        self.clusters.push(cluster);
        self
    }
}

#[async_trait]
impl ProjectRegistry for StaticRegistry {
    async fn get_namespace(&self, id: &str) -> EngineResult<Option<NamespaceRecord>> {
        Ok(self.namespaces.iter().find(|n| n.id == id).cloned())
    }

    async fn get_project(&self, id: &str) -> EngineResult<Option<ProjectRecord>> {
        Ok(self.projects.iter().find(|p| p.id == id).cloned())
    }
}

#[async_trait]
impl ClusterVersionProbe for StaticRegistry {
    async fn cluster_version(&self, cluster_id: &str) -> EngineResult<String> {
        Ok(self
            .clusters
            .iter()
            .find(|c| c.id == cluster_id)
            .map(|c| c.version.clone())
            .unwrap_or_default())
    }
}

/// Gate that lets every actor through.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

#[async_trait]
impl PermissionGate for AllowAll {
    async fn can_instantiate(&self, _actor: &str, _template_group: &str) -> EngineResult<bool> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_registry_lookups() {
        let registry = StaticRegistry::default()
            .with_cluster(ClusterRecord {
                id: "c1".into(),
                version: "v1.25.0".into(),
            })
            .with_project(ProjectRecord {
                id: "p1".into(),
                cc_app_id: "42".into(),
                registry_domain: "hub.acme.io".into(),
                log_pipeline_ids: vec![],
            });

        assert_eq!(registry.cluster_version("c1").await.unwrap(), "v1.25.0");
        assert_eq!(registry.cluster_version("zz").await.unwrap(), "");
        assert!(registry.get_project("p1").await.unwrap().is_some());
        assert!(registry.get_namespace("ns1").await.unwrap().is_none());
    }
}
