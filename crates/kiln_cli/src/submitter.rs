//! Submitter that writes manifests to a directory tree instead of a cluster.
//!
//! Layout: `<root>/<namespace>/<abbr>-<name>.yaml`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use kiln_engine::{EngineError, EngineResult, Manifest, ManifestSubmitter, SubmissionOutcome};
use tracing::{debug, warn};

pub struct FileSubmitter {
    root: PathBuf,
}

impl FileSubmitter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, namespace: &str, manifest: &Manifest) -> PathBuf {
        self.root.join(namespace).join(format!(
            "{}-{}.yaml",
            manifest.kind.abbreviation(),
            manifest.name
        ))
    }

    async fn write(&self, path: &Path, manifest: &Manifest) -> Result<(), String> {
        let yaml = manifest.to_yaml().map_err(|e| e.to_string())?;
        tokio::fs::write(path, yaml).await.map_err(|e| e.to_string())
    }
}

#[async_trait]
impl ManifestSubmitter for FileSubmitter {
    async fn apply(
        &self,
        namespace: &str,
        manifests: &[Manifest],
    ) -> EngineResult<Vec<SubmissionOutcome>> {
        let dir = self.root.join(namespace);
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            EngineError::Collaborator(format!("cannot create {}: {}", dir.display(), e))
        })?;

        let mut outcomes = Vec::with_capacity(manifests.len());
        for manifest in manifests {
            let path = self.path_for(namespace, manifest);
            match self.write(&path, manifest).await {
                Ok(()) => {
                    debug!("Wrote {:?}", path);
                    outcomes.push(SubmissionOutcome::success(manifest));
                }
                Err(e) => {
                    warn!("Failed to write {:?}: {}", path, e);
                    outcomes.push(SubmissionOutcome::failure(manifest, e));
                }
            }
        }
        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_store::ResourceKind;
    use serde_json::json;
    use tempfile::TempDir;

    fn manifest(kind: ResourceKind, name: &str) -> Manifest {
        Manifest {
            kind,
            name: name.to_string(),
            namespace: "default".to_string(),
            body: json!({"kind": kind.as_str(), "metadata": {"name": name}}),
            origin: None,
        }
    }

    #[tokio::test]
    async fn test_writes_one_file_per_manifest() {
        let temp = TempDir::new().unwrap();
        let submitter = FileSubmitter::new(temp.path());
        let manifests = vec![
            manifest(ResourceKind::Deployment, "web"),
            manifest(ResourceKind::Service, "web"),
        ];

        let outcomes = submitter.apply("default", &manifests).await.unwrap();
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| o.success));

        let written = std::fs::read_to_string(temp.path().join("default/deploy-web.yaml")).unwrap();
        assert!(written.contains("kind: Deployment"));
        assert!(temp.path().join("default/svc-web.yaml").exists());
    }

    #[tokio::test]
    async fn test_unwritable_path_is_a_failed_outcome() {
        let temp = TempDir::new().unwrap();
        let submitter = FileSubmitter::new(temp.path());
        // a directory where the file should go
        std::fs::create_dir_all(temp.path().join("default/cm-settings.yaml")).unwrap();

        let outcomes = submitter
            .apply("default", &[manifest(ResourceKind::ConfigMap, "settings")])
            .await
            .unwrap();
        assert!(!outcomes[0].success);
        assert!(outcomes[0].message.is_some());
    }
}
