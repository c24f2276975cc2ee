//! Mock manifest submitter for testing.
//!
//! Records every submission and reports scripted outcomes, so apply-mode
//! compilations can be exercised without an orchestrator.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kiln_store::ResourceKind;
use parking_lot::RwLock;

use crate::collaborators::{ManifestSubmitter, SubmissionOutcome};
use crate::error::{EngineError, EngineResult};
use crate::manifest::Manifest;

/// Captured submission for verification.
#[derive(Debug, Clone)]
pub struct CapturedSubmission {
    pub namespace: String,
    pub manifests: Vec<Manifest>,
    pub submitted_at: DateTime<Utc>,
}

/// Mock submitter.
///
/// Every manifest succeeds unless its `(kind, name)` was registered with
/// [`reject`](Self::reject); [`simulate_failure`](Self::simulate_failure)
/// makes the whole call fail.
#[derive(Clone, Default)]
pub struct MockSubmitter {
    rejected: Arc<RwLock<HashSet<(ResourceKind, String)>>>,
    captured: Arc<RwLock<Vec<CapturedSubmission>>>,
    simulate_failure: Arc<RwLock<Option<String>>>,
}

impl MockSubmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report a failure for the manifest `kind/name`.
    pub fn reject(self, kind: ResourceKind, name: impl Into<String>) -> Self {
        self.rejected.write().insert((kind, name.into()));
        self
    }

    /// Fail every `apply` call with a collaborator error.
    pub fn simulate_failure(self, message: impl Into<String>) -> Self {
        *self.simulate_failure.write() = Some(message.into());
        self
    }

    pub fn submissions(&self) -> Vec<CapturedSubmission> {
        self.captured.read().clone()
    }

    pub fn call_count(&self) -> usize {
        self.captured.read().len()
    }

    /// All manifests submitted to `namespace`, across calls.
    pub fn submitted_to(&self, namespace: &str) -> Vec<Manifest> {
        self.captured
            .read()
            .iter()
            .filter(|c| c.namespace == namespace)
            .flat_map(|c| c.manifests.iter().cloned())
            .collect()
    }

    pub fn clear(&self) {
        self.captured.write().clear();
    }
}

#[async_trait]
impl ManifestSubmitter for MockSubmitter {
    async fn apply(
        &self,
        namespace: &str,
        manifests: &[Manifest],
    ) -> EngineResult<Vec<SubmissionOutcome>> {
        self.captured.write().push(CapturedSubmission {
            namespace: namespace.to_string(),
            manifests: manifests.to_vec(),
            submitted_at: Utc::now(),
        });

        if let Some(message) = self.simulate_failure.read().clone() {
            return Err(EngineError::Collaborator(message));
        }

        let rejected = self.rejected.read();
        Ok(manifests
            .iter()
            .map(|m| {
                if rejected.contains(&(m.kind, m.name.clone())) {
                    SubmissionOutcome::failure(m, "rejected by mock submitter")
                } else {
                    SubmissionOutcome::success(m)
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn manifest(name: &str) -> Manifest {
        Manifest {
            kind: ResourceKind::ConfigMap,
            name: name.to_string(),
            namespace: "default".into(),
            body: json!({}),
            origin: None,
        }
    }

    #[tokio::test]
    async fn test_records_and_rejects() {
        let submitter = MockSubmitter::new().reject(ResourceKind::ConfigMap, "bad");
        let outcomes = submitter
            .apply("default", &[manifest("good"), manifest("bad")])
            .await
            .unwrap();

        assert!(outcomes[0].success);
        assert!(!outcomes[1].success);
        assert_eq!(submitter.call_count(), 1);
        assert_eq!(submitter.submitted_to("default").len(), 2);
    }

    #[tokio::test]
    async fn test_simulated_failure() {
        let submitter = MockSubmitter::new().simulate_failure("cluster unreachable");
        let err = submitter.apply("default", &[manifest("a")]).await.unwrap_err();
        assert!(matches!(err, EngineError::Collaborator(_)));
        assert_eq!(submitter.call_count(), 1);
    }
}
