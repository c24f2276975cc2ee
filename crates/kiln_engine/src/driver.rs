//! Compilation driver.
//!
//! Runs one instantiation through `Requested -> Resolving -> Generating`
//! and then either stops at `PreviewReady` or submits the bundle and records
//! the outcome per resource.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use kiln_store::{
    InstanceKey, InstanceLedger, InstanceRecord, InstanceState, ResolutionTarget, ResourceKind,
    ResourceTemplate, TemplateRepository, VariableStore, VersionedEntity,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::collaborators::{
    AllowAll, ClusterVersionProbe, ManifestSubmitter, PermissionGate, ProjectRegistry,
    SubmissionOutcome,
};
use crate::config::EngineConfig;
use crate::context::{Context, ContextBuilder};
use crate::error::{EngineError, EngineResult};
use crate::generators::{render_document, CrossRefIndex, GenerationRequest, KindGenerator};
use crate::instantiation::{select_all, Instantiation, Mode, MultiInstantiation};
use crate::manifest::{FailureEntry, Manifest, ManifestBundle, ResourceRef};
use crate::renderer::TemplateRenderer;
use crate::resolver::{ResolvedVariables, VariableResolver};

/// Compilation state of one instantiation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CompilationState {
    #[default]
    Requested,
    Resolving,
    Generating,
    PreviewReady,
    Persisting,
    Persisted,
    PartiallyFailed,
}

/// Outcome of compiling one namespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompilationReport {
    pub namespace_id: String,
    pub namespace: String,
    pub mode: Mode,
    pub state: CompilationState,
    /// Every state the compilation passed through, in order.
    pub transitions: Vec<CompilationState>,
    pub bundle: ManifestBundle,
    /// Generated manifests in generation order, companions included.
    #[serde(skip)]
    pub manifests: Vec<Manifest>,
    pub succeeded: Vec<ResourceRef>,
    pub failed: Vec<FailureEntry>,
    /// Ledger rows written in apply mode.
    #[serde(default)]
    pub records: Vec<InstanceRecord>,
}

impl CompilationReport {
    fn new(instantiation: &Instantiation) -> Self {
        Self {
            namespace_id: instantiation.namespace_id.clone(),
            namespace: String::new(),
            mode: instantiation.mode,
            state: CompilationState::Requested,
            transitions: vec![CompilationState::Requested],
            bundle: ManifestBundle::new(),
            manifests: Vec::new(),
            succeeded: Vec::new(),
            failed: Vec::new(),
            records: Vec::new(),
        }
    }

    fn transition(&mut self, state: CompilationState) {
        debug!("{}: {:?} -> {:?}", self.namespace_id, self.state, state);
        self.state = state;
        self.transitions.push(state);
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    fn fail(&mut self, kind: ResourceKind, name: &str, class: &str, message: impl Into<String>) {
        self.failed.push(FailureEntry {
            kind,
            name: name.to_string(),
            class: class.to_string(),
            message: message.into(),
        });
    }
}

/// Shared flag stopping a multi-namespace run before its next namespace.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-namespace state prepared during `Resolving`.
struct Prepared {
    context: Context,
    templates: Vec<ResourceTemplate>,
    variables: ResolvedVariables,
    crossref: CrossRefIndex,
}

/// Orchestrates resolution, generation and submission.
#[derive(Clone)]
pub struct CompilationDriver {
    variables: Arc<VariableStore>,
    templates: Arc<TemplateRepository>,
    ledger: Arc<InstanceLedger>,
    registry: Arc<dyn ProjectRegistry>,
    probe: Arc<dyn ClusterVersionProbe>,
    gate: Arc<dyn PermissionGate>,
    submitter: Option<Arc<dyn ManifestSubmitter>>,
    config: Arc<EngineConfig>,
    renderer: TemplateRenderer,
}

impl CompilationDriver {
    pub fn new(
        variables: Arc<VariableStore>,
        templates: Arc<TemplateRepository>,
        registry: Arc<dyn ProjectRegistry>,
        probe: Arc<dyn ClusterVersionProbe>,
    ) -> Self {
        Self {
            variables,
            templates,
            ledger: Arc::new(InstanceLedger::new()),
            registry,
            probe,
            gate: Arc::new(AllowAll),
            submitter: None,
            config: Arc::new(EngineConfig::default()),
            renderer: TemplateRenderer::new(),
        }
    }

    pub fn with_ledger(mut self, ledger: Arc<InstanceLedger>) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn with_gate(mut self, gate: Arc<dyn PermissionGate>) -> Self {
        self.gate = gate;
        self
    }

    pub fn with_submitter(mut self, submitter: Arc<dyn ManifestSubmitter>) -> Self {
        self.submitter = Some(submitter);
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = Arc::new(config);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<InstanceLedger> {
        &self.ledger
    }

    /// Compile one instantiation. Per-resource errors land in the report's
    /// failure list; anything else aborts with an error.
    pub async fn compile(&self, instantiation: &Instantiation) -> EngineResult<CompilationReport> {
        let mut report = CompilationReport::new(instantiation);
        let snapshot = self.templates.get_snapshot(instantiation.snapshot_id)?;

        if !self
            .gate
            .can_instantiate(&instantiation.actor, &snapshot.template_group_id)
            .await?
        {
            warn!(
                "{} denied instantiation of {}",
                instantiation.actor, snapshot.template_group_id
            );
            return Err(EngineError::PermissionDenied {
                actor: instantiation.actor.clone(),
                template_group: snapshot.template_group_id.clone(),
            });
        }
        if instantiation.mode == Mode::Apply && self.submitter.is_none() {
            return Err(EngineError::Collaborator(
                "apply mode requires a manifest submitter".to_string(),
            ));
        }

        report.transition(CompilationState::Resolving);
        let prepared = self.prepare(&snapshot, instantiation).await?;
        report.namespace = prepared.context.namespace_name().to_string();
        info!(
            "Compiling {} template(s) of snapshot {} into {}",
            prepared.templates.len(),
            snapshot.id,
            report.namespace
        );

        report.transition(CompilationState::Generating);
        self.generate(&prepared, instantiation.mode, &mut report);

        if instantiation.mode == Mode::Preview {
            let done = if report.is_success() {
                CompilationState::PreviewReady
            } else {
                CompilationState::PartiallyFailed
            };
            report.transition(done);
            info!(
                "Preview of {}: {} generated, {} failed",
                report.namespace,
                report.succeeded.len(),
                report.failed.len()
            );
            return Ok(report);
        }

        report.transition(CompilationState::Persisting);
        self.persist(&mut report).await?;
        let done = if report.is_success() {
            CompilationState::Persisted
        } else {
            CompilationState::PartiallyFailed
        };
        report.transition(done);
        info!(
            "Apply to {}: {} persisted, {} failed",
            report.namespace,
            report.succeeded.len(),
            report.failed.len()
        );
        Ok(report)
    }

    /// Compile the same selection into several namespaces concurrently.
    ///
    /// Each namespace gets its own task; at most
    /// `max_parallel_namespaces` run at once. Namespaces not yet started
    /// when `cancel` is raised report [`EngineError::Cancelled`].
    pub async fn compile_many(
        &self,
        multi: &MultiInstantiation,
        cancel: &CancellationFlag,
    ) -> BTreeMap<String, EngineResult<CompilationReport>> {
        let permits = Arc::new(Semaphore::new(self.config.max_parallel_namespaces.max(1)));
        let mut handles = Vec::new();

        for instantiation in multi.split() {
            let driver = self.clone();
            let permits = permits.clone();
            let cancel = cancel.clone();
            let namespace_id = instantiation.namespace_id.clone();
            let handle = tokio::spawn(async move {
                let _permit = match permits.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => return Err(EngineError::Collaborator(e.to_string())),
                };
                if cancel.is_cancelled() {
                    debug!("Skipping {}: cancelled", instantiation.namespace_id);
                    return Err(EngineError::Cancelled);
                }
                driver.compile(&instantiation).await
            });
            handles.push((namespace_id, handle));
        }

        let mut results = BTreeMap::new();
        for (namespace_id, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => {
                    error!("Compilation task for {} failed: {}", namespace_id, e);
                    Err(EngineError::Collaborator(format!("compilation task failed: {}", e)))
                }
            };
            results.insert(namespace_id, result);
        }
        results
    }

    /// Every live variable resolved for a namespace.
    pub async fn resolved_variables(&self, namespace_id: &str) -> EngineResult<ResolvedVariables> {
        let namespace = self
            .registry
            .get_namespace(namespace_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Namespace", namespace_id))?;
        let target = ResolutionTarget::new(&namespace.cluster_id, &namespace.id);
        Ok(self
            .variables
            .list()
            .iter()
            .map(|v| (v.key.clone(), self.variables.resolve_value(v, &target)))
            .collect())
    }

    async fn prepare(
        &self,
        snapshot: &VersionedEntity,
        instantiation: &Instantiation,
    ) -> EngineResult<Prepared> {
        let selection = if instantiation.selection.is_empty() {
            select_all(snapshot)
        } else {
            instantiation.selection.clone()
        };
        for (kind, id) in selection.iter().flat_map(|(k, ids)| ids.iter().map(move |id| (*k, *id))) {
            if !snapshot.contains(kind, id) {
                return Err(EngineError::not_found(
                    format!("{} template in snapshot {}", kind, snapshot.id),
                    id,
                ));
            }
        }

        let context = ContextBuilder::new(self.registry.clone(), self.probe.clone())
            .build(snapshot, instantiation)
            .await?;

        let all: Vec<ResourceTemplate> = snapshot
            .entries()
            .map(|(_, id)| self.templates.get_template(id))
            .collect::<Result<_, _>>()?;
        let templates: Vec<ResourceTemplate> = selection
            .values()
            .flatten()
            .filter_map(|id| all.iter().find(|t| t.id == *id).cloned())
            .collect();

        let resolver = VariableResolver::new(self.variables.clone());
        let mut keys = resolver.harvest(templates.iter().map(|t| t.body.as_str()))?;
        keys.extend(resolver.harvest_lenient(all.iter().map(|t| t.body.as_str())));
        let variables = resolver.resolve_keys(&keys, &context.target());
        debug!("Resolved {} variable(s) for {}", variables.len(), context.namespace_name());

        let crossref = CrossRefIndex::from_documents(all.iter().filter_map(|t| {
            render_document(&self.renderer, &t.body, &variables, &context)
                .ok()
                .map(|doc| (t.kind, doc))
        }));

        Ok(Prepared {
            context,
            templates,
            variables,
            crossref,
        })
    }

    fn generate(&self, prepared: &Prepared, mode: Mode, report: &mut CompilationReport) {
        for template in &prepared.templates {
            let req = GenerationRequest {
                template,
                context: &prepared.context,
                variables: &prepared.variables,
                mode,
                crossref: &prepared.crossref,
                config: &self.config,
                renderer: &self.renderer,
            };

            match KindGenerator::for_kind(template.kind).generate(&req) {
                Ok(generated) => {
                    let resolved = self.resolved_context(template, prepared);
                    for manifest in std::iter::once(generated.manifest).chain(generated.companions) {
                        report.bundle.push(&manifest, resolved.clone());
                        report.succeeded.push(ResourceRef {
                            kind: manifest.kind,
                            name: manifest.name.clone(),
                        });
                        report.manifests.push(manifest);
                    }
                }
                Err(e) => {
                    warn!("Failed to generate {}/{}: {}", template.kind, template.name, e);
                    let name = match &e {
                        EngineError::TemplateCorrupt { name, .. }
                        | EngineError::NumericCoercion { name, .. } => name.clone(),
                        _ => template.name.clone(),
                    };
                    report.fail(template.kind, &name, e.class(), e.to_string());
                }
            }
        }
    }

    /// Context values plus the variables one template references. A
    /// non-empty variable shadows the context value of the same key.
    fn resolved_context(&self, template: &ResourceTemplate, prepared: &Prepared) -> BTreeMap<String, String> {
        let mut resolved = prepared.context.values.clone();
        for key in self.renderer.harvest(&template.body) {
            let Some(value) = prepared.variables.get(&key) else {
                continue;
            };
            if value.is_empty() && resolved.contains_key(&key) {
                continue;
            }
            resolved.insert(key, value.clone());
        }
        resolved
    }

    async fn persist(&self, report: &mut CompilationReport) -> EngineResult<()> {
        let Some(submitter) = self.submitter.as_ref() else {
            return Err(EngineError::Collaborator(
                "apply mode requires a manifest submitter".to_string(),
            ));
        };
        if report.manifests.is_empty() {
            return Ok(());
        }

        let outcomes: HashMap<(ResourceKind, String), SubmissionOutcome> =
            match submitter.apply(&report.namespace, &report.manifests).await {
                Ok(outcomes) => outcomes
                    .into_iter()
                    .map(|o| ((o.kind, o.name.clone()), o))
                    .collect(),
                Err(e) => {
                    error!("Submission to {} failed: {}", report.namespace, e);
                    report
                        .manifests
                        .iter()
                        .map(|m| {
                            ((m.kind, m.name.clone()), SubmissionOutcome::failure(m, e.to_string()))
                        })
                        .collect()
                }
            };

        let mut succeeded = Vec::new();
        for manifest in std::mem::take(&mut report.manifests) {
            let key = InstanceKey::new(&manifest.name, &report.namespace, manifest.kind);
            let outcome = outcomes
                .get(&(manifest.kind, manifest.name.clone()))
                .cloned()
                .unwrap_or_else(|| SubmissionOutcome::failure(&manifest, "no outcome reported"));

            let is_update = self.ledger.current(&key).is_some_and(|r| {
                !matches!(
                    r.state,
                    InstanceState::DeletedExternally | InstanceState::NotInstantiated
                )
            });
            let state = match (outcome.success, is_update) {
                (true, false) => InstanceState::Succeeded,
                (true, true) => InstanceState::UpdateSucceeded,
                (false, false) => InstanceState::Failed,
                (false, true) => InstanceState::UpdateFailed,
            };

            let record = self.ledger.upsert(
                &key,
                state,
                Some(manifest.body.clone()),
                outcome.message.clone(),
            );
            if outcome.success {
                succeeded.push(ResourceRef {
                    kind: manifest.kind,
                    name: manifest.name.clone(),
                });
            } else {
                warn!("Submission of {} failed: {:?}", key, outcome.message);
                report.fail(
                    manifest.kind,
                    &manifest.name,
                    "SubmissionFailed",
                    outcome.message.unwrap_or_default(),
                );
            }
            report.records.push(record);
            report.manifests.push(manifest);
        }
        report.succeeded = succeeded;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{MockPermissionGate, StaticRegistry};
    use crate::context::tests::{namespace, project};
    use crate::mock::MockSubmitter;
    use kiln_store::ClusterRecord;

    fn driver() -> (CompilationDriver, u64) {
        let templates = TemplateRepository::new();
        let cm = templates.save_template(
            ResourceKind::ConfigMap,
            r#"{"metadata": {"name": "cm1"}, "data": {"k": "v"}}"#,
        );
        let mut map = BTreeMap::new();
        map.insert(ResourceKind::ConfigMap, vec![cm.id]);
        let snapshot = templates.create_snapshot("g1", map, None).unwrap();

        let registry = Arc::new(
            StaticRegistry::default()
                .with_namespace(namespace())
                .with_project(project())
                .with_cluster(ClusterRecord {
                    id: "c1".into(),
                    version: "v1.24.0".into(),
                }),
        );
        let driver = CompilationDriver::new(
            Arc::new(VariableStore::new()),
            Arc::new(templates),
            registry.clone(),
            registry,
        );
        (driver, snapshot.id)
    }

    #[tokio::test]
    async fn test_preview_transitions() {
        let (driver, snapshot) = driver();
        let report = driver
            .compile(&Instantiation::new(snapshot, "ns1", Mode::Preview))
            .await
            .unwrap();
        assert_eq!(report.state, CompilationState::PreviewReady);
        assert_eq!(
            report.transitions,
            vec![
                CompilationState::Requested,
                CompilationState::Resolving,
                CompilationState::Generating,
                CompilationState::PreviewReady
            ]
        );
        assert_eq!(report.bundle.len(), 1);
        assert!(report.records.is_empty());
    }

    #[tokio::test]
    async fn test_permission_denied_before_generation() {
        let (driver, snapshot) = driver();
        let mut gate = MockPermissionGate::new();
        gate.expect_can_instantiate()
            .withf(|actor, group| actor.to_string() == "mallory" && group.to_string() == "g1")
            .times(1)
            .returning(|_, _| Ok(false));
        let submitter = MockSubmitter::new();
        let driver = driver
            .with_gate(Arc::new(gate))
            .with_submitter(Arc::new(submitter.clone()));

        let err = driver
            .compile(&Instantiation::new(snapshot, "ns1", Mode::Apply).actor("mallory"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::PermissionDenied { .. }));
        assert_eq!(submitter.call_count(), 0);
    }

    #[tokio::test]
    async fn test_apply_without_submitter() {
        let (driver, snapshot) = driver();
        let err = driver
            .compile(&Instantiation::new(snapshot, "ns1", Mode::Apply))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Collaborator(_)));
    }

    #[tokio::test]
    async fn test_selection_outside_snapshot() {
        let (driver, snapshot) = driver();
        let err = driver
            .compile(&Instantiation::new(snapshot, "ns1", Mode::Preview).select(ResourceKind::Secret, 99))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_submission_error_fails_every_resource() {
        let (driver, snapshot) = driver();
        let driver = driver.with_submitter(Arc::new(MockSubmitter::new().simulate_failure("down")));
        let report = driver
            .compile(&Instantiation::new(snapshot, "ns1", Mode::Apply))
            .await
            .unwrap();
        assert_eq!(report.state, CompilationState::PartiallyFailed);
        assert!(report.succeeded.is_empty());
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.records[0].state, InstanceState::Failed);
    }

    #[test]
    fn test_cancellation_flag_is_shared() {
        let flag = CancellationFlag::new();
        let other = flag.clone();
        other.cancel();
        assert!(flag.is_cancelled());
    }
}
