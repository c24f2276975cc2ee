//! # kiln_engine
//!
//! Compiles parameterized resource templates into orchestrator manifests for
//! one or more target namespaces.
//!
//! # Features
//!
//! - **Variable resolution**: `{{KEY}}` placeholders resolved per cluster and
//!   namespace, substituted textually before parsing
//! - **Per-kind generators**: Deployment, StatefulSet, DaemonSet, Job,
//!   Service, ConfigMap, Secret, Ingress and HorizontalPodAutoscaler
//! - **Preview and apply**: dry-run bundles, or submission with an instance
//!   ledger kept per `(name, namespace, kind)`
//! - **Multi-namespace runs**: one task per namespace, bounded and cancellable
//! - **Mock submitter**: for testing without a cluster
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use kiln_engine::{CompilationDriver, Instantiation, Mode, StaticRegistry};
//! use kiln_store::{TemplateRepository, VariableStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = Arc::new(StaticRegistry::default());
//!     let driver = CompilationDriver::new(
//!         Arc::new(VariableStore::new()),
//!         Arc::new(TemplateRepository::new()),
//!         registry.clone(),
//!         registry,
//!     );
//!
//!     let report = driver.compile(&Instantiation::new(1, "ns-1", Mode::Preview)).await?;
//!     println!("{} manifest(s)", report.bundle.len());
//!     Ok(())
//! }
//! ```

pub mod collaborators;
pub mod config;
pub mod context;
pub mod driver;
pub mod error;
pub mod generators;
pub mod instantiation;
pub mod lint;
pub mod manifest;
pub mod mock;
pub mod renderer;
pub mod resolver;

pub use collaborators::{
    AllowAll, ClusterVersionProbe, ManifestSubmitter, PermissionGate, ProjectRegistry,
    StaticRegistry, SubmissionOutcome,
};
pub use config::EngineConfig;
pub use context::{ClusterVersion, Context, ContextBuilder};
pub use driver::{CancellationFlag, CompilationDriver, CompilationReport, CompilationState};
pub use error::{EngineError, EngineResult};
pub use generators::{CrossRefIndex, Generated, GenerationRequest, KindGenerator};
pub use instantiation::{select_all, Instantiation, Mode, MultiInstantiation, Selection};
pub use lint::{TemplateLinter, ValidationResult};
pub use manifest::{BundleEntry, FailureEntry, Manifest, ManifestBundle, ResourceRef};
pub use mock::MockSubmitter;
pub use renderer::TemplateRenderer;
pub use resolver::{ResolvedVariables, VariableResolver};
