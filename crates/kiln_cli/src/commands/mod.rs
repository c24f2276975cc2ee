//! CLI command definitions.
//!
//! Each subcommand opens a workspace directory and drives the engine over
//! it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context as _, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use kiln_engine::{
    CancellationFlag, CompilationDriver, CompilationReport, EngineConfig, EngineResult, Mode,
    MultiInstantiation, Selection, StaticRegistry,
};
use tracing::warn;
use kiln_store::{
    NamespaceRecord, ResourceKind, SnapshotId, TemplateRepository, VariableStore, WorkspaceLoader,
};

pub mod apply;
pub mod lint;
pub mod preview;
pub mod variables;

/// kiln - template-to-manifest compiler for container workloads
#[derive(Parser)]
#[command(name = "kiln")]
#[command(version, about = "kiln - template-to-manifest compiler for container workloads")]
#[command(long_about = r#"
kiln compiles parameterized resource templates into orchestrator manifests
for one or more namespaces.

COMMANDS:
  preview    → Compile a snapshot and print the manifest bundle
  apply      → Compile, write manifests and record instances
  lint       → Check template placeholders
  variables  → Show the resolved variable table of a namespace

EXIT CODES:
  0 - Success
  1 - General error
  2 - Invalid arguments
  3 - Validation failure
  4 - Template error
  5 - Submission failure
"#)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Compile a snapshot without submitting anything
    Preview(preview::PreviewArgs),

    /// Compile a snapshot and submit the manifests
    Apply(apply::ApplyArgs),

    /// Check the placeholders of every template in the workspace
    Lint(lint::LintArgs),

    /// Show the variables resolved for a namespace
    Variables(variables::VariablesArgs),
}

/// Workspace location shared by every command.
#[derive(Args, Clone, Debug)]
pub struct WorkspaceArgs {
    /// Workspace directory holding kiln.yaml
    #[arg(short, long, env = "KILN_WORKSPACE", default_value = ".")]
    pub workspace: PathBuf,
}

/// What to compile and where.
#[derive(Args, Clone, Debug)]
pub struct TargetArgs {
    #[command(flatten)]
    pub workspace: WorkspaceArgs,

    /// Template group the snapshot must belong to
    #[arg(short, long)]
    pub group: Option<String>,

    /// Snapshot id to compile
    #[arg(short, long, conflicts_with = "show")]
    pub snapshot: Option<SnapshotId>,

    /// Show version whose current snapshot is compiled
    #[arg(long)]
    pub show: Option<String>,

    /// Target namespace id or name; repeat for several namespaces
    #[arg(short, long = "namespace", required = true)]
    pub namespaces: Vec<String>,

    /// Restrict compilation to `kind=id` pairs, e.g. `deploy=1,svc=3`
    #[arg(long, value_delimiter = ',')]
    pub select: Vec<String>,

    /// Actor recorded as creator and updater
    #[arg(long, default_value = "kiln")]
    pub actor: String,
}

/// Parse `kind=id` pairs into a selection.
pub fn parse_selection(pairs: &[String]) -> Result<Selection> {
    let mut selection = Selection::new();
    for pair in pairs.iter().map(|p| p.trim()).filter(|p| !p.is_empty()) {
        let Some((kind, id)) = pair.split_once('=') else {
            bail!("invalid selection argument '{}': expected kind=id", pair);
        };
        let kind = ResourceKind::parse(kind.trim())
            .with_context(|| format!("invalid selection argument '{}': unknown kind", pair))?;
        let id = id
            .trim()
            .parse()
            .with_context(|| format!("invalid selection argument '{}': bad template id", pair))?;
        let ids = selection.entry(kind).or_default();
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    Ok(selection)
}

/// A loaded workspace, ready to drive the engine.
pub struct Session {
    pub root: PathBuf,
    pub namespaces: Vec<NamespaceRecord>,
    pub variables: Arc<VariableStore>,
    pub templates: Arc<TemplateRepository>,
    pub registry: Arc<StaticRegistry>,
    pub config: EngineConfig,
}

impl Session {
    pub fn open(root: &Path) -> Result<Self> {
        let workspace = WorkspaceLoader::new(root)
            .load()
            .with_context(|| format!("Failed to load workspace at {}", root.display()))?;
        let config = EngineConfig::from_yaml(workspace.engine)
            .context("Invalid engine section in kiln.yaml")?;
        let registry = StaticRegistry::new(
            workspace.namespaces.clone(),
            workspace.projects,
            workspace.clusters,
        );

        Ok(Self {
            root: workspace.root,
            namespaces: workspace.namespaces,
            variables: Arc::new(workspace.variables),
            templates: Arc::new(workspace.templates),
            registry: Arc::new(registry),
            config,
        })
    }

    pub fn driver(&self) -> CompilationDriver {
        CompilationDriver::new(
            self.variables.clone(),
            self.templates.clone(),
            self.registry.clone(),
            self.registry.clone(),
        )
        .with_config(self.config.clone())
    }

    /// Namespace id for an id or name given on the command line.
    pub fn namespace_id(&self, id_or_name: &str) -> Result<String> {
        self.namespaces
            .iter()
            .find(|n| n.id == id_or_name)
            .or_else(|| self.namespaces.iter().find(|n| n.name == id_or_name))
            .map(|n| n.id.clone())
            .with_context(|| format!("Namespace not found: {}", id_or_name))
    }

    /// Snapshot selected by `--snapshot` or `--show`, checked against
    /// `--group` when given.
    pub fn snapshot_id(&self, args: &TargetArgs) -> Result<SnapshotId> {
        let id = match (&args.snapshot, &args.show) {
            (Some(id), _) => *id,
            (None, Some(show)) => self.templates.get_show_version(show)?.current_snapshot_id,
            (None, None) => bail!("missing argument: --snapshot or --show is required"),
        };
        let snapshot = self.templates.get_snapshot(id)?;
        if let Some(group) = &args.group {
            if &snapshot.template_group_id != group {
                bail!(
                    "invalid argument: snapshot {} belongs to group {}, not {}",
                    id,
                    snapshot.template_group_id,
                    group
                );
            }
        }
        Ok(id)
    }

    /// Build the multi-namespace request described by `args`.
    pub fn request(&self, args: &TargetArgs, mode: Mode) -> Result<MultiInstantiation> {
        let snapshot_id = self.snapshot_id(args)?;
        let mut namespace_ids = Vec::new();
        for ns in &args.namespaces {
            let id = self.namespace_id(ns)?;
            if !namespace_ids.contains(&id) {
                namespace_ids.push(id);
            }
        }

        Ok(MultiInstantiation {
            snapshot_id,
            namespace_ids,
            selection: parse_selection(&args.select)?,
            mode,
            actor: args.actor.clone(),
            requested_at: Utc::now(),
        })
    }
}

/// Compile `multi` with Ctrl-C wired to cancellation.
pub async fn run(
    driver: &CompilationDriver,
    multi: &MultiInstantiation,
) -> BTreeMap<String, EngineResult<CompilationReport>> {
    let cancel = CancellationFlag::new();
    let listener = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling namespaces not yet started");
                cancel.cancel();
            }
        })
    };

    let results = driver.compile_many(multi, &cancel).await;
    listener.abort();
    results
}

/// Print the failure list of a report.
pub fn print_failures(report: &CompilationReport) {
    for failure in &report.failed {
        println!(
            "   ❌ {}/{} [{}]: {}",
            failure.kind, failure.name, failure.class, failure.message
        );
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    pub(crate) const WORKSPACE: &str = r#"
engine:
  label_domain: acme.dev
clusters:
  - id: c1
    version: v1.24.3
projects:
  - id: p1
    registry_domain: hub.acme.io
    log_pipeline_ids: [lp-1]
namespaces:
  - id: ns1
    name: default
    cluster_id: c1
    project_id: p1
variables:
  - id: 1
    key: GREETING
    name: Greeting
    scope: namespace
    default_value: hello
    category: custom
overrides:
  - variable_id: 1
    target_id: ns1
    value: bonjour
templates:
  - id: 1
    kind: ConfigMap
    file: cm.yaml
snapshots:
  - id: 1
    template_group_id: web
    entity_map:
      ConfigMap: [1]
show_versions:
  - name: stable
    template_group_id: web
    current_snapshot_id: 1
"#;

    pub(crate) fn workspace() -> TempDir {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("kiln.yaml"), WORKSPACE).unwrap();
        fs::create_dir_all(temp.path().join("templates")).unwrap();
        fs::write(
            temp.path().join("templates/cm.yaml"),
            "metadata:\n  name: greeting\ndata:\n  text: \"{{GREETING}}\"\n",
        )
        .unwrap();
        temp
    }

    pub(crate) fn target(root: &Path) -> TargetArgs {
        TargetArgs {
            workspace: WorkspaceArgs {
                workspace: root.to_path_buf(),
            },
            group: Some("web".into()),
            snapshot: None,
            show: Some("stable".into()),
            namespaces: vec!["default".into()],
            select: vec![],
            actor: "tester".into(),
        }
    }

    #[test]
    fn test_parse_selection() {
        let selection = parse_selection(&["deploy=1".into(), "svc=3".into(), "deploy=1".into()]).unwrap();
        assert_eq!(selection[&ResourceKind::Deployment], vec![1]);
        assert_eq!(selection[&ResourceKind::Service], vec![3]);

        assert!(parse_selection(&["widget=1".into()]).is_err());
        assert!(parse_selection(&["deploy".into()]).is_err());
        assert!(parse_selection(&["deploy=x".into()]).is_err());
    }

    #[test]
    fn test_session_resolves_targets() {
        let temp = workspace();
        let session = Session::open(temp.path()).unwrap();
        assert_eq!(session.config.label_domain, "acme.dev");
        assert_eq!(session.namespace_id("default").unwrap(), "ns1");
        assert!(session.namespace_id("prod").is_err());

        let mut args = target(temp.path());
        assert_eq!(session.snapshot_id(&args).unwrap(), 1);
        args.group = Some("api".into());
        assert!(session.snapshot_id(&args).is_err());
    }

    #[test]
    fn test_request_dedups_namespaces() {
        let temp = workspace();
        let session = Session::open(temp.path()).unwrap();
        let mut args = target(temp.path());
        args.namespaces = vec!["default".into(), "ns1".into()];
        args.select = vec!["cm=1".into()];

        let multi = session.request(&args, Mode::Apply).unwrap();
        assert_eq!(multi.namespace_ids, vec!["ns1".to_string()]);
        assert_eq!(multi.selection[&ResourceKind::ConfigMap], vec![1]);
        assert_eq!(multi.actor, "tester");
    }
}
