//! Preview command - Compile a snapshot and print the bundle.

use std::collections::BTreeMap;

use anyhow::{bail, Result};
use clap::{Args, ValueEnum};
use kiln_engine::{ManifestBundle, Mode};
use tracing::info;

use super::{print_failures, run, Session, TargetArgs};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Yaml,
    Json,
}

#[derive(Args)]
pub struct PreviewArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Output format of the bundle
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Yaml)]
    pub format: OutputFormat,

    /// Print only the manifests, without the resolved context
    #[arg(long)]
    pub manifests_only: bool,
}

pub async fn execute(args: PreviewArgs) -> Result<()> {
    let session = Session::open(&args.target.workspace.workspace)?;
    let multi = session.request(&args.target, Mode::Preview)?;
    info!(
        "Previewing snapshot {} for {} namespace(s)",
        multi.snapshot_id,
        multi.namespace_ids.len()
    );

    let driver = session.driver();
    let results = run(&driver, &multi).await;

    let mut bundles = BTreeMap::new();
    let mut failed = 0;
    for (namespace_id, result) in results {
        let report = result?;
        if !report.is_success() {
            eprintln!("⚠️  {} ({}):", report.namespace, namespace_id);
            print_failures(&report);
            failed += report.failed.len();
        }
        bundles.insert(report.namespace.clone(), report.bundle);
    }

    println!("{}", render(&bundles, args.format, args.manifests_only)?);

    if failed > 0 {
        bail!("{} template(s) failed to compile", failed);
    }
    Ok(())
}

/// Render bundles keyed by namespace name. A single namespace prints its
/// bundle unwrapped.
fn render(
    bundles: &BTreeMap<String, ManifestBundle>,
    format: OutputFormat,
    manifests_only: bool,
) -> Result<String> {
    let value = if manifests_only {
        let per_namespace: BTreeMap<&String, Vec<&serde_json::Value>> = bundles
            .iter()
            .map(|(ns, bundle)| (ns, bundle.iter().map(|(_, e)| &e.manifest).collect()))
            .collect();
        match per_namespace.values().next() {
            Some(only) if per_namespace.len() == 1 => serde_json::to_value(only)?,
            _ => serde_json::to_value(&per_namespace)?,
        }
    } else {
        match bundles.values().next() {
            Some(only) if bundles.len() == 1 => serde_json::to_value(only)?,
            _ => serde_json::to_value(bundles)?,
        }
    };

    Ok(match format {
        OutputFormat::Yaml => serde_yaml::to_string(&value)?,
        OutputFormat::Json => serde_json::to_string_pretty(&value)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::{target, workspace};

    #[tokio::test]
    async fn test_preview_renders_override() {
        let temp = workspace();
        let args = target(temp.path());
        let session = Session::open(temp.path()).unwrap();
        let multi = session.request(&args, Mode::Preview).unwrap();

        let results = run(&session.driver(), &multi).await;
        let report = results["ns1"].as_ref().unwrap();
        assert!(report.is_success());

        let mut bundles = BTreeMap::new();
        bundles.insert(report.namespace.clone(), report.bundle.clone());
        let yaml = render(&bundles, OutputFormat::Yaml, true).unwrap();
        assert!(yaml.contains("text: bonjour"));
        assert!(yaml.contains("namespace: default"));

        let json = render(&bundles, OutputFormat::Json, false).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["cm"][0]["name"], "greeting");
        assert_eq!(value["cm"][0]["context"]["GREETING"], "bonjour");
    }

    #[tokio::test]
    async fn test_execute_preview() {
        let temp = workspace();
        let args = PreviewArgs {
            target: target(temp.path()),
            format: OutputFormat::Json,
            manifests_only: false,
        };
        execute(args).await.unwrap();
    }
}
