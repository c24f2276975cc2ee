//! Apply command - Compile a snapshot, write the manifests and record the
//! instances.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context as _, Result};
use clap::Args;
use kiln_engine::Mode;
use kiln_store::{load_ledger, save_ledger};
use tracing::info;

use super::{print_failures, run, Session, TargetArgs};
use crate::submitter::FileSubmitter;

/// Ledger file kept next to the written manifests.
pub const LEDGER_FILE: &str = "instances.yaml";

#[derive(Args)]
pub struct ApplyArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Directory manifests are written to (defaults to `<workspace>/out`)
    #[arg(short, long, env = "KILN_OUTPUT")]
    pub output: Option<PathBuf>,
}

pub async fn execute(args: ApplyArgs) -> Result<()> {
    let session = Session::open(&args.target.workspace.workspace)?;
    let multi = session.request(&args.target, Mode::Apply)?;
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| session.root.join("out"));
    let ledger_path = output.join(LEDGER_FILE);

    let ledger = load_ledger(&ledger_path)
        .with_context(|| format!("Failed to read {}", ledger_path.display()))?;
    let driver = session
        .driver()
        .with_ledger(Arc::new(ledger))
        .with_submitter(Arc::new(FileSubmitter::new(&output)));

    info!(
        "Applying snapshot {} to {} namespace(s)",
        multi.snapshot_id,
        multi.namespace_ids.len()
    );
    let results = run(&driver, &multi).await;

    // Persist whatever was recorded before reporting errors.
    save_ledger(&ledger_path, driver.ledger())
        .with_context(|| format!("Failed to write {}", ledger_path.display()))?;

    let mut failed = 0;
    for (namespace_id, result) in results {
        let report = result.with_context(|| format!("Namespace {} failed", namespace_id))?;
        if report.is_success() {
            println!(
                "✅ {}: {} manifest(s) written to {}",
                report.namespace,
                report.succeeded.len(),
                output.join(&report.namespace).display()
            );
        } else {
            println!(
                "⚠️  {}: {} written, {} failed",
                report.namespace,
                report.succeeded.len(),
                report.failed.len()
            );
            print_failures(&report);
            failed += report.failed.len();
        }
    }

    if failed > 0 {
        bail!("submission failed for {} resource(s)", failed);
    }
    Ok(())
}
