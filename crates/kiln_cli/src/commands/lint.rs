//! Lint command - Check template placeholders.

use anyhow::{bail, Result};
use clap::Args;
use kiln_engine::TemplateLinter;
use tracing::info;

use super::{Session, WorkspaceArgs};

#[derive(Args)]
pub struct LintArgs {
    #[command(flatten)]
    pub workspace: WorkspaceArgs,

    /// Treat warnings as errors
    #[arg(long)]
    pub strict: bool,
}

pub async fn execute(args: LintArgs) -> Result<()> {
    let session = Session::open(&args.workspace.workspace)?;
    let templates = session.templates.templates();
    info!("Linting {} template(s)", templates.len());

    let linter = TemplateLinter::new(session.variables.clone());
    let result = linter.lint_templates(&templates);

    println!("📋 Checking template placeholders...");
    for error in &result.errors {
        println!("   ❌ {}", error);
    }
    for warning in &result.warnings {
        println!("   ⚠️  {}", warning);
    }

    if !result.valid {
        bail!("validation failed: {} error(s)", result.errors.len());
    }
    if args.strict && !result.warnings.is_empty() {
        bail!("validation failed: {} warning(s) in strict mode", result.warnings.len());
    }
    println!("   ✅ {} template(s) passed", templates.len());
    Ok(())
}
