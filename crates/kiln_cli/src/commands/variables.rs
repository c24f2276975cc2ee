//! Variables command - Show the variables resolved for a namespace.

use anyhow::Result;
use clap::Args;
use kiln_engine::ResolvedVariables;

use super::{Session, WorkspaceArgs};

#[derive(Args)]
pub struct VariablesArgs {
    #[command(flatten)]
    pub workspace: WorkspaceArgs,

    /// Namespace id or name
    #[arg(short, long)]
    pub namespace: String,

    /// Print as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(args: VariablesArgs) -> Result<()> {
    let session = Session::open(&args.workspace.workspace)?;
    let namespace_id = session.namespace_id(&args.namespace)?;
    let resolved = session.driver().resolved_variables(&namespace_id).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&resolved)?);
    } else {
        print!("{}", table(&resolved));
    }
    Ok(())
}

fn table(resolved: &ResolvedVariables) -> String {
    let width = resolved.keys().map(String::len).max().unwrap_or(0);
    resolved
        .iter()
        .map(|(key, value)| format!("{:<width$}  {}\n", key, value, width = width))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::workspace;

    #[tokio::test]
    async fn test_resolves_namespace_override() {
        let temp = workspace();
        let session = Session::open(temp.path()).unwrap();
        let resolved = session.driver().resolved_variables("ns1").await.unwrap();
        assert_eq!(resolved["GREETING"], "bonjour");
        assert_eq!(table(&resolved), "GREETING  bonjour\n");
    }
}
