//! kiln CLI - Main entry point.
//!
//! Exit codes:
//! - 0: Success
//! - 1: General error
//! - 2: Invalid arguments
//! - 3: Validation failure
//! - 4: Template error
//! - 5: Submission failure

use std::process::ExitCode;

use clap::Parser;
use kiln_engine::EngineError;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;
mod submitter;

use commands::{Cli, Commands};

/// CI-friendly exit codes
pub struct ExitCodes;

impl ExitCodes {
    pub const SUCCESS: u8 = 0;
    pub const GENERAL_ERROR: u8 = 1;
    pub const INVALID_ARGS: u8 = 2;
    pub const VALIDATION_FAILURE: u8 = 3;
    pub const TEMPLATE_ERROR: u8 = 4;
    pub const SUBMISSION_FAILURE: u8 = 5;
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("kiln={},warn", level)));
    // Logging may already be initialized; keep going either way.
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .try_init();

    let result = match cli.command {
        Commands::Preview(args) => commands::preview::execute(args).await,
        Commands::Apply(args) => commands::apply::execute(args).await,
        Commands::Lint(args) => commands::lint::execute(args).await,
        Commands::Variables(args) => commands::variables::execute(args).await,
    };

    match result {
        Ok(()) => ExitCode::from(ExitCodes::SUCCESS),
        Err(e) => {
            let exit_code = categorize_error(&e);
            eprintln!("Error: {:#}", e);
            ExitCode::from(exit_code)
        }
    }
}

/// Categorize error to determine exit code
fn categorize_error(e: &anyhow::Error) -> u8 {
    if let Some(engine) = e.downcast_ref::<EngineError>() {
        return match engine {
            EngineError::InvalidVariableName(_)
            | EngineError::TemplateCorrupt { .. }
            | EngineError::NumericCoercion { .. } => ExitCodes::TEMPLATE_ERROR,
            EngineError::NotFound { .. } | EngineError::PermissionDenied { .. } => {
                ExitCodes::INVALID_ARGS
            }
            EngineError::Collaborator(_) => ExitCodes::SUBMISSION_FAILURE,
            EngineError::Cancelled | EngineError::Store(_) => ExitCodes::GENERAL_ERROR,
        };
    }

    let msg = e.to_string().to_lowercase();
    if msg.contains("validation") {
        ExitCodes::VALIDATION_FAILURE
    } else if msg.contains("template") {
        ExitCodes::TEMPLATE_ERROR
    } else if msg.contains("submission") {
        ExitCodes::SUBMISSION_FAILURE
    } else if msg.contains("argument") || msg.contains("not found") {
        ExitCodes::INVALID_ARGS
    } else {
        ExitCodes::GENERAL_ERROR
    }
}
