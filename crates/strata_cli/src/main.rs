//! Strata CLI - Main entry point.
//!
//! Exit codes:
//! - 0: Success
//! - 1: General error
//! - 2: Invalid arguments
//! - 3: Validation failure
//! - 4: Feature flag error

use std::process::ExitCode;

use clap::Parser;
use thiserror::Error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;
mod manifest;

use commands::{Cli, Commands};
use strata_constructs::ConstructError;
use strata_core::CoreError;

/// CI-friendly exit codes
pub struct ExitCodes;

impl ExitCodes {
    pub const SUCCESS: u8 = 0;
    pub const GENERAL_ERROR: u8 = 1;
    pub const INVALID_ARGS: u8 = 2;
    pub const VALIDATION_FAILURE: u8 = 3;
    pub const FLAG_ERROR: u8 = 4;
}

/// Errors raised by the CLI itself.
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose {
        "strata=debug"
    } else if cli.quiet {
        "strata=warn"
    } else {
        "strata=info"
    };

    // Initialize logging
    let mut filter = EnvFilter::from_default_env();
    for directive in [level, "warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }
    let log_result = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .try_init();

    if log_result.is_err() {
        // Logging already initialized, continue
    }

    let result = match cli.command {
        Commands::Init(args) => commands::init::execute(args),
        Commands::Synth(args) => commands::synth::execute(args),
        Commands::Flags(args) => commands::flags::execute(args),
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
    for cause in e.chain() {
        if let Some(CliError::InvalidArgument(_)) = cause.downcast_ref::<CliError>() {
            return ExitCodes::INVALID_ARGS;
        }
        if let Some(err) = cause.downcast_ref::<ConstructError>() {
            return match err {
                ConstructError::Core(core) => categorize_core(core),
                ConstructError::InvalidProps { .. } => ExitCodes::VALIDATION_FAILURE,
            };
        }
        if let Some(err) = cause.downcast_ref::<CoreError>() {
            return categorize_core(err);
        }
    }
    ExitCodes::GENERAL_ERROR
}

fn categorize_core(e: &CoreError) -> u8 {
    match e {
        CoreError::RetiredFlag { .. } => ExitCodes::FLAG_ERROR,
        CoreError::Validation { .. } | CoreError::UnresolvedToken { .. } | CoreError::TokenType { .. } => {
            ExitCodes::VALIDATION_FAILURE
        }
        CoreError::DuplicateScope { .. }
        | CoreError::InvalidScopeId { .. }
        | CoreError::ContextLocked { .. }
        | CoreError::DuplicateLogicalId { .. } => ExitCodes::INVALID_ARGS,
        _ => ExitCodes::GENERAL_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_categorize_error() {
        let err = anyhow::Error::new(CoreError::RetiredFlag {
            flag: "old".to_string(),
            path: "<root>".to_string(),
        });
        assert_eq!(categorize_error(&err), ExitCodes::FLAG_ERROR);

        let err: anyhow::Result<()> = Err(ConstructError::from(CoreError::Validation {
            path: "Stack/Q".to_string(),
            message: "bad".to_string(),
        }))
        .context("Failed to build resource 'Q'");
        assert_eq!(categorize_error(&err.unwrap_err()), ExitCodes::VALIDATION_FAILURE);

        let err = anyhow::Error::new(CliError::InvalidArgument("x".to_string()));
        assert_eq!(categorize_error(&err), ExitCodes::INVALID_ARGS);

        assert_eq!(categorize_error(&anyhow::anyhow!("boom")), ExitCodes::GENERAL_ERROR);
    }
}
