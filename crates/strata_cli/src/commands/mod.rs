//! CLI command definitions.
//!
//! Each subcommand maps to one step of working with a Strata app: recording
//! the project context, synthesizing a manifest, and inspecting flags.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use tracing::debug;

use strata_core::{parse_context_arg, App, ContextFile, FlagRegistry, CONTEXT_FILE};

use crate::CliError;

pub mod flags;
pub mod init;
pub mod synth;

/// Strata - typed infrastructure constructs
#[derive(Parser)]
#[command(name = "strata")]
#[command(version, about = "Strata - typed infrastructure constructs")]
#[command(long_about = r#"
Strata turns an app manifest into a resource template. Feature flags in the
project context select between legacy and current behavior.

COMMANDS:
  init   → Write a context file with the recommended flag values
  synth  → Validate a manifest and render its template
  flags  → Show the effective value of every feature flag

EXIT CODES:
  0 - Success
  1 - General error
  2 - Invalid arguments
  3 - Validation failure
  4 - Feature flag error
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
    /// Write a context file with the recommended flag values
    Init(init::InitArgs),

    /// Synthesize an app manifest into a template
    Synth(synth::SynthArgs),

    /// List feature flags and their effective values
    Flags(flags::FlagsArgs),
}

/// Context and flag registry options shared by commands.
#[derive(Args, Debug, Clone, Default)]
pub struct ConfigArgs {
    /// Context value as key=value (repeatable); JSON literals keep their type
    #[arg(short = 'c', long = "context", value_name = "KEY=VALUE")]
    pub context: Vec<String>,

    /// Context file (defaults to strata.json next to the manifest or in the current directory)
    #[arg(long, env = "STRATA_CONTEXT_FILE")]
    pub context_file: Option<PathBuf>,

    /// YAML file with additional flag definitions
    #[arg(long, env = "STRATA_FLAGS_FILE")]
    pub flags_file: Option<PathBuf>,
}

impl ConfigArgs {
    /// The flag registry: built-in flags plus the flags file, if any.
    pub fn registry(&self) -> Result<FlagRegistry> {
        let mut registry = FlagRegistry::current();
        if let Some(path) = &self.flags_file {
            let extra = FlagRegistry::load(path)
                .with_context(|| format!("Failed to load flags file {}", path.display()))?;
            registry.merge(extra);
        }
        Ok(registry)
    }

    /// The context file in effect, if any.
    pub fn context_file(&self, base_dir: &Path) -> Result<Option<ContextFile>> {
        let path = match &self.context_file {
            Some(path) => path.clone(),
            None => {
                let default = base_dir.join(CONTEXT_FILE);
                if !default.exists() {
                    debug!("No context file at {}", default.display());
                    return Ok(None);
                }
                default
            }
        };

        let file = ContextFile::load(&path)
            .with_context(|| format!("Failed to load context file {}", path.display()))?;
        Ok(Some(file))
    }

    /// The `-c` arguments as key/value pairs.
    pub fn overrides(&self) -> Result<Vec<(String, Value)>> {
        let mut overrides = Vec::with_capacity(self.context.len());
        for arg in &self.context {
            let pair = parse_context_arg(arg).map_err(|e| CliError::InvalidArgument(e.to_string()))?;
            overrides.push(pair);
        }
        Ok(overrides)
    }

    /// Context values from the file, overridden by `-c` arguments.
    pub fn context(&self, base_dir: &Path) -> Result<ContextFile> {
        let mut context = self.context_file(base_dir)?.unwrap_or_default();
        context.context.extend(self.overrides()?);
        Ok(context)
    }

    /// An app with the registry and root context applied.
    pub fn build_app(&self, base_dir: &Path) -> Result<App> {
        let mut app = App::new(self.registry()?);
        app.apply_context_file(&self.context(base_dir)?)?;
        Ok(app)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_command_line_context_overrides_file() {
        let temp = tempdir().unwrap();
        fs::write(
            temp.path().join(CONTEXT_FILE),
            r#"{ "context": { "a": true, "b": 1 } }"#,
        )
        .unwrap();

        let args = ConfigArgs {
            context: vec!["a=false".to_string(), "c=text".to_string()],
            ..Default::default()
        };
        let context = args.context(temp.path()).unwrap();

        assert_eq!(context.context["a"], json!(false));
        assert_eq!(context.context["b"], json!(1));
        assert_eq!(context.context["c"], json!("text"));
    }

    #[test]
    fn test_missing_default_context_file_is_fine() {
        let temp = tempdir().unwrap();
        let args = ConfigArgs::default();

        assert!(args.context_file(temp.path()).unwrap().is_none());
    }

    #[test]
    fn test_explicit_context_file_must_exist() {
        let temp = tempdir().unwrap();
        let args = ConfigArgs {
            context_file: Some(temp.path().join("missing.json")),
            ..Default::default()
        };

        assert!(args.context_file(temp.path()).is_err());
    }

    #[test]
    fn test_malformed_context_arg() {
        let temp = tempdir().unwrap();
        let args = ConfigArgs {
            context: vec!["novalue".to_string()],
            ..Default::default()
        };

        let err = args.context(temp.path()).unwrap_err();
        assert!(err.downcast_ref::<CliError>().is_some());
    }

    #[test]
    fn test_flags_file_extends_registry() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("flags.yaml");
        fs::write(&path, "flags:\n  - name: '@acme/custom:flag'\n    default: true\n").unwrap();

        let args = ConfigArgs {
            flags_file: Some(path),
            ..Default::default()
        };
        let app = args.build_app(temp.path()).unwrap();

        assert_eq!(app.is_enabled(app.root(), "@acme/custom:flag").unwrap(), Some(true));
    }
}
