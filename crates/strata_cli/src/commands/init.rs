//! Init command - Record the recommended flag values in a context file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use strata_core::{ContextFile, CONTEXT_FILE};

use super::ConfigArgs;

#[derive(Args)]
pub struct InitArgs {
    /// Directory to initialize (defaults to current directory)
    #[arg(short, long)]
    path: Option<PathBuf>,

    /// Overwrite an existing context file
    #[arg(short, long)]
    force: bool,

    #[command(flatten)]
    config: ConfigArgs,
}

pub fn execute(args: InitArgs) -> Result<()> {
    let dir = match args.path {
        Some(path) => path,
        None => std::env::current_dir().context("Failed to read the current directory")?,
    };
    let path = write_context_file(&dir, args.force, &args.config)?;

    println!("Initialized {}", path.display());
    println!();
    println!("Next steps:");
    println!("  strata synth app.yaml");
    Ok(())
}

/// Write the recommended value of every registered flag, plus any `-c`
/// overrides, to the context file.
///
/// The file is `strata.json` in `dir` unless `--context-file` names another.
pub fn write_context_file(dir: &Path, force: bool, config: &ConfigArgs) -> Result<PathBuf> {
    let path = config
        .context_file
        .clone()
        .unwrap_or_else(|| dir.join(CONTEXT_FILE));
    if path.exists() && !force {
        anyhow::bail!(
            "Context file already exists at {}. Use --force to overwrite.",
            path.display()
        );
    }

    let mut context = config.registry()?.recommended_context();
    context.extend(config.overrides()?);

    info!("Writing {} context value(s) to {:?}", context.len(), path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    ContextFile { context }
        .save(&path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use strata_core::flags::{CLOUDFRONT_CLAMP_TTLS, EKS_NODEGROUP_NAME, SQS_MANAGED_SSE_DEFAULT};
    use tempfile::tempdir;

    #[test]
    fn test_writes_recommended_context() {
        let temp = tempdir().unwrap();
        let path = write_context_file(temp.path(), false, &ConfigArgs::default()).unwrap();

        let file = ContextFile::load(&path).unwrap();
        assert_eq!(file.context[EKS_NODEGROUP_NAME], json!(true));
        assert_eq!(file.context[SQS_MANAGED_SSE_DEFAULT], json!(true));
        assert_eq!(file.context[CLOUDFRONT_CLAMP_TTLS], json!(true));
    }

    #[test]
    fn test_refuses_to_overwrite_without_force() {
        let temp = tempdir().unwrap();
        write_context_file(temp.path(), false, &ConfigArgs::default()).unwrap();

        assert!(write_context_file(temp.path(), false, &ConfigArgs::default()).is_err());
        assert!(write_context_file(temp.path(), true, &ConfigArgs::default()).is_ok());
    }

    #[test]
    fn test_includes_flags_from_flags_file() {
        let temp = tempdir().unwrap();
        let flags = temp.path().join("flags.yaml");
        std::fs::write(
            &flags,
            "flags:\n  - name: '@acme/custom:flag'\n    default: false\n    recommended: true\n",
        )
        .unwrap();

        let config = ConfigArgs {
            flags_file: Some(flags),
            ..Default::default()
        };
        let path = write_context_file(temp.path(), false, &config).unwrap();

        let file = ContextFile::load(&path).unwrap();
        assert_eq!(file.context["@acme/custom:flag"], json!(true));
        assert_eq!(file.context[EKS_NODEGROUP_NAME], json!(true));
    }

    #[test]
    fn test_context_arguments_override_recommended_values() {
        let temp = tempdir().unwrap();
        let config = ConfigArgs {
            context: vec![format!("{}=false", SQS_MANAGED_SSE_DEFAULT)],
            context_file: Some(temp.path().join("nested").join("ctx.json")),
            ..Default::default()
        };
        let path = write_context_file(temp.path(), false, &config).unwrap();

        assert_eq!(path, temp.path().join("nested").join("ctx.json"));
        let file = ContextFile::load(&path).unwrap();
        assert_eq!(file.context[SQS_MANAGED_SSE_DEFAULT], json!(false));
    }
}
