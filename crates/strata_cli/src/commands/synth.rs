//! Synth command - Validate a manifest and render its template.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use strata_core::{parse_context_arg, RenderInputs, Template};

use super::ConfigArgs;
use crate::manifest::AppManifest;
use crate::CliError;

#[derive(Args)]
pub struct SynthArgs {
    /// App manifest (YAML)
    manifest: PathBuf,

    /// Parameter value as Name=value (repeatable)
    #[arg(short = 'p', long = "parameter", value_name = "NAME=VALUE")]
    parameters: Vec<String>,

    /// Write the template here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[command(flatten)]
    config: ConfigArgs,
}

pub fn execute(args: SynthArgs) -> Result<()> {
    let template = synthesize(&args.manifest, &args.config, &args.parameters)?;
    let rendered = template.to_json_pretty()?;

    for warning in &template.warnings {
        eprintln!("Warning at {}: {}", warning.path, warning.message);
    }

    match &args.output {
        Some(path) => {
            std::fs::write(path, rendered)
                .with_context(|| format!("Failed to write template to {}", path.display()))?;
            println!("Template written to {}", path.display());
        }
        None => println!("{}", rendered),
    }
    Ok(())
}

/// Parse `Name=value` parameter arguments.
pub fn render_inputs(parameters: &[String]) -> Result<RenderInputs> {
    let mut inputs = RenderInputs::new();
    for arg in parameters {
        let (name, value) =
            parse_context_arg(arg).map_err(|e| CliError::InvalidArgument(e.to_string()))?;
        inputs.insert(name, value);
    }
    Ok(inputs)
}

/// Build the app described by `manifest` and synthesize it.
pub fn synthesize(manifest: &Path, config: &ConfigArgs, parameters: &[String]) -> Result<Template> {
    let inputs = render_inputs(parameters)?;
    let base_dir = manifest
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let mut app = config.build_app(base_dir)?;
    AppManifest::load(manifest)?.build(&mut app)?;

    info!("Synthesizing {}", manifest.display());
    let template = app.synth(&inputs)?;
    info!("Rendered {} resource(s)", template.resources.len());
    Ok(template)
}
