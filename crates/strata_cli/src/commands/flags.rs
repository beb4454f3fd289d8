//! Flags command - Show the effective value of every feature flag.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use strata_core::{App, ContextFile, FlagDefaults};

use super::ConfigArgs;

#[derive(Args)]
pub struct FlagsArgs {
    /// Directory holding the context file (defaults to current directory)
    #[arg(short, long)]
    path: Option<PathBuf>,

    /// Print the recommended context instead of the effective values
    #[arg(long)]
    recommended: bool,

    /// Print JSON instead of a table
    #[arg(long)]
    json: bool,

    #[command(flatten)]
    config: ConfigArgs,
}

/// Effective state of one flag at the app root.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlagReport {
    pub name: String,
    pub enabled: Option<bool>,
    pub default: Option<bool>,
    /// Whether the value comes from context.
    pub from_context: bool,
    pub retired: bool,
}

pub fn execute(args: FlagsArgs) -> Result<()> {
    let dir = match &args.path {
        Some(path) => path.clone(),
        None => std::env::current_dir().context("Failed to read the current directory")?,
    };

    if args.recommended {
        let file = ContextFile {
            context: args.config.registry()?.recommended_context(),
        };
        println!("{}", serde_json::to_string_pretty(&file)?);
        return Ok(());
    }

    let app = args.config.build_app(&dir)?;
    let reports = report(&app)?;
    let unknown = unknown_context_keys(&app);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(());
    }

    for flag in &reports {
        let state = match (flag.retired, flag.enabled) {
            (true, _) => "retired (always enabled)".to_string(),
            (false, Some(enabled)) => enabled.to_string(),
            (false, None) => "unset".to_string(),
        };
        let source = if flag.from_context { " [context]" } else { "" };
        println!("{:<55} {}{}", flag.name, state, source);
    }
    for key in unknown {
        println!("{:<55} unknown flag in context", key);
    }
    Ok(())
}

/// Resolve every registered and retired flag at the app root.
///
/// Fails on the first retired flag that is set in context.
pub fn report(app: &App) -> Result<Vec<FlagReport>> {
    let root = app.root();
    let registry = app.registry();
    let mut reports = Vec::new();

    for definition in registry.flags() {
        reports.push(FlagReport {
            name: definition.name.clone(),
            enabled: app.is_enabled(root, &definition.name)?,
            default: definition.default,
            from_context: app.tree().try_get_context(root, &definition.name).is_some(),
            retired: registry.is_retired(&definition.name),
        });
    }

    for flag in registry.retired() {
        if registry.get(flag).is_some() {
            continue;
        }
        reports.push(FlagReport {
            name: flag.to_string(),
            enabled: app.is_enabled(root, flag)?,
            default: None,
            from_context: false,
            retired: true,
        });
    }

    info!("Resolved {} flag(s)", reports.len());
    Ok(reports)
}

/// Context keys that look like flags but are not registered.
fn unknown_context_keys(app: &App) -> Vec<String> {
    let registry = app.registry();
    app.tree()
        .local_context(app.root())
        .map(|context| {
            context
                .iter()
                .filter(|(key, value)| key.starts_with('@') && matches!(value, Value::Bool(_)))
                .filter(|(key, _)| registry.get(key).is_none() && !registry.is_retired(key))
                .map(|(key, _)| key.clone())
                .collect()
        })
        .unwrap_or_default()
}
