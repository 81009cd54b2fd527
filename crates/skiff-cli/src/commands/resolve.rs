//! `skiff resolve` command implementation.
//!
//! Runs a single specifier resolution and prints the result — the
//! quickest way to answer "why does this import load that file".

use miette::{miette, IntoDiagnostic, Result};
use serde_json::json;
use skiff_core::{load_options, Environment, Resolver};
use std::path::PathBuf;

/// Resolve action.
#[derive(Debug, Clone)]
pub struct ResolveAction {
    /// Specifier to resolve.
    pub specifier: String,
    /// Importing file; defaults to the project entry.
    pub from: Option<PathBuf>,
    /// Target environment.
    pub env: Environment,
    /// Project root.
    pub root: PathBuf,
    /// Emit JSON output.
    pub json: bool,
}

pub fn run(action: &ResolveAction) -> Result<()> {
    let options = load_options(&action.root).into_diagnostic()?;
    let resolver = Resolver::with_options(action.root.clone(), options);

    match resolver.resolve(&action.specifier, action.from.as_deref(), action.env) {
        Some(path) => {
            if action.json {
                let output = json!({
                    "specifier": action.specifier,
                    "importer": action.from.as_ref().map(|p| p.display().to_string()),
                    "env": action.env.as_str(),
                    "resolved": path.display().to_string(),
                });
                println!("{}", serde_json::to_string_pretty(&output).into_diagnostic()?);
            } else {
                println!("{}", path.display());
            }
            Ok(())
        }
        None => Err(miette!(
            "could not resolve \"{}\" for {} environment",
            action.specifier,
            action.env
        )),
    }
}
