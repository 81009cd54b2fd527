//! Server options consumed by the resolver and the response rewriter.
//!
//! Options are discovered from `skiff.config.json` at the project root.
//! Everything has a default; a missing config file is not an error.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Config file name looked up at the project root.
pub const CONFIG_FILE: &str = "skiff.config.json";

/// Target environment a resolution is performed for.
///
/// Affects which conditional-map conditions apply, whether the
/// environment alias map is honored, and whether same-version package
/// deduplication is performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Browser,
    Server,
}

impl Environment {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Browser => "browser",
            Self::Server => "server",
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A script to inject into served markup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InjectedScript {
    /// Inline script body. Ignored when `url` is set.
    pub source: String,
    /// Serving URL for the script; injected as `<script src>` when present.
    pub url: Option<String>,
    /// Precomputed CSP hash (e.g. `sha256-...`) admitting the inline body.
    pub hash: Option<String>,
}

/// Response-shaping and resolution options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerOptions {
    /// Script injected into the head of served markup.
    pub head_script: Option<InjectedScript>,
    /// Script injected into the body of served markup.
    pub body_script: Option<InjectedScript>,
    /// Live-reload endpoint path, admitted into `connect-src` when a CSP
    /// header is widened.
    pub reload_endpoint: Option<String>,
    /// Extra directories searched after the project root when mapping
    /// root-relative paths to files.
    pub search_dirs: Vec<PathBuf>,
    /// Extensions probed for script resources, in order.
    pub script_extensions: Vec<String>,
    /// Extensions probed for stylesheet resources, in order.
    pub style_extensions: Vec<String>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            head_script: None,
            body_script: None,
            reload_endpoint: None,
            search_dirs: Vec::new(),
            script_extensions: default_script_extensions(),
            style_extensions: default_style_extensions(),
        }
    }
}

fn default_script_extensions() -> Vec<String> {
    [".ts", ".tsx", ".js", ".jsx", ".mjs", ".cjs", ".json"]
        .iter()
        .map(ToString::to_string)
        .collect()
}

fn default_style_extensions() -> Vec<String> {
    vec![".css".to_string()]
}

impl ServerOptions {
    /// All probe extensions, scripts first.
    #[must_use]
    pub fn probe_extensions(&self) -> Vec<String> {
        let mut all = self.script_extensions.clone();
        all.extend(self.style_extensions.iter().cloned());
        all
    }
}

/// Load options from `skiff.config.json` under `root`.
///
/// A missing file yields defaults; an unreadable or malformed file is a
/// hard error since the config is developer-owned.
pub fn load_options(root: &Path) -> Result<ServerOptions, Error> {
    let path = root.join(CONFIG_FILE);
    if !path.is_file() {
        return Ok(ServerOptions::default());
    }

    let content = std::fs::read_to_string(&path).map_err(|source| Error::ConfigRead {
        path: path.clone(),
        source,
    })?;

    serde_json::from_str(&content).map_err(|source| Error::ConfigParse { path, source })
}
