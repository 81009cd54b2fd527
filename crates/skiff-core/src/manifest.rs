//! Package manifest reading.
//!
//! Turns a directory's `package.json` into an immutable [`Package`]: the
//! resolved entry file, the environment alias map, conditional
//! export/import maps, and the vendor directories visible from it. A
//! manifest that cannot be read or parsed degrades to "no manifest" —
//! no error ever propagates from here.

use crate::config::Environment;
use crate::locate::{same_path_ci, VENDOR_DIR};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

/// Manifest file name.
pub const MANIFEST_FILE: &str = "package.json";

/// Target of one environment alias entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AliasTarget {
    /// Substitute module, package-root-relative for files, verbatim for
    /// package references.
    Path(String),
    /// Module disabled for this environment.
    Disabled,
}

/// One logical package, rooted at a manifest directory.
///
/// Immutable once constructed; the registry hands out `Arc<Package>` so
/// identical resolutions observe the identical instance.
#[derive(Debug)]
pub struct Package {
    /// Package name from the manifest, or derived from the directory's
    /// path under its nearest vendor directory.
    pub name: String,
    /// Absolute directory containing the manifest.
    pub dir: PathBuf,
    /// Ancestor vendor directories visible from `dir`, nearest first.
    /// Bare references that alias to other bare references restart their
    /// search here.
    pub search_paths: Vec<PathBuf>,
    /// Resolved entry file.
    pub main: Option<PathBuf>,
    /// Environment alias map (browser environment only).
    pub alias_map: Option<HashMap<String, AliasTarget>>,
    /// Conditional exports map, raw manifest value.
    pub exports_map: Option<Value>,
    /// Conditional imports map, raw manifest value.
    pub imports_map: Option<Value>,
    /// Manifest version, empty when absent.
    pub version: String,
    /// True only for the resolution's ultimate root directory.
    pub is_project_root: bool,
    /// Whether the package ships static-import modules (`"type": "module"`
    /// or a `module` entry field).
    pub esm: bool,
}

impl Package {
    /// Whether `specifier` refers to this package by name.
    #[must_use]
    pub fn is_self_reference(&self, specifier: &str) -> bool {
        !self.name.is_empty()
            && (specifier == self.name
                || specifier
                    .strip_prefix(self.name.as_str())
                    .is_some_and(|rest| rest.starts_with('/')))
    }
}

/// Read the manifest for `dir`, producing a [`Package`].
///
/// A missing or unparseable manifest degrades to a default package
/// (derived name, `index` entry, no maps) rather than failing, so
/// directories inside the vendored tree that ship no manifest of their
/// own still resolve. Only a nonexistent directory yields `None`.
#[must_use]
pub fn read_manifest(
    dir: &Path,
    env: Environment,
    project_root: &Path,
    extensions: &[String],
) -> Option<Package> {
    if !dir.is_dir() {
        return None;
    }

    let is_project_root = same_path_ci(dir, project_root);
    let manifest = read_manifest_value(&dir.join(MANIFEST_FILE));

    let Some(manifest) = manifest else {
        return Some(Package {
            name: fallback_name(dir),
            dir: dir.to_path_buf(),
            search_paths: search_paths_for(dir),
            main: resolve_file(&dir.join("index"), extensions),
            alias_map: None,
            exports_map: None,
            imports_map: None,
            version: String::new(),
            is_project_root,
            esm: false,
        });
    };

    let name = manifest
        .get("name")
        .and_then(Value::as_str)
        .map_or_else(|| fallback_name(dir), ToString::to_string);

    let version = manifest
        .get("version")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let esm_entry = manifest.get("module").and_then(Value::as_str);
    let esm = esm_entry.is_some()
        || manifest.get("type").and_then(Value::as_str) == Some("module");

    // Entry chain: module, then main, then index, each through extension
    // and directory-index search.
    let mut entry_from_esm_field = false;
    let mut main = esm_entry.and_then(|candidate| {
        let resolved = resolve_file(&dir.join(candidate), extensions);
        entry_from_esm_field = resolved.is_some();
        resolved
    });
    if main.is_none() {
        main = manifest
            .get("main")
            .and_then(Value::as_str)
            .and_then(|candidate| resolve_file(&dir.join(candidate), extensions));
    }
    if main.is_none() {
        main = resolve_file(&dir.join("index"), extensions);
    }

    let mut alias_map = None;
    if env == Environment::Browser {
        match manifest.get("browser") {
            // A single-string alias may override the entry, but never one
            // chosen from the static-import entry field.
            Some(Value::String(s)) if !entry_from_esm_field => {
                if let Some(resolved) = resolve_file(&dir.join(s.trim_start_matches("./")), extensions)
                {
                    main = Some(resolved);
                }
            }
            Some(Value::Object(map)) => {
                alias_map = Some(build_alias_map(dir, map, extensions));
            }
            _ => {}
        }
    }

    Some(Package {
        name,
        dir: dir.to_path_buf(),
        search_paths: search_paths_for(dir),
        main,
        alias_map,
        exports_map: manifest.get("exports").cloned(),
        imports_map: manifest.get("imports").cloned(),
        version,
        is_project_root,
        esm,
    })
}

fn read_manifest_value(path: &Path) -> Option<Value> {
    let content = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&content).ok()
}

/// Alias entries are themselves passed through extension resolution and
/// then stored verbatim — no validation of the pairs happens here.
fn build_alias_map(
    dir: &Path,
    map: &serde_json::Map<String, Value>,
    extensions: &[String],
) -> HashMap<String, AliasTarget> {
    let mut aliases = HashMap::with_capacity(map.len());
    for (key, value) in map {
        let target = match value {
            Value::Bool(false) => AliasTarget::Disabled,
            Value::String(s) => AliasTarget::Path(normalize_alias_module(dir, s, extensions)),
            _ => continue,
        };
        aliases.insert(normalize_alias_module(dir, key, extensions), target);
    }
    aliases
}

/// Normalize one side of an alias entry: file references become
/// package-root-relative resolved paths, package references stay as-is.
fn normalize_alias_module(dir: &Path, module: &str, extensions: &[String]) -> String {
    let is_file_ref = module.starts_with("./") || module.starts_with("../");
    let relative = module.trim_start_matches("./");
    if let Some(resolved) = resolve_file(&dir.join(relative), extensions) {
        if let Ok(rel) = resolved.strip_prefix(dir) {
            return path_to_slash(rel);
        }
    }
    if is_file_ref {
        relative.to_string()
    } else {
        module.to_string()
    }
}

/// Join path components with forward slashes regardless of platform.
pub(crate) fn path_to_slash(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(name) => name.to_str(),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Derive a package name from the directory's path: the relative path
/// under the nearest vendor directory, or the directory's own name.
fn fallback_name(dir: &Path) -> String {
    let components: Vec<&str> = dir
        .components()
        .filter_map(|c| match c {
            Component::Normal(name) => name.to_str(),
            _ => None,
        })
        .collect();

    let vendor_idx = components
        .iter()
        .rposition(|c| c.eq_ignore_ascii_case(VENDOR_DIR));

    match vendor_idx {
        Some(idx) if idx + 1 < components.len() => components[idx + 1..].join("/"),
        _ => components.last().copied().unwrap_or_default().to_string(),
    }
}

/// Ancestor vendor directories reachable from `dir`, nearest first.
fn search_paths_for(dir: &Path) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = Vec::new();
    let mut current = Some(dir);

    while let Some(d) = current {
        let candidate = if d
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.eq_ignore_ascii_case(VENDOR_DIR))
        {
            Some(d.to_path_buf())
        } else {
            let nested = d.join(VENDOR_DIR);
            nested.is_dir().then_some(nested)
        };

        if let Some(candidate) = candidate {
            if !paths.iter().any(|p| same_path_ci(p, &candidate)) {
                paths.push(candidate);
            }
        }
        current = d.parent();
    }

    paths
}

/// Resolve a path to an existing file: exact, then each probe extension
/// appended, then `index` plus extensions inside it as a directory.
#[must_use]
pub fn resolve_file(base: &Path, extensions: &[String]) -> Option<PathBuf> {
    if base.is_file() {
        return Some(base.to_path_buf());
    }

    for ext in extensions {
        let with_ext = PathBuf::from(format!("{}{ext}", base.display()));
        if with_ext.is_file() {
            return Some(with_ext);
        }
    }

    let index = base.join("index");
    for ext in extensions {
        let candidate = PathBuf::from(format!("{}{ext}", index.display()));
        if candidate.is_file() {
            return Some(candidate);
        }
    }

    None
}
