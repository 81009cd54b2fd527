//! Package registry and process-wide resolver caches.
//!
//! [`ResolverState`] owns every cache the engine keeps: resolved
//! specifiers, packages by manifest directory, packages by
//! name@version (browser environment only), and the version sets used
//! to warn about multi-version fan-out. One instance per server; tests
//! get isolation through [`ResolverState::clear`] or fresh instances.

use crate::config::Environment;
use crate::locate::is_vendored;
use crate::manifest::{read_manifest, Package};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// Key for one memoized resolution.
///
/// Imports originating inside the vendored tree share entries by
/// literal specifier; project-source imports are keyed by the
/// importer's project-relative path to avoid cross-file collisions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolveCacheKey {
    importer: String,
    specifier: String,
    env: Environment,
}

impl ResolveCacheKey {
    pub(crate) fn new(
        importer: &Path,
        specifier: &str,
        env: Environment,
        project_root: &Path,
    ) -> Self {
        let importer = if is_vendored(importer) {
            specifier.to_string()
        } else {
            importer
                .strip_prefix(project_root)
                .unwrap_or(importer)
                .display()
                .to_string()
        };
        Self {
            importer,
            specifier: specifier.to_string(),
            env,
        }
    }
}

/// All mutable resolver state, owned explicitly instead of living in
/// module-scope singletons so multiple servers can coexist in one
/// process and tests can reset between cases.
#[derive(Debug, Default)]
pub struct ResolverState {
    resolve_cache: RwLock<HashMap<ResolveCacheKey, PathBuf>>,
    packages: RwLock<HashMap<(PathBuf, Environment), Option<Arc<Package>>>>,
    by_name_version: RwLock<HashMap<String, Arc<Package>>>,
    seen_versions: RwLock<HashMap<String, BTreeSet<String>>>,
    warned_names: RwLock<HashSet<String>>,
}

impl ResolverState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every cache at once. Taking all the guards before clearing
    /// keeps the reset atomic with respect to concurrent readers.
    pub fn clear(&self) {
        let mut resolve_cache = self.resolve_cache.write().unwrap();
        let mut packages = self.packages.write().unwrap();
        let mut by_name_version = self.by_name_version.write().unwrap();
        let mut seen_versions = self.seen_versions.write().unwrap();
        let mut warned_names = self.warned_names.write().unwrap();
        resolve_cache.clear();
        packages.clear();
        by_name_version.clear();
        seen_versions.clear();
        warned_names.clear();
    }

    pub(crate) fn cached_resolution(&self, key: &ResolveCacheKey) -> Option<PathBuf> {
        self.resolve_cache.read().unwrap().get(key).cloned()
    }

    pub(crate) fn store_resolution(&self, key: ResolveCacheKey, path: PathBuf) {
        self.resolve_cache.write().unwrap().insert(key, path);
    }

    /// Package for a manifest directory, constructed lazily.
    ///
    /// Both hits and misses are cached; repeated calls return the
    /// identical `Arc` instance.
    pub(crate) fn package_for_dir(
        &self,
        dir: &Path,
        env: Environment,
        project_root: &Path,
        extensions: &[String],
    ) -> Option<Arc<Package>> {
        let cache_key = (dir.to_path_buf(), env);
        if let Some(cached) = self.packages.read().unwrap().get(&cache_key) {
            return cached.clone();
        }

        let package = read_manifest(dir, env, project_root, extensions).map(Arc::new);
        self.packages
            .write()
            .unwrap()
            .insert(cache_key, package.clone());
        package
    }

    /// Package lookup as used by the specifier resolver.
    ///
    /// For the browser environment, distinct installs of the same
    /// name@version collapse onto the first instance seen, so one
    /// dependency version stays one logical unit no matter how many
    /// vendored copies exist. Fan-out across versions is reported once
    /// per package name.
    pub(crate) fn resolve_package(
        &self,
        dir: &Path,
        env: Environment,
        project_root: &Path,
        extensions: &[String],
    ) -> Option<Arc<Package>> {
        let package = self.package_for_dir(dir, env, project_root, extensions)?;

        if env != Environment::Browser || package.name.is_empty() || package.version.is_empty() {
            return Some(package);
        }

        self.note_version(&package);

        let key = format!("{}@{}", package.name, package.version);
        let mut by_name_version = self.by_name_version.write().unwrap();
        if let Some(existing) = by_name_version.get(&key) {
            return Some(existing.clone());
        }
        by_name_version.insert(key, package.clone());
        Some(package)
    }

    fn note_version(&self, package: &Arc<Package>) {
        let mut seen = self.seen_versions.write().unwrap();
        let versions = seen.entry(package.name.clone()).or_default();
        versions.insert(package.version.clone());

        if versions.len() > 1 && self.warned_names.write().unwrap().insert(package.name.clone()) {
            let fan_out = versions.iter().cloned().collect::<Vec<_>>().join(", ");
            tracing::warn!(
                package = %package.name,
                versions = %fan_out,
                "multiple versions of a dependency are being served"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn exts() -> Vec<String> {
        crate::config::ServerOptions::default().probe_extensions()
    }

    fn write_pkg(dir: &Path, name: &str, version: &str) {
        fs::create_dir_all(dir).unwrap();
        fs::write(
            dir.join("package.json"),
            format!(r#"{{"name": "{name}", "version": "{version}", "main": "index.js"}}"#),
        )
        .unwrap();
        fs::write(dir.join("index.js"), "").unwrap();
    }

    #[test]
    fn test_package_instances_are_shared() {
        let dir = tempdir().unwrap();
        write_pkg(dir.path(), "app", "1.0.0");
        let state = ResolverState::new();

        let a = state
            .package_for_dir(dir.path(), Environment::Browser, dir.path(), &exts())
            .unwrap();
        let b = state
            .package_for_dir(dir.path(), Environment::Browser, dir.path(), &exts())
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_same_version_different_dirs_collapse_for_browser() {
        let dir = tempdir().unwrap();
        let first = dir.path().join("node_modules").join("dep");
        let second = dir
            .path()
            .join("node_modules")
            .join("host")
            .join("node_modules")
            .join("dep");
        write_pkg(&first, "dep", "1.2.3");
        write_pkg(&second, "dep", "1.2.3");

        let state = ResolverState::new();
        let a = state
            .resolve_package(&first, Environment::Browser, dir.path(), &exts())
            .unwrap();
        let b = state
            .resolve_package(&second, Environment::Browser, dir.path(), &exts())
            .unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(b.dir, first);
    }

    #[test]
    fn test_server_env_does_not_collapse() {
        let dir = tempdir().unwrap();
        let first = dir.path().join("node_modules").join("dep");
        let second = dir
            .path()
            .join("node_modules")
            .join("host")
            .join("node_modules")
            .join("dep");
        write_pkg(&first, "dep", "1.2.3");
        write_pkg(&second, "dep", "1.2.3");

        let state = ResolverState::new();
        let a = state
            .resolve_package(&first, Environment::Server, dir.path(), &exts())
            .unwrap();
        let b = state
            .resolve_package(&second, Environment::Server, dir.path(), &exts())
            .unwrap();

        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_clear_resets_package_identity() {
        let dir = tempdir().unwrap();
        write_pkg(dir.path(), "app", "1.0.0");
        let state = ResolverState::new();

        let a = state
            .package_for_dir(dir.path(), Environment::Browser, dir.path(), &exts())
            .unwrap();
        state.clear();
        let b = state
            .package_for_dir(dir.path(), Environment::Browser, dir.path(), &exts())
            .unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(a.name, b.name);
    }

    #[test]
    fn test_vendored_importer_keys_share_by_specifier() {
        let root = Path::new("/proj");
        let a = ResolveCacheKey::new(
            Path::new("/proj/node_modules/a/index.js"),
            "react",
            Environment::Browser,
            root,
        );
        let b = ResolveCacheKey::new(
            Path::new("/proj/node_modules/b/lib/x.js"),
            "react",
            Environment::Browser,
            root,
        );
        assert_eq!(a, b);

        let c = ResolveCacheKey::new(
            Path::new("/proj/src/app.js"),
            "react",
            Environment::Browser,
            root,
        );
        assert_ne!(a, c);
    }
}
