//! Specifier resolution.
//!
//! Turns relative, absolute, and bare specifiers into absolute file
//! paths, honoring manifest entry fields, conditional export/import
//! maps, environment aliasing, nested vendor directories, and symlinks.
//! Results are memoized per `(importer, specifier, environment)`;
//! failures are silent (`None`) except for declared-map misses, which
//! emit a diagnostic naming the package and the missing entry.

pub mod conditions;

use crate::config::{Environment, ServerOptions};
use crate::locate::{locate_manifest_dir, same_path_ci};
use crate::manifest::{path_to_slash, resolve_file, AliasTarget, Package};
use crate::registry::{ResolveCacheKey, ResolverState};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Synthetic importer used for entry calls with no importing file.
const DEFAULT_IMPORTER: &str = "index.js";

/// Cap on alias-driven rewrite passes for a single candidate.
const MAX_ALIAS_PASSES: usize = 8;

/// Cap on bare-specifier restart frames for a single resolution.
const MAX_RESTART_FRAMES: usize = 256;

/// The resolution engine for one server instance.
///
/// Owns the project root, the options, and every cache; no module-level
/// state exists, so multiple resolvers can coexist in one process.
pub struct Resolver {
    root: PathBuf,
    options: ServerOptions,
    extensions: Vec<String>,
    state: ResolverState,
}

/// Outcome of resolving a specifier against one package.
enum Flow {
    Resolved(PathBuf),
    /// The working specifier is (or aliased to) a bare package
    /// reference; restart the search from the vendor directories.
    Restart(String),
    Unresolved,
}

/// Outcome of chasing an alias chain.
enum AliasOutcome {
    Kept,
    Renamed(String),
    Disabled,
    Cycle,
}

impl Resolver {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_options(root, ServerOptions::default())
    }

    #[must_use]
    pub fn with_options(root: impl Into<PathBuf>, options: ServerOptions) -> Self {
        let root = root.into();
        let root = dunce::canonicalize(&root).unwrap_or(root);
        let extensions = options.probe_extensions();
        Self {
            root,
            options,
            extensions,
            state: ResolverState::new(),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn options(&self) -> &ServerOptions {
        &self.options
    }

    /// Reset all caches; used between independent server sessions.
    pub fn clear_caches(&self) {
        self.state.clear();
    }

    /// Resolve `specifier` as imported by `importer` for `env`.
    ///
    /// This is the entry call; recursive resolutions triggered by bare
    /// restarts are always non-entry and honor export-map restriction.
    #[must_use]
    pub fn resolve(
        &self,
        specifier: &str,
        importer: Option<&Path>,
        env: Environment,
    ) -> Option<PathBuf> {
        if specifier.is_empty() {
            return None;
        }
        if specifier.contains("://")
            || specifier.starts_with("node:")
            || specifier.starts_with("data:")
        {
            return None;
        }

        let importer = match importer {
            Some(p) if p.is_absolute() => p.to_path_buf(),
            Some(p) => self.root.join(p),
            None => self.root.join(DEFAULT_IMPORTER),
        };

        let key = ResolveCacheKey::new(&importer, specifier, env, &self.root);
        if let Some(hit) = self.state.cached_resolution(&key) {
            return Some(hit);
        }

        let resolved = self.resolve_uncached(specifier, &importer, env)?;
        self.state.store_resolution(key, resolved.clone());
        Some(resolved)
    }

    /// The package owning `file`, for consumers outside the resolver.
    #[must_use]
    pub fn package_for_file(&self, file: &Path, env: Environment) -> Option<Arc<Package>> {
        let dir = locate_manifest_dir(file, &self.root).unwrap_or_else(|| self.root.clone());
        self.state
            .resolve_package(&dir, env, &self.root, &self.extensions)
    }

    fn resolve_uncached(
        &self,
        specifier: &str,
        importer: &Path,
        env: Environment,
    ) -> Option<PathBuf> {
        let pkg_dir =
            locate_manifest_dir(importer, &self.root).unwrap_or_else(|| self.root.clone());
        let pkg = self
            .state
            .resolve_package(&pkg_dir, env, &self.root, &self.extensions)?;

        // A package may import from itself by name; the specifier is
        // rewritten to a relative form rooted at the package directory.
        // Self-references honor export-map restriction even on entry.
        let (workdir, spec, restricted) = if pkg.is_self_reference(specifier) {
            (pkg.dir.clone(), rewrite_self_reference(specifier, &pkg.name), true)
        } else {
            let dir = importer.parent().unwrap_or(&self.root).to_path_buf();
            (dir, specifier.to_string(), false)
        };

        match self.resolve_with_package(&pkg, &workdir, &spec, env, restricted) {
            Flow::Resolved(path) => Some(realpath(path)),
            Flow::Restart(bare) => self.restart_search(&pkg, &bare, env),
            Flow::Unresolved => None,
        }
    }

    /// Resolve one working specifier against one package: private
    /// imports, export-map restriction, then manifest-entry/alias
    /// resolution with extension search.
    fn resolve_with_package(
        &self,
        pkg: &Arc<Package>,
        workdir: &Path,
        spec: &str,
        env: Environment,
        restricted: bool,
    ) -> Flow {
        // Virtual module markers never resolve.
        if spec.starts_with('\0') {
            return Flow::Unresolved;
        }

        if spec.starts_with('#') {
            if let Some(imports) = &pkg.imports_map {
                return match conditions::resolve_imports(imports, spec, env) {
                    Some(target) if target.starts_with("./") || target.starts_with("../") => {
                        self.resolve_path_candidate(pkg, lexical_join(&pkg.dir, &target))
                    }
                    Some(target) => Flow::Restart(target),
                    None => {
                        tracing::warn!(
                            package = %pkg.name,
                            specifier = %spec,
                            "specifier is not declared in the package imports map"
                        );
                        Flow::Unresolved
                    }
                };
            }
            return Flow::Unresolved;
        }

        if restricted && (spec == "." || spec.starts_with("./")) {
            if let Some(exports) = &pkg.exports_map {
                return match conditions::resolve_exports(exports, spec, env) {
                    Some(target) => {
                        self.resolve_path_candidate(pkg, lexical_join(&pkg.dir, &target))
                    }
                    None => {
                        tracing::warn!(
                            package = %pkg.name,
                            subpath = %spec,
                            "subpath is not declared in the package exports map"
                        );
                        Flow::Unresolved
                    }
                };
            }
        }

        if is_bare_specifier(spec) {
            // An alias may rename the package reference to a file, to
            // another package, or disable it outright.
            return match self.chase_alias(pkg, spec) {
                AliasOutcome::Disabled => {
                    tracing::debug!(package = %pkg.name, specifier = %spec, "module disabled via alias map");
                    Flow::Unresolved
                }
                AliasOutcome::Cycle => Flow::Unresolved,
                AliasOutcome::Renamed(target) if is_bare_specifier(&target) => {
                    Flow::Restart(target)
                }
                AliasOutcome::Renamed(target) => {
                    self.resolve_path_candidate(pkg, lexical_join(&pkg.dir, &target))
                }
                AliasOutcome::Kept => Flow::Restart(spec.to_string()),
            };
        }

        let joined = if is_absolute_specifier(spec) {
            PathBuf::from(spec)
        } else {
            lexical_join(workdir, spec)
        };

        // The package directory itself resolves to its entry file.
        if same_path_ci(&joined, &pkg.dir) {
            let Some(main) = pkg.main.clone() else {
                return Flow::Unresolved;
            };
            return self.resolve_path_candidate(pkg, main);
        }

        self.resolve_path_candidate(pkg, joined)
    }

    /// Alias-chase, exact-match, and extension-search loop for one
    /// candidate path. Aliases are re-applied to whatever file the
    /// extension search lands on.
    fn resolve_path_candidate(&self, pkg: &Arc<Package>, candidate: PathBuf) -> Flow {
        let mut current = candidate;

        for _ in 0..MAX_ALIAS_PASSES {
            if let Ok(rel) = current.strip_prefix(&pkg.dir) {
                match self.chase_alias(pkg, &path_to_slash(rel)) {
                    AliasOutcome::Disabled => {
                        tracing::debug!(
                            package = %pkg.name,
                            path = %current.display(),
                            "module disabled via alias map"
                        );
                        return Flow::Unresolved;
                    }
                    AliasOutcome::Cycle => return Flow::Unresolved,
                    AliasOutcome::Renamed(target) if is_bare_specifier(&target) => {
                        return Flow::Restart(target);
                    }
                    AliasOutcome::Renamed(target) => {
                        let next = lexical_join(&pkg.dir, &target);
                        if next != current {
                            current = next;
                            continue;
                        }
                    }
                    AliasOutcome::Kept => {}
                }
            }

            if current.is_file() {
                return Flow::Resolved(current);
            }

            match resolve_file(&current, &self.extensions) {
                // Loop once more so aliases apply to the found file.
                Some(found) => current = found,
                None => return Flow::Unresolved,
            }
        }

        Flow::Unresolved
    }

    /// Follow the alias chain for `key` to its end.
    ///
    /// The chain is flat and possibly indirect (`a` → `b` → `c`); a
    /// cycle is reported instead of chased forever.
    fn chase_alias(&self, pkg: &Arc<Package>, key: &str) -> AliasOutcome {
        let Some(aliases) = &pkg.alias_map else {
            return AliasOutcome::Kept;
        };

        let mut visited: HashSet<&str> = HashSet::new();
        let mut current = key;

        loop {
            if !visited.insert(current) {
                tracing::warn!(
                    package = %pkg.name,
                    alias = %key,
                    "alias map chain is cyclic; treating module as unresolvable"
                );
                return AliasOutcome::Cycle;
            }
            match aliases.get(current) {
                Some(AliasTarget::Disabled) => return AliasOutcome::Disabled,
                Some(AliasTarget::Path(next)) => current = next,
                None => {
                    return if current == key {
                        AliasOutcome::Kept
                    } else {
                        AliasOutcome::Renamed(current.to_string())
                    };
                }
            }
        }
    }

    /// Restart resolution of a bare reference from the vendor
    /// directories visible to the originating package, nearest first.
    ///
    /// Modeled as an explicit frame stack instead of native recursion:
    /// an aliased result that is itself bare pushes new frames, and the
    /// search order stays a property of the loop.
    fn restart_search(
        &self,
        origin: &Arc<Package>,
        bare: &str,
        env: Environment,
    ) -> Option<PathBuf> {
        let mut stack: Vec<(PathBuf, String, PathBuf)> = Vec::new();
        push_frames(&mut stack, origin, bare);

        let mut frames = 0;
        while let Some((vendor_dir, spec, origin_dir)) = stack.pop() {
            frames += 1;
            if frames > MAX_RESTART_FRAMES {
                tracing::warn!(specifier = %bare, "bare specifier restart exceeded frame budget");
                return None;
            }

            let (name, subpath) = split_package_specifier(&spec);
            let package_dir = vendor_dir.join(name);
            // Never re-enter the directory that asked for the restart.
            if same_path_ci(&package_dir, &origin_dir) {
                continue;
            }
            if !package_dir.is_dir() {
                continue;
            }
            let Some(pkg) =
                self.state
                    .resolve_package(&package_dir, env, &self.root, &self.extensions)
            else {
                continue;
            };

            let subspec = match subpath {
                Some(sub) => format!("./{sub}"),
                None => ".".to_string(),
            };

            match self.resolve_with_package(&pkg, &pkg.dir, &subspec, env, true) {
                Flow::Resolved(path) => return Some(realpath(path)),
                Flow::Restart(next) => push_frames(&mut stack, &pkg, &next),
                Flow::Unresolved => {}
            }
        }

        None
    }
}

/// Push one frame per search path; reversed so the nearest vendor
/// directory is popped first.
fn push_frames(stack: &mut Vec<(PathBuf, String, PathBuf)>, pkg: &Arc<Package>, spec: &str) {
    for search_path in pkg.search_paths.iter().rev() {
        stack.push((search_path.clone(), spec.to_string(), pkg.dir.clone()));
    }
}

/// Rewrite a self-referential specifier to its relative form.
fn rewrite_self_reference(specifier: &str, name: &str) -> String {
    match specifier.strip_prefix(name) {
        Some("") | None => ".".to_string(),
        Some(rest) => format!(".{rest}"),
    }
}

/// Whether a specifier is a bare package reference.
#[must_use]
pub fn is_bare_specifier(specifier: &str) -> bool {
    !specifier.is_empty()
        && !specifier.starts_with('.')
        && !specifier.starts_with('#')
        && !specifier.starts_with('\0')
        && !is_absolute_specifier(specifier)
        && !specifier.contains("://")
        && !specifier.starts_with("node:")
        && !specifier.starts_with("data:")
}

/// Absolute filesystem specifier: unix, drive-letter, or UNC.
fn is_absolute_specifier(specifier: &str) -> bool {
    if specifier.starts_with('/') || specifier.starts_with("\\\\") {
        return true;
    }
    let bytes = specifier.as_bytes();
    bytes.len() >= 3
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && (bytes[2] == b'\\' || bytes[2] == b'/')
}

/// Split a bare specifier into package name and optional subpath.
/// Scoped names keep their first two segments.
#[must_use]
pub fn split_package_specifier(specifier: &str) -> (&str, Option<&str>) {
    if specifier.starts_with('@') {
        let mut slashes = 0;
        for (i, c) in specifier.char_indices() {
            if c == '/' {
                slashes += 1;
                if slashes == 2 {
                    return (&specifier[..i], Some(&specifier[i + 1..]));
                }
            }
        }
        return (specifier, None);
    }

    match specifier.find('/') {
        Some(pos) => (&specifier[..pos], Some(&specifier[pos + 1..])),
        None => (specifier, None),
    }
}

/// Join a slash-separated specifier onto a base, resolving `.` and `..`
/// lexically.
fn lexical_join(base: &Path, spec: &str) -> PathBuf {
    let mut out = base.to_path_buf();
    for segment in spec.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                out.pop();
            }
            s => out.push(s),
        }
    }
    out
}

/// Resolve symlinks to the real path, keeping the input on failure.
fn realpath(path: PathBuf) -> PathBuf {
    dunce::canonicalize(&path).unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_package_specifier() {
        assert_eq!(split_package_specifier("lodash"), ("lodash", None));
        assert_eq!(
            split_package_specifier("lodash/array"),
            ("lodash", Some("array"))
        );
        assert_eq!(
            split_package_specifier("@scope/pkg"),
            ("@scope/pkg", None)
        );
        assert_eq!(
            split_package_specifier("@scope/pkg/lib/x"),
            ("@scope/pkg", Some("lib/x"))
        );
    }

    #[test]
    fn test_is_bare_specifier() {
        assert!(is_bare_specifier("react"));
        assert!(is_bare_specifier("@scope/pkg"));
        assert!(!is_bare_specifier("./local"));
        assert!(!is_bare_specifier("../up"));
        assert!(!is_bare_specifier("/abs"));
        assert!(!is_bare_specifier("#private"));
        assert!(!is_bare_specifier("node:fs"));
        assert!(!is_bare_specifier("https://cdn.example/x.js"));
        assert!(!is_bare_specifier("C:\\win\\x.js"));
    }

    #[test]
    fn test_rewrite_self_reference() {
        assert_eq!(rewrite_self_reference("app", "app"), ".");
        assert_eq!(rewrite_self_reference("app/foo.js", "app"), "./foo.js");
    }

    #[test]
    fn test_lexical_join() {
        assert_eq!(
            lexical_join(Path::new("/a/b"), "./c/d.js"),
            PathBuf::from("/a/b/c/d.js")
        );
        assert_eq!(
            lexical_join(Path::new("/a/b"), "../c.js"),
            PathBuf::from("/a/c.js")
        );
        assert_eq!(lexical_join(Path::new("/a/b"), "."), PathBuf::from("/a/b"));
    }
}
