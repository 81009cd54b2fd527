//! Nearest-manifest-directory discovery.
//!
//! Walks upward from a file looking for the directory that owns it,
//! with different stopping rules inside and outside the vendored
//! dependency tree. Caching is the registry's job, not this module's.

use crate::manifest::MANIFEST_FILE;
use std::path::{Component, Path, PathBuf};

/// Directory name holding installed third-party dependencies.
pub const VENDOR_DIR: &str = "node_modules";

/// Upward walk is bounded to this many directories.
const MAX_WALK_DEPTH: usize = 10;

/// Whether a path has a vendored-tree component.
#[must_use]
pub fn is_vendored(path: &Path) -> bool {
    path.components().any(|c| match c {
        Component::Normal(name) => name.to_str().is_some_and(|s| s.eq_ignore_ascii_case(VENDOR_DIR)),
        _ => false,
    })
}

/// The outermost vendored-tree directory on `path`, if any.
///
/// This is the search root for walks that start inside the vendored
/// tree: resolution must not escape above it.
#[must_use]
pub fn vendor_root(path: &Path) -> Option<PathBuf> {
    let mut root = PathBuf::new();
    for component in path.components() {
        root.push(component);
        if let Component::Normal(name) = component {
            if name.to_str().is_some_and(|s| s.eq_ignore_ascii_case(VENDOR_DIR)) {
                return Some(root);
            }
        }
    }
    None
}

/// Compare two paths segment by segment, case-insensitively.
///
/// Tolerates case-insensitive filesystems where the walk may observe a
/// differently-cased spelling of the same directory.
#[must_use]
pub fn same_path_ci(a: &Path, b: &Path) -> bool {
    let mut left = a.components();
    let mut right = b.components();
    loop {
        match (left.next(), right.next()) {
            (None, None) => return true,
            (Some(Component::Normal(x)), Some(Component::Normal(y))) => {
                let (Some(x), Some(y)) = (x.to_str(), y.to_str()) else {
                    if x != y {
                        return false;
                    }
                    continue;
                };
                if !x.eq_ignore_ascii_case(y) {
                    return false;
                }
            }
            (Some(x), Some(y)) => {
                if x != y {
                    return false;
                }
            }
            _ => return false,
        }
    }
}

/// Strip any trailing separator by normalizing through components.
fn normalized(path: &Path) -> PathBuf {
    path.components().collect()
}

/// Find the nearest directory that owns `file_path` via its manifest.
///
/// Outside the vendored tree the first directory holding any manifest
/// file wins and the walk is bounded by `project_root`. Inside, the walk
/// is bounded by the outermost vendored directory, and a manifest only
/// qualifies if it declares something a resolver can use — manifests
/// present purely for local scoping are skipped.
#[must_use]
pub fn locate_manifest_dir(file_path: &Path, project_root: &Path) -> Option<PathBuf> {
    let path = normalized(file_path);
    let start = if path.is_dir() {
        path.clone()
    } else {
        path.parent()?.to_path_buf()
    };

    let inside_vendor = is_vendored(&start);
    let search_root = if inside_vendor {
        vendor_root(&start)?
    } else {
        normalized(project_root)
    };

    let mut current = start;
    for _ in 0..MAX_WALK_DEPTH {
        let manifest = current.join(MANIFEST_FILE);
        if manifest.is_file() {
            let qualifies = if inside_vendor {
                declares_resolution_fields(&manifest)
            } else {
                true
            };
            if qualifies {
                return Some(current);
            }
        }

        if same_path_ci(&current, &search_root) {
            return None;
        }

        let Some(parent) = current.parent() else {
            return None;
        };
        if parent == current {
            return None;
        }
        current = parent.to_path_buf();
    }

    None
}

/// Manifest fields that make a vendored manifest worth stopping at.
const RESOLUTION_FIELDS: &[&str] = &["name", "main", "imports", "exports", "browser", "module"];

fn declares_resolution_fields(manifest_path: &Path) -> bool {
    let Ok(content) = std::fs::read_to_string(manifest_path) else {
        return false;
    };
    let Ok(value) = serde_json::from_str::<serde_json::Value>(&content) else {
        return false;
    };
    let Some(obj) = value.as_object() else {
        return false;
    };
    RESOLUTION_FIELDS.iter().any(|field| obj.contains_key(*field))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_finds_project_manifest() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("src").join("pages");
        fs::create_dir_all(&nested).unwrap();
        fs::write(dir.path().join("package.json"), r#"{"name": "app"}"#).unwrap();

        let found = locate_manifest_dir(&nested.join("index.js"), dir.path());
        assert_eq!(found, Some(dir.path().to_path_buf()));
    }

    #[test]
    fn test_stops_at_project_root() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("src");
        fs::create_dir_all(&nested).unwrap();
        // No manifest anywhere: the walk gives up at the root.
        let found = locate_manifest_dir(&nested.join("index.js"), dir.path());
        assert_eq!(found, None);
    }

    #[test]
    fn test_vendored_scoping_manifest_is_skipped() {
        let dir = tempdir().unwrap();
        let pkg = dir.path().join("node_modules").join("dep");
        let sub = pkg.join("lib");
        fs::create_dir_all(&sub).unwrap();
        fs::write(pkg.join("package.json"), r#"{"name": "dep", "main": "lib/index.js"}"#).unwrap();
        // A sideEffects-only manifest must not win over the real one.
        fs::write(sub.join("package.json"), r#"{"sideEffects": false}"#).unwrap();

        let found = locate_manifest_dir(&sub.join("index.js"), dir.path());
        assert_eq!(found, Some(pkg));
    }

    #[test]
    fn test_walk_does_not_escape_vendor_root() {
        let dir = tempdir().unwrap();
        let vendor = dir.path().join("node_modules");
        let bare = vendor.join("no-manifest").join("deep");
        fs::create_dir_all(&bare).unwrap();
        // Project manifest above the vendor root must not be found.
        fs::write(dir.path().join("package.json"), r#"{"name": "app"}"#).unwrap();

        let found = locate_manifest_dir(&bare.join("x.js"), dir.path());
        assert_eq!(found, None);
    }

    #[test]
    fn test_nested_vendor_tree() {
        let dir = tempdir().unwrap();
        let inner = dir
            .path()
            .join("node_modules")
            .join("a")
            .join("node_modules")
            .join("b");
        fs::create_dir_all(&inner).unwrap();
        fs::write(inner.join("package.json"), r#"{"name": "b"}"#).unwrap();

        let found = locate_manifest_dir(&inner.join("index.js"), dir.path());
        assert_eq!(found, Some(inner));
    }

    #[test]
    fn test_same_path_ci() {
        assert!(same_path_ci(
            Path::new("/a/Node_Modules/pkg"),
            Path::new("/a/node_modules/PKG")
        ));
        assert!(!same_path_ci(Path::new("/a/b"), Path::new("/a/c")));
        assert!(!same_path_ci(Path::new("/a/b"), Path::new("/a/b/c")));
    }

    #[test]
    fn test_vendor_root_outermost() {
        let path = Path::new("/p/node_modules/a/node_modules/b/x.js");
        assert_eq!(vendor_root(path), Some(PathBuf::from("/p/node_modules")));
        assert!(vendor_root(Path::new("/p/src/x.js")).is_none());
    }
}
