//! Conditional export/import map evaluation.
//!
//! Supports:
//! - Root exports (`exports: "./x"`, `exports: { ".": ... }`, bare
//!   condition objects)
//! - Exact subpath keys (`"./feature"`)
//! - Pattern keys with a single `*` wildcard, most specific key first
//! - Condition objects gated by a fixed per-environment condition list
//! - `imports` maps for `#`-prefixed private specifiers

use crate::config::Environment;
use serde_json::Value;

/// Conditions honored per environment, in lookup order.
#[must_use]
pub fn conditions_for(env: Environment) -> &'static [&'static str] {
    match env {
        Environment::Browser => &["browser", "development", "import", "default"],
        Environment::Server => &["node", "development", "require", "default"],
    }
}

/// Resolve an exports map for a subpath (`"."` for the package root).
///
/// Returns the target (starting with `"./"`) or `None` when the map
/// declares no matching entry — the caller owns the diagnostic.
#[must_use]
pub fn resolve_exports(exports: &Value, subpath: &str, env: Environment) -> Option<String> {
    if subpath == "." {
        return resolve_exports_root(exports, env);
    }
    if !subpath.starts_with("./") {
        return None;
    }

    let obj = exports.as_object()?;
    if !has_subpath_keys(obj) {
        return None;
    }

    // Exact subpath match wins over any pattern.
    if let Some(target) = obj.get(subpath) {
        return resolve_target(target, env).and_then(|t| validate_export_path(&t));
    }

    resolve_pattern(obj, subpath, env)
}

/// Resolve the root export.
///
/// Shapes: a bare string, an object with a `"."` key, or an object of
/// conditions with no subpath keys at all.
fn resolve_exports_root(exports: &Value, env: Environment) -> Option<String> {
    if let Some(s) = exports.as_str() {
        return validate_export_path(s);
    }

    let obj = exports.as_object()?;

    if let Some(dot) = obj.get(".") {
        return resolve_target(dot, env).and_then(|t| validate_export_path(&t));
    }

    if !has_subpath_keys(obj) {
        return resolve_conditions(exports, env).and_then(|t| validate_export_path(&t));
    }

    None
}

/// Resolve an imports map for a `#`-prefixed specifier.
///
/// Unlike exports targets, an imports target may be a bare package
/// reference; it is returned verbatim for the resolver to restart on.
#[must_use]
pub fn resolve_imports(imports: &Value, specifier: &str, env: Environment) -> Option<String> {
    if !specifier.starts_with('#') {
        return None;
    }
    let obj = imports.as_object()?;

    if let Some(target) = obj.get(specifier) {
        return resolve_target(target, env);
    }

    // Pattern keys also apply to imports maps.
    let matches = collect_pattern_matches(obj, specifier, |k| k.starts_with('#'));
    let (_, target, star) = matches.first()?;
    let resolved = resolve_target(target, env)?;
    substitute_star(&resolved, star, false)
}

fn resolve_pattern(
    obj: &serde_json::Map<String, Value>,
    subpath: &str,
    env: Environment,
) -> Option<String> {
    let matches = collect_pattern_matches(obj, subpath, |k| k.starts_with("./"));
    let (_, target, star) = matches.first()?;
    let resolved = resolve_target(target, env)?;
    substitute_star(&resolved, star, true)
}

/// Collect pattern keys matching `subpath`, most specific (longest key)
/// first, lexicographic on ties.
fn collect_pattern_matches<'a>(
    obj: &'a serde_json::Map<String, Value>,
    subpath: &str,
    key_filter: impl Fn(&str) -> bool,
) -> Vec<(&'a str, &'a Value, String)> {
    let mut matches: Vec<(&str, &Value, String)> = Vec::new();

    for (key, value) in obj {
        if key.chars().filter(|&c| c == '*').count() != 1 || !key_filter(key) {
            continue;
        }
        if let Some(star) = match_pattern(key, subpath) {
            matches.push((key.as_str(), value, star));
        }
    }

    matches.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(b.0)));
    matches
}

/// Whether the exports object carries subpath keys (and is therefore not
/// a bare condition object).
fn has_subpath_keys(obj: &serde_json::Map<String, Value>) -> bool {
    obj.keys().any(|k| k == "." || k.starts_with("./"))
}

/// Match a single-`*` pattern against a subpath, returning the `*` value.
fn match_pattern(pattern: &str, subpath: &str) -> Option<String> {
    let star_pos = pattern.find('*')?;
    let prefix = &pattern[..star_pos];
    let suffix = &pattern[star_pos + 1..];

    if !subpath.starts_with(prefix) {
        return None;
    }
    if !suffix.is_empty() && !subpath.ends_with(suffix) {
        return None;
    }

    let start = prefix.len();
    let end = subpath.len().checked_sub(suffix.len())?;
    if start > end {
        return None;
    }

    let star = &subpath[start..end];
    if star.is_empty() {
        return None;
    }
    Some(star.to_string())
}

/// Substitute the matched `*` value into a target.
fn substitute_star(target: &str, star: &str, require_relative: bool) -> Option<String> {
    if target.chars().filter(|&c| c == '*').count() != 1 {
        return None;
    }

    let result = target.replace('*', star);

    if require_relative && !result.starts_with("./") {
        return None;
    }
    // Never allow a substitution to traverse out of the package.
    if result.split('/').any(|segment| segment == "..") {
        return None;
    }

    Some(result)
}

/// A target is a string or a condition object.
fn resolve_target(target: &Value, env: Environment) -> Option<String> {
    if let Some(s) = target.as_str() {
        return Some(s.to_string());
    }
    resolve_conditions(target, env)
}

/// Walk the fixed condition list for the environment; first declared
/// condition wins. Lookup by fixed list keeps resolution deterministic
/// regardless of manifest key ordering.
fn resolve_conditions(value: &Value, env: Environment) -> Option<String> {
    let obj = value.as_object()?;
    for condition in conditions_for(env) {
        if let Some(target) = obj.get(*condition) {
            if let Some(resolved) = resolve_target(target, env) {
                return Some(resolved);
            }
        }
    }
    None
}

/// Export targets must stay inside the package.
fn validate_export_path(target: &str) -> Option<String> {
    if !target.starts_with("./") {
        return None;
    }
    if target.split('/').any(|segment| segment == "..") {
        return None;
    }
    Some(target.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_root_string_export() {
        let exports = json!("./dist/index.js");
        assert_eq!(
            resolve_exports(&exports, ".", Environment::Browser),
            Some("./dist/index.js".to_string())
        );
    }

    #[test]
    fn test_root_conditions_prefer_browser() {
        let exports = json!({
            "node": "./dist/node.js",
            "browser": "./dist/web.js",
            "default": "./dist/index.js"
        });
        assert_eq!(
            resolve_exports(&exports, ".", Environment::Browser),
            Some("./dist/web.js".to_string())
        );
        assert_eq!(
            resolve_exports(&exports, ".", Environment::Server),
            Some("./dist/node.js".to_string())
        );
    }

    #[test]
    fn test_nested_conditions() {
        let exports = json!({
            ".": {
                "browser": { "development": "./dev.js", "default": "./web.js" },
                "default": "./index.js"
            }
        });
        assert_eq!(
            resolve_exports(&exports, ".", Environment::Browser),
            Some("./dev.js".to_string())
        );
    }

    #[test]
    fn test_exact_subpath() {
        let exports = json!({
            ".": "./index.js",
            "./feature": "./lib/feature.js"
        });
        assert_eq!(
            resolve_exports(&exports, "./feature", Environment::Browser),
            Some("./lib/feature.js".to_string())
        );
    }

    #[test]
    fn test_subpath_miss_is_none() {
        let exports = json!({ ".": "./index.js" });
        assert_eq!(resolve_exports(&exports, "./private", Environment::Browser), None);
    }

    #[test]
    fn test_pattern_subpath() {
        let exports = json!({ "./*": "./lib/*.js" });
        assert_eq!(
            resolve_exports(&exports, "./array", Environment::Browser),
            Some("./lib/array.js".to_string())
        );
    }

    #[test]
    fn test_most_specific_pattern_wins() {
        let exports = json!({
            "./*": "./lib/*.js",
            "./features/*": "./features/*/index.js"
        });
        assert_eq!(
            resolve_exports(&exports, "./features/a", Environment::Browser),
            Some("./features/a/index.js".to_string())
        );
    }

    #[test]
    fn test_pattern_rejects_traversal() {
        let exports = json!({ "./*": "./lib/*.js" });
        assert_eq!(resolve_exports(&exports, "./../evil", Environment::Browser), None);
    }

    #[test]
    fn test_imports_exact_and_bare_target() {
        let imports = json!({
            "#util": "./src/util.js",
            "#dep": "real-pkg"
        });
        assert_eq!(
            resolve_imports(&imports, "#util", Environment::Browser),
            Some("./src/util.js".to_string())
        );
        // Bare targets come back verbatim for the restart path.
        assert_eq!(
            resolve_imports(&imports, "#dep", Environment::Browser),
            Some("real-pkg".to_string())
        );
    }

    #[test]
    fn test_imports_conditions_and_patterns() {
        let imports = json!({
            "#env": { "browser": "./env.web.js", "default": "./env.node.js" },
            "#internal/*": "./src/internal/*.js"
        });
        assert_eq!(
            resolve_imports(&imports, "#env", Environment::Server),
            Some("./env.node.js".to_string())
        );
        assert_eq!(
            resolve_imports(&imports, "#internal/state", Environment::Browser),
            Some("./src/internal/state.js".to_string())
        );
    }

    #[test]
    fn test_non_relative_export_target_rejected() {
        let exports = json!({ ".": "/etc/passwd" });
        assert_eq!(resolve_exports(&exports, ".", Environment::Browser), None);
    }
}
