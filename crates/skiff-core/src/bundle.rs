//! Bundle dispatch glue.
//!
//! Vendored dependencies that are not in static-import format are
//! redirected to deterministically named per-version bundles. The
//! bundler itself is external; the engine only computes cache keys,
//! emits the serving URL, and hands work to a [`BundleDispatcher`].

use std::path::{Path, PathBuf};

/// URL prefix bundles are served under.
pub const DEPS_URL_PREFIX: &str = "/@deps/";

/// Produces a browser-loadable static-import file for a dependency.
///
/// `dispatch` blocks until the bundle exists on disk and returns its
/// path. Implementations must be idempotent: repeated calls with the
/// same cache key must not re-bundle, and at most one bundle operation
/// may run concurrently per key.
pub trait BundleDispatcher: Send + Sync {
    fn dispatch(&self, dep_path: &Path, cache_key: &str) -> Result<PathBuf, BundleError>;
}

/// No-op dispatcher: reports the dependency path itself as the bundle.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopDispatcher;

impl BundleDispatcher for NoopDispatcher {
    fn dispatch(&self, dep_path: &Path, _cache_key: &str) -> Result<PathBuf, BundleError> {
        Ok(dep_path.to_path_buf())
    }
}

/// Deterministic per-version cache key for a dependency bundle.
///
/// `lodash/array` at `4.17.20` becomes `lodash__array-4.17.20`.
#[must_use]
pub fn bundle_cache_key(specifier: &str, version: &str) -> String {
    let sanitized = sanitize_specifier(specifier);
    if version.is_empty() {
        sanitized
    } else {
        format!("{sanitized}-{version}")
    }
}

/// Serving URL for a bundle cache key.
#[must_use]
pub fn bundle_url(cache_key: &str) -> String {
    format!("{DEPS_URL_PREFIX}{cache_key}.js")
}

/// Sanitize a specifier for use as a filename.
fn sanitize_specifier(specifier: &str) -> String {
    specifier.replace('/', "__").replace('@', "")
}

/// Error from a bundle operation.
#[derive(Debug)]
pub struct BundleError {
    pub message: String,
    pub package: Option<String>,
}

impl BundleError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            package: None,
        }
    }

    #[must_use]
    pub fn for_package(message: impl Into<String>, package: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            package: Some(package.into()),
        }
    }
}

impl std::fmt::Display for BundleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(pkg) = &self.package {
            write!(f, "{} (package: {})", self.message, pkg)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for BundleError {}
