//! Disk-memoized bundle dispatcher.
//!
//! The real bundler is an external collaborator; this default
//! implementation satisfies the dispatcher contract for development:
//! output is memoized on disk by cache key, repeated dispatches never
//! re-bundle, and bundle operations are serialized. The emitted file
//! wraps a CommonJS module body into a default-exporting ES module
//! (single file only — nested requires are the external bundler's job).

use skiff_core::bundle::{BundleDispatcher, BundleError};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Directory bundles are written to, relative to the project root.
const DEPS_DIR: &str = ".skiff/deps";

pub struct DiskBundleDispatcher {
    deps_dir: PathBuf,
    // Serializes bundle writes: at most one operation per key at a time.
    write_guard: Mutex<()>,
}

impl DiskBundleDispatcher {
    #[must_use]
    pub fn new(root: &Path) -> Self {
        Self {
            deps_dir: root.join(DEPS_DIR),
            write_guard: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn deps_dir(&self) -> &Path {
        &self.deps_dir
    }
}

impl BundleDispatcher for DiskBundleDispatcher {
    fn dispatch(&self, dep_path: &Path, cache_key: &str) -> Result<PathBuf, BundleError> {
        let output = self.deps_dir.join(format!("{cache_key}.js"));
        if output.is_file() {
            return Ok(output);
        }

        let _guard = self.write_guard.lock().unwrap();
        // A concurrent dispatch may have produced it while we waited.
        if output.is_file() {
            return Ok(output);
        }

        let source = std::fs::read_to_string(dep_path).map_err(|e| {
            BundleError::new(format!("failed to read {}: {e}", dep_path.display()))
        })?;

        std::fs::create_dir_all(&self.deps_dir).map_err(|e| {
            BundleError::new(format!("failed to create {}: {e}", self.deps_dir.display()))
        })?;

        let wrapped = wrap_commonjs(&source);
        std::fs::write(&output, wrapped).map_err(|e| {
            BundleError::new(format!("failed to write {}: {e}", output.display()))
        })?;

        tracing::debug!(bundle = %output.display(), "wrote dev bundle");
        Ok(output)
    }
}

/// Wrap a CommonJS module body so a browser can import it.
fn wrap_commonjs(source: &str) -> String {
    format!(
        "const module = {{ exports: {{}} }};\n\
         const exports = module.exports;\n\
         {source}\n\
         export default module.exports;\n"
    )
}
