//! Import-rewriting pipeline.
//!
//! One call per outgoing response of a script, stylesheet, or markup
//! resource: decode the body, rewrite every module reference through
//! the resolver (or a caller-supplied hook), divert non-static-import
//! vendored dependencies to bundles, shape the headers, and hand the
//! result to the send hook. The pipeline is a pure function of the
//! response value — no socket, trivially unit-testable.

pub mod encoding;
pub mod markup;

use crate::bundle::{bundle_cache_key, bundle_url, BundleDispatcher};
use crate::config::Environment;
use crate::error::Error;
use crate::locate::is_vendored;
use crate::manifest::path_to_slash;
use crate::resolver::{is_bare_specifier, Resolver};
use crate::scan::{scan_module_source, scan_style_references, ImportRecord};
use encoding::CONTENT_ENCODING;
use markup::InjectPosition;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// What kind of resource a response body holds.
///
/// Decided once at the boundary; the pipeline matches exhaustively
/// instead of sniffing the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceType {
    Script,
    Stylesheet,
    Markup,
}

impl ResourceType {
    /// Classify by file extension; `None` for resources the pipeline
    /// does not rewrite.
    #[must_use]
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "js" | "jsx" | "ts" | "tsx" | "mjs" | "cjs" => Some(Self::Script),
            "css" => Some(Self::Stylesheet),
            "html" | "htm" => Some(Self::Markup),
            _ => None,
        }
    }
}

/// An in-flight response: body plus headers, transport-agnostic.
#[derive(Debug, Clone, Default)]
pub struct ServedResponse {
    pub body: Vec<u8>,
    headers: Vec<(String, String)>,
}

impl ServedResponse {
    #[must_use]
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            headers: Vec::new(),
        }
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        for (n, v) in &mut self.headers {
            if n.eq_ignore_ascii_case(name) {
                *v = value;
                return;
            }
        }
        self.headers.push((name.to_string(), value));
    }

    pub fn remove_header(&mut self, name: &str) {
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    }

    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }
}

/// Context handed to a resolve hook.
#[derive(Debug, Clone)]
pub struct ImportContext {
    /// File whose body is being rewritten.
    pub importer: PathBuf,
    /// Whether the reference is a dynamic `import()` call.
    pub dynamic: bool,
}

/// What a resolve hook decided for one specifier.
#[derive(Debug, Clone)]
pub enum HookOutcome {
    /// No opinion; fall through to the resolver.
    Default,
    /// Leave the specifier untouched.
    Keep,
    /// Replace the specifier. For dynamic imports a replacement
    /// containing a call parenthesis replaces the whole `import(...)`
    /// call, extra arguments included.
    Replace(String),
}

pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// Caller-supplied resolve hook. The third argument exposes the
/// resolver directly so a hook can selectively delegate.
pub type ResolveHook = dyn Fn(&str, &ImportContext, &dyn Fn(&str, &Path) -> Option<PathBuf>) -> Result<HookOutcome, HookError>
    + Send
    + Sync;

/// Last-chance body transform; a `Some` return replaces the body.
pub type SendHook = dyn Fn(&Path, &str) -> Option<String> + Send + Sync;

/// Hooks for one rewrite call.
#[derive(Default, Clone, Copy)]
pub struct RewriteHooks<'a> {
    pub resolve: Option<&'a ResolveHook>,
    pub send: Option<&'a SendHook>,
}

/// The rewriting pipeline for one server instance.
pub struct ResponseRewriter {
    resolver: Arc<Resolver>,
    dispatcher: Arc<dyn BundleDispatcher>,
    /// Cache keys already handed to the dispatcher, so one dependency
    /// version is bundled once no matter how many import sites hit it.
    dispatched: RwLock<HashSet<String>>,
}

impl ResponseRewriter {
    #[must_use]
    pub fn new(resolver: Arc<Resolver>, dispatcher: Arc<dyn BundleDispatcher>) -> Self {
        Self {
            resolver,
            dispatcher,
            dispatched: RwLock::new(HashSet::new()),
        }
    }

    #[must_use]
    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    /// Rewrite one outgoing response.
    ///
    /// Soft resolution failures leave the original specifier in place;
    /// hook and bundling failures abort with an error the transport
    /// turns into an error status.
    pub fn rewrite(
        &self,
        file_path: &Path,
        mut response: ServedResponse,
        resource_type: ResourceType,
        env: Environment,
        hooks: &RewriteHooks<'_>,
    ) -> Result<ServedResponse, Error> {
        let mut scannable = true;

        if let Some(declared) = response.header(CONTENT_ENCODING).map(ToString::to_string) {
            match encoding::decode_body(&response.body, &declared) {
                Some(Ok(decoded)) => {
                    response.body = decoded;
                    response.remove_header(CONTENT_ENCODING);
                }
                Some(Err(source)) => {
                    return Err(Error::Decode {
                        encoding: declared,
                        source,
                    });
                }
                // Unknown encoding: the body cannot be scanned.
                None => scannable = false,
            }
        }

        if scannable {
            match resource_type {
                ResourceType::Script => {
                    if let Ok(text) = std::str::from_utf8(&response.body) {
                        let rewritten = self.rewrite_script(file_path, text, env, hooks)?;
                        response.body = rewritten.into_bytes();
                    }
                }
                ResourceType::Stylesheet => {
                    if let Ok(text) = std::str::from_utf8(&response.body) {
                        let rewritten = self.rewrite_style(file_path, text, env);
                        response.body = rewritten.into_bytes();
                    }
                    shape_headers(&mut response);
                }
                ResourceType::Markup => {
                    if let Ok(text) = std::str::from_utf8(&response.body).map(ToString::to_string)
                    {
                        let rewritten = self.rewrite_markup(&text, &mut response);
                        response.body = rewritten.into_bytes();
                    }
                    shape_headers(&mut response);
                }
            }
        }

        if let Some(send) = hooks.send {
            if let Ok(text) = std::str::from_utf8(&response.body) {
                if let Some(replaced) = send(file_path, text) {
                    response.body = replaced.into_bytes();
                }
            }
        }

        // Always recomputed from the final byte length.
        response.set_header("content-length", response.body.len().to_string());
        Ok(response)
    }

    /// Rewrite import/export declarations in script source.
    ///
    /// Earlier substitutions shift every later offset; the running
    /// delta keeps the recorded spans aligned with the mutated text.
    fn rewrite_script(
        &self,
        file_path: &Path,
        text: &str,
        env: Environment,
        hooks: &RewriteHooks<'_>,
    ) -> Result<String, Error> {
        let records = scan_module_source(text);
        let mut out = text.to_string();
        let mut delta: isize = 0;

        let default_resolve =
            |spec: &str, importer: &Path| self.resolver.resolve(spec, Some(importer), env);

        for record in records {
            let outcome = match hooks.resolve {
                Some(hook) => {
                    let ctx = ImportContext {
                        importer: file_path.to_path_buf(),
                        dynamic: record.dynamic,
                    };
                    hook(&record.specifier, &ctx, &default_resolve).map_err(|source| {
                        Error::ResolveHook {
                            specifier: record.specifier.clone(),
                            importer: file_path.to_path_buf(),
                            source,
                        }
                    })?
                }
                None => HookOutcome::Default,
            };

            match outcome {
                HookOutcome::Keep => {}
                HookOutcome::Replace(replacement) => {
                    if record.dynamic && replacement.contains('(') {
                        let (start, end) =
                            record.call_span.unwrap_or((record.start, record.end));
                        splice(&mut out, &mut delta, start, end, &replacement);
                    } else {
                        splice(&mut out, &mut delta, record.start, record.end, &replacement);
                    }
                }
                HookOutcome::Default => {
                    match self.resolver.resolve(&record.specifier, Some(file_path), env) {
                        Some(path) => {
                            let url = self.url_for(&path, &record, env)?;
                            splice(&mut out, &mut delta, record.start, record.end, &url);
                        }
                        None => {
                            tracing::warn!(
                                specifier = %record.specifier,
                                file = %file_path.display(),
                                "leaving unresolvable import untouched"
                            );
                        }
                    }
                }
            }
        }

        Ok(out)
    }

    /// Rewrite `@import` references in stylesheet source. External and
    /// unresolvable references stay untouched.
    fn rewrite_style(&self, file_path: &Path, text: &str, env: Environment) -> String {
        let records = scan_style_references(text);
        let mut out = text.to_string();
        let mut delta: isize = 0;

        for record in records {
            if is_external_reference(&record.specifier) {
                continue;
            }
            match self.resolver.resolve(&record.specifier, Some(file_path), env) {
                Some(path) => {
                    let url = self.public_path(&path);
                    splice(&mut out, &mut delta, record.start, record.end, &url);
                }
                None => {
                    tracing::warn!(
                        reference = %record.specifier,
                        file = %file_path.display(),
                        "leaving unresolvable style reference untouched"
                    );
                }
            }
        }

        out
    }

    /// Inject configured scripts into markup and widen any CSP header.
    fn rewrite_markup(&self, text: &str, response: &mut ServedResponse) -> String {
        let options = self.resolver.options();
        let mut out = text.to_string();

        if let Some(head) = &options.head_script {
            out = markup::inject_script(&out, head, InjectPosition::Head);
        }
        if let Some(body) = &options.body_script {
            out = markup::inject_script(&out, body, InjectPosition::Body);
        }

        if let Some(csp) = response.header("content-security-policy").map(ToString::to_string) {
            response.set_header("content-security-policy", markup::widen_csp(&csp, options));
        }

        out
    }

    /// Serving URL for a resolved file: vendored non-static-import
    /// dependencies divert to a per-version bundle, everything else is
    /// served from its on-disk location.
    fn url_for(
        &self,
        path: &Path,
        record: &ImportRecord,
        env: Environment,
    ) -> Result<String, Error> {
        if is_vendored(path) {
            let package = self.resolver.package_for_file(path, env);
            let esm = package.as_ref().is_some_and(|p| p.esm)
                || path.extension().and_then(|e| e.to_str()) == Some("mjs");

            if !esm {
                let (specifier, version) = match &package {
                    Some(pkg) => {
                        let spec = if is_bare_specifier(&record.specifier) {
                            record.specifier.clone()
                        } else {
                            // Relative reference into a vendored package:
                            // key it by the package-internal path.
                            let rel = path.strip_prefix(&pkg.dir).map(path_to_slash);
                            match rel {
                                Ok(rel) => format!("{}/{}", pkg.name, rel),
                                Err(_) => record.specifier.clone(),
                            }
                        };
                        (spec, pkg.version.clone())
                    }
                    None => (record.specifier.clone(), String::new()),
                };

                let cache_key = bundle_cache_key(&specifier, &version);
                self.ensure_bundled(path, &cache_key)?;
                return Ok(bundle_url(&cache_key));
            }
        }

        Ok(self.public_path(path))
    }

    /// Hand a dependency to the dispatcher exactly once per cache key.
    fn ensure_bundled(&self, path: &Path, cache_key: &str) -> Result<(), Error> {
        if self.dispatched.read().unwrap().contains(cache_key) {
            return Ok(());
        }

        tracing::info!(
            dependency = %path.display(),
            cache_key,
            "bundling non-static-import dependency"
        );

        self.dispatcher
            .dispatch(path, cache_key)
            .map_err(|e| Error::Bundle {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        self.dispatched.write().unwrap().insert(cache_key.to_string());
        Ok(())
    }

    /// Convert an absolute file path to a root-relative URL path.
    fn public_path(&self, path: &Path) -> String {
        if let Ok(rel) = path.strip_prefix(self.resolver.root()) {
            return format!("/{}", path_to_slash(rel));
        }
        for dir in &self.resolver.options().search_dirs {
            let base = if dir.is_absolute() {
                dir.clone()
            } else {
                self.resolver.root().join(dir)
            };
            if let Ok(rel) = path.strip_prefix(&base) {
                return format!("/{}", path_to_slash(rel));
            }
        }
        path.display().to_string().replace('\\', "/")
    }
}

/// Replace `start..end` (offsets into the original text) in `out`,
/// shifted by the accumulated delta from earlier substitutions.
fn splice(out: &mut String, delta: &mut isize, start: usize, end: usize, replacement: &str) {
    let s = usize::try_from(start as isize + *delta).unwrap_or(0);
    let e = usize::try_from(end as isize + *delta).unwrap_or(0);
    out.replace_range(s..e, replacement);
    *delta += replacement.len() as isize - (end - start) as isize;
}

/// References the rewriter must never touch: full URLs, protocol-
/// relative URLs, and data URIs.
fn is_external_reference(reference: &str) -> bool {
    reference.starts_with("http://")
        || reference.starts_with("https://")
        || reference.starts_with("//")
        || reference.starts_with("data:")
}

/// Permissive cross-origin plus no-store caching for dev responses.
fn shape_headers(response: &mut ServedResponse) {
    response.set_header("access-control-allow-origin", "*");
    response.set_header("cache-control", "no-cache");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_splice_accumulates_delta() {
        let original = "aa XX bb YY cc";
        let mut out = original.to_string();
        let mut delta = 0;
        splice(&mut out, &mut delta, 3, 5, "LONGER");
        splice(&mut out, &mut delta, 9, 11, "Z");
        assert_eq!(out, "aa LONGER bb Z cc");
    }

    #[test]
    fn test_header_case_insensitive() {
        let mut response = ServedResponse::new("x");
        response.set_header("Content-Encoding", "gzip");
        assert_eq!(response.header("content-encoding"), Some("gzip"));
        response.remove_header("CONTENT-ENCODING");
        assert!(response.header("content-encoding").is_none());
    }

    #[test]
    fn test_resource_type_from_extension() {
        assert_eq!(ResourceType::from_extension("tsx"), Some(ResourceType::Script));
        assert_eq!(ResourceType::from_extension("CSS"), Some(ResourceType::Stylesheet));
        assert_eq!(ResourceType::from_extension("html"), Some(ResourceType::Markup));
        assert_eq!(ResourceType::from_extension("png"), None);
    }

    #[test]
    fn test_external_reference() {
        assert!(is_external_reference("https://cdn.example/a.css"));
        assert!(is_external_reference("//cdn.example/a.css"));
        assert!(is_external_reference("data:text/css,"));
        assert!(!is_external_reference("./a.css"));
        assert!(!is_external_reference("pkg/styles.css"));
    }
}
