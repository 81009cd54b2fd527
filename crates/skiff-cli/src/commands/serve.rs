//! `skiff serve` command implementation.
//!
//! Thin transport glue: an axum static server that reads project files,
//! runs each response through the rewriting pipeline, and serves dev
//! bundles from the disk dispatcher's output directory. All module
//! semantics live in `skiff-core`; this file only moves bytes.

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use miette::{IntoDiagnostic, Result};
use skiff_core::bundle::DEPS_URL_PREFIX;
use skiff_core::manifest::resolve_file;
use skiff_core::{
    load_options, Environment, ResourceType, ResponseRewriter, Resolver, RewriteHooks,
    ServedResponse,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::dispatch::DiskBundleDispatcher;

/// Serve action.
#[derive(Debug, Clone)]
pub struct ServeAction {
    /// Project root to serve.
    pub root: PathBuf,
    /// Port to listen on.
    pub port: u16,
    /// Host to bind to.
    pub host: String,
    /// Environment to resolve for.
    pub env: Environment,
}

struct ServeState {
    rewriter: ResponseRewriter,
    deps_dir: PathBuf,
    env: Environment,
}

/// Run the dev server until interrupted.
pub async fn run(action: ServeAction) -> Result<()> {
    let root = dunce::canonicalize(&action.root).unwrap_or(action.root);
    let options = load_options(&root).into_diagnostic()?;
    let resolver = Arc::new(Resolver::with_options(root.clone(), options));
    let dispatcher = Arc::new(DiskBundleDispatcher::new(&root));
    let deps_dir = dispatcher.deps_dir().to_path_buf();
    let rewriter = ResponseRewriter::new(resolver, dispatcher);

    let state = Arc::new(ServeState {
        rewriter,
        deps_dir,
        env: action.env,
    });

    let app = Router::new()
        .fallback(get(serve_path))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", action.host, action.port)
        .parse()
        .into_diagnostic()?;
    tracing::info!(%addr, root = %root.display(), "skiff dev server listening");

    let listener = tokio::net::TcpListener::bind(addr).await.into_diagnostic()?;
    axum::serve(listener, app).await.into_diagnostic()?;
    Ok(())
}

async fn serve_path(State(state): State<Arc<ServeState>>, uri: Uri) -> Response {
    let path = uri.path().to_string();

    // Dev bundles are served straight from the dispatcher's output.
    if let Some(key) = path.strip_prefix(DEPS_URL_PREFIX) {
        if key.contains('/') || key.contains("..") {
            return StatusCode::NOT_FOUND.into_response();
        }
        let bundle = state.deps_dir.join(key);
        return match tokio::fs::read(&bundle).await {
            Ok(bytes) => raw_response(bytes, "application/javascript"),
            Err(_) => StatusCode::NOT_FOUND.into_response(),
        };
    }

    let Some(file) = map_to_file(&state, &path) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let Ok(bytes) = tokio::fs::read(&file).await else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let ext = file.extension().and_then(|e| e.to_str()).unwrap_or("");
    let Some(resource_type) = ResourceType::from_extension(ext) else {
        return raw_response(bytes, content_type_for(ext));
    };

    // Blocking resolution work inline: the dev workload is one
    // interactive session, not production traffic.
    match state.rewriter.rewrite(
        &file,
        ServedResponse::new(bytes),
        resource_type,
        state.env,
        &RewriteHooks::default(),
    ) {
        Ok(response) => {
            let mut builder = Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, content_type_for(ext));
            for (name, value) in response.headers() {
                builder = builder.header(name, value);
            }
            builder
                .body(Body::from(response.body))
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
        Err(e) => {
            tracing::error!(error = %e, file = %file.display(), "response rewrite failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// Map a URL path to a file under the root or the extra search dirs.
fn map_to_file(state: &ServeState, url_path: &str) -> Option<PathBuf> {
    let resolver = state.rewriter.resolver();
    let relative = url_path.trim_start_matches('/');
    let relative = if relative.is_empty() { "index.html" } else { relative };
    if relative.split('/').any(|segment| segment == "..") {
        return None;
    }

    let mut bases = vec![resolver.root().to_path_buf()];
    for dir in &resolver.options().search_dirs {
        bases.push(if dir.is_absolute() {
            dir.clone()
        } else {
            resolver.root().join(dir)
        });
    }

    let extensions = resolver.options().probe_extensions();
    for base in bases {
        let candidate = base.join(relative);
        if candidate.is_file() {
            return Some(candidate);
        }
        if let Some(found) = resolve_file(&candidate, &extensions) {
            return Some(found);
        }
    }
    None
}

fn raw_response(bytes: Vec<u8>, content_type: &str) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .body(Body::from(bytes))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn content_type_for(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "js" | "mjs" | "cjs" | "jsx" | "ts" | "tsx" => "application/javascript",
        "css" => "text/css",
        "html" | "htm" => "text/html; charset=utf-8",
        "json" => "application/json",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "woff2" => "font/woff2",
        "wasm" => "application/wasm",
        _ => "application/octet-stream",
    }
}
