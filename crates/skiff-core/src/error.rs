use std::path::PathBuf;
use thiserror::Error;

/// Core error type for skiff operations.
///
/// Ordinary resolution failures are not errors: the resolver returns
/// `None` and the rewriter leaves the original specifier in place. The
/// variants here are the failures that must abort a response.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read config at {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config at {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Resolve hook failed for \"{specifier}\" imported by {importer}: {source}")]
    ResolveHook {
        specifier: String,
        importer: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Failed to bundle {path}: {message}")]
    Bundle { path: PathBuf, message: String },

    #[error("Failed to decode {encoding} response body: {source}")]
    Decode {
        encoding: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Other(String),
}

impl Error {
    #[must_use]
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }
}
