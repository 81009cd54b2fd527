#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]

pub mod bundle;
pub mod config;
pub mod error;
pub mod locate;
pub mod manifest;
pub mod registry;
pub mod resolver;
pub mod rewrite;
pub mod scan;

pub use bundle::{bundle_cache_key, bundle_url, BundleDispatcher, BundleError, NoopDispatcher};
pub use config::{load_options, Environment, InjectedScript, ServerOptions};
pub use error::Error;
pub use manifest::{AliasTarget, Package};
pub use registry::{ResolveCacheKey, ResolverState};
pub use resolver::Resolver;
pub use rewrite::{
    HookOutcome, ImportContext, ResourceType, ResponseRewriter, RewriteHooks, ServedResponse,
};
pub use scan::{scan_module_source, scan_style_references, ImportRecord};
