#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::too_many_lines)]

mod commands;
mod dispatch;
mod logging;

use clap::Parser;
use miette::Result;
use skiff_core::Environment;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "skiff")]
#[command(author, version, about = "Unbundled dev server with on-the-fly import rewriting", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v for DEBUG, -vv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit JSON formatted output (stable, machine-readable)
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Serve a project without a pre-build step
    Serve {
        /// Project root to serve
        #[arg(long, default_value = ".")]
        root: PathBuf,

        /// Port to listen on
        #[arg(long, default_value_t = 3000)]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Environment to resolve for (browser or server)
        #[arg(long, default_value = "browser")]
        env: String,
    },

    /// Resolve a single specifier and print the file it maps to
    Resolve {
        /// Specifier to resolve (relative, absolute, or bare)
        specifier: String,

        /// Importing file (defaults to the project entry)
        #[arg(long, value_name = "FILE")]
        from: Option<PathBuf>,

        /// Project root
        #[arg(long, default_value = ".")]
        root: PathBuf,

        /// Environment to resolve for (browser or server)
        #[arg(long, default_value = "browser")]
        env: String,
    },
}

fn parse_env(value: &str) -> Result<Environment> {
    match value {
        "browser" => Ok(Environment::Browser),
        "server" => Ok(Environment::Server),
        other => Err(miette::miette!(
            "unknown environment \"{other}\" (expected \"browser\" or \"server\")"
        )),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.json);

    match cli.command {
        Commands::Serve {
            root,
            port,
            host,
            env,
        } => {
            let action = commands::serve::ServeAction {
                root,
                port,
                host,
                env: parse_env(&env)?,
            };
            commands::serve::run(action).await
        }
        Commands::Resolve {
            specifier,
            from,
            root,
            env,
        } => {
            let action = commands::resolve::ResolveAction {
                specifier,
                from,
                env: parse_env(&env)?,
                root,
                json: cli.json,
            };
            commands::resolve::run(&action)
        }
    }
}
