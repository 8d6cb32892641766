//! oned — the one daemon.
//!
//! Single binary that assembles the environment orchestrator:
//! - Cluster store (redb)
//! - Local cluster and DNS backends
//! - Git mirror branch discovery
//! - CI orchestrator (local registry or Jenkins)
//! - REST API
//! - Self-destruct runner
//!
//! # Usage
//!
//! ```text
//! oned serve --config /etc/one/one.toml --port 8080 --data-dir /var/lib/one
//! oned check-config --config /etc/one/one.toml
//! ```

mod self_destruct;
mod server;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;

use one_core::OneConfig;

#[derive(Parser)]
#[command(name = "oned", about = "one multi-staging daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the REST API.
    Serve {
        /// Path to one.toml.
        #[arg(long, default_value = "/etc/one/one.toml")]
        config: PathBuf,

        /// Port to listen on.
        #[arg(long, default_value = "8080")]
        port: u16,

        /// Data directory for persistent state.
        #[arg(long, default_value = "/var/lib/one")]
        data_dir: PathBuf,
    },
    /// Parse and validate a configuration file, then exit.
    CheckConfig {
        #[arg(long, default_value = "/etc/one/one.toml")]
        config: PathBuf,
    },
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,oned=debug,one_lifecycle=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Serve {
            config,
            port,
            data_dir,
        } => server::run(&config, port, data_dir).await,
        Command::CheckConfig { config } => {
            let parsed = OneConfig::from_file(&config)?;
            info!(
                path = ?config,
                repositories = parsed.repositories.len(),
                max_universe = parsed.capacity.max_universe,
                max_stable_universe = parsed.capacity.max_stable_universe,
                "configuration is valid"
            );
            Ok(())
        }
    }
}
