//! signalgridd — the SignalGrid daemon.
//!
//! Runs one coordinating service process:
//! - Coordination store (redb)
//! - Assignment coordinator + node registry
//! - Health sweep, rebalance, persistence and resync workers
//! - Own-node heartbeat
//! - Scaling engine (decisions only; no orchestrator is attached)
//!
//! # Usage
//!
//! ```text
//! signalgridd run --node-id pod-1 --capacity 200 --data-dir /var/lib/signalgrid
//! ```

mod node;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "signalgridd", about = "SignalGrid daemon")]
struct Cli {
    /// Emit JSON log lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Join the grid as one node and run the coordination loops.
    Run {
        /// TOML configuration file; defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Identifier this process registers under.
        #[arg(long)]
        node_id: String,

        /// Instruments this node can own.
        #[arg(long, default_value = "100")]
        capacity: u32,

        /// Data directory for the coordination store.
        #[arg(long, default_value = "/var/lib/signalgrid")]
        data_dir: PathBuf,

        /// Replica count the scaling engine starts from.
        #[arg(long, default_value = "1")]
        replicas: u32,
    },
    /// Print the effective configuration as TOML.
    Config {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json)?;

    match cli.command {
        Command::Run {
            config,
            node_id,
            capacity,
            data_dir,
            replicas,
        } => {
            let config = node::load_config(config.as_deref())?;
            node::run_node(config, node_id, capacity, data_dir, replicas).await
        }
        Command::Config { config } => {
            let config = node::load_config(config.as_deref())?;
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

fn init_tracing(json: bool) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new("info,signalgrid=debug")?,
    };
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}
