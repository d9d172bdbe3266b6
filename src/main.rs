//! # Pregel Cluster
//!
//! Command-line front end for the distributed Pregel runtime in `pregel-core`.
//!
//! This binary provides:
//! - A coordinator server accepting clients and workers over TCP
//! - Worker processes that compute partitions of a graph
//! - A client that loads an edge list and submits it as a job
//! - A local mode running everything in one process
//!
//! ## Quick Start
//! ```bash
//! pregel-cluster local --graph web.txt --workers 4 --out ranks.txt
//! ```

// =============================================================================
// MODULE DECLARATIONS
// =============================================================================

/// Configuration management
mod config;

/// Subcommand implementations
mod commands;

// =============================================================================
// IMPORTS
// =============================================================================
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use pregel_core::ProgramKind;

use crate::commands::GraphInput;
use crate::config::Config;

// =============================================================================
// CLI ARGUMENTS
// =============================================================================
#[derive(Parser, Debug)]
#[command(
    name = "pregel-cluster",
    version = "0.1.0",
    about = "Distributed bulk-synchronous graph processing",
    long_about = r#"
Pregel Cluster - vertex-centric graph processing across many workers.

A server coordinates supersteps, workers compute their partitions of the
graph and clients submit edge lists as jobs. Networked processes share a
file store (PREGEL_STORE_DIR).

EXAMPLES:
  # Start the coordinator
  pregel-cluster server

  # Start two workers
  pregel-cluster worker --id w1
  pregel-cluster worker --id w2

  # Submit a graph and save the ranks
  pregel-cluster client --id 1 --graph web.txt --out ranks.txt

  # Everything in one process
  pregel-cluster local --graph web.txt --workers 4 --program max-value
"#
)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Vertex program run by workers
    #[arg(
        short = 'p',
        long = "program",
        global = true,
        default_value = "pagerank",
        env = "PREGEL_PROGRAM"
    )]
    program: ProgramKind,

    /// Verbose output (debug logging)
    #[arg(
        short = 'v',
        long = "verbose",
        global = true,
        help = "Enable verbose/debug logging",
        default_value = "false"
    )]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the coordinator server
    Server,

    /// Run a worker connected to the server
    Worker {
        /// Worker id, unique within the cluster
        #[arg(long)]
        id: String,
    },

    /// Submit a graph to the server and wait for the result
    Client {
        /// Client id
        #[arg(long)]
        id: u64,

        /// Request id, positive and unique per client
        #[arg(long, default_value = "1")]
        request_id: i64,

        #[command(flatten)]
        graph: GraphArgs,
    },

    /// Run a graph on an in-process cluster
    Local {
        /// Number of in-process workers
        #[arg(short = 'w', long, default_value = "4")]
        workers: usize,

        /// Use a file store in this directory instead of memory
        #[arg(long)]
        store_dir: Option<PathBuf>,

        #[command(flatten)]
        graph: GraphArgs,
    },
}

#[derive(clap::Args, Debug)]
struct GraphArgs {
    /// Edge list file, one `from to` pair per line
    #[arg(short = 'g', long, value_name = "FILE")]
    graph: PathBuf,

    /// Job name (defaults to the graph file name)
    #[arg(long)]
    job: Option<String>,

    /// Initial value of every vertex
    #[arg(long, default_value = "1.0")]
    value: f64,

    /// Write `id value` lines here when the job succeeds
    #[arg(short = 'o', long, value_name = "FILE")]
    out: Option<PathBuf>,
}

impl From<GraphArgs> for GraphInput {
    fn from(args: GraphArgs) -> Self {
        GraphInput {
            graph: args.graph,
            job: args.job,
            initial_value: args.value,
            out: args.out,
        }
    }
}

// =============================================================================
// MAIN FUNCTION
// =============================================================================
#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::from_env()?;
    init_logging(args.verbose, &config.log_level)?;
    config.validate()?;

    info!(
        program = %args.program,
        max_supersteps = config.max_supersteps,
        checkpoint_rate = config.checkpoint_rate,
        "Configuration loaded"
    );

    let result = match args.command {
        Command::Server => commands::run_server(&config).await,
        Command::Worker { id } => commands::run_worker(&config, &id, args.program).await,
        Command::Client { id, request_id, graph } => {
            commands::run_client(&config, id, request_id, &graph.into()).await
        }
        Command::Local {
            workers,
            store_dir,
            graph,
        } => {
            let store = commands::local_store(store_dir.as_deref(), config.store_compression)?;
            commands::run_local(&config, store, workers, args.program, &graph.into()).await
        }
    };

    if let Err(e) = &result {
        error!(error = %e, "Command failed");
        eprintln!("\n❌ {:#}", e);
    }
    result
}

// =============================================================================
// LOGGING INITIALIZATION
// =============================================================================
/// Initialize the tracing subscriber for structured logging.
///
/// `--verbose` forces debug; otherwise `RUST_LOG` decides.
fn init_logging(verbose: bool, log_level: &str) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to set logging subscriber: {}", e))?;

    Ok(())
}
