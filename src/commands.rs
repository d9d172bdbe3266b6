//! # Subcommand implementations
//!
//! Each function wires configuration into the library and reports the
//! outcome. Errors carry `anyhow` context for the command line.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use pregel_core::storage::{create_job, dump_to_file};
use pregel_core::{
    create_store, Client, GraphStore, JobResult, LocalCluster, ProgramKind, Server, StorageConfig,
    WorkerId,
};

use crate::config::Config;

/// Where a graph comes from and where its results go
#[derive(Debug, Clone)]
pub struct GraphInput {
    pub graph: PathBuf,
    /// Job name; defaults to the graph file stem
    pub job: Option<String>,
    pub initial_value: f64,
    pub out: Option<PathBuf>,
}

impl GraphInput {
    pub fn job_name(&self) -> String {
        self.job.clone().unwrap_or_else(|| {
            self.graph
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "graph".to_string())
        })
    }

    fn read_edge_list(&self) -> Result<String> {
        std::fs::read_to_string(&self.graph)
            .with_context(|| format!("Failed to read graph file {}", self.graph.display()))
    }
}

// =============================================================================
// SERVER / WORKER
// =============================================================================

pub async fn run_server(config: &Config) -> Result<()> {
    let store = create_store(config.storage_config()).context("Failed to open store")?;
    let server = Server::bind(
        &config.client_addr,
        &config.worker_addr,
        config.pregel_config(),
        store,
    )
    .await
    .context("Failed to start server")?;
    server.run().await.context("Server stopped")?;
    Ok(())
}

pub async fn run_worker(config: &Config, id: &str, program: ProgramKind) -> Result<()> {
    let store = create_store(config.storage_config()).context("Failed to open store")?;
    info!(worker = id, server = %config.server_addr, program = %program, "Starting worker");
    pregel_core::run_worker(
        &config.server_addr,
        WorkerId::from(id),
        store,
        program.build(),
        config.pregel_config(),
    )
    .await
    .with_context(|| format!("Worker {} stopped", id))?;
    Ok(())
}

// =============================================================================
// CLIENT / LOCAL
// =============================================================================

/// Load a graph into the shared store, submit it and wait for the outcome
pub async fn run_client(
    config: &Config,
    client_id: u64,
    request_id: i64,
    input: &GraphInput,
) -> Result<()> {
    let store = create_store(config.storage_config()).context("Failed to open store")?;
    let edge_list = input.read_edge_list()?;
    let access = create_job(store.as_ref(), &input.job_name(), &edge_list, input.initial_value)
        .await
        .context("Failed to load graph")?;

    let mut client = Client::connect(&config.client_addr)
        .await
        .context("Failed to reach server")?;
    let pending = client.hello(client_id).await.context("Handshake failed")?;
    if !pending.is_empty() {
        warn!(client_id, ?pending, "Client has unfinished requests");
    }

    let primary = access.primary.clone();
    let submission = client
        .request(client_id, request_id, access)
        .await
        .context("Request failed")?;

    print_banner("JOB RESULT");
    println!("job:     {}", primary);
    println!("status:  {}", submission.status);
    print_rule();

    if !submission.success {
        anyhow::bail!("Job {} finished with {}", primary, submission.status);
    }
    if let Some(out) = &input.out {
        write_results(store.as_ref(), &primary, out).await?;
    }
    Ok(())
}

/// Run a graph on an in-process cluster
pub async fn run_local(
    config: &Config,
    store: Arc<dyn GraphStore>,
    workers: usize,
    program: ProgramKind,
    input: &GraphInput,
) -> Result<()> {
    let edge_list = input.read_edge_list()?;
    let job = input.job_name();
    info!(job = %job, workers, program = %program, "Running local cluster");

    let cluster =
        LocalCluster::new(config.pregel_config(), store.clone(), program.build(), workers);
    let result = cluster
        .run_edge_list(&job, &edge_list, input.initial_value)
        .await
        .context("Failed to load graph")?;

    report(&job, &result);
    if !result.is_success() {
        anyhow::bail!("Job {} finished with {}", job, result.status);
    }
    if let Some(out) = &input.out {
        write_results(store.as_ref(), &job, out).await?;
    }
    Ok(())
}

/// Storage for the `local` subcommand: memory unless a directory is given
pub fn local_store(dir: Option<&Path>, compression: bool) -> Result<Arc<dyn GraphStore>> {
    let config = match dir {
        Some(path) => StorageConfig::File {
            path: path.to_path_buf(),
            compression,
        },
        None => StorageConfig::Memory,
    };
    create_store(config).context("Failed to open store")
}

async fn write_results(store: &dyn GraphStore, collection: &str, out: &Path) -> Result<()> {
    dump_to_file(store, collection, out)
        .await
        .with_context(|| format!("Failed to write results to {}", out.display()))?;
    info!(path = %out.display(), "Results written");
    Ok(())
}

fn report(job: &str, result: &JobResult) {
    print_banner("JOB RESULT");
    println!("job:         {}", job);
    println!("status:      {}", result.status);
    println!("supersteps:  {}", result.request.superstep);
    println!("checkpoint:  {}", result.request.checkpoint_step);
    print_rule();
}

fn print_banner(title: &str) {
    println!("\n{}", "=".repeat(60));
    println!("{}", title);
    println!("{}\n", "=".repeat(60));
}

fn print_rule() {
    println!("\n{}", "=".repeat(60));
}
