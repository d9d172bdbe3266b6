//! Distributed Pregel runtime
//!
//! Bulk-synchronous vertex-centric graph processing across worker processes:
//!
//! - [`partition`]: splits the vertex id space over workers by measured speed
//! - [`coordinator`]: drives a job through supersteps, checkpoints and
//!   rebalancing
//! - [`worker`]: loads partitions and computes them in parallel sub-engines
//! - [`server`], [`client`], [`transport`]: the networked deployment
//! - [`cluster`]: the same pieces in one process
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use pregel_core::{LocalCluster, MemoryStore, PageRank, PregelConfig};
//!
//! # async fn demo() -> Result<(), pregel_core::PregelError> {
//! let store = Arc::new(MemoryStore::new());
//! let cluster = LocalCluster::new(PregelConfig::default(), store, Arc::new(PageRank), 4);
//! let result = cluster.run_edge_list("web", "0 1\n1 2\n2 0\n", 1.0).await?;
//! assert!(result.is_success());
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod cluster;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod message;
pub mod partition;
pub mod program;
pub mod request;
pub mod server;
pub mod storage;
pub mod transport;
pub mod vertex;
pub mod worker;

pub use client::{Client, Submission};
pub use cluster::LocalCluster;
pub use config::{PregelConfig, DEFAULT_MAX_ATTEMPTS};
pub use coordinator::JobCoordinator;
pub use error::PregelError;
pub use message::{FromServer, FromWorker, VertexId, VertexMessage, WorkerId, WorkerReply};
pub use partition::{Partition, PartitionManager};
pub use program::{MaxValue, PageRank, ProgramKind};
pub use request::{GraphAccess, JobResult, JobStatus, Request};
pub use server::Server;
pub use storage::{create_job, create_store, FileStore, GraphStore, MemoryStore, StorageConfig};
pub use vertex::{ComputeContext, ComputeResult, Vertex, VertexProgram, VertexState};
pub use worker::{run_worker, ShardProcessor};

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;

    assert_impl_all!(PartitionManager: Send, Sync);
    assert_impl_all!(JobCoordinator: Send);
    assert_impl_all!(MemoryStore: Send, Sync);
    assert_impl_all!(FileStore: Send, Sync);
    assert_impl_all!(Request: Send, Sync, Clone);
    assert_impl_all!(PregelError: Send, Sync);
}
