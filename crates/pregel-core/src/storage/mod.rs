//! Vertex storage for Pregel jobs
//!
//! Each job keeps its vertices in two collections (see
//! [`GraphAccess`](crate::request::GraphAccess)). Workers bulk-read their
//! partitions at the start of a job attempt and bulk-write them on every
//! checkpoint.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │               GraphStore                 │
//! │   ┌──────────────┐    ┌──────────────┐   │
//! │   │    Memory    │    │     File     │   │
//! │   └──────────────┘    └──────────────┘   │
//! │           └────────┬────────┘            │
//! │                    ▼                     │
//! │       collection → VertexId → Vertex     │
//! └──────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use pregel_core::storage::{create_store, create_job, StorageConfig};
//!
//! let store = create_store(StorageConfig::File {
//!     path: PathBuf::from("./graphs"),
//!     compression: true,
//! })?;
//! let access = create_job(store.as_ref(), "web", &edge_list, 1.0).await?;
//! ```

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use crate::error::PregelError;
use crate::message::VertexId;
use crate::request::GraphAccess;
use crate::vertex::Vertex;

/// Storage backend for vertex collections
///
/// Collections are keyed by name; vertices within a collection by id.
/// Implementations must tolerate concurrent writers touching disjoint
/// vertices of the same collection.
#[async_trait]
pub trait GraphStore: Send + Sync + Debug {
    /// Create or replace a collection with exactly these vertices
    async fn insert_collection(
        &self,
        collection: &str,
        vertices: Vec<Vertex>,
    ) -> Result<(), PregelError>;

    /// Vertices with `min <= id < max`, sorted by id
    async fn batch_get(
        &self,
        collection: &str,
        min: VertexId,
        max: VertexId,
    ) -> Result<Vec<Vertex>, PregelError>;

    /// Insert or overwrite each vertex
    async fn batch_update(&self, collection: &str, vertices: &[Vertex]) -> Result<(), PregelError>;

    async fn get_one(&self, collection: &str, id: VertexId) -> Result<Option<Vertex>, PregelError>;

    async fn update_one(&self, collection: &str, vertex: &Vertex) -> Result<(), PregelError> {
        self.batch_update(collection, std::slice::from_ref(vertex)).await
    }

    /// Size of the collection's id space: highest id + 1, 0 when empty
    ///
    /// Fails with [`PregelError::CollectionNotFound`] for a missing collection.
    async fn num_vertices(&self, collection: &str) -> Result<u64, PregelError>;

    /// Remove a collection; missing collections are ignored
    async fn drop_collection(&self, collection: &str) -> Result<(), PregelError>;

    /// Every vertex of the collection, sorted by id
    async fn all_vertices(&self, collection: &str) -> Result<Vec<Vertex>, PregelError> {
        self.batch_get(collection, VertexId(0), VertexId(u64::MAX)).await
    }
}

/// Configuration for creating stores.
///
/// Use with `create_store()` to instantiate the appropriate backend.
#[derive(Debug, Clone, Default)]
pub enum StorageConfig {
    /// In-memory store (single process only, not durable)
    #[default]
    Memory,

    /// One file per vertex below `path`
    File {
        /// Root directory of all collections
        path: PathBuf,
        /// Whether to compress vertex files (uses zstd)
        compression: bool,
    },
}

/// Create a store from configuration.
pub fn create_store(config: StorageConfig) -> Result<Arc<dyn GraphStore>, PregelError> {
    match config {
        StorageConfig::Memory => Ok(Arc::new(MemoryStore::new())),
        StorageConfig::File { path, compression } => {
            if path.as_os_str().is_empty() {
                return Err(PregelError::config_error("store directory is empty"));
            }
            Ok(Arc::new(FileStore::new(path, compression)))
        }
    }
}

/// Build vertices from a `from to` edge list
///
/// Blank lines and lines starting with `#` are skipped. Vertices that only
/// appear as edge targets get an empty adjacency list.
pub fn parse_edge_list(edge_list: &str, initial_value: f64) -> Result<Vec<Vertex>, PregelError> {
    let mut adjacency: BTreeMap<u64, Vec<VertexId>> = BTreeMap::new();

    for (index, raw) in edge_list.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let invalid = || PregelError::InvalidEdgeList {
            line: index + 1,
            content: raw.to_string(),
        };
        let mut fields = line.split_whitespace();
        let from: u64 = fields.next().and_then(|f| f.parse().ok()).ok_or_else(invalid)?;
        let to: u64 = fields.next().and_then(|f| f.parse().ok()).ok_or_else(invalid)?;

        adjacency.entry(from).or_default().push(VertexId(to));
        adjacency.entry(to).or_default();
    }

    Ok(adjacency
        .into_iter()
        .map(|(id, out_edges)| Vertex::new(VertexId(id), initial_value, out_edges))
        .collect())
}

/// Load an edge list into both collections of a new job
pub async fn create_job(
    store: &dyn GraphStore,
    name: &str,
    edge_list: &str,
    initial_value: f64,
) -> Result<GraphAccess, PregelError> {
    let vertices = parse_edge_list(edge_list, initial_value)?;
    let access = GraphAccess::for_job(name);

    info!(job = name, vertices = vertices.len(), "Creating job collections");
    store.insert_collection(&access.primary, vertices.clone()).await?;
    store.insert_collection(&access.secondary, vertices).await?;
    Ok(access)
}

/// Drop both collections of a job
pub async fn delete_job(store: &dyn GraphStore, access: &GraphAccess) -> Result<(), PregelError> {
    store.drop_collection(&access.primary).await?;
    store.drop_collection(&access.secondary).await
}

/// Write `id value` lines, sorted by id
pub async fn dump_to_file(
    store: &dyn GraphStore,
    collection: &str,
    path: &Path,
) -> Result<(), PregelError> {
    let vertices = store.all_vertices(collection).await?;
    let mut out = String::with_capacity(vertices.len() * 16);
    for v in &vertices {
        out.push_str(&format!("{} {}\n", v.id, v.value));
    }
    tokio::fs::write(path, out).await?;
    Ok(())
}
