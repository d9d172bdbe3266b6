//! File-based graph store
//!
//! Stores every vertex as its own JSON file so that workers sharing a
//! directory can checkpoint disjoint partitions concurrently. Supports
//! optional compression via zstd.
//!
//! # Directory Structure
//!
//! ```text
//! graphs/
//! └── {collection}/
//!     ├── 00000000000000000000.json[.zst]
//!     ├── 00000000000000000001.json[.zst]
//!     └── 00000000000000000002.json[.zst]
//! ```

use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::GraphStore;
use crate::error::PregelError;
use crate::message::VertexId;
use crate::vertex::Vertex;

/// File-based store that keeps one file per vertex.
///
/// Atomic writes are ensured via temporary file + rename pattern.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
    compression: bool,
}

impl FileStore {
    /// Create a new file-based store.
    ///
    /// # Arguments
    ///
    /// * `root` - Directory holding one subdirectory per collection
    /// * `compression` - Whether to compress vertex files
    pub fn new(root: impl Into<PathBuf>, compression: bool) -> Self {
        Self {
            root: root.into(),
            compression,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn collection_path(&self, collection: &str) -> PathBuf {
        self.root.join(collection)
    }

    fn vertex_path(&self, collection: &str, id: VertexId) -> PathBuf {
        let filename = if self.compression {
            format!("{:020}.json.zst", id.0)
        } else {
            format!("{:020}.json", id.0)
        };
        self.collection_path(collection).join(filename)
    }

    /// Temporary path unique to this write, so concurrent writers never collide
    fn temp_path(&self, collection: &str, id: VertexId) -> PathBuf {
        let filename = format!("{:020}.{}.tmp", id.0, uuid::Uuid::new_v4().simple());
        self.collection_path(collection).join(filename)
    }

    /// Compress data using zstd
    fn compress(data: &[u8]) -> Result<Vec<u8>, PregelError> {
        let mut encoder = zstd::stream::Encoder::new(Vec::new(), 3)
            .map_err(|e| PregelError::storage_error(format!("Compression init failed: {}", e)))?;
        encoder
            .write_all(data)
            .map_err(|e| PregelError::storage_error(format!("Compression write failed: {}", e)))?;
        encoder
            .finish()
            .map_err(|e| PregelError::storage_error(format!("Compression finish failed: {}", e)))
    }

    /// Decompress data using zstd
    fn decompress(data: &[u8]) -> Result<Vec<u8>, PregelError> {
        zstd::stream::decode_all(data)
            .map_err(|e| PregelError::storage_error(format!("Decompression failed: {}", e)))
    }

    /// Parse the vertex id from a vertex filename
    fn parse_id(path: &Path) -> Option<VertexId> {
        let filename = path.file_name()?.to_str()?;
        let (number, extension) = filename.split_once('.')?;
        if extension != "json" && extension != "json.zst" {
            return None;
        }
        number.parse().ok().map(VertexId)
    }

    /// All vertex ids in a collection, sorted
    async fn list_ids(&self, collection: &str) -> Result<Vec<VertexId>, PregelError> {
        let dir = self.collection_path(collection);
        if !fs::try_exists(&dir).await.unwrap_or(false) {
            return Err(PregelError::CollectionNotFound(collection.to_string()));
        }

        let mut entries = fs::read_dir(&dir)
            .await
            .map_err(|e| PregelError::storage_error(format!("Failed to read directory: {}", e)))?;

        let mut ids = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PregelError::storage_error(format!("Failed to read entry: {}", e)))?
        {
            if let Some(id) = Self::parse_id(&entry.path()) {
                ids.push(id);
            }
        }

        ids.sort();
        Ok(ids)
    }

    async fn read_vertex(&self, path: &Path) -> Result<Vertex, PregelError> {
        let data = fs::read(path)
            .await
            .map_err(|e| {
                PregelError::storage_error(format!("Failed to read {}: {}", path.display(), e))
            })?;

        let json = if self.compression {
            Self::decompress(&data)?
        } else {
            data
        };

        serde_json::from_slice(&json)
            .map_err(|e| PregelError::storage_error(format!("Deserialization failed: {}", e)))
    }

    async fn write_vertex(&self, collection: &str, vertex: &Vertex) -> Result<(), PregelError> {
        let json = serde_json::to_vec(vertex)
            .map_err(|e| PregelError::storage_error(format!("Serialization failed: {}", e)))?;

        let data = if self.compression {
            Self::compress(&json)?
        } else {
            json
        };

        // Write to temp file first (atomic write pattern)
        let temp_path = self.temp_path(collection, vertex.id);
        let final_path = self.vertex_path(collection, vertex.id);

        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| PregelError::storage_error(format!("Failed to create temp file: {}", e)))?;

        file.write_all(&data)
            .await
            .map_err(|e| PregelError::storage_error(format!("Failed to write data: {}", e)))?;

        file.sync_all()
            .await
            .map_err(|e| PregelError::storage_error(format!("Failed to sync file: {}", e)))?;

        fs::rename(&temp_path, &final_path)
            .await
            .map_err(|e| PregelError::storage_error(format!("Failed to rename file: {}", e)))
    }

    async fn ensure_dir(&self, collection: &str) -> Result<(), PregelError> {
        fs::create_dir_all(self.collection_path(collection))
            .await
            .map_err(|e| PregelError::storage_error(format!("Failed to create directory: {}", e)))
    }
}

#[async_trait]
impl GraphStore for FileStore {
    async fn insert_collection(
        &self,
        collection: &str,
        vertices: Vec<Vertex>,
    ) -> Result<(), PregelError> {
        self.drop_collection(collection).await?;
        self.ensure_dir(collection).await?;
        for vertex in &vertices {
            self.write_vertex(collection, vertex).await?;
        }
        Ok(())
    }

    async fn batch_get(
        &self,
        collection: &str,
        min: VertexId,
        max: VertexId,
    ) -> Result<Vec<Vertex>, PregelError> {
        let ids = self.list_ids(collection).await?;
        let mut vertices = Vec::new();
        for id in ids.into_iter().filter(|id| min <= *id && *id < max) {
            let path = self.vertex_path(collection, id);
            vertices.push(self.read_vertex(&path).await?);
        }
        Ok(vertices)
    }

    async fn batch_update(&self, collection: &str, vertices: &[Vertex]) -> Result<(), PregelError> {
        self.ensure_dir(collection).await?;
        for vertex in vertices {
            self.write_vertex(collection, vertex).await?;
        }
        Ok(())
    }

    async fn get_one(&self, collection: &str, id: VertexId) -> Result<Option<Vertex>, PregelError> {
        if !fs::try_exists(self.collection_path(collection)).await.unwrap_or(false) {
            return Err(PregelError::CollectionNotFound(collection.to_string()));
        }
        let path = self.vertex_path(collection, id);
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(None);
        }
        self.read_vertex(&path).await.map(Some)
    }

    async fn num_vertices(&self, collection: &str) -> Result<u64, PregelError> {
        let ids = self.list_ids(collection).await?;
        Ok(ids.last().map(|id| id.0 + 1).unwrap_or(0))
    }

    async fn drop_collection(&self, collection: &str) -> Result<(), PregelError> {
        let dir = self.collection_path(collection);
        if fs::try_exists(&dir).await.unwrap_or(false) {
            fs::remove_dir_all(&dir)
                .await
                .map_err(|e| {
                    PregelError::storage_error(format!("Failed to remove directory: {}", e))
                })?;
        }
        Ok(())
    }
}
