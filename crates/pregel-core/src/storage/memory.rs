//! In-memory graph store

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};

use super::GraphStore;
use crate::error::PregelError;
use crate::message::VertexId;
use crate::vertex::Vertex;

type Collection = BTreeMap<VertexId, Vertex>;

/// In-memory store for tests and the single-process cluster.
///
/// Not durable; all collections are lost when the store is dropped.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: tokio::sync::RwLock<HashMap<String, Collection>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn not_found(collection: &str) -> PregelError {
    PregelError::CollectionNotFound(collection.to_string())
}

#[async_trait]
impl GraphStore for MemoryStore {
    async fn insert_collection(
        &self,
        collection: &str,
        vertices: Vec<Vertex>,
    ) -> Result<(), PregelError> {
        let contents: Collection = vertices.into_iter().map(|v| (v.id, v)).collect();
        let mut collections = self.collections.write().await;
        collections.insert(collection.to_string(), contents);
        Ok(())
    }

    async fn batch_get(
        &self,
        collection: &str,
        min: VertexId,
        max: VertexId,
    ) -> Result<Vec<Vertex>, PregelError> {
        if min >= max {
            return Ok(Vec::new());
        }
        let collections = self.collections.read().await;
        let contents = collections.get(collection).ok_or_else(|| not_found(collection))?;
        Ok(contents.range(min..max).map(|(_, v)| v.clone()).collect())
    }

    async fn batch_update(&self, collection: &str, vertices: &[Vertex]) -> Result<(), PregelError> {
        let mut collections = self.collections.write().await;
        let contents = collections.entry(collection.to_string()).or_default();
        for v in vertices {
            contents.insert(v.id, v.clone());
        }
        Ok(())
    }

    async fn get_one(&self, collection: &str, id: VertexId) -> Result<Option<Vertex>, PregelError> {
        let collections = self.collections.read().await;
        let contents = collections.get(collection).ok_or_else(|| not_found(collection))?;
        Ok(contents.get(&id).cloned())
    }

    async fn num_vertices(&self, collection: &str) -> Result<u64, PregelError> {
        let collections = self.collections.read().await;
        let contents = collections.get(collection).ok_or_else(|| not_found(collection))?;
        Ok(contents.keys().next_back().map(|id| id.0 + 1).unwrap_or(0))
    }

    async fn drop_collection(&self, collection: &str) -> Result<(), PregelError> {
        let mut collections = self.collections.write().await;
        collections.remove(collection);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vertex(id: u64, value: f64) -> Vertex {
        Vertex::new(VertexId(id), value, vec![])
    }

    #[tokio::test]
    async fn test_batch_get_half_open() {
        let store = MemoryStore::new();
        store
            .insert_collection("c", (0..10).map(|i| vertex(i, i as f64)).collect())
            .await
            .unwrap();

        let got = store.batch_get("c", VertexId(3), VertexId(6)).await.unwrap();
        let ids: Vec<u64> = got.iter().map(|v| v.id.0).collect();
        assert_eq!(ids, vec![3, 4, 5]);
        assert!(store.batch_get("c", VertexId(6), VertexId(6)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_and_get_one() {
        let store = MemoryStore::new();
        store.insert_collection("c", vec![vertex(0, 1.0)]).await.unwrap();

        let mut v = store.get_one("c", VertexId(0)).await.unwrap().unwrap();
        v.value = 9.0;
        v.active = false;
        store.update_one("c", &v).await.unwrap();

        let back = store.get_one("c", VertexId(0)).await.unwrap().unwrap();
        assert_eq!(back.value, 9.0);
        assert!(back.is_halted());
        assert!(store.get_one("c", VertexId(5)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_num_vertices_is_id_space() {
        let store = MemoryStore::new();
        store
            .insert_collection("sparse", vec![vertex(0, 0.0), vertex(4, 0.0)])
            .await
            .unwrap();
        store.insert_collection("empty", vec![]).await.unwrap();

        assert_eq!(store.num_vertices("sparse").await.unwrap(), 5);
        assert_eq!(store.num_vertices("empty").await.unwrap(), 0);
        assert!(store.num_vertices("missing").await.is_err());
    }

    #[tokio::test]
    async fn test_insert_replaces() {
        let store = MemoryStore::new();
        store.insert_collection("c", vec![vertex(0, 0.0), vertex(1, 0.0)]).await.unwrap();
        store.insert_collection("c", vec![vertex(0, 2.0)]).await.unwrap();

        let all = store.all_vertices("c").await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].value, 2.0);
    }
}
