//! Partitioning of the vertex id space across workers
//!
//! The vertex ids `[0, num_vertices)` are cut into contiguous, equally sized
//! [`Partition`]s (the last one may be shorter). The [`PartitionManager`]
//! hands them out to workers in proportion to their measured speed and keeps
//! a [`Distribution`] table for vertex → worker lookups.

mod distribution;
mod manager;

pub use distribution::Distribution;
pub use manager::{PartitionManager, WorkerStats};

use serde::{Deserialize, Serialize};

use crate::message::{VertexId, WorkerId};

/// Half-open range `[start, end)` of vertex ids
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Partition {
    pub start: VertexId,
    pub end: VertexId,
}

impl Partition {
    pub fn new(start: u64, end: u64) -> Self {
        Self {
            start: VertexId(start),
            end: VertexId(end.max(start)),
        }
    }

    /// Number of vertices in the partition
    pub fn size(&self) -> u64 {
        self.end.0 - self.start.0
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn contains(&self, vertex: VertexId) -> bool {
        self.start <= vertex && vertex < self.end
    }
}

/// The partitions given to one worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub worker: WorkerId,
    pub partitions: Vec<Partition>,
}

impl Assignment {
    pub fn new(worker: impl Into<WorkerId>, partitions: Vec<Partition>) -> Self {
        Self {
            worker: worker.into(),
            partitions,
        }
    }

    /// Total number of vertices assigned
    pub fn num_vertices(&self) -> u64 {
        self.partitions.iter().map(Partition::size).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_bounds() {
        let p = Partition::new(10, 20);
        assert_eq!(p.size(), 10);
        assert!(p.contains(VertexId(10)));
        assert!(p.contains(VertexId(19)));
        assert!(!p.contains(VertexId(20)));
        assert!(!p.contains(VertexId(9)));
    }

    #[test]
    fn test_inverted_partition_is_empty() {
        let p = Partition::new(5, 3);
        assert!(p.is_empty());
    }

    #[test]
    fn test_assignment_vertex_count() {
        let a = Assignment::new("w", vec![Partition::new(0, 4), Partition::new(8, 10)]);
        assert_eq!(a.num_vertices(), 6);
    }
}
