//! Vertex → worker lookup table

use super::Partition;
use crate::message::{VertexId, WorkerId};

/// Which worker owns each partition
///
/// Valid as long as every partition has the same size except the last, so the
/// owning partition of a vertex is `vertex / partition_size`.
#[derive(Debug, Clone, Default)]
pub struct Distribution {
    assignments: Vec<Option<WorkerId>>,
    partition_size: u64,
}

impl Distribution {
    /// Start a fresh table with `num_partitions` unassigned slots
    pub fn init(&mut self, num_partitions: usize, partition_size: u64) {
        self.assignments = vec![None; num_partitions];
        self.partition_size = partition_size;
    }

    pub fn partition_size(&self) -> u64 {
        self.partition_size
    }

    /// Record `worker` as the owner of `partition`
    ///
    /// Returns `false`, leaving the table untouched, when the partition lies
    /// outside the table or its slot already has an owner.
    pub fn set_worker(&mut self, worker: &WorkerId, partition: &Partition) -> bool {
        if self.partition_size == 0 {
            return false;
        }
        let index = (partition.start.0 / self.partition_size) as usize;
        match self.assignments.get_mut(index) {
            Some(slot @ None) => {
                *slot = Some(worker.clone());
                true
            }
            _ => false,
        }
    }

    /// Owner of the partition containing `vertex`
    pub fn vertex_worker(&self, vertex: VertexId) -> Option<&WorkerId> {
        if self.partition_size == 0 {
            return None;
        }
        let index = (vertex.0 / self.partition_size) as usize;
        self.assignments.get(index).and_then(Option::as_ref)
    }

    pub fn partition_worker(&self, partition: &Partition) -> Option<&WorkerId> {
        self.vertex_worker(partition.start)
    }
}
