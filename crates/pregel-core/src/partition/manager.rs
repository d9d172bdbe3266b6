//! Load-aware partition manager
//!
//! Tracks worker membership and per-worker speed (vertices per second in the
//! latest superstep), decides how many partitions each worker gets, and
//! answers which worker owns a vertex.

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::debug;

use super::{Assignment, Distribution, Partition};
use crate::config::PregelConfig;
use crate::error::PregelError;
use crate::message::{VertexId, WorkerId};

/// Performance record of one worker
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkerStats {
    /// Duration of the worker's latest superstep
    pub latest_elapsed: Duration,
    /// Vertices per second; 0 until first measured or averaged in
    pub speed: f64,
    pub partitions: Vec<Partition>,
    pub num_vertices: u64,
}

/// Maps vertex ranges to workers and rebalances them by measured throughput
#[derive(Debug, Clone)]
pub struct PartitionManager {
    workers: BTreeMap<WorkerId, WorkerStats>,
    num_vertices: u64,
    total_time: Duration,
    fastest: f64,
    slowest: f64,
    distribution: Distribution,
    partitions_per_worker: usize,
    max_optimal_ratio: f64,
}

impl PartitionManager {
    /// Create a manager for a graph of `num_vertices` with default tuning
    pub fn new(num_vertices: u64) -> Self {
        Self::with_config(&PregelConfig::default(), num_vertices)
    }

    pub fn with_config(config: &PregelConfig, num_vertices: u64) -> Self {
        Self {
            workers: BTreeMap::new(),
            num_vertices,
            total_time: Duration::ZERO,
            fastest: 0.0,
            slowest: 0.0,
            distribution: Distribution::default(),
            partitions_per_worker: config.partitions_per_worker.max(1),
            max_optimal_ratio: config.max_optimal_ratio,
        }
    }

    /// Track a worker; re-adding a known worker is ignored
    pub fn add_worker(&mut self, worker: impl Into<WorkerId>) {
        self.workers.entry(worker.into()).or_default();
    }

    pub fn remove_worker(&mut self, worker: &WorkerId) {
        self.workers.remove(worker);
    }

    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    /// Known workers, sorted by id
    pub fn workers(&self) -> Vec<WorkerId> {
        self.workers.keys().cloned().collect()
    }

    pub fn stats(&self, worker: &WorkerId) -> Option<&WorkerStats> {
        self.workers.get(worker)
    }

    /// Change the graph size; takes effect on the next redistribute
    pub fn set_num_vertices(&mut self, num_vertices: u64) {
        self.num_vertices = num_vertices;
    }

    pub fn num_vertices(&self) -> u64 {
        self.num_vertices
    }

    /// Size of every partition except possibly the last (0 before any distribution)
    pub fn partition_size(&self) -> u64 {
        self.distribution.partition_size()
    }

    /// Sum of the latest elapsed times of all workers since the last reset
    pub fn total_time(&self) -> Duration {
        self.total_time
    }

    /// Record how long `worker` took for the latest superstep
    ///
    /// Ignored for a zero duration or an unknown worker. The speed is only
    /// recomputed when the worker currently owns vertices.
    pub fn set_elapsed_time(&mut self, worker: &WorkerId, elapsed: Duration) {
        if elapsed.is_zero() {
            return;
        }
        let Some(stats) = self.workers.get_mut(worker) else {
            return;
        };

        self.total_time = self.total_time.saturating_sub(stats.latest_elapsed) + elapsed;
        stats.latest_elapsed = elapsed;

        if stats.num_vertices > 0 {
            let speed = stats.num_vertices as f64 / elapsed.as_secs_f64();
            stats.speed = speed;

            // slowest == 0 means nothing recorded since the last reset
            if self.slowest == 0.0 || speed < self.slowest {
                self.slowest = speed;
            }
            if speed > self.fastest {
                self.fastest = speed;
            }
        }
    }

    /// Vertices per second of `worker`, 0 if unknown
    pub fn get_speed(&self, worker: &WorkerId) -> f64 {
        self.workers.get(worker).map(|s| s.speed).unwrap_or(0.0)
    }

    /// Ratio of the fastest to the slowest recorded speed, 1 if nothing recorded
    pub fn fastest_to_slowest(&self) -> f64 {
        if self.slowest == 0.0 {
            return 1.0;
        }
        self.fastest / self.slowest
    }

    pub fn is_optimal(&self) -> bool {
        self.fastest_to_slowest() <= self.max_optimal_ratio
    }

    /// Clear the extremes and accumulated time before the next round
    pub fn reset_speeds(&mut self) {
        self.total_time = Duration::ZERO;
        self.fastest = 0.0;
        self.slowest = 0.0;
    }

    /// Sum of all speeds; workers never measured are set to the average
    /// speed of the measured ones (1.0 each when none is measured)
    fn calculate_total_speed(&mut self) -> f64 {
        let (measured, total) = self
            .workers
            .values()
            .filter(|s| s.speed > 0.0)
            .fold((0usize, 0.0), |(n, sum), s| (n + 1, sum + s.speed));

        let average = if measured == 0 {
            1.0
        } else {
            total / measured as f64
        };

        let mut total_speed = 0.0;
        for stats in self.workers.values_mut() {
            if stats.speed <= 0.0 {
                stats.speed = average;
            }
            total_speed += stats.speed;
        }
        total_speed
    }

    /// Worker ids from fastest to slowest, ties broken by id
    fn sorted_workers(&self) -> Vec<WorkerId> {
        let mut order: Vec<(&WorkerId, f64)> =
            self.workers.iter().map(|(id, s)| (id, s.speed)).collect();
        order.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        order.into_iter().map(|(id, _)| id.clone()).collect()
    }

    /// Cut the vertex space into partitions and hand them out by speed
    ///
    /// Partitions are `ceil(V / (workers * partitions_per_worker))` vertices
    /// each. Workers are served fastest first, each taking
    /// `ceil(speed / total_speed * total_partitions)` partitions from the
    /// front, so any rounding slack lands on the slowest workers, which may
    /// end up with no partition at all.
    pub fn redistribute(&mut self) -> Vec<Assignment> {
        let total_parts = self.workers.len() * self.partitions_per_worker;
        if total_parts == 0 {
            self.distribution.init(0, 0);
            return Vec::new();
        }

        let partition_size = self.num_vertices.div_ceil(total_parts as u64);
        let total_speed = self.calculate_total_speed();
        self.distribution.init(total_parts, partition_size);

        let mut start = 0u64;
        let mut assignments = Vec::with_capacity(self.workers.len());

        for id in self.sorted_workers() {
            let Some(stats) = self.workers.get_mut(&id) else {
                continue;
            };
            let share = (stats.speed * total_parts as f64 / total_speed).ceil() as usize;

            stats.num_vertices = 0;
            stats.partitions = Vec::with_capacity(share);
            for _ in 0..share {
                let next = (start + partition_size).min(self.num_vertices);
                if next == start {
                    break;
                }
                let partition = Partition::new(start, next);
                stats.num_vertices += partition.size();
                self.distribution.set_worker(&id, &partition);
                stats.partitions.push(partition);
                start = next;
            }

            debug!(
                worker = %id,
                speed = stats.speed,
                partitions = stats.partitions.len(),
                vertices = stats.num_vertices,
                "Assigned partitions"
            );
            assignments.push(Assignment::new(id, stats.partitions.clone()));
        }

        assignments
    }

    /// Owner of `vertex`, `None` outside the graph or before any distribution
    pub fn get_worker(&self, vertex: VertexId) -> Option<&WorkerId> {
        if vertex.0 >= self.num_vertices {
            return None;
        }
        self.distribution.vertex_worker(vertex)
    }

    /// Replace worker and partition state with an externally supplied list
    ///
    /// Known workers keep their measured speed. Returns the number of
    /// vertices covered by the assignments, which also becomes the graph
    /// size. The partitions must tile `[0, V)` with equal sizes except the
    /// last; anything else is rejected and leaves the manager unchanged.
    pub fn load_assignments(&mut self, assignments: &[Assignment]) -> Result<u64, PregelError> {
        // Every partition but the tail has the full size
        let partition_size = assignments
            .iter()
            .flat_map(|a| a.partitions.iter().map(Partition::size))
            .max()
            .unwrap_or(0);
        let num_vertices: u64 = assignments.iter().map(Assignment::num_vertices).sum();

        let num_partitions = if partition_size == 0 {
            0
        } else {
            num_vertices.div_ceil(partition_size) as usize
        };
        let mut distribution = Distribution::default();
        distribution.init(num_partitions, partition_size);

        for assignment in assignments {
            for partition in assignment.partitions.iter().filter(|p| !p.is_empty()) {
                let aligned = partition.start.0 % partition_size == 0;
                let full = partition.size() == partition_size || partition.end.0 == num_vertices;
                if !aligned || !full || !distribution.set_worker(&assignment.worker, partition) {
                    return Err(PregelError::invalid_assignment(format!(
                        "partition [{}, {}) of {} does not fit {} vertices in partitions of {}",
                        partition.start,
                        partition.end,
                        assignment.worker,
                        num_vertices,
                        partition_size
                    )));
                }
            }
        }

        let mut workers = BTreeMap::new();
        for assignment in assignments {
            let speed = self.get_speed(&assignment.worker);
            workers.insert(
                assignment.worker.clone(),
                WorkerStats {
                    latest_elapsed: Duration::ZERO,
                    speed,
                    partitions: assignment.partitions.clone(),
                    num_vertices: assignment.num_vertices(),
                },
            );
        }

        self.distribution = distribution;
        self.workers = workers;
        self.num_vertices = num_vertices;
        self.reset_speeds();
        Ok(num_vertices)
    }
}
