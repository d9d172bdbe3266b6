//! Integration tests for whole jobs on an in-process cluster
//!
//! These tests verify:
//! - Halting once every vertex votes to halt
//! - Checkpoint collections alternating
//! - Rewinding to the last checkpoint after a worker timeout
//! - Recovering from a one-off stall within the retry budget
//! - PageRank results persisted through the file store

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pregel_core::storage::{create_job, FileStore};
use pregel_core::{
    ComputeContext, ComputeResult, GraphStore, JobStatus, LocalCluster, MaxValue, MemoryStore,
    PageRank, PregelConfig, Request, VertexProgram,
};

const SIX_CYCLE: &str = "0 1\n1 2\n2 3\n3 4\n4 5\n5 0\n";

/// Passes its value around until `halt_at`, then every vertex halts
struct HaltAtStep(u64);

impl VertexProgram for HaltAtStep {
    fn name(&self) -> &str {
        "halt-at-step"
    }

    fn compute(&self, ctx: &mut ComputeContext<'_>) -> ComputeResult {
        let value = ctx.value() + ctx.message_values().sum::<f64>();
        if ctx.superstep >= self.0 {
            return ComputeResult::halt(value);
        }
        ctx.send_to_neighbors(1.0);
        ComputeResult::active(value)
    }
}

/// Stalls one superstep for longer than the ack timeout
struct StallAt {
    step: u64,
    delay: Duration,
}

impl VertexProgram for StallAt {
    fn name(&self) -> &str {
        "stall-at"
    }

    fn compute(&self, ctx: &mut ComputeContext<'_>) -> ComputeResult {
        if ctx.superstep == self.step && ctx.id().get() == 0 {
            std::thread::sleep(self.delay);
        }
        ComputeResult::active(ctx.value())
    }
}

/// Stalls vertex 0 once, then behaves; keeps messages flowing between workers
struct StallOnce {
    step: u64,
    delay: Duration,
    stalled: AtomicBool,
}

impl StallOnce {
    fn new(step: u64, delay: Duration) -> Self {
        Self {
            step,
            delay,
            stalled: AtomicBool::new(false),
        }
    }
}

impl VertexProgram for StallOnce {
    fn name(&self) -> &str {
        "stall-once"
    }

    fn compute(&self, ctx: &mut ComputeContext<'_>) -> ComputeResult {
        if ctx.superstep == self.step
            && ctx.id().get() == 0
            && !self.stalled.swap(true, Ordering::SeqCst)
        {
            std::thread::sleep(self.delay);
        }
        ctx.send_to_neighbors(1.0);
        ComputeResult::active(ctx.value())
    }
}

// =============================================================================
// Halting and checkpoints
// =============================================================================

#[tokio::test]
async fn test_six_cycle_halts_with_checkpoint() {
    let store = Arc::new(MemoryStore::new());
    let config = PregelConfig::default()
        .with_max_supersteps(5)
        .with_checkpoint_rate(2)
        .with_parallelism(2);
    let cluster = LocalCluster::new(config, store.clone(), Arc::new(HaltAtStep(3)), 2);

    let result = cluster
        .run_edge_list("cycle", SIX_CYCLE, 0.0)
        .await
        .expect("Failed to create job");

    assert_eq!(result.status, JobStatus::Success);
    assert!(
        (3..=4).contains(&result.request.superstep),
        "halted at superstep {}",
        result.request.superstep
    );
    assert!(result.request.checkpoint_step >= 1, "at least one checkpoint");

    // Every vertex received one message in each of supersteps 1, 2 and 3
    let vertices = store.all_vertices("cycle").await.expect("Failed to read results");
    assert_eq!(vertices.len(), 6);
    for vertex in vertices {
        assert_eq!(vertex.value, 3.0, "vertex {}", vertex.id);
        assert!(vertex.is_halted());
    }
}

#[tokio::test]
async fn test_checkpoint_switches_collection() {
    let store = Arc::new(MemoryStore::new());
    let config = PregelConfig::default()
        .with_max_supersteps(2)
        .with_checkpoint_rate(2)
        .with_max_optimal_ratio(f64::MAX);
    let cluster = LocalCluster::new(config, store.clone(), Arc::new(PageRank), 2);

    let result = cluster
        .run_edge_list("alt", SIX_CYCLE, 1.0)
        .await
        .expect("Failed to create job");

    assert_eq!(result.status, JobStatus::Success);
    assert_eq!(result.request.checkpoint_step, 2);
    assert_eq!(result.request.graph_access.key(), "alt-secondary");

    // The final copy brings the latest values back to the primary
    let primary = store.all_vertices("alt").await.expect("primary");
    let secondary = store.all_vertices("alt-secondary").await.expect("secondary");
    assert_eq!(primary, secondary);
    assert!(primary.iter().all(|v| v.superstep == 1));
}

#[tokio::test]
async fn test_max_value_on_many_workers() {
    let store = Arc::new(MemoryStore::new());
    let access = create_job(store.as_ref(), "max", "0 1\n1 2\n2 0\n2 3\n3 4\n4 2\n", 0.0)
        .await
        .expect("Failed to create job");
    let mut vertex = store
        .get_one("max", 3u64.into())
        .await
        .expect("read")
        .expect("vertex 3");
    vertex.value = 42.0;
    store.update_one("max", &vertex).await.expect("seed");

    // More workers than vertices leaves some of them idle
    let cluster = LocalCluster::new(PregelConfig::default(), store.clone(), Arc::new(MaxValue), 8);
    let result = cluster.run(Request::new(9, 1, access)).await;

    assert!(result.is_success());
    assert!(result.request.superstep < 20, "converged early");
    let vertices = store.all_vertices("max").await.expect("results");
    assert!(vertices.iter().all(|v| v.value == 42.0));
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_worker_timeout_rewinds_to_checkpoint() {
    let store = Arc::new(MemoryStore::new());
    let config = PregelConfig::default()
        .with_max_supersteps(10)
        .with_checkpoint_rate(2)
        .with_ack_timeout(Duration::from_millis(100))
        .with_max_optimal_ratio(f64::MAX);
    let program = StallAt {
        step: 3,
        delay: Duration::from_millis(400),
    };
    let cluster = LocalCluster::new(config, store, Arc::new(program), 2).with_max_attempts(1);

    let result = cluster
        .run_edge_list("stall", SIX_CYCLE, 1.0)
        .await
        .expect("Failed to create job");

    assert_eq!(result.status, JobStatus::Incomplete);
    assert_eq!(result.request.superstep, result.request.checkpoint_step);
    assert_eq!(result.request.checkpoint_step, 2);
    assert_eq!(result.request.graph_access.key(), "stall-secondary");
}

#[tokio::test]
async fn test_one_off_stall_recovers_on_retry() {
    let store = Arc::new(MemoryStore::new());
    let config = PregelConfig::default()
        .with_max_supersteps(6)
        .with_checkpoint_rate(2)
        .with_parallelism(2)
        .with_partitions_per_worker(1)
        .with_ack_timeout(Duration::from_millis(100))
        .with_max_optimal_ratio(f64::MAX);
    let program = StallOnce::new(3, Duration::from_millis(400));
    let cluster = LocalCluster::new(config, store, Arc::new(program), 2);

    let result = cluster
        .run_edge_list("hiccup", SIX_CYCLE, 1.0)
        .await
        .expect("Failed to create job");

    // The abandoned round's late replies must not spoil the retry
    assert_eq!(result.status, JobStatus::Success);
    assert_eq!(result.request.superstep, 6);
    assert_eq!(result.request.checkpoint_step, 6);
}

// =============================================================================
// Storage backends
// =============================================================================

#[tokio::test]
async fn test_pagerank_on_file_store() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(FileStore::new(dir.path(), true));
    let config = PregelConfig::default().with_max_supersteps(30).with_parallelism(3);
    let cluster = LocalCluster::new(config, store.clone(), Arc::new(PageRank), 2);

    let result = cluster
        .run_edge_list("ranks", SIX_CYCLE, 1.0)
        .await
        .expect("Failed to create job");
    assert!(result.is_success());

    // On a cycle every vertex converges towards 1/N
    let vertices = store.all_vertices("ranks").await.expect("results");
    assert_eq!(vertices.len(), 6);
    for vertex in &vertices {
        assert!((vertex.value - 1.0 / 6.0).abs() < 0.01, "vertex {} = {}", vertex.id, vertex.value);
    }
}
