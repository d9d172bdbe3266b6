//! Per-request job state and the decisions taken between supersteps
//!
//! Kept free of I/O so the barrier rules can be tested on their own.

use crate::config::PregelConfig;
use crate::message::WorkerId;
use crate::partition::PartitionManager;
use crate::request::Request;

/// What the coordinator must do after a superstep barrier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundPlan {
    /// The job is finished
    pub halt: bool,
    /// A checkpoint must be written before going on
    pub checkpoint: bool,
}

/// Where the job goes after a round and its checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundOutcome {
    /// Run the next superstep with the current assignment
    Continue,
    /// Redistribute partitions, then continue from the fresh checkpoint
    Rebalance,
    /// The job is complete
    Halted,
}

/// A request in progress together with its partition manager
#[derive(Debug)]
pub struct JobState {
    pub request: Request,
    pub manager: PartitionManager,
    workers: Vec<WorkerId>,
    config: PregelConfig,
}

impl JobState {
    pub fn new(
        config: &PregelConfig,
        request: Request,
        num_vertices: u64,
        workers: &[WorkerId],
    ) -> Self {
        let mut manager = PartitionManager::with_config(config, num_vertices);
        for worker in workers {
            manager.add_worker(worker);
        }
        Self {
            request,
            workers: manager.workers(),
            manager,
            config: config.clone(),
        }
    }

    /// Workers taking part in the job, sorted by id
    pub fn workers(&self) -> &[WorkerId] {
        &self.workers
    }

    pub fn is_member(&self, worker: &WorkerId) -> bool {
        self.workers.binary_search(worker).is_ok()
    }

    pub fn superstep(&self) -> u64 {
        self.request.superstep
    }

    /// The superstep limit was reached before any round ran
    pub fn exhausted(&self) -> bool {
        self.request.superstep >= self.config.max_supersteps
    }

    /// Advance past a completed barrier and decide what happens next
    ///
    /// The job halts when every worker reported `Inactive` or the limit is
    /// reached. A checkpoint is due every `checkpoint_rate` supersteps, on
    /// halt, and whenever the load is out of balance.
    pub fn finish_round(&mut self, all_inactive: bool) -> RoundPlan {
        self.request.superstep += 1;
        let halt = all_inactive || self.request.superstep >= self.config.max_supersteps;
        let checkpoint = self.config.should_checkpoint(self.request.superstep)
            || halt
            || !self.manager.is_optimal();
        RoundPlan { halt, checkpoint }
    }

    /// Record a completed checkpoint written to `other_key`
    pub fn commit_checkpoint(&mut self) {
        self.request.graph_access.swap_keys();
        self.request.checkpoint_step = self.request.superstep;
    }

    /// The latest checkpoint is not in the collection the client reads
    pub fn needs_final_copy(&self) -> bool {
        self.request.graph_access.key() != self.request.graph_access.primary_key()
    }

    pub fn outcome(&self, plan: RoundPlan) -> RoundOutcome {
        if plan.halt {
            RoundOutcome::Halted
        } else if plan.checkpoint && !self.manager.is_optimal() {
            RoundOutcome::Rebalance
        } else {
            RoundOutcome::Continue
        }
    }
}
