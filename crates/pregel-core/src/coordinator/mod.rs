//! Superstep coordinator
//!
//! Drives one request through barrier-synchronized supersteps:
//!
//! ```text
//! Redistributing ─► AwaitingPartitionAcks ─► RunningSuperstep ─► CheckpointIfDue
//!       ▲                                          ▲                  │
//!       │                                          └──── Continue ────┤
//!       └─────────────────────── Rebalance ───────────────────────────┤
//!                                                        Halted ◄─────┘
//! ```
//!
//! Every wait is bounded by `ack_timeout` per received message. Any error
//! abandons the attempt; [`JobCoordinator::run`] is the single place that
//! turns it into a [`JobResult`]. Each run is a new attempt: workers stamp
//! their replies with it, and replies carrying any other attempt are dropped.

mod job;

pub use job::{JobState, RoundOutcome, RoundPlan};

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::config::PregelConfig;
use crate::error::PregelError;
use crate::message::{Envelope, FromServer, FromWorker, WorkerId, WorkerReply};
use crate::partition::Assignment;
use crate::request::{JobResult, Request};
use crate::storage::GraphStore;

/// Attempt stamps, unique across every coordinator in the process
static NEXT_ATTEMPT: AtomicU64 = AtomicU64::new(1);

/// Runs jobs against a set of workers reachable through two channels
pub struct JobCoordinator {
    config: PregelConfig,
    store: Arc<dyn GraphStore>,
    inbox: mpsc::Receiver<Envelope<WorkerReply>>,
    outbox: mpsc::Sender<Envelope<FromServer>>,
    attempt: u64,
}

impl JobCoordinator {
    pub fn new(
        config: PregelConfig,
        store: Arc<dyn GraphStore>,
        inbox: mpsc::Receiver<Envelope<WorkerReply>>,
        outbox: mpsc::Sender<Envelope<FromServer>>,
    ) -> Self {
        Self {
            config,
            store,
            inbox,
            outbox,
            attempt: 0,
        }
    }

    /// Stamp of the latest run, 0 before the first
    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    /// Run `request` on `workers` until it halts or the attempt fails
    ///
    /// - `Success`: halted; results are in the primary collection
    /// - `Incomplete`: a transient failure; the request is rewound to its
    ///   last checkpoint and can be resubmitted
    /// - `Failure`: no workers, unreadable vertex count, or a permanent error
    pub async fn run(&mut self, request: Request, workers: &[WorkerId]) -> JobResult {
        let client_id = request.client_id;
        let request_id = request.request_id;
        self.attempt = NEXT_ATTEMPT.fetch_add(1, Ordering::Relaxed);
        info!(
            client_id,
            request_id,
            attempt = self.attempt,
            superstep = request.superstep,
            workers = workers.len(),
            "Request started"
        );

        if workers.is_empty() {
            error!(client_id, request_id, "No workers available");
            return JobResult::failure(request);
        }

        let num_vertices = match self.store.num_vertices(request.graph_access.key()).await {
            Ok(n) => n,
            Err(e) => {
                error!(
                    client_id,
                    request_id,
                    collection = request.graph_access.key(),
                    error = %e,
                    "Vertex count unavailable"
                );
                return JobResult::failure(request);
            }
        };

        let mut job = JobState::new(&self.config, request, num_vertices, workers);
        match self.drive(&mut job).await {
            Ok(()) => {
                info!(client_id, request_id, superstep = job.superstep(), "Job complete");
                JobResult::success(job.request)
            }
            Err(e) if e.is_recoverable() => {
                warn!(
                    client_id,
                    request_id,
                    superstep = job.superstep(),
                    checkpoint_step = job.request.checkpoint_step,
                    error = %e,
                    "Requeueing incomplete request"
                );
                JobResult::incomplete(job.request)
            }
            Err(e) => {
                error!(
                    client_id,
                    request_id,
                    superstep = job.superstep(),
                    error = %e,
                    "Job failed"
                );
                JobResult::failure(job.request)
            }
        }
    }

    async fn drive(&mut self, job: &mut JobState) -> Result<(), PregelError> {
        loop {
            let assignments = job.manager.redistribute();
            self.send_assignments(job, &assignments).await?;

            // Resumed after the last round but before the final copy
            if job.exhausted() {
                if job.needs_final_copy() {
                    let key = job.request.graph_access.other_key().to_string();
                    self.save_checkpoint(job, &key).await?;
                }
                return Ok(());
            }

            loop {
                match self.run_superstep(job).await? {
                    RoundOutcome::Continue => continue,
                    RoundOutcome::Rebalance => {
                        info!(
                            request_id = job.request.request_id,
                            superstep = job.superstep(),
                            ratio = job.manager.fastest_to_slowest(),
                            "Rebalancing partitions"
                        );
                        break;
                    }
                    RoundOutcome::Halted => return Ok(()),
                }
            }
        }
    }

    /// Push each worker its partitions and wait for every `PartitionAck`
    async fn send_assignments(
        &mut self,
        job: &JobState,
        assignments: &[Assignment],
    ) -> Result<(), PregelError> {
        let storage_key = job.request.graph_access.key().to_string();
        info!(
            request_id = job.request.request_id,
            storage_key = %storage_key,
            assignments = assignments.len(),
            "Sending assignments"
        );

        for assignment in assignments {
            let command = FromServer::Assign {
                attempt: self.attempt,
                storage_key: storage_key.clone(),
                partitions: assignment.partitions.clone(),
            };
            self.send(&assignment.worker, command).await?;
        }

        let superstep = job.superstep();
        let mut acked = HashSet::new();
        while acked.len() < assignments.len() {
            let Envelope { worker, message } = self.recv("partition", superstep).await?;
            check_member(job, &worker)?;
            match message {
                FromWorker::PartitionAck { ok: true } => {
                    if !acked.insert(worker.clone()) {
                        return Err(PregelError::protocol_violation(format!(
                            "duplicate PartitionAck from {}",
                            worker
                        )));
                    }
                }
                FromWorker::PartitionAck { ok: false } => {
                    return Err(PregelError::worker_failure(worker, "unable to load vertices"));
                }
                other => return Err(unexpected("PartitionAck", &worker, &other)),
            }
        }
        Ok(())
    }

    /// One barrier: broadcast `Superstep`, forward messages, collect acks
    async fn run_superstep(&mut self, job: &mut JobState) -> Result<RoundOutcome, PregelError> {
        let step = job.superstep();
        job.manager.reset_speeds();
        debug!(request_id = job.request.request_id, superstep = step, "Beginning superstep");

        let workers = job.workers().to_vec();
        for worker in &workers {
            self.send(worker, FromServer::Superstep { step }).await?;
        }

        let mut reported = HashSet::new();
        let mut inactive = 0;
        let mut forwarded = 0u64;
        while reported.len() < workers.len() {
            let Envelope { worker, message } = self.recv("superstep", step).await?;
            check_member(job, &worker)?;

            match message {
                FromWorker::V2V { message } => {
                    let owner = job.manager.get_worker(message.to).cloned().ok_or_else(|| {
                        PregelError::protocol_violation(format!(
                            "no owner for vertex {} (sent by {})",
                            message.to, worker
                        ))
                    })?;
                    self.send(&owner, FromServer::V2V { message }).await?;
                    forwarded += 1;
                }
                FromWorker::Done { step: s, .. } | FromWorker::Inactive { step: s }
                    if s != step =>
                {
                    return Err(PregelError::protocol_violation(format!(
                        "{} acked superstep {} during superstep {}",
                        worker, s, step
                    )));
                }
                FromWorker::Done { elapsed, .. } => {
                    record_terminal(&mut reported, &worker)?;
                    debug!(superstep = step, worker = %worker, elapsed = ?elapsed, "Worker done");
                    job.manager.set_elapsed_time(&worker, elapsed);
                }
                FromWorker::Inactive { .. } => {
                    record_terminal(&mut reported, &worker)?;
                    inactive += 1;
                }
                other => return Err(unexpected("Done or Inactive", &worker, &other)),
            }
        }

        let plan = job.finish_round(inactive == workers.len());
        info!(
            request_id = job.request.request_id,
            superstep = step,
            forwarded,
            inactive,
            ratio = job.manager.fastest_to_slowest(),
            optimal = job.manager.is_optimal(),
            "Completed superstep"
        );

        if plan.checkpoint {
            let key = job.request.graph_access.other_key().to_string();
            self.save_checkpoint(job, &key).await?;
            job.commit_checkpoint();

            if plan.halt && job.needs_final_copy() {
                let primary = job.request.graph_access.other_key().to_string();
                self.save_checkpoint(job, &primary).await?;
            }
        }

        Ok(job.outcome(plan))
    }

    /// Ask every worker to save into `storage_key` and wait for all acks
    async fn save_checkpoint(
        &mut self,
        job: &JobState,
        storage_key: &str,
    ) -> Result<(), PregelError> {
        let superstep = job.superstep();
        info!(request_id = job.request.request_id, superstep, storage_key, "Saving checkpoint");

        for worker in job.workers() {
            let command = FromServer::SaveCheckpoint {
                storage_key: storage_key.to_string(),
            };
            self.send(worker, command).await?;
        }

        let mut acked = HashSet::new();
        while acked.len() < job.workers().len() {
            let Envelope { worker, message } = self.recv("checkpoint", superstep).await?;
            check_member(job, &worker)?;
            match message {
                FromWorker::SaveCheckpointAck { ok: true } => {
                    if !acked.insert(worker.clone()) {
                        return Err(PregelError::protocol_violation(format!(
                            "duplicate SaveCheckpointAck from {}",
                            worker
                        )));
                    }
                }
                FromWorker::SaveCheckpointAck { ok: false } => {
                    return Err(PregelError::worker_failure(worker, "unable to save checkpoint"));
                }
                other => return Err(unexpected("SaveCheckpointAck", &worker, &other)),
            }
        }
        Ok(())
    }

    async fn send(&self, worker: &WorkerId, message: FromServer) -> Result<(), PregelError> {
        self.outbox
            .send(Envelope::new(worker, message))
            .await
            .map_err(|_| PregelError::channel_closed("coordinator outbox"))
    }

    /// Next worker message of this attempt, bounded by the ack timeout
    ///
    /// Late replies from an abandoned attempt are dropped here, so a slow
    /// round cannot leak into the retry that follows it.
    async fn recv(
        &mut self,
        stage: &'static str,
        superstep: u64,
    ) -> Result<Envelope<FromWorker>, PregelError> {
        loop {
            let envelope = match timeout(self.config.ack_timeout, self.inbox.recv()).await {
                Ok(Some(envelope)) => envelope,
                Ok(None) => return Err(PregelError::channel_closed("coordinator inbox")),
                Err(_) => {
                    return Err(PregelError::ack_timeout(stage, superstep, self.config.ack_timeout))
                }
            };

            let Envelope { worker, message: reply } = envelope;
            if reply.attempt == self.attempt {
                return Ok(Envelope::new(worker, reply.message));
            }
            debug!(
                worker = %worker,
                stale = reply.attempt,
                attempt = self.attempt,
                kind = reply.message.kind(),
                "Dropping reply from an abandoned attempt"
            );
        }
    }
}

fn check_member(job: &JobState, worker: &WorkerId) -> Result<(), PregelError> {
    if job.is_member(worker) {
        Ok(())
    } else {
        Err(PregelError::protocol_violation(format!(
            "message from {} which is not part of the job",
            worker
        )))
    }
}

fn record_terminal(reported: &mut HashSet<WorkerId>, worker: &WorkerId) -> Result<(), PregelError> {
    if reported.insert(worker.clone()) {
        Ok(())
    } else {
        Err(PregelError::protocol_violation(format!(
            "duplicate superstep ack from {}",
            worker
        )))
    }
}

fn unexpected(expected: &str, worker: &WorkerId, got: &FromWorker) -> PregelError {
    PregelError::protocol_violation(format!(
        "expected {} from {}, received {}",
        expected,
        worker,
        got.kind()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{VertexId, VertexMessage};
    use crate::request::{GraphAccess, JobStatus};
    use crate::storage::{create_job, MemoryStore};
    use std::time::Duration;
    use tokio::task::JoinHandle;

    type Script = fn(&WorkerId, &FromServer) -> Option<FromWorker>;

    /// Replies a worker of the previous attempt might still deliver
    fn leftovers() -> Vec<FromWorker> {
        vec![
            FromWorker::PartitionAck { ok: true },
            FromWorker::V2V {
                message: VertexMessage::new(VertexId(0), VertexId(99), 1.0, 0),
            },
            FromWorker::Done {
                step: 0,
                elapsed: Duration::from_millis(1),
            },
            FromWorker::SaveCheckpointAck { ok: false },
        ]
    }

    /// Answers every command with `script`, returns the commands seen
    ///
    /// Replies carry the attempt of the latest `Assign`. With `late_replies`
    /// each answer is preceded by [`leftovers`] stamped with an older attempt.
    fn spawn_workers(
        mut rx: mpsc::Receiver<Envelope<FromServer>>,
        tx: mpsc::Sender<Envelope<WorkerReply>>,
        script: Script,
        late_replies: bool,
    ) -> JoinHandle<Vec<Envelope<FromServer>>> {
        tokio::spawn(async move {
            let mut attempt = 0;
            let mut seen = Vec::new();
            while let Some(envelope) = rx.recv().await {
                if let FromServer::Assign { attempt: current, .. } = &envelope.message {
                    attempt = *current;
                }
                if late_replies {
                    for stale in leftovers() {
                        let reply = WorkerReply::new(attempt.saturating_sub(1), stale);
                        let _ = tx.send(Envelope::new(&envelope.worker, reply)).await;
                    }
                }
                if let Some(reply) = script(&envelope.worker, &envelope.message) {
                    let reply = WorkerReply::new(attempt, reply);
                    let _ = tx.send(Envelope::new(&envelope.worker, reply)).await;
                }
                seen.push(envelope);
            }
            seen
        })
    }

    async fn setup_with(
        config: PregelConfig,
        script: Script,
        late_replies: bool,
    ) -> (JobCoordinator, JoinHandle<Vec<Envelope<FromServer>>>, Request) {
        let store = Arc::new(MemoryStore::new());
        let access = create_job(store.as_ref(), "g", "0 1\n1 2\n2 3\n3 0\n", 1.0).await.unwrap();
        let (to_coord, inbox) = mpsc::channel(64);
        let (outbox, from_coord) = mpsc::channel(64);
        let workers = spawn_workers(from_coord, to_coord, script, late_replies);
        let coordinator = JobCoordinator::new(config, store, inbox, outbox);
        (coordinator, workers, Request::new(1, 1, access))
    }

    async fn setup(
        config: PregelConfig,
        script: Script,
    ) -> (JobCoordinator, JoinHandle<Vec<Envelope<FromServer>>>, Request) {
        setup_with(config, script, false).await
    }

    fn fast_config() -> PregelConfig {
        PregelConfig::default().with_ack_timeout(Duration::from_millis(100))
    }

    fn two_workers() -> Vec<WorkerId> {
        vec![WorkerId::from("w0"), WorkerId::from("w1")]
    }

    fn cooperative(_worker: &WorkerId, command: &FromServer) -> Option<FromWorker> {
        match command {
            FromServer::Assign { .. } => Some(FromWorker::PartitionAck { ok: true }),
            FromServer::Superstep { step } => Some(FromWorker::Inactive { step: *step }),
            FromServer::SaveCheckpoint { .. } => Some(FromWorker::SaveCheckpointAck { ok: true }),
            FromServer::V2V { .. } => None,
        }
    }

    #[tokio::test]
    async fn test_no_workers_fails() {
        let (mut coordinator, _workers, request) = setup(fast_config(), cooperative).await;
        let result = coordinator.run(request, &[]).await;
        assert_eq!(result.status, JobStatus::Failure);
    }

    #[tokio::test]
    async fn test_missing_collection_fails() {
        let (mut coordinator, _workers, _) = setup(fast_config(), cooperative).await;
        let request = Request::new(1, 1, GraphAccess::for_job("missing"));
        let result = coordinator.run(request, &two_workers()).await;
        assert_eq!(result.status, JobStatus::Failure);
    }

    #[tokio::test]
    async fn test_all_inactive_halts_with_final_copy() {
        let (mut coordinator, workers, request) = setup(fast_config(), cooperative).await;
        let result = coordinator.run(request, &two_workers()).await;

        assert_eq!(result.status, JobStatus::Success);
        assert_eq!(result.request.superstep, 1);
        assert_eq!(result.request.checkpoint_step, 1);

        drop(coordinator);
        let seen = workers.await.unwrap();
        let saves: Vec<&str> = seen
            .iter()
            .filter_map(|e| match &e.message {
                FromServer::SaveCheckpoint { storage_key } => Some(storage_key.as_str()),
                _ => None,
            })
            .collect();
        // One checkpoint into the secondary, then the copy back to primary
        assert_eq!(saves, vec!["g-secondary", "g-secondary", "g", "g"]);
    }

    #[tokio::test]
    async fn test_superstep_timeout_is_incomplete() {
        fn silent_rounds(_worker: &WorkerId, command: &FromServer) -> Option<FromWorker> {
            match command {
                FromServer::Assign { .. } => Some(FromWorker::PartitionAck { ok: true }),
                _ => None,
            }
        }
        let (mut coordinator, _workers, request) = setup(fast_config(), silent_rounds).await;
        let result = coordinator.run(request, &two_workers()).await;

        assert_eq!(result.status, JobStatus::Incomplete);
        assert_eq!(result.request.superstep, result.request.checkpoint_step);
    }

    #[tokio::test]
    async fn test_load_failure_is_incomplete() {
        fn broken_store(_worker: &WorkerId, command: &FromServer) -> Option<FromWorker> {
            match command {
                FromServer::Assign { .. } => Some(FromWorker::PartitionAck { ok: false }),
                _ => None,
            }
        }
        let (mut coordinator, _workers, request) = setup(fast_config(), broken_store).await;
        let result = coordinator.run(request, &two_workers()).await;
        assert_eq!(result.status, JobStatus::Incomplete);
    }

    #[tokio::test]
    async fn test_stale_ack_is_protocol_violation() {
        fn stale(_worker: &WorkerId, command: &FromServer) -> Option<FromWorker> {
            match command {
                FromServer::Assign { .. } => Some(FromWorker::PartitionAck { ok: true }),
                FromServer::Superstep { step } => Some(FromWorker::Inactive { step: step + 7 }),
                _ => None,
            }
        }
        let (mut coordinator, _workers, request) = setup(fast_config(), stale).await;
        let result = coordinator.run(request, &two_workers()).await;
        assert_eq!(result.status, JobStatus::Incomplete);
    }

    #[tokio::test]
    async fn test_checkpoint_failure_rewinds() {
        fn busy_then_fail(_worker: &WorkerId, command: &FromServer) -> Option<FromWorker> {
            match command {
                FromServer::Assign { .. } => Some(FromWorker::PartitionAck { ok: true }),
                FromServer::Superstep { step } => Some(FromWorker::Done {
                    step: *step,
                    elapsed: Duration::from_millis(5),
                }),
                FromServer::SaveCheckpoint { .. } => {
                    Some(FromWorker::SaveCheckpointAck { ok: false })
                }
                FromServer::V2V { .. } => None,
            }
        }
        let config = fast_config().with_checkpoint_rate(2);
        let (mut coordinator, _workers, request) = setup(config, busy_then_fail).await;
        let result = coordinator.run(request, &two_workers()).await;

        assert_eq!(result.status, JobStatus::Incomplete);
        assert_eq!(result.request.superstep, 0);
        assert_eq!(result.request.graph_access.key(), "g");
    }

    #[tokio::test]
    async fn test_runs_to_superstep_limit() {
        fn always_busy(_worker: &WorkerId, command: &FromServer) -> Option<FromWorker> {
            match command {
                FromServer::Assign { .. } => Some(FromWorker::PartitionAck { ok: true }),
                FromServer::Superstep { step } => Some(FromWorker::Done {
                    step: *step,
                    elapsed: Duration::from_millis(5),
                }),
                FromServer::SaveCheckpoint { .. } => {
                    Some(FromWorker::SaveCheckpointAck { ok: true })
                }
                FromServer::V2V { .. } => None,
            }
        }
        let config = fast_config().with_max_supersteps(5).with_checkpoint_rate(2);
        let (mut coordinator, _workers, request) = setup(config, always_busy).await;
        let result = coordinator.run(request, &two_workers()).await;

        assert_eq!(result.status, JobStatus::Success);
        assert_eq!(result.request.superstep, 5);
        assert_eq!(result.request.checkpoint_step, 5);
        // Checkpoints at 2, 4 and 5 leave the latest state in the secondary,
        // so the final copy brings it back to the primary
        assert_eq!(result.request.graph_access.key(), "g-secondary");
    }

    #[tokio::test]
    async fn test_late_replies_from_abandoned_attempt_are_dropped() {
        let (mut coordinator, _workers, request) =
            setup_with(fast_config(), cooperative, true).await;
        let result = coordinator.run(request, &two_workers()).await;

        assert_eq!(result.status, JobStatus::Success);
        assert_eq!(result.request.superstep, 1);
    }

    #[tokio::test]
    async fn test_attempts_are_distinct() {
        let (mut coordinator, _workers, request) = setup(fast_config(), cooperative).await;
        let first = coordinator.run(request.clone(), &two_workers()).await;
        let stamp = coordinator.attempt();
        coordinator.run(first.request, &two_workers()).await;
        assert!(coordinator.attempt() > stamp);
    }

    #[tokio::test]
    async fn test_imbalance_moves_partitions_to_faster_worker() {
        fn skewed(worker: &WorkerId, command: &FromServer) -> Option<FromWorker> {
            match command {
                FromServer::Assign { .. } => Some(FromWorker::PartitionAck { ok: true }),
                FromServer::Superstep { step } => {
                    let millis = if worker.as_str() == "w0" { 10 } else { 40 };
                    Some(FromWorker::Done {
                        step: *step,
                        elapsed: Duration::from_millis(millis),
                    })
                }
                FromServer::SaveCheckpoint { .. } => {
                    Some(FromWorker::SaveCheckpointAck { ok: true })
                }
                FromServer::V2V { .. } => None,
            }
        }
        let config = fast_config()
            .with_max_supersteps(2)
            .with_partitions_per_worker(2)
            .with_max_optimal_ratio(1.5);
        let (mut coordinator, workers, request) = setup(config, skewed).await;
        let result = coordinator.run(request, &two_workers()).await;
        assert_eq!(result.status, JobStatus::Success);
        assert_eq!(result.request.superstep, 2);

        drop(coordinator);
        let seen = workers.await.unwrap();
        let assigns: Vec<(String, String, usize)> = seen
            .iter()
            .filter_map(|e| match &e.message {
                FromServer::Assign {
                    storage_key,
                    partitions,
                    ..
                } => Some((storage_key.clone(), e.worker.to_string(), partitions.len())),
                _ => None,
            })
            .collect();

        // w0 is four times faster, so after the imbalance checkpoint it takes
        // every partition and resumes from the checkpointed collection
        assert_eq!(
            assigns,
            vec![
                ("g".to_string(), "w0".to_string(), 2),
                ("g".to_string(), "w1".to_string(), 2),
                ("g-secondary".to_string(), "w0".to_string(), 4),
                ("g-secondary".to_string(), "w1".to_string(), 0),
            ]
        );
    }
}
