//! Adapter between coordinator commands and a worker shard

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::mailbox::MailboxHandle;
use super::shard::WorkerShard;
use crate::config::PregelConfig;
use crate::error::PregelError;
use crate::message::{FromServer, FromWorker, WorkerId, WorkerReply};
use crate::partition::Partition;
use crate::storage::GraphStore;
use crate::vertex::VertexProgram;

/// Executes [`FromServer`] commands against a [`WorkerShard`]
///
/// | Command          | Action                          | Reply                  |
/// |------------------|---------------------------------|------------------------|
/// | `Assign`         | load vertices                   | `PartitionAck`         |
/// | `Superstep`      | prepare, then run in background | `Done` or `Inactive`   |
/// | `SaveCheckpoint` | save vertices                   | `SaveCheckpointAck`    |
/// | `V2V`            | deliver to the mailbox          | none                   |
///
/// A superstep runs in its own task so forwarded `V2V` messages keep
/// flowing into the mailbox while the round is computing.
///
/// Every reply is stamped with the attempt of the latest `Assign`. An
/// `Assign` arriving while a round is still computing cancels that round.
pub struct ShardProcessor {
    worker_id: WorkerId,
    store: Arc<dyn GraphStore>,
    program: Arc<dyn VertexProgram>,
    config: PregelConfig,
    outbound: mpsc::Sender<WorkerReply>,
    attempt: u64,
    shard: Option<WorkerShard>,
    running: Option<JoinHandle<WorkerShard>>,
    mailbox: Option<MailboxHandle>,
}

impl ShardProcessor {
    pub fn new(
        worker_id: impl Into<WorkerId>,
        store: Arc<dyn GraphStore>,
        program: Arc<dyn VertexProgram>,
        config: PregelConfig,
        outbound: mpsc::Sender<WorkerReply>,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            store,
            program,
            config,
            outbound,
            attempt: 0,
            shard: None,
            running: None,
            mailbox: None,
        }
    }

    pub fn worker_id(&self) -> &WorkerId {
        &self.worker_id
    }

    /// Process commands until the inbound channel closes
    pub async fn run(mut self, mut inbound: mpsc::Receiver<FromServer>) -> Result<(), PregelError> {
        info!(worker = %self.worker_id, program = self.program.name(), "Shard processor started");

        while let Some(command) = inbound.recv().await {
            let kind = command.kind();
            match self.handle(command).await {
                Ok(()) => {}
                Err(e) if self.outbound.is_closed() => {
                    warn!(
                        worker = %self.worker_id,
                        error = %e,
                        "Outbound channel closed, stopping"
                    );
                    break;
                }
                Err(e) => {
                    warn!(worker = %self.worker_id, command = kind, error = %e, "Command failed");
                }
            }
        }

        self.reclaim().await;
        if let Some(shard) = self.shard.take() {
            shard.shutdown().await;
        }
        info!(worker = %self.worker_id, "Shard processor stopped");
        Ok(())
    }

    /// Execute one command
    pub async fn handle(&mut self, command: FromServer) -> Result<(), PregelError> {
        match command {
            FromServer::Assign {
                attempt,
                storage_key,
                partitions,
            } => self.assign(attempt, &storage_key, &partitions).await,
            FromServer::Superstep { step } => self.start_superstep(step).await,
            FromServer::SaveCheckpoint { storage_key } => self.save_checkpoint(&storage_key).await,
            FromServer::V2V { message } => match &self.mailbox {
                Some(mailbox) => mailbox.deliver(message).await,
                None => {
                    warn!(
                        worker = %self.worker_id,
                        to = %message.to,
                        "Message before any assignment"
                    );
                    Ok(())
                }
            },
        }
    }

    async fn assign(
        &mut self,
        attempt: u64,
        storage_key: &str,
        partitions: &[Partition],
    ) -> Result<(), PregelError> {
        self.cancel_round(attempt).await;
        self.attempt = attempt;
        let mut shard = match self.shard.take() {
            Some(shard) => shard,
            None => WorkerShard::new(
                self.worker_id.clone(),
                self.store.clone(),
                self.program.clone(),
                &self.config,
            ),
        };

        let ok = match shard.load_vertices(storage_key, partitions).await {
            Ok(()) => true,
            Err(e) => {
                error!(
                    worker = %self.worker_id,
                    storage_key,
                    error = %e,
                    "Unable to load vertices"
                );
                false
            }
        };
        self.mailbox = shard.mailbox().cloned();
        self.shard = Some(shard);
        self.reply(FromWorker::PartitionAck { ok }).await
    }

    async fn start_superstep(&mut self, step: u64) -> Result<(), PregelError> {
        self.reclaim().await;
        let mut shard = self.shard.take().ok_or(PregelError::NotLoaded)?;

        if let Err(e) = shard.prepare_superstep().await {
            self.shard = Some(shard);
            return Err(e);
        }

        let outbound = self.outbound.clone();
        let worker_id = self.worker_id.clone();
        let attempt = self.attempt;
        let capacity = self.config.channel_capacity.max(1);
        self.running = Some(tokio::spawn(async move {
            // Cancelling the round drops the forwarder, which cuts off its V2V traffic
            let (round_tx, round_rx) = mpsc::channel::<FromWorker>(capacity);
            let forward = stamp_round(round_rx, outbound.clone(), attempt);
            let (result, ()) = tokio::join!(shard.superstep(step, round_tx), forward);

            let reply = match result {
                Ok(stats) if stats.is_inactive() => FromWorker::Inactive { step },
                Ok(stats) => FromWorker::Done {
                    step,
                    elapsed: stats.elapsed,
                },
                Err(e) => {
                    // No ack: the coordinator times out and retries the job
                    error!(worker = %worker_id, superstep = step, error = %e, "Superstep failed");
                    return shard;
                }
            };
            if outbound.send(WorkerReply::new(attempt, reply)).await.is_err() {
                warn!(worker = %worker_id, superstep = step, "Could not report superstep result");
            }
            shard
        }));
        Ok(())
    }

    async fn save_checkpoint(&mut self, storage_key: &str) -> Result<(), PregelError> {
        self.reclaim().await;
        let ok = match &self.shard {
            Some(shard) => match shard.save_vertices(storage_key).await {
                Ok(()) => true,
                Err(e) => {
                    error!(
                        worker = %self.worker_id,
                        storage_key,
                        error = %e,
                        "Unable to save vertices"
                    );
                    false
                }
            },
            None => {
                warn!(
                    worker = %self.worker_id,
                    storage_key,
                    "Checkpoint requested before any assignment"
                );
                false
            }
        };
        self.reply(FromWorker::SaveCheckpointAck { ok }).await
    }

    /// Stop a round that is still computing for an earlier attempt
    async fn cancel_round(&mut self, attempt: u64) {
        if let Some(running) = &self.running {
            if !running.is_finished() {
                warn!(
                    worker = %self.worker_id,
                    stale = self.attempt,
                    attempt,
                    "Cancelling superstep of an abandoned attempt"
                );
                running.abort();
            }
        }
        self.reclaim().await;
    }

    /// Wait for a running superstep and take its shard back
    async fn reclaim(&mut self) {
        if let Some(running) = self.running.take() {
            match running.await {
                Ok(shard) => self.shard = Some(shard),
                Err(e) if e.is_cancelled() => {
                    debug!(worker = %self.worker_id, "Superstep cancelled; shard dropped");
                    self.mailbox = None;
                }
                Err(e) => {
                    error!(
                        worker = %self.worker_id,
                        error = %e,
                        "Superstep task panicked; shard dropped"
                    );
                    self.mailbox = None;
                }
            }
        }
    }

    async fn reply(&self, message: FromWorker) -> Result<(), PregelError> {
        self.outbound
            .send(WorkerReply::new(self.attempt, message))
            .await
            .map_err(|_| PregelError::channel_closed("worker outbound"))
    }
}

/// Forward a round's outgoing messages, stamped with its attempt
async fn stamp_round(
    mut round: mpsc::Receiver<FromWorker>,
    outbound: mpsc::Sender<WorkerReply>,
    attempt: u64,
) {
    while let Some(message) = round.recv().await {
        if outbound.send(WorkerReply::new(attempt, message)).await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{VertexId, VertexMessage};
    use crate::program::{MaxValue, PageRank};
    use crate::storage::{create_job, MemoryStore};
    use crate::vertex::{ComputeContext, ComputeResult};
    use std::time::Duration;

    async fn processor(
        program: Arc<dyn VertexProgram>,
        edges: &str,
    ) -> (ShardProcessor, mpsc::Receiver<WorkerReply>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        create_job(store.as_ref(), "g", edges, 1.0).await.unwrap();
        let (tx, rx) = mpsc::channel(64);
        let config = PregelConfig::default().with_parallelism(2);
        (ShardProcessor::new("w0", store.clone(), program, config, tx), rx, store)
    }

    fn assign(key: &str, end: u64) -> FromServer {
        assign_for(1, key, end)
    }

    fn assign_for(attempt: u64, key: &str, end: u64) -> FromServer {
        FromServer::Assign {
            attempt,
            storage_key: key.into(),
            partitions: vec![Partition::new(0, end)],
        }
    }

    async fn next(rx: &mut mpsc::Receiver<WorkerReply>) -> FromWorker {
        rx.recv().await.expect("worker reply").message
    }

    /// Sleeps on vertex 0 in superstep 0
    struct SlowStart;

    impl VertexProgram for SlowStart {
        fn name(&self) -> &str {
            "slow-start"
        }

        fn compute(&self, ctx: &mut ComputeContext<'_>) -> ComputeResult {
            if ctx.superstep == 0 && ctx.id() == VertexId(0) {
                std::thread::sleep(Duration::from_millis(500));
            }
            ComputeResult::active(ctx.value())
        }
    }

    #[tokio::test]
    async fn test_assign_acks() {
        let (mut p, mut rx, _store) = processor(Arc::new(PageRank), "0 1\n1 0\n").await;
        p.handle(assign("g", 2)).await.unwrap();
        assert_eq!(next(&mut rx).await, FromWorker::PartitionAck { ok: true });

        p.handle(assign("missing", 2)).await.unwrap();
        assert_eq!(next(&mut rx).await, FromWorker::PartitionAck { ok: false });
    }

    #[tokio::test]
    async fn test_replies_carry_latest_attempt() {
        let (mut p, mut rx, _store) = processor(Arc::new(MaxValue), "0 1\n1 0\n").await;
        p.handle(assign_for(7, "g", 2)).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().attempt, 7);

        p.handle(FromServer::Superstep { step: 0 }).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().attempt, 7);

        p.handle(assign_for(8, "g", 2)).await.unwrap();
        let reply = rx.recv().await.unwrap();
        assert_eq!(reply, WorkerReply::new(8, FromWorker::PartitionAck { ok: true }));
    }

    #[tokio::test]
    async fn test_assign_cancels_stalled_round() {
        let (mut p, mut rx, _store) = processor(Arc::new(SlowStart), "0 1\n1 0\n").await;
        p.handle(assign_for(1, "g", 2)).await.unwrap();
        rx.recv().await.unwrap();

        p.handle(FromServer::Superstep { step: 0 }).await.unwrap();
        tokio::time::timeout(Duration::from_millis(200), p.handle(assign_for(2, "g", 2)))
            .await
            .expect("assign waited for the stalled round")
            .unwrap();

        // The cancelled round never reports
        let reply = rx.recv().await.unwrap();
        assert_eq!(reply, WorkerReply::new(2, FromWorker::PartitionAck { ok: true }));
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_superstep_reports_done_then_inactive() {
        let (mut p, mut rx, _store) = processor(Arc::new(MaxValue), "0 1\n1 0\n").await;
        p.handle(assign("g", 2)).await.unwrap();
        next(&mut rx).await;

        p.handle(FromServer::Superstep { step: 0 }).await.unwrap();
        assert!(matches!(next(&mut rx).await, FromWorker::Done { step: 0, .. }));

        p.handle(FromServer::Superstep { step: 1 }).await.unwrap();
        assert_eq!(next(&mut rx).await, FromWorker::Inactive { step: 1 });
    }

    #[tokio::test]
    async fn test_forwarded_message_reaches_vertex() {
        let (mut p, mut rx, _store) = processor(Arc::new(MaxValue), "0 1\n1 0\n").await;
        p.handle(assign("g", 2)).await.unwrap();
        next(&mut rx).await;

        // Run step 0, then converge, then wake vertex 0 from outside
        p.handle(FromServer::Superstep { step: 0 }).await.unwrap();
        next(&mut rx).await;
        p.handle(FromServer::Superstep { step: 1 }).await.unwrap();
        next(&mut rx).await;

        p.handle(FromServer::V2V {
            message: VertexMessage::new(VertexId(7), VertexId(0), 42.0, 1),
        })
        .await
        .unwrap();
        p.handle(FromServer::Superstep { step: 2 }).await.unwrap();
        assert!(matches!(next(&mut rx).await, FromWorker::Done { step: 2, .. }));
    }

    #[tokio::test]
    async fn test_remote_messages_are_stamped() {
        let (mut p, mut rx, _store) = processor(Arc::new(MaxValue), "0 1\n1 0\n").await;
        // Only vertex 0 is local, so messages to vertex 1 leave the worker
        p.handle(assign_for(5, "g", 1)).await.unwrap();
        next(&mut rx).await;

        p.handle(FromServer::Superstep { step: 0 }).await.unwrap();
        let remote = rx.recv().await.unwrap();
        assert_eq!(remote.attempt, 5);
        assert!(matches!(
            remote.message,
            FromWorker::V2V { ref message } if message.to == VertexId(1)
        ));
        assert!(matches!(next(&mut rx).await, FromWorker::Done { step: 0, .. }));
    }

    #[tokio::test]
    async fn test_save_checkpoint_acks() {
        let (mut p, mut rx, store) = processor(Arc::new(PageRank), "0 1\n1 0\n").await;

        p.handle(FromServer::SaveCheckpoint {
            storage_key: "g-secondary".into(),
        })
        .await
        .unwrap();
        assert_eq!(next(&mut rx).await, FromWorker::SaveCheckpointAck { ok: false });

        p.handle(assign("g", 2)).await.unwrap();
        next(&mut rx).await;
        p.handle(FromServer::Superstep { step: 0 }).await.unwrap();
        next(&mut rx).await;

        p.handle(FromServer::SaveCheckpoint {
            storage_key: "g-secondary".into(),
        })
        .await
        .unwrap();
        assert_eq!(next(&mut rx).await, FromWorker::SaveCheckpointAck { ok: true });
        let saved = store.get_one("g-secondary", VertexId(0)).await.unwrap().unwrap();
        assert_eq!(saved.superstep, 0);
        assert!((saved.value - 0.075).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_superstep_before_assign() {
        let (mut p, _rx, _store) = processor(Arc::new(PageRank), "0 1\n").await;
        assert!(matches!(
            p.handle(FromServer::Superstep { step: 0 }).await,
            Err(PregelError::NotLoaded)
        ));
    }

    #[tokio::test]
    async fn test_run_stops_when_inbound_closes() {
        let (p, mut rx, _store) = processor(Arc::new(PageRank), "0 1\n1 0\n").await;
        let (tx, inbound) = mpsc::channel(8);
        let task = tokio::spawn(p.run(inbound));

        tx.send(assign("g", 2)).await.unwrap();
        assert_eq!(next(&mut rx).await, FromWorker::PartitionAck { ok: true });
        drop(tx);
        task.await.unwrap().unwrap();
    }
}
