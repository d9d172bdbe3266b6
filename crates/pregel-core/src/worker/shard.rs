//! The vertices owned by one worker and the superstep that runs over them

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::engine::{EngineStats, SubEngine};
use super::mailbox::{Inbox, MailboxHandle};
use crate::config::PregelConfig;
use crate::error::PregelError;
use crate::message::{FromWorker, VertexId, VertexMessage, WorkerId};
use crate::partition::Partition;
use crate::storage::GraphStore;
use crate::vertex::{Vertex, VertexProgram};

/// Outcome of one local superstep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoundStats {
    /// Vertices still active after the step
    pub active: usize,
    /// Messages delivered to this worker's own vertices
    pub local: usize,
    /// Messages sent to the coordinator for other workers
    pub remote: usize,
    pub elapsed: Duration,
}

impl RoundStats {
    /// No active vertex and no message emitted
    pub fn is_inactive(&self) -> bool {
        self.active == 0 && self.local == 0 && self.remote == 0
    }
}

/// A worker's slice of the graph, split over parallel sub-engines
///
/// Vertex `id` lives in sub-engine `id % parallelism`.
pub struct WorkerShard {
    worker_id: WorkerId,
    store: Arc<dyn GraphStore>,
    program: Arc<dyn VertexProgram>,
    parallelism: usize,
    channel_capacity: usize,
    engines: Vec<SubEngine>,
    owned: Arc<HashSet<VertexId>>,
    num_vertices: u64,
    mailbox: Option<MailboxHandle>,
    mailbox_task: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for WorkerShard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerShard")
            .field("worker_id", &self.worker_id)
            .field("program", &self.program.name())
            .field("vertices", &self.owned.len())
            .field("num_vertices", &self.num_vertices)
            .finish()
    }
}

impl WorkerShard {
    pub fn new(
        worker_id: impl Into<WorkerId>,
        store: Arc<dyn GraphStore>,
        program: Arc<dyn VertexProgram>,
        config: &PregelConfig,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            store,
            program,
            parallelism: config.parallelism.max(1),
            channel_capacity: config.channel_capacity.max(1),
            engines: Vec::new(),
            owned: Arc::new(HashSet::new()),
            num_vertices: 0,
            mailbox: None,
            mailbox_task: None,
        }
    }

    pub fn worker_id(&self) -> &WorkerId {
        &self.worker_id
    }

    /// Number of vertices held by this shard
    pub fn len(&self) -> usize {
        self.owned.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owned.is_empty()
    }

    pub fn owns(&self, id: VertexId) -> bool {
        self.owned.contains(&id)
    }

    /// Size of the whole graph's id space
    pub fn num_vertices(&self) -> u64 {
        self.num_vertices
    }

    /// Handle to the current mailbox, `None` before the first load
    pub fn mailbox(&self) -> Option<&MailboxHandle> {
        self.mailbox.as_ref()
    }

    /// Load the given partitions from `storage_key`, replacing everything held
    ///
    /// Messages stored with the vertices become the initial mailbox contents.
    pub async fn load_vertices(
        &mut self,
        storage_key: &str,
        partitions: &[Partition],
    ) -> Result<(), PregelError> {
        let mut vertices = Vec::new();
        for p in partitions {
            vertices.extend(self.store.batch_get(storage_key, p.start, p.end).await?);
        }
        let num_vertices = self.store.num_vertices(storage_key).await?;

        self.stop_mailbox().await;

        let mut engines: Vec<SubEngine> = (0..self.parallelism).map(|_| SubEngine::new()).collect();
        let mut owned = HashSet::with_capacity(vertices.len());
        let mut seed = Inbox::new();
        for mut vertex in vertices {
            owned.insert(vertex.id);
            let messages = std::mem::take(&mut vertex.messages);
            if !messages.is_empty() {
                seed.insert(vertex.id, messages);
            }
            let slot = (vertex.id.0 % self.parallelism as u64) as usize;
            engines[slot].insert(vertex);
        }

        self.engines = engines;
        self.owned = Arc::new(owned);
        self.num_vertices = num_vertices;

        let (mailbox, task) = MailboxHandle::spawn(self.owned.clone(), seed, self.channel_capacity);
        self.mailbox = Some(mailbox);
        self.mailbox_task = Some(task);

        info!(
            worker = %self.worker_id,
            storage_key,
            vertices = self.owned.len(),
            partitions = partitions.len(),
            "Loaded vertices"
        );
        Ok(())
    }

    /// Hand every vertex the messages buffered for it since the last step
    pub async fn prepare_superstep(&mut self) -> Result<(), PregelError> {
        let mailbox = self.mailbox.as_ref().ok_or(PregelError::NotLoaded)?;
        // A failed round loses the engines it was running
        if self.engines.len() != self.parallelism {
            return Err(PregelError::NotLoaded);
        }
        let inbox = mailbox.drain().await?;

        for engine in &mut self.engines {
            engine.clear_messages();
        }
        let n = self.engines.len() as u64;
        for (id, messages) in inbox {
            let slot = (id.0 % n) as usize;
            if let Some(vertex) = self.engines[slot].get_mut(&id) {
                vertex.messages = messages;
            }
        }
        Ok(())
    }

    /// Run one superstep across all sub-engines
    ///
    /// Emitted messages are routed as they are produced: to the mailbox when
    /// this shard owns the destination, otherwise to `outbound` as
    /// [`FromWorker::V2V`]. Returns once every sub-engine and the router have
    /// finished.
    pub async fn superstep(
        &mut self,
        step: u64,
        outbound: mpsc::Sender<FromWorker>,
    ) -> Result<RoundStats, PregelError> {
        let started = Instant::now();
        let mailbox = self.mailbox.clone().ok_or(PregelError::NotLoaded)?;
        let (tx, rx) = mpsc::channel::<VertexMessage>(self.channel_capacity);

        let router = tokio::spawn(route_messages(rx, self.owned.clone(), mailbox, outbound));

        let handles: Vec<_> = std::mem::take(&mut self.engines)
            .into_iter()
            .map(|mut engine| {
                let tx = tx.clone();
                let program = self.program.clone();
                let num_vertices = self.num_vertices;
                tokio::task::spawn_blocking(move || {
                    let stats = engine.superstep(step, num_vertices, program.as_ref(), &tx);
                    (engine, stats)
                })
            })
            .collect();
        drop(tx);

        let mut total = EngineStats::default();
        let mut failure = None;
        for result in futures::future::join_all(handles).await {
            match result {
                Ok((engine, stats)) => {
                    total.active += stats.active;
                    total.computed += stats.computed;
                    total.sent += stats.sent;
                    self.engines.push(engine);
                }
                Err(e) => {
                    if failure.is_none() {
                        failure = Some(format!("sub-engine failed: {}", e));
                    }
                }
            }
        }

        let routed = router
            .await
            .map_err(|e| {
                PregelError::worker_failure(&self.worker_id, format!("router failed: {}", e))
            })?;
        if let Some(reason) = failure {
            return Err(PregelError::worker_failure(&self.worker_id, reason));
        }
        let (local, remote) = routed?;

        let stats = RoundStats {
            active: total.active,
            local,
            remote,
            elapsed: started.elapsed(),
        };
        debug!(
            worker = %self.worker_id,
            superstep = step,
            computed = total.computed,
            active = stats.active,
            local,
            remote,
            elapsed = ?stats.elapsed,
            "Superstep finished"
        );
        Ok(stats)
    }

    /// Write every vertex, with its undelivered messages, to `storage_key`
    pub async fn save_vertices(&self, storage_key: &str) -> Result<(), PregelError> {
        let mailbox = self.mailbox.as_ref().ok_or(PregelError::NotLoaded)?;
        let mut pending = mailbox.snapshot().await?;

        let vertices: Vec<Vertex> = self
            .engines
            .iter()
            .flat_map(SubEngine::vertices)
            .map(|v| {
                let mut v = v.clone();
                v.messages = pending.remove(&v.id).unwrap_or_default();
                v
            })
            .collect();

        self.store.batch_update(storage_key, &vertices).await?;
        info!(worker = %self.worker_id, storage_key, vertices = vertices.len(), "Saved vertices");
        Ok(())
    }

    /// Every vertex currently held, in no particular order
    pub fn vertices(&self) -> impl Iterator<Item = &Vertex> {
        self.engines.iter().flat_map(SubEngine::vertices)
    }

    async fn stop_mailbox(&mut self) {
        if let Some(mailbox) = self.mailbox.take() {
            mailbox.stop().await;
        }
        if let Some(task) = self.mailbox_task.take() {
            if let Err(e) = task.await {
                warn!(worker = %self.worker_id, error = %e, "Mailbox task ended abnormally");
            }
        }
    }

    /// Stop background tasks
    pub async fn shutdown(mut self) {
        self.stop_mailbox().await;
    }
}

/// Route emitted messages until every sub-engine dropped its sender
async fn route_messages(
    mut rx: mpsc::Receiver<VertexMessage>,
    owned: Arc<HashSet<VertexId>>,
    mailbox: MailboxHandle,
    outbound: mpsc::Sender<FromWorker>,
) -> Result<(usize, usize), PregelError> {
    let mut local = 0;
    let mut remote = 0;
    while let Some(message) = rx.recv().await {
        if owned.contains(&message.to) {
            mailbox.deliver(message).await?;
            local += 1;
        } else {
            outbound
                .send(FromWorker::V2V { message })
                .await
                .map_err(|_| PregelError::channel_closed("worker outbound"))?;
            remote += 1;
        }
    }
    Ok((local, remote))
}
