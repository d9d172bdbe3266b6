//! Connected workers and the set taking part in the running job

use std::collections::{BTreeMap, BTreeSet};

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::message::{Envelope, FromServer, WorkerId, WorkerReply};

#[derive(Debug)]
struct Connection {
    generation: u64,
    address: String,
    outbound: mpsc::Sender<FromServer>,
}

#[derive(Debug, Default)]
struct RegistryState {
    workers: BTreeMap<WorkerId, Connection>,
    selected: BTreeSet<WorkerId>,
    job_inbox: Option<mpsc::Sender<Envelope<WorkerReply>>>,
    next_generation: u64,
}

/// Tracks worker connections for the scheduler
///
/// A worker id may reconnect at any time except while it belongs to the
/// selected set of a running job.
#[derive(Debug, Default)]
pub struct WorkerRegistry {
    state: Mutex<RegistryState>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a handshake from `worker` would be accepted right now
    pub async fn admits(&self, worker: &WorkerId) -> bool {
        !self.state.lock().await.selected.contains(worker)
    }

    /// Register a connection, replacing any earlier one for the same id
    ///
    /// Returns the connection generation, or `None` if the id is busy.
    pub async fn register(
        &self,
        worker: WorkerId,
        address: String,
        outbound: mpsc::Sender<FromServer>,
    ) -> Option<u64> {
        let mut state = self.state.lock().await;
        if state.selected.contains(&worker) {
            warn!(worker = %worker, "Rejecting worker already in a running job");
            return None;
        }

        state.next_generation += 1;
        let generation = state.next_generation;
        info!(worker = %worker, address = %address, "Worker registered");
        if let Some(previous) = state.workers.insert(
            worker.clone(),
            Connection {
                generation,
                address,
                outbound,
            },
        ) {
            debug!(worker = %worker, previous = %previous.address, "Replaced earlier connection");
        }
        Some(generation)
    }

    /// Forget `worker` if `generation` is still its current connection
    pub async fn disconnected(&self, worker: &WorkerId, generation: u64) {
        let mut state = self.state.lock().await;
        let current = state.workers.get(worker).map(|c| c.generation);
        if current == Some(generation) {
            state.workers.remove(worker);
            info!(worker = %worker, "Worker disconnected");
        }
    }

    pub async fn deregister(&self, worker: &WorkerId) {
        if self.state.lock().await.workers.remove(worker).is_some() {
            info!(worker = %worker, "Worker deregistered");
        }
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.workers.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Mark every connected worker as taking part in the next job
    pub async fn select(&self) -> Vec<WorkerId> {
        let mut state = self.state.lock().await;
        let workers: Vec<WorkerId> = state.workers.keys().cloned().collect();
        state.selected = workers.iter().cloned().collect();
        workers
    }

    /// Route replies of selected workers into `inbox`
    pub async fn attach_job(&self, inbox: mpsc::Sender<Envelope<WorkerReply>>) {
        self.state.lock().await.job_inbox = Some(inbox);
    }

    /// End the current job: free the selected workers and drop its inbox
    pub async fn release(&self) {
        let mut state = self.state.lock().await;
        state.selected.clear();
        state.job_inbox = None;
    }

    /// Deliver a worker reply to the running job
    ///
    /// Replies from workers outside the job, or with no job running, are
    /// dropped.
    pub async fn route(&self, worker: &WorkerId, message: WorkerReply) {
        let inbox = {
            let state = self.state.lock().await;
            if !state.selected.contains(worker) {
                debug!(
                    worker = %worker,
                    kind = message.message.kind(),
                    "Dropping reply from idle worker"
                );
                return;
            }
            state.job_inbox.clone()
        };

        match inbox {
            Some(inbox) => {
                if inbox.send(Envelope::new(worker, message)).await.is_err() {
                    debug!(worker = %worker, "Job inbox closed");
                }
            }
            None => debug!(worker = %worker, "No job running"),
        }
    }

    /// Send a command to `worker`, deregistering it when the connection is gone
    ///
    /// A lost worker surfaces to the coordinator as a missing ack.
    pub async fn send(&self, worker: &WorkerId, message: FromServer) {
        let outbound = {
            let state = self.state.lock().await;
            state.workers.get(worker).map(|c| c.outbound.clone())
        };

        let Some(outbound) = outbound else {
            warn!(worker = %worker, kind = message.kind(), "Command for unknown worker");
            return;
        };
        if outbound.send(message).await.is_err() {
            warn!(worker = %worker, "Send failed");
            self.deregister(worker).await;
        }
    }
}
