//! In-process cluster: a coordinator and N workers wired over channels
//!
//! Runs the same coordinator and worker code as the networked server, with
//! channels standing in for TCP connections.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::PregelConfig;
use crate::coordinator::JobCoordinator;
use crate::error::PregelError;
use crate::message::{Envelope, FromServer, WorkerId, WorkerReply};
use crate::request::{JobResult, JobStatus, Request};
use crate::storage::{create_job, GraphStore};
use crate::vertex::VertexProgram;
use crate::worker::ShardProcessor;

pub struct LocalCluster {
    config: PregelConfig,
    store: Arc<dyn GraphStore>,
    program: Arc<dyn VertexProgram>,
    num_workers: usize,
    max_attempts: usize,
}

impl LocalCluster {
    pub fn new(
        config: PregelConfig,
        store: Arc<dyn GraphStore>,
        program: Arc<dyn VertexProgram>,
        num_workers: usize,
    ) -> Self {
        Self {
            store,
            program,
            num_workers: num_workers.max(1),
            max_attempts: config.max_attempts.max(1),
            config,
        }
    }

    /// Override the config's `max_attempts` for this cluster
    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn store(&self) -> &Arc<dyn GraphStore> {
        &self.store
    }

    /// Load `edge_list` as job `name` and run it
    pub async fn run_edge_list(
        &self,
        name: &str,
        edge_list: &str,
        initial_value: f64,
    ) -> Result<JobResult, PregelError> {
        let access = create_job(self.store.as_ref(), name, edge_list, initial_value).await?;
        Ok(self.run(Request::new(0, 1, access)).await)
    }

    /// Run `request`, resubmitting it from its checkpoint while it comes back
    /// `Incomplete`
    pub async fn run(&self, mut request: Request) -> JobResult {
        let (inbox_tx, inbox) = mpsc::channel(self.config.channel_capacity);
        let (outbox, outbox_rx) = mpsc::channel(self.config.channel_capacity);

        let mut commands = HashMap::new();
        let mut tasks = Vec::with_capacity(self.num_workers * 2);
        for i in 0..self.num_workers {
            let id = WorkerId::new(format!("local-{}", i));
            let (command_tx, handle) = self.spawn_worker(id.clone(), inbox_tx.clone(), &mut tasks);
            commands.insert(id, command_tx);
            tasks.push(handle);
        }
        drop(inbox_tx);

        let mut workers: Vec<WorkerId> = commands.keys().cloned().collect();
        workers.sort();
        let pump = tokio::spawn(route_commands(outbox_rx, commands));

        let mut coordinator =
            JobCoordinator::new(self.config.clone(), self.store.clone(), inbox, outbox);
        let mut attempt = 1;
        let result = loop {
            let result = coordinator.run(request, &workers).await;
            if result.status != JobStatus::Incomplete || attempt >= self.max_attempts {
                break result;
            }
            warn!(
                attempt,
                superstep = result.request.superstep,
                "Retrying incomplete job from checkpoint"
            );
            attempt += 1;
            request = result.request;
        };
        info!(status = %result.status, attempts = attempt, "Local job finished");

        // Closing the outbox stops the pump, which closes every worker
        drop(coordinator);
        let _ = pump.await;
        for task in tasks {
            let _ = task.await;
        }
        result
    }

    fn spawn_worker(
        &self,
        id: WorkerId,
        inbox: mpsc::Sender<Envelope<WorkerReply>>,
        tasks: &mut Vec<JoinHandle<()>>,
    ) -> (mpsc::Sender<FromServer>, JoinHandle<()>) {
        let capacity = self.config.channel_capacity;
        let (command_tx, command_rx) = mpsc::channel(capacity);
        let (reply_tx, mut reply_rx) = mpsc::channel::<WorkerReply>(capacity);

        let processor = ShardProcessor::new(
            id.clone(),
            self.store.clone(),
            self.program.clone(),
            self.config.clone(),
            reply_tx,
        );
        let worker = id.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = processor.run(command_rx).await {
                warn!(worker = %worker, error = %e, "Worker stopped with error");
            }
        });

        tasks.push(tokio::spawn(async move {
            while let Some(message) = reply_rx.recv().await {
                if inbox.send(Envelope::new(&id, message)).await.is_err() {
                    break;
                }
            }
        }));

        (command_tx, handle)
    }
}

async fn route_commands(
    mut outbox: mpsc::Receiver<Envelope<FromServer>>,
    workers: HashMap<WorkerId, mpsc::Sender<FromServer>>,
) {
    while let Some(Envelope { worker, message }) = outbox.recv().await {
        match workers.get(&worker) {
            Some(tx) => {
                if tx.send(message).await.is_err() {
                    warn!(worker = %worker, "Worker channel closed");
                }
            }
            None => warn!(worker = %worker, "Command for unknown worker"),
        }
    }
}
