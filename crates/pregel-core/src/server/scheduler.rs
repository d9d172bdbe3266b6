//! Runs queued requests one at a time on the connected workers

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info};

use super::clients::ClientManager;
use super::registry::WorkerRegistry;
use crate::config::PregelConfig;
use crate::coordinator::JobCoordinator;
use crate::message::{Envelope, FromServer, WorkerId};
use crate::request::{JobResult, JobStatus, Request};
use crate::storage::GraphStore;

/// Pops requests off the client queue and runs them on the selected workers
///
/// An `Incomplete` run goes back to the queue until the request has used
/// `max_attempts` runs; the last one is reported as `Failure`.
pub struct Scheduler {
    config: PregelConfig,
    store: Arc<dyn GraphStore>,
    registry: Arc<WorkerRegistry>,
    clients: Arc<ClientManager>,
    /// Incomplete runs so far, per (client id, request id)
    attempts: Mutex<HashMap<(u64, i64), usize>>,
}

impl Scheduler {
    pub fn new(
        config: PregelConfig,
        store: Arc<dyn GraphStore>,
        registry: Arc<WorkerRegistry>,
        clients: Arc<ClientManager>,
    ) -> Self {
        Self {
            config,
            store,
            registry,
            clients,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    /// Schedule forever, sleeping `idle_poll` whenever there is nothing to do
    pub async fn run(&self) {
        info!(idle_poll = ?self.config.idle_poll, "Scheduler started");
        loop {
            if !self.run_once().await {
                tokio::time::sleep(self.config.idle_poll).await;
            }
        }
    }

    /// Run the next request if workers and a request are available
    ///
    /// Returns whether a job attempt was made.
    pub async fn run_once(&self) -> bool {
        let workers = self.registry.select().await;
        if workers.is_empty() {
            self.registry.release().await;
            debug!("Waiting for workers");
            return false;
        }

        let Some(request) = self.clients.next().await else {
            self.registry.release().await;
            return false;
        };

        let result = self.run_job(request, workers).await;
        self.registry.release().await;
        let result = self.limit_attempts(result).await;
        self.clients.complete(result).await;
        true
    }

    /// Fail an `Incomplete` request once it has used up its attempts
    async fn limit_attempts(&self, result: JobResult) -> JobResult {
        let key = (result.request.client_id, result.request.request_id);
        let mut attempts = self.attempts.lock().await;
        if result.status != JobStatus::Incomplete {
            attempts.remove(&key);
            return result;
        }

        let used = attempts.entry(key).or_insert(0);
        *used += 1;
        if *used < self.config.max_attempts {
            debug!(
                client_id = key.0,
                request_id = key.1,
                attempt = *used,
                max_attempts = self.config.max_attempts,
                "Request incomplete, will retry from checkpoint"
            );
            return result;
        }

        attempts.remove(&key);
        error!(
            client_id = key.0,
            request_id = key.1,
            max_attempts = self.config.max_attempts,
            superstep = result.request.superstep,
            "Request failed after every attempt"
        );
        JobResult::failure(result.request)
    }

    async fn run_job(&self, request: Request, workers: Vec<WorkerId>) -> JobResult {
        let (inbox_tx, inbox) = mpsc::channel(self.config.channel_capacity);
        let (outbox, mut outbox_rx) =
            mpsc::channel::<Envelope<FromServer>>(self.config.channel_capacity);
        self.registry.attach_job(inbox_tx).await;

        let registry = self.registry.clone();
        let pump = tokio::spawn(async move {
            while let Some(envelope) = outbox_rx.recv().await {
                registry.send(&envelope.worker, envelope.message).await;
            }
        });

        let mut coordinator =
            JobCoordinator::new(self.config.clone(), self.store.clone(), inbox, outbox);
        let fallback = request.clone();
        let job = tokio::spawn(async move { coordinator.run(request, &workers).await });

        let result = match job.await {
            Ok(result) => result,
            Err(e) => {
                error!(
                    client_id = fallback.client_id,
                    request_id = fallback.request_id,
                    error = %e,
                    "Job task aborted"
                );
                JobResult::incomplete(fallback)
            }
        };

        // The outbox closes with the coordinator
        if let Err(e) = pump.await {
            error!(error = %e, "Outbound pump aborted");
        }
        result
    }
}
