//! Client requests: queue, outstanding jobs and completed results

use std::collections::{HashMap, VecDeque};

use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info, warn};

use crate::error::PregelError;
use crate::request::{JobResult, JobStatus, Request};

type RequestKey = (u64, i64);

#[derive(Debug, Default)]
struct ClientState {
    pending: VecDeque<Request>,
    /// One in-flight request id per client, queued or running
    outstanding: HashMap<u64, i64>,
    completed: HashMap<RequestKey, JobStatus>,
    waiters: HashMap<RequestKey, Vec<oneshot::Sender<JobStatus>>>,
}

/// Queue of client requests shared by the client listener and the scheduler
#[derive(Debug, Default)]
pub struct ClientManager {
    state: Mutex<ClientState>,
}

impl ClientManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `client_id` and return its outstanding request ids
    pub async fn connect(&self, client_id: u64) -> Vec<i64> {
        let state = self.state.lock().await;
        let pending: Vec<i64> = state.outstanding.get(&client_id).copied().into_iter().collect();
        info!(client_id, outstanding = pending.len(), "Client connected");
        pending
    }

    /// Queue `request` and get a receiver for its final status
    ///
    /// Resubmitting the outstanding request attaches another waiter;
    /// resubmitting a finished one answers from the completed cache.
    pub async fn submit(
        &self,
        request: Request,
    ) -> Result<oneshot::Receiver<JobStatus>, PregelError> {
        request.validate()?;
        let key = (request.client_id, request.request_id);
        let (tx, rx) = oneshot::channel();
        let mut state = self.state.lock().await;

        if let Some(status) = state.completed.get(&key) {
            debug!(
                client_id = key.0,
                request_id = key.1,
                %status,
                "Answering from completed results"
            );
            let _ = tx.send(*status);
            return Ok(rx);
        }

        match state.outstanding.get(&request.client_id) {
            Some(&running) if running == request.request_id => {
                debug!(
                    client_id = key.0,
                    request_id = key.1,
                    "Client waiting on outstanding request"
                );
            }
            Some(&running) => {
                return Err(PregelError::Rejected(format!(
                    "client {} already has request {} outstanding",
                    request.client_id, running
                )));
            }
            None => {
                info!(
                    client_id = key.0,
                    request_id = key.1,
                    collection = %request.graph_access.primary,
                    "Request queued"
                );
                state.outstanding.insert(request.client_id, request.request_id);
                state.pending.push_back(request);
            }
        }

        state.waiters.entry(key).or_default().push(tx);
        Ok(rx)
    }

    /// Next request to run, oldest first
    pub async fn next(&self) -> Option<Request> {
        self.state.lock().await.pending.pop_front()
    }

    pub async fn pending_len(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    /// Record the outcome of a job attempt
    ///
    /// `Incomplete` results go back to the end of the queue, rewound to their
    /// last checkpoint. Anything else is final and wakes the waiters.
    pub async fn complete(&self, result: JobResult) {
        let mut state = self.state.lock().await;
        let request = result.request;
        let key = (request.client_id, request.request_id);

        if result.status == JobStatus::Incomplete {
            warn!(
                client_id = key.0,
                request_id = key.1,
                superstep = request.superstep,
                "Requeueing incomplete request"
            );
            state.pending.push_back(request);
            return;
        }

        state.outstanding.remove(&request.client_id);
        state.completed.insert(key, result.status);
        let waiters = state.waiters.remove(&key).unwrap_or_default();
        info!(
            client_id = key.0,
            request_id = key.1,
            status = %result.status,
            waiters = waiters.len(),
            "Request finished"
        );
        for waiter in waiters {
            let _ = waiter.send(result.status);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::GraphAccess;

    fn request(client_id: u64, request_id: i64) -> Request {
        Request::new(client_id, request_id, GraphAccess::for_job("g"))
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let clients = ClientManager::new();
        clients.submit(request(1, 1)).await.unwrap();
        clients.submit(request(2, 1)).await.unwrap();

        assert_eq!(clients.next().await.unwrap().client_id, 1);
        assert_eq!(clients.next().await.unwrap().client_id, 2);
        assert!(clients.next().await.is_none());
    }

    #[tokio::test]
    async fn test_one_outstanding_per_client() {
        let clients = ClientManager::new();
        clients.submit(request(1, 1)).await.unwrap();
        assert!(matches!(clients.submit(request(1, 2)).await, Err(PregelError::Rejected(_))));
        assert_eq!(clients.connect(1).await, vec![1]);
        assert!(clients.connect(2).await.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_request_id() {
        let clients = ClientManager::new();
        assert!(matches!(
            clients.submit(request(1, 0)).await,
            Err(PregelError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_completion_wakes_all_waiters() {
        let clients = ClientManager::new();
        let first = clients.submit(request(1, 5)).await.unwrap();
        let second = clients.submit(request(1, 5)).await.unwrap();
        assert_eq!(clients.pending_len().await, 1);

        let running = clients.next().await.unwrap();
        clients.complete(JobResult::success(running)).await;

        assert_eq!(first.await.unwrap(), JobStatus::Success);
        assert_eq!(second.await.unwrap(), JobStatus::Success);
        assert!(clients.connect(1).await.is_empty());

        // Finished results are answered from the cache
        let again = clients.submit(request(1, 5)).await.unwrap();
        assert_eq!(again.await.unwrap(), JobStatus::Success);
        assert_eq!(clients.pending_len().await, 0);
    }

    #[tokio::test]
    async fn test_incomplete_is_requeued() {
        let clients = ClientManager::new();
        let mut waiter = clients.submit(request(1, 1)).await.unwrap();
        clients.submit(request(2, 1)).await.unwrap();

        let mut running = clients.next().await.unwrap();
        running.superstep = 7;
        running.checkpoint_step = 5;
        clients.complete(JobResult::incomplete(running)).await;

        assert!(waiter.try_recv().is_err());
        assert_eq!(clients.next().await.unwrap().client_id, 2);
        let retried = clients.next().await.unwrap();
        assert_eq!(retried.client_id, 1);
        assert_eq!(retried.superstep, 5);
    }
}
