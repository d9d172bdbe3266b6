//! Coordinator server
//!
//! Two listeners feed shared state that the [`Scheduler`] drains:
//!
//! ```text
//! clients ──► client listener ──► ClientManager ──┐
//!                                                 ├──► Scheduler ──► JobCoordinator
//! workers ──► worker listener ──► WorkerRegistry ─┘
//! ```

pub mod clients;
pub mod registry;
pub mod scheduler;

pub use clients::ClientManager;
pub use registry::WorkerRegistry;
pub use scheduler::Scheduler;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::PregelConfig;
use crate::error::PregelError;
use crate::message::{
    ClientCall, ClientReply, FromServer, WorkerHello, WorkerHelloReply, WorkerReply,
};
use crate::request::{JobStatus, Request};
use crate::storage::GraphStore;
use crate::transport::{read_frame, spawn_connection, write_frame};

/// Bound listeners plus the state they share with the scheduler
pub struct Server {
    config: PregelConfig,
    registry: Arc<WorkerRegistry>,
    clients: Arc<ClientManager>,
    scheduler: Scheduler,
    client_listener: TcpListener,
    worker_listener: TcpListener,
}

impl Server {
    pub async fn bind(
        client_addr: &str,
        worker_addr: &str,
        config: PregelConfig,
        store: Arc<dyn GraphStore>,
    ) -> Result<Self, PregelError> {
        let client_listener = TcpListener::bind(client_addr)
            .await
            .map_err(|e| {
                PregelError::transport_error(format!("unable to bind {}: {}", client_addr, e))
            })?;
        let worker_listener = TcpListener::bind(worker_addr)
            .await
            .map_err(|e| {
                PregelError::transport_error(format!("unable to bind {}: {}", worker_addr, e))
            })?;

        let registry = Arc::new(WorkerRegistry::new());
        let clients = Arc::new(ClientManager::new());
        let scheduler = Scheduler::new(config.clone(), store, registry.clone(), clients.clone());
        Ok(Self {
            config,
            registry,
            clients,
            scheduler,
            client_listener,
            worker_listener,
        })
    }

    pub fn client_addr(&self) -> Result<SocketAddr, PregelError> {
        Ok(self.client_listener.local_addr()?)
    }

    pub fn worker_addr(&self) -> Result<SocketAddr, PregelError> {
        Ok(self.worker_listener.local_addr()?)
    }

    /// Serve until a listener fails
    pub async fn run(self) -> Result<(), PregelError> {
        info!(
            clients = %self.client_addr()?,
            workers = %self.worker_addr()?,
            "Server listening"
        );

        let Server {
            config,
            registry,
            clients,
            scheduler,
            client_listener,
            worker_listener,
        } = self;

        tokio::select! {
            result = accept_workers(worker_listener, registry, config.channel_capacity) => result,
            result = accept_clients(client_listener, clients) => result,
            _ = scheduler.run() => Ok(()),
        }
    }
}

async fn accept_workers(
    listener: TcpListener,
    registry: Arc<WorkerRegistry>,
    capacity: usize,
) -> Result<(), PregelError> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let registry = registry.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_worker(stream, peer, registry, capacity).await {
                warn!(peer = %peer, error = %e, "Worker connection failed");
            }
        });
    }
}

async fn handle_worker(
    mut stream: TcpStream,
    peer: SocketAddr,
    registry: Arc<WorkerRegistry>,
    capacity: usize,
) -> Result<(), PregelError> {
    stream.set_nodelay(true)?;
    let hello: WorkerHello = read_frame(&mut stream)
        .await?
        .ok_or_else(|| PregelError::transport_error("worker closed during handshake"))?;
    let worker = hello.worker_id;

    let accepted = registry.admits(&worker).await;
    let reply = WorkerHelloReply {
        worker_id: worker.clone(),
        accepted,
    };
    write_frame(&mut stream, &reply).await?;
    if !accepted {
        return Err(PregelError::Rejected(format!("worker id {} is busy", worker)));
    }

    let (inbound_tx, mut inbound) = mpsc::channel::<WorkerReply>(capacity);
    let (outbound, tasks) = spawn_connection::<_, WorkerReply, FromServer>(
        stream,
        peer.to_string(),
        inbound_tx,
        capacity,
    );

    let address = if hello.address.is_empty() {
        peer.to_string()
    } else {
        hello.address
    };
    let Some(generation) = registry.register(worker.clone(), address, outbound).await else {
        tasks.abort();
        return Err(PregelError::Rejected(format!("worker id {} became busy", worker)));
    };

    while let Some(message) = inbound.recv().await {
        registry.route(&worker, message).await;
    }

    registry.disconnected(&worker, generation).await;
    tasks.abort();
    Ok(())
}

async fn accept_clients(
    listener: TcpListener,
    clients: Arc<ClientManager>,
) -> Result<(), PregelError> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let clients = clients.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_client(stream, clients).await {
                warn!(peer = %peer, error = %e, "Client connection failed");
            }
        });
    }
}

/// Answer calls in order; a `Request` holds the connection until it finishes
async fn handle_client(
    mut stream: TcpStream,
    clients: Arc<ClientManager>,
) -> Result<(), PregelError> {
    stream.set_nodelay(true)?;
    while let Some(call) = read_frame::<_, ClientCall>(&mut stream).await? {
        let reply = match call {
            ClientCall::Connect { client_id } => ClientReply::Connect {
                accepted: true,
                pending_job_ids: clients.connect(client_id).await,
            },
            ClientCall::Request {
                client_id,
                request_id,
                graph_access,
            } => {
                let request = Request::new(client_id, request_id, graph_access);
                match clients.submit(request).await {
                    Ok(waiter) => {
                        let status = waiter
                            .await
                            .map_err(|_| PregelError::channel_closed("request waiter"))?;
                        ClientReply::Request {
                            success: status == JobStatus::Success,
                            status: status.to_string(),
                        }
                    }
                    Err(e) => {
                        debug!(client_id, request_id, error = %e, "Request rejected");
                        ClientReply::Request {
                            success: false,
                            status: format!("REJECTED: {}", e),
                        }
                    }
                }
            }
        };
        write_frame(&mut stream, &reply).await?;
    }
    Ok(())
}
