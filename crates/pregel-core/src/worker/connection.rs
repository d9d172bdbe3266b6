//! Worker side of the server connection

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tracing::info;

use super::processor::ShardProcessor;
use crate::config::PregelConfig;
use crate::error::PregelError;
use crate::message::{FromServer, WorkerHello, WorkerHelloReply, WorkerId, WorkerReply};
use crate::storage::GraphStore;
use crate::transport::{connect, read_frame, spawn_connection, write_frame};
use crate::vertex::VertexProgram;

/// Connect to the server at `server_addr` and serve commands until it hangs up
pub async fn run_worker(
    server_addr: &str,
    worker_id: WorkerId,
    store: Arc<dyn GraphStore>,
    program: Arc<dyn VertexProgram>,
    config: PregelConfig,
) -> Result<(), PregelError> {
    let stream = connect(server_addr).await?;
    let address = stream
        .local_addr()
        .map(|a| a.to_string())
        .unwrap_or_default();
    serve(stream, server_addr.to_string(), worker_id, address, store, program, config).await
}

/// Handshake on `stream`, then run a [`ShardProcessor`] over it
pub async fn serve<S>(
    mut stream: S,
    peer: String,
    worker_id: WorkerId,
    address: String,
    store: Arc<dyn GraphStore>,
    program: Arc<dyn VertexProgram>,
    config: PregelConfig,
) -> Result<(), PregelError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let hello = WorkerHello {
        worker_id: worker_id.clone(),
        address,
    };
    write_frame(&mut stream, &hello).await?;

    let reply: WorkerHelloReply = read_frame(&mut stream)
        .await?
        .ok_or_else(|| PregelError::transport_error("server closed during handshake"))?;
    if !reply.accepted {
        return Err(PregelError::Rejected(format!(
            "worker id {} is in use by a running job",
            worker_id
        )));
    }
    info!(worker = %worker_id, server = %peer, "Registered with server");

    let (inbound_tx, inbound) = mpsc::channel::<FromServer>(config.channel_capacity);
    let (outbound, tasks) = spawn_connection::<_, FromServer, WorkerReply>(
        stream,
        peer,
        inbound_tx,
        config.channel_capacity,
    );

    let processor = ShardProcessor::new(worker_id.clone(), store, program, config, outbound);
    let result = processor.run(inbound).await;

    // Let queued replies drain before the writer goes away
    let _ = tasks.writer.await;
    tasks.reader.abort();
    info!(worker = %worker_id, "Disconnected from server");
    result
}
