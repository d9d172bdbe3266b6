//! TCP transport between server, workers and clients
//!
//! Every connection carries [`frame`]d JSON messages. [`spawn_connection`]
//! turns a stream into a pair of channels so the rest of the system never
//! touches sockets directly.

pub mod frame;

pub use frame::{read_frame, write_frame, MAX_FRAME_LEN};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::PregelError;

/// Background tasks pumping a connection
pub struct ConnectionTasks {
    pub reader: JoinHandle<()>,
    pub writer: JoinHandle<()>,
}

impl ConnectionTasks {
    pub fn abort(&self) {
        self.reader.abort();
        self.writer.abort();
    }
}

/// Split a stream into an inbound and an outbound channel
///
/// The reader task forwards decoded frames to `inbound` until the peer
/// disconnects or sends garbage. The writer task encodes everything received
/// on the returned sender. Either side ending closes its channel.
pub fn spawn_connection<S, In, Out>(
    stream: S,
    peer: String,
    inbound: mpsc::Sender<In>,
    capacity: usize,
) -> (mpsc::Sender<Out>, ConnectionTasks)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
    In: DeserializeOwned + Send + 'static,
    Out: Serialize + Send + Sync + 'static,
{
    let (mut read_half, mut write_half) = tokio::io::split(stream);
    let (out_tx, mut out_rx) = mpsc::channel::<Out>(capacity.max(1));

    let reader_peer = peer.clone();
    let reader = tokio::spawn(async move {
        loop {
            match read_frame::<_, In>(&mut read_half).await {
                Ok(Some(message)) => {
                    if inbound.send(message).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    debug!(peer = %reader_peer, "Connection closed by peer");
                    break;
                }
                Err(e) => {
                    warn!(peer = %reader_peer, error = %e, "Dropping connection");
                    break;
                }
            }
        }
    });

    let writer = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            if let Err(e) = write_frame(&mut write_half, &message).await {
                warn!(peer = %peer, error = %e, "Write failed");
                break;
            }
        }
    });

    (out_tx, ConnectionTasks { reader, writer })
}

/// Connect with a readable error
pub async fn connect(addr: &str) -> Result<TcpStream, PregelError> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|e| {
            PregelError::transport_error(format!("unable to connect to {}: {}", addr, e))
        })?;
    stream.set_nodelay(true)?;
    Ok(stream)
}
