//! Client for submitting graphs to a server

use tokio::net::TcpStream;
use tracing::info;

use crate::error::PregelError;
use crate::message::{ClientCall, ClientReply};
use crate::request::GraphAccess;
use crate::transport::{connect, read_frame, write_frame};

/// Final answer to a submitted request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub success: bool,
    /// `SUCCESS`, `FAILURE`, or `REJECTED: <reason>`
    pub status: String,
}

/// One connection to the server's client port
#[derive(Debug)]
pub struct Client {
    stream: TcpStream,
}

impl Client {
    pub async fn connect(addr: &str) -> Result<Self, PregelError> {
        Ok(Self {
            stream: connect(addr).await?,
        })
    }

    /// Register `client_id`; returns the ids of its unfinished requests
    pub async fn hello(&mut self, client_id: u64) -> Result<Vec<i64>, PregelError> {
        match self.call(ClientCall::Connect { client_id }).await? {
            ClientReply::Connect {
                accepted: true,
                pending_job_ids,
            } => Ok(pending_job_ids),
            ClientReply::Connect { accepted: false, .. } => {
                Err(PregelError::Rejected(format!("client {} refused", client_id)))
            }
            other => Err(PregelError::protocol_violation(format!(
                "expected Connect reply, got {:?}",
                other
            ))),
        }
    }

    /// Submit a job and wait until the server reports its outcome
    pub async fn request(
        &mut self,
        client_id: u64,
        request_id: i64,
        graph_access: GraphAccess,
    ) -> Result<Submission, PregelError> {
        info!(client_id, request_id, collection = %graph_access.primary, "Submitting request");
        let call = ClientCall::Request {
            client_id,
            request_id,
            graph_access,
        };
        match self.call(call).await? {
            ClientReply::Request { success, status } => Ok(Submission { success, status }),
            other => Err(PregelError::protocol_violation(format!(
                "expected Request reply, got {:?}",
                other
            ))),
        }
    }

    async fn call(&mut self, call: ClientCall) -> Result<ClientReply, PregelError> {
        write_frame(&mut self.stream, &call).await?;
        read_frame(&mut self.stream)
            .await?
            .ok_or_else(|| PregelError::transport_error("server closed the connection"))
    }
}
