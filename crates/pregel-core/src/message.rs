//! Message types exchanged between the coordinator, workers and clients
//!
//! Vertices talk to each other with [`VertexMessage`]s. Workers and the
//! coordinator exchange [`FromServer`] commands and [`FromWorker`] replies;
//! clients use [`ClientCall`] / [`ClientReply`]. Every wire message is a
//! serde-tagged JSON object carried in a length-prefixed frame
//! (see [`crate::transport`]).

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::partition::Partition;
use crate::request::GraphAccess;

/// Identifier of a vertex in the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VertexId(pub u64);

impl VertexId {
    /// Get the raw id
    pub fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for VertexId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for VertexId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a worker process
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(pub String);

impl WorkerId {
    /// Create a new WorkerId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for WorkerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for WorkerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&WorkerId> for WorkerId {
    fn from(id: &WorkerId) -> Self {
        id.clone()
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A value sent from one vertex to another
///
/// Messages emitted in superstep `n` are consumed in superstep `n + 1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VertexMessage {
    pub from: VertexId,
    pub to: VertexId,
    pub value: f64,
    pub superstep: u64,
}

impl VertexMessage {
    /// Create a new vertex message
    pub fn new(from: VertexId, to: VertexId, value: f64, superstep: u64) -> Self {
        Self {
            from,
            to,
            value,
            superstep,
        }
    }
}

/// Commands sent by the coordinator to a worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FromServer {
    /// Load the given partitions from `storage_key`
    ///
    /// Starts `attempt` on the worker: every later reply is stamped with it.
    Assign {
        attempt: u64,
        storage_key: String,
        partitions: Vec<Partition>,
    },

    /// Run one superstep
    Superstep { step: u64 },

    /// Persist the shard (vertex state plus undelivered messages) to `storage_key`
    SaveCheckpoint { storage_key: String },

    /// A message forwarded to a vertex owned by this worker
    V2V { message: VertexMessage },
}

impl FromServer {
    /// Short name used in logs and protocol errors
    pub fn kind(&self) -> &'static str {
        match self {
            FromServer::Assign { .. } => "Assign",
            FromServer::Superstep { .. } => "Superstep",
            FromServer::SaveCheckpoint { .. } => "SaveCheckpoint",
            FromServer::V2V { .. } => "V2V",
        }
    }
}

/// Replies and messages sent by a worker to the coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FromWorker {
    /// Result of an `Assign`
    PartitionAck { ok: bool },

    /// The worker finished `step` with work remaining
    Done {
        step: u64,
        #[serde(with = "humantime_serde")]
        elapsed: Duration,
    },

    /// The worker finished `step` with no active vertex and no message sent
    Inactive { step: u64 },

    /// Result of a `SaveCheckpoint`
    SaveCheckpointAck { ok: bool },

    /// A message for a vertex owned by another worker
    V2V { message: VertexMessage },
}

impl FromWorker {
    /// Short name used in logs and protocol errors
    pub fn kind(&self) -> &'static str {
        match self {
            FromWorker::PartitionAck { .. } => "PartitionAck",
            FromWorker::Done { .. } => "Done",
            FromWorker::Inactive { .. } => "Inactive",
            FromWorker::SaveCheckpointAck { .. } => "SaveCheckpointAck",
            FromWorker::V2V { .. } => "V2V",
        }
    }
}

/// A [`FromWorker`] message stamped with the job attempt that produced it
///
/// Replies left over from an abandoned attempt keep their old stamp, so the
/// coordinator can tell them apart from replies to its own commands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerReply {
    pub attempt: u64,
    pub message: FromWorker,
}

impl WorkerReply {
    pub fn new(attempt: u64, message: FromWorker) -> Self {
        Self { attempt, message }
    }
}

/// A protocol message tagged with the worker it came from or goes to
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope<M> {
    pub worker: WorkerId,
    pub message: M,
}

impl<M> Envelope<M> {
    pub fn new(worker: impl Into<WorkerId>, message: M) -> Self {
        Self {
            worker: worker.into(),
            message,
        }
    }
}

/// First frame a worker sends after connecting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerHello {
    pub worker_id: WorkerId,
    pub address: String,
}

/// Server answer to a [`WorkerHello`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerHelloReply {
    pub worker_id: WorkerId,
    pub accepted: bool,
}

/// Calls a client can make on the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientCall {
    /// Register and learn which of this client's jobs are still outstanding
    Connect { client_id: u64 },

    /// Submit a graph for processing and wait for the outcome
    Request {
        client_id: u64,
        request_id: i64,
        graph_access: GraphAccess,
    },
}

/// Server answers to [`ClientCall`]s
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientReply {
    Connect {
        accepted: bool,
        pending_job_ids: Vec<i64>,
    },
    Request {
        success: bool,
        status: String,
    },
}
