//! Error types for the Pregel runtime
//!
//! One error enum covers the coordinator, the workers, storage and the wire.
//! [`PregelError::is_recoverable`] splits it into the two classes the job
//! supervisor cares about:
//!
//! - **transient**: the attempt is abandoned, the request is rewound to its
//!   last checkpoint and requeued (`Incomplete`)
//! - **permanent**: the request fails for good (`Failure`)

use std::time::Duration;

use thiserror::Error;

use crate::message::WorkerId;

/// Errors that can occur while running a Pregel job
#[derive(Debug, Error)]
pub enum PregelError {
    /// No workers were available for the job
    #[error("No workers available")]
    NoWorkers,

    /// The vertex count of the job's collection could not be read
    #[error("Vertex count unavailable for collection {collection}: {message}")]
    VertexCountUnavailable { collection: String, message: String },

    /// A client request failed validation
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A wait for worker acknowledgements exceeded its timeout
    #[error("Timed out after {timeout:?} waiting for {stage} acks in superstep {superstep}")]
    AckTimeout {
        stage: &'static str,
        superstep: u64,
        timeout: Duration,
    },

    /// A worker reported that it could not load or save its vertices
    #[error("Worker {worker} failed: {reason}")]
    WorkerFailure { worker: WorkerId, reason: String },

    /// A message arrived that the current stage does not accept
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// A channel between tasks closed unexpectedly
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    /// Vertex storage failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// The named collection does not exist
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    /// A line of an edge list could not be parsed
    #[error("Invalid edge list at line {line}: {content:?}")]
    InvalidEdgeList { line: usize, content: String },

    /// Connection-level failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Encoded message does not fit the 2-byte length prefix
    #[error("Frame of {0} bytes exceeds the 65535 byte limit")]
    FrameTooLarge(usize),

    /// Message (de)serialization failure
    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid runtime configuration
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The server refused a connection or request
    #[error("Rejected: {0}")]
    Rejected(String),

    /// A partition list that does not tile the vertex space
    #[error("Invalid assignment: {0}")]
    InvalidAssignment(String),

    /// A command that needs a loaded shard arrived before any `Assign`
    #[error("No vertices loaded on this worker")]
    NotLoaded,
}

impl PregelError {
    /// Create an ack timeout error
    pub fn ack_timeout(stage: &'static str, superstep: u64, timeout: Duration) -> Self {
        Self::AckTimeout {
            stage,
            superstep,
            timeout,
        }
    }

    /// Create a worker failure error
    pub fn worker_failure(worker: impl Into<WorkerId>, reason: impl Into<String>) -> Self {
        Self::WorkerFailure {
            worker: worker.into(),
            reason: reason.into(),
        }
    }

    /// Create a protocol violation error
    pub fn protocol_violation(message: impl Into<String>) -> Self {
        Self::ProtocolViolation(message.into())
    }

    /// Create a closed channel error
    pub fn channel_closed(what: impl Into<String>) -> Self {
        Self::ChannelClosed(what.into())
    }

    /// Create a storage error
    pub fn storage_error(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Create a transport error
    pub fn transport_error(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Create a config error
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::ConfigError(message.into())
    }

    /// Create an invalid assignment error
    pub fn invalid_assignment(message: impl Into<String>) -> Self {
        Self::InvalidAssignment(message.into())
    }

    /// Create an invalid request error
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Check if the error is recoverable
    ///
    /// Recoverable errors abort the current job attempt only; the request is
    /// rewound to its last checkpoint and retried.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PregelError::AckTimeout { .. }
                | PregelError::WorkerFailure { .. }
                | PregelError::ProtocolViolation(_)
                | PregelError::ChannelClosed(_)
                | PregelError::Transport(_)
                | PregelError::Io(_)
        )
    }

    /// Check if the error is a timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, PregelError::AckTimeout { .. })
    }
}
