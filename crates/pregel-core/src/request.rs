//! Client requests, graph collection access and job outcomes

use serde::{Deserialize, Serialize};

use crate::error::PregelError;

/// Suffix of the collection that backs a job's alternate checkpoint slot
pub const SECONDARY_SUFFIX: &str = "-secondary";

/// The pair of vertex collections a job alternates between
///
/// Checkpoints are always written to [`other_key`](Self::other_key) and then
/// the roles are swapped, so a crash during a save never corrupts the state
/// that the next attempt will resume from. The client reads results from
/// [`primary_key`](Self::primary_key).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphAccess {
    pub primary: String,
    pub secondary: String,
    pub primary_active: bool,
}

impl GraphAccess {
    /// Access for a job whose collections are `<job>` and `<job>-secondary`
    pub fn for_job(job: impl Into<String>) -> Self {
        let primary = job.into();
        let secondary = format!("{}{}", primary, SECONDARY_SUFFIX);
        Self {
            primary,
            secondary,
            primary_active: true,
        }
    }

    /// Collection holding the current state
    pub fn key(&self) -> &str {
        if self.primary_active {
            &self.primary
        } else {
            &self.secondary
        }
    }

    /// Collection the next checkpoint is written to
    pub fn other_key(&self) -> &str {
        if self.primary_active {
            &self.secondary
        } else {
            &self.primary
        }
    }

    /// Collection that holds the final results
    pub fn primary_key(&self) -> &str {
        &self.primary
    }

    pub fn swap_keys(&mut self) {
        self.primary_active = !self.primary_active;
    }
}

/// A client request and its progress
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub client_id: u64,
    pub request_id: i64,
    pub graph_access: GraphAccess,
    /// Next superstep to run
    pub superstep: u64,
    /// Superstep of the last completed checkpoint
    pub checkpoint_step: u64,
}

impl Request {
    pub fn new(client_id: u64, request_id: i64, graph_access: GraphAccess) -> Self {
        Self {
            client_id,
            request_id,
            graph_access,
            superstep: 0,
            checkpoint_step: 0,
        }
    }

    /// Reject requests the server can never run
    pub fn validate(&self) -> Result<(), PregelError> {
        if self.request_id <= 0 {
            return Err(PregelError::invalid_request(format!(
                "request id must be positive, got {}",
                self.request_id
            )));
        }
        if self.graph_access.primary.is_empty() {
            return Err(PregelError::invalid_request("graph collection name is empty"));
        }
        Ok(())
    }

    /// Move the superstep counter back to the last checkpoint
    pub fn rewind(&mut self) {
        self.superstep = self.checkpoint_step;
    }
}

/// Terminal status of one job attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    /// The job halted and its results are in the primary collection
    Success,
    /// The attempt was abandoned; retry from the last checkpoint
    Incomplete,
    /// The job can never succeed
    Failure,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            JobStatus::Success => "SUCCESS",
            JobStatus::Incomplete => "INCOMPLETE",
            JobStatus::Failure => "FAILURE",
        };
        f.write_str(name)
    }
}

/// Outcome of running a request
#[derive(Debug, Clone, PartialEq)]
pub struct JobResult {
    pub status: JobStatus,
    pub request: Request,
}

impl JobResult {
    pub fn success(request: Request) -> Self {
        Self {
            status: JobStatus::Success,
            request,
        }
    }

    /// An incomplete result whose request is rewound to its last checkpoint
    pub fn incomplete(mut request: Request) -> Self {
        request.rewind();
        Self {
            status: JobStatus::Incomplete,
            request,
        }
    }

    pub fn failure(request: Request) -> Self {
        Self {
            status: JobStatus::Failure,
            request,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Success
    }
}
