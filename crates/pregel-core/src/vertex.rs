//! Vertex abstractions for the Pregel runtime
//!
//! A [`Vertex`] is the stored record for one graph node. A [`VertexProgram`]
//! is the user computation run on every active vertex in each superstep.
//! Vertices communicate via messages and execute in synchronized supersteps.

use serde::{Deserialize, Serialize};

use crate::message::{VertexId, VertexMessage};

/// Stored state of one vertex
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vertex {
    pub id: VertexId,
    pub value: f64,
    pub out_edges: Vec<VertexId>,
    /// Messages delivered for the next superstep (persisted with checkpoints)
    #[serde(default)]
    pub messages: Vec<VertexMessage>,
    pub active: bool,
    /// Last superstep this vertex computed in
    #[serde(default)]
    pub superstep: u64,
}

impl Vertex {
    /// Create an active vertex with no pending messages
    pub fn new(id: VertexId, value: f64, out_edges: Vec<VertexId>) -> Self {
        Self {
            id,
            value,
            out_edges,
            messages: Vec::new(),
            active: true,
            superstep: 0,
        }
    }

    /// Check if the vertex voted to halt
    pub fn is_halted(&self) -> bool {
        !self.active
    }
}

/// Vertex execution state (Pregel's "vote to halt" mechanism)
///
/// - `Active`: Vertex will compute in the next superstep
/// - `Halted`: Vertex has voted to halt (will reactivate on message receipt)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VertexState {
    #[default]
    Active,
    Halted,
}

impl VertexState {
    pub fn is_active(&self) -> bool {
        matches!(self, VertexState::Active)
    }

    pub fn is_halted(&self) -> bool {
        matches!(self, VertexState::Halted)
    }
}

/// Context provided to a vertex program during computation
///
/// Provides access to:
/// - The vertex's current value and out edges
/// - Incoming messages from the previous superstep
/// - The outbox for messages delivered in the next superstep
pub struct ComputeContext<'a> {
    /// Messages received from other vertices
    pub messages: &'a [VertexMessage],
    /// Current superstep number (0-indexed)
    pub superstep: u64,
    /// Total number of vertices in the graph
    pub num_vertices: u64,
    vertex_id: VertexId,
    value: f64,
    out_edges: &'a [VertexId],
    outbox: Vec<VertexMessage>,
}

impl<'a> ComputeContext<'a> {
    pub fn new(
        vertex: &'a Vertex,
        messages: &'a [VertexMessage],
        superstep: u64,
        num_vertices: u64,
    ) -> Self {
        Self {
            messages,
            superstep,
            num_vertices,
            vertex_id: vertex.id,
            value: vertex.value,
            out_edges: &vertex.out_edges,
            outbox: Vec::new(),
        }
    }

    /// Get the current vertex ID
    pub fn id(&self) -> VertexId {
        self.vertex_id
    }

    /// Value before this superstep's update
    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn out_edges(&self) -> &[VertexId] {
        self.out_edges
    }

    /// Send a message to another vertex
    ///
    /// Messages will be delivered at the start of the next superstep.
    pub fn send_message(&mut self, target: VertexId, value: f64) {
        self.outbox
            .push(VertexMessage::new(self.vertex_id, target, value, self.superstep));
    }

    /// Send the same value along every out edge
    pub fn send_to_neighbors(&mut self, value: f64) {
        let edges = self.out_edges;
        for &target in edges {
            self.send_message(target, value);
        }
    }

    pub fn is_first_superstep(&self) -> bool {
        self.superstep == 0
    }

    pub fn has_messages(&self) -> bool {
        !self.messages.is_empty()
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// Iterate over the values of the incoming messages
    pub fn message_values(&self) -> impl Iterator<Item = f64> + '_ {
        self.messages.iter().map(|m| m.value)
    }

    /// Consume the context and return the outbox
    pub fn into_outbox(self) -> Vec<VertexMessage> {
        self.outbox
    }
}

/// Result of a vertex computation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComputeResult {
    /// New vertex value
    pub value: f64,
    /// New vertex state
    pub state: VertexState,
}

impl ComputeResult {
    /// Create a result that keeps the vertex active
    pub fn active(value: f64) -> Self {
        Self {
            value,
            state: VertexState::Active,
        }
    }

    /// Create a result that halts the vertex
    pub fn halt(value: f64) -> Self {
        Self {
            value,
            state: VertexState::Halted,
        }
    }
}

/// The user computation run on each vertex
///
/// Compute runs on blocking worker threads, one sub-engine per thread, so
/// implementations must be cheap to share and must not block on async work.
///
/// # Example
///
/// ```ignore
/// struct Echo;
///
/// impl VertexProgram for Echo {
///     fn name(&self) -> &str {
///         "echo"
///     }
///
///     fn compute(&self, ctx: &mut ComputeContext<'_>) -> ComputeResult {
///         let sum: f64 = ctx.message_values().sum();
///         ctx.send_to_neighbors(sum);
///         ComputeResult::halt(sum)
///     }
/// }
/// ```
pub trait VertexProgram: Send + Sync + 'static {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Execute one superstep for one vertex
    fn compute(&self, ctx: &mut ComputeContext<'_>) -> ComputeResult;

    /// Called when a halted vertex receives messages
    ///
    /// By default, returns `Active` to reactivate the vertex.
    fn on_reactivation(&self, _messages: &[VertexMessage]) -> VertexState {
        VertexState::Active
    }
}
