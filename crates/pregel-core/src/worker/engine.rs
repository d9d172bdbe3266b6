//! Sub-engine: the vertices of one shard slice and their compute loop

use std::collections::BTreeMap;

use tokio::sync::mpsc;

use crate::message::{VertexId, VertexMessage};
use crate::vertex::{ComputeContext, VertexProgram, VertexState, Vertex};

/// Counters from one sub-engine superstep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Vertices still active after the step
    pub active: usize,
    /// Vertices that ran compute
    pub computed: usize,
    /// Messages emitted
    pub sent: usize,
}

/// A disjoint slice of a shard, computed on its own blocking thread
#[derive(Debug, Default)]
pub struct SubEngine {
    vertices: BTreeMap<VertexId, Vertex>,
}

impl SubEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, vertex: Vertex) {
        self.vertices.insert(vertex.id, vertex);
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    pub fn vertices(&self) -> impl Iterator<Item = &Vertex> {
        self.vertices.values()
    }

    pub fn get_mut(&mut self, id: &VertexId) -> Option<&mut Vertex> {
        self.vertices.get_mut(id)
    }

    /// Drop every vertex's pending messages
    pub fn clear_messages(&mut self) {
        for v in self.vertices.values_mut() {
            v.messages.clear();
        }
    }

    /// Run one superstep over every vertex
    ///
    /// Halted vertices without messages are skipped. A halted vertex with
    /// messages is woken according to [`VertexProgram::on_reactivation`].
    /// Emitted messages are pushed onto `outgoing` with a blocking send, so
    /// this must run on a blocking thread. If `outgoing` closes the step
    /// stops emitting but still finishes computing.
    pub fn superstep(
        &mut self,
        step: u64,
        num_vertices: u64,
        program: &dyn VertexProgram,
        outgoing: &mpsc::Sender<VertexMessage>,
    ) -> EngineStats {
        let mut stats = EngineStats::default();
        let mut open = true;

        for vertex in self.vertices.values_mut() {
            let messages = std::mem::take(&mut vertex.messages);

            if !vertex.active {
                if messages.is_empty() {
                    continue;
                }
                if program.on_reactivation(&messages) == VertexState::Halted {
                    continue;
                }
            }

            let mut ctx = ComputeContext::new(vertex, &messages, step, num_vertices);
            let result = program.compute(&mut ctx);
            let outbox = ctx.into_outbox();

            vertex.value = result.value;
            vertex.active = result.state.is_active();
            vertex.superstep = step;
            stats.computed += 1;

            for message in outbox {
                if open && outgoing.blocking_send(message).is_err() {
                    open = false;
                }
                if open {
                    stats.sent += 1;
                }
            }
        }

        stats.active = self.vertices.values().filter(|v| v.active).count();
        stats
    }
}
