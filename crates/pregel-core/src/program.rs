//! Built-in vertex programs

use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::PregelError;
use crate::vertex::{ComputeContext, ComputeResult, VertexProgram};

const TELEPORT_WEIGHT: f64 = 0.15;
const EDGE_WEIGHT: f64 = 0.85;

/// PageRank with a 0.85 damping factor
///
/// Every superstep the vertex value becomes `0.15 / N + 0.85 * sum(messages)`
/// and the new value is split evenly across the out edges. Vertices never
/// vote to halt, so the job runs until `max_supersteps`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PageRank;

impl VertexProgram for PageRank {
    fn name(&self) -> &str {
        "pagerank"
    }

    fn compute(&self, ctx: &mut ComputeContext<'_>) -> ComputeResult {
        let sum: f64 = ctx.message_values().sum();
        let n = ctx.num_vertices.max(1) as f64;
        let value = TELEPORT_WEIGHT / n + EDGE_WEIGHT * sum;

        let degree = ctx.out_edges().len();
        if degree > 0 {
            ctx.send_to_neighbors(value / degree as f64);
        }

        ComputeResult::active(value)
    }
}

/// Propagates the largest value through the graph
///
/// A vertex sends its value on the first superstep and again whenever it
/// learns a larger one, and votes to halt after every step. The job ends
/// once no vertex improves.
#[derive(Debug, Clone, Copy, Default)]
pub struct MaxValue;

impl VertexProgram for MaxValue {
    fn name(&self) -> &str {
        "max-value"
    }

    fn compute(&self, ctx: &mut ComputeContext<'_>) -> ComputeResult {
        let current = ctx.value();
        if ctx.is_first_superstep() {
            ctx.send_to_neighbors(current);
            return ComputeResult::halt(current);
        }

        let best = ctx.message_values().fold(current, f64::max);
        if best > current {
            ctx.send_to_neighbors(best);
        }
        ComputeResult::halt(best)
    }
}

/// Selects a built-in program by name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProgramKind {
    #[default]
    PageRank,
    MaxValue,
}

impl ProgramKind {
    /// Instantiate the program
    pub fn build(self) -> Arc<dyn VertexProgram> {
        match self {
            ProgramKind::PageRank => Arc::new(PageRank),
            ProgramKind::MaxValue => Arc::new(MaxValue),
        }
    }
}

impl FromStr for ProgramKind {
    type Err = PregelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pagerank" | "page-rank" => Ok(ProgramKind::PageRank),
            "max-value" | "maxvalue" | "max" => Ok(ProgramKind::MaxValue),
            other => Err(PregelError::config_error(format!(
                "unknown vertex program: {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for ProgramKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProgramKind::PageRank => f.write_str("pagerank"),
            ProgramKind::MaxValue => f.write_str("max-value"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{VertexId, VertexMessage};
    use crate::vertex::{Vertex, VertexState};

    fn msg(value: f64) -> VertexMessage {
        VertexMessage::new(VertexId(0), VertexId(1), value, 0)
    }

    #[test]
    fn test_pagerank_update() {
        let v = Vertex::new(VertexId(1), 0.25, vec![VertexId(2), VertexId(3)]);
        let incoming = vec![msg(0.1), msg(0.3)];
        let mut ctx = ComputeContext::new(&v, &incoming, 1, 4);

        let result = PageRank.compute(&mut ctx);
        let expected = 0.15 / 4.0 + 0.85 * 0.4;
        assert!((result.value - expected).abs() < 1e-12);
        assert_eq!(result.state, VertexState::Active);

        let outbox = ctx.into_outbox();
        assert_eq!(outbox.len(), 2);
        assert!((outbox[0].value - expected / 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_pagerank_sink_sends_nothing() {
        let v = Vertex::new(VertexId(1), 0.25, vec![]);
        let mut ctx = ComputeContext::new(&v, &[], 0, 2);
        let result = PageRank.compute(&mut ctx);
        assert!((result.value - 0.075).abs() < 1e-12);
        assert!(ctx.into_outbox().is_empty());
    }

    #[test]
    fn test_max_value_first_step_broadcasts() {
        let v = Vertex::new(VertexId(1), 5.0, vec![VertexId(2)]);
        let mut ctx = ComputeContext::new(&v, &[], 0, 3);
        let result = MaxValue.compute(&mut ctx);
        assert_eq!(result, ComputeResult::halt(5.0));
        assert_eq!(ctx.into_outbox().len(), 1);
    }

    #[test]
    fn test_max_value_improves() {
        let v = Vertex::new(VertexId(1), 5.0, vec![VertexId(2)]);
        let incoming = vec![msg(3.0), msg(9.0)];
        let mut ctx = ComputeContext::new(&v, &incoming, 2, 3);
        let result = MaxValue.compute(&mut ctx);
        assert_eq!(result, ComputeResult::halt(9.0));
        assert_eq!(ctx.into_outbox()[0].value, 9.0);
    }

    #[test]
    fn test_max_value_no_improvement_stays_quiet() {
        let v = Vertex::new(VertexId(1), 5.0, vec![VertexId(2)]);
        let incoming = vec![msg(2.0)];
        let mut ctx = ComputeContext::new(&v, &incoming, 2, 3);
        MaxValue.compute(&mut ctx);
        assert!(ctx.into_outbox().is_empty());
    }

    #[test]
    fn test_program_kind_from_str() {
        assert_eq!("pagerank".parse::<ProgramKind>().unwrap(), ProgramKind::PageRank);
        assert_eq!("Max-Value".parse::<ProgramKind>().unwrap(), ProgramKind::MaxValue);
        assert!("bfs".parse::<ProgramKind>().is_err());
        assert_eq!(ProgramKind::MaxValue.build().name(), "max-value");
    }
}
