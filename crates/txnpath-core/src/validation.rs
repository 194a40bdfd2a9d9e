//! # Graph Validation
//!
//! Offline consistency audit of a [`MarkovGraph`].
//!
//! Walks every vertex and edge under exclusive access and reports the first
//! broken structural invariant as an [`InvalidGraph`]. The walk is linear in
//! the size of the graph but blocks all learning while it runs; it belongs in
//! tooling and tests, never on the transaction path.
//!
//! The probability checks hold only after a recompute: edge probabilities
//! are derived at recompute time and are stale in between.

use crate::edge::Edge;
use crate::graph::MarkovGraph;
use crate::vertex::Vertex;
use crate::{EdgeId, ElementId, PartitionSet, VertexId, VertexKind};
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

/// The first invariant violation found by [`MarkovGraph::validate`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvalidGraph {
    /// Two elements share an element id.
    #[error("duplicate element id {0:?}")]
    DuplicateElementId(ElementId),

    /// More than one edge connects the same ordered pair.
    #[error("more than one edge from {from:?} to {to:?}")]
    ParallelEdge { from: VertexId, to: VertexId },

    /// An edge references a vertex that does not exist.
    #[error("edge {0:?} references a missing vertex")]
    DanglingEdge(EdgeId),

    /// An edge was traversed more often than its source was reached.
    #[error("edge {edge:?} has {edge_hits} hits but its source has {source_hits}")]
    EdgeExceedsSource {
        edge: EdgeId,
        edge_hits: u64,
        source_hits: u64,
    },

    /// A query vertex's hits differ from the sum over its outbound edges.
    #[error("vertex {vertex:?} has {vertex_hits} hits but its edges sum to {edge_hits}")]
    HitsNotConserved {
        vertex: VertexId,
        vertex_hits: u64,
        edge_hits: u64,
    },

    /// A query vertex's outbound probabilities do not sum to one.
    #[error("outbound probability of {vertex:?} sums to {total}")]
    ProbabilityNotConserved { vertex: VertexId, total: f64 },

    /// A vertex with traffic is only reachable through zero-probability edges.
    #[error("inbound probability of {0:?} is zero")]
    InboundProbabilityZero(VertexId),

    /// An edge's destination does not carry the partitions touched so far.
    #[error("edge {edge:?} expects past partitions {expected:?}, destination has {found:?}")]
    PastPartitionLineage {
        edge: EdgeId,
        expected: PartitionSet,
        found: PartitionSet,
    },

    /// Consecutive invocations of one statement skip or repeat an index.
    #[error("edge {edge:?} goes from invocation {source_index} to {dest_index}")]
    InstanceSuccession {
        edge: EdgeId,
        source_index: u32,
        dest_index: u32,
    },
}

// =============================================================================
// PER-VERTEX TOTALS
// =============================================================================

/// Sums over the edges leaving and entering each vertex, by arena slot.
struct EdgeTotals {
    outbound_hits: Vec<u64>,
    outbound_probability: Vec<f64>,
    out_degree: Vec<usize>,
    inbound_hits: Vec<u64>,
    inbound_probability: Vec<f64>,
}

impl EdgeTotals {
    fn new(vertex_count: usize) -> Self {
        Self {
            outbound_hits: vec![0; vertex_count],
            outbound_probability: vec![0.0; vertex_count],
            out_degree: vec![0; vertex_count],
            inbound_hits: vec![0; vertex_count],
            inbound_probability: vec![0.0; vertex_count],
        }
    }

    fn from_edges(vertex_count: usize, edges: &[Arc<Edge>]) -> Self {
        let mut totals = Self::new(vertex_count);
        for edge in edges {
            totals.add(edge);
        }
        totals
    }

    /// Edges pointing outside the arena are skipped; the structural walk
    /// reports them.
    fn add(&mut self, edge: &Edge) {
        let s = edge.source().index();
        let d = edge.dest().index();
        if s >= self.out_degree.len() || d >= self.out_degree.len() {
            return;
        }
        self.outbound_hits[s] = self.outbound_hits[s].saturating_add(edge.total_hits());
        self.outbound_probability[s] += edge.probability();
        self.out_degree[s] = self.out_degree[s].saturating_add(1);
        self.inbound_hits[d] = self.inbound_hits[d].saturating_add(edge.total_hits());
        self.inbound_probability[d] += edge.probability();
    }

    /// Hit and probability conservation over a query vertex's outbound edges.
    fn outbound_violation(&self, vertex: &Vertex, epsilon: f64) -> Option<InvalidGraph> {
        let slot = vertex.id().index();
        if !vertex.is_query() || slot >= self.out_degree.len() {
            return None;
        }
        if vertex.total_hits() != self.outbound_hits[slot] {
            return Some(InvalidGraph::HitsNotConserved {
                vertex: vertex.id(),
                vertex_hits: vertex.total_hits(),
                edge_hits: self.outbound_hits[slot],
            });
        }
        if self.out_degree[slot] > 0 && (self.outbound_probability[slot] - 1.0).abs() > epsilon {
            return Some(InvalidGraph::ProbabilityNotConserved {
                vertex: vertex.id(),
                total: self.outbound_probability[slot],
            });
        }
        None
    }

    fn inbound_violation(&self, vertex: &Vertex, epsilon: f64) -> Option<InvalidGraph> {
        let slot = vertex.id().index();
        let hits = self.inbound_hits.get(slot).copied().unwrap_or_default();
        let probability = self.inbound_probability.get(slot).copied().unwrap_or_default();
        (hits > 0 && probability <= epsilon).then(|| InvalidGraph::InboundProbabilityZero(vertex.id()))
    }
}

// =============================================================================
// AUDIT
// =============================================================================

impl MarkovGraph {
    /// Audit the graph, returning the first violation found.
    pub fn validate(&self) -> Result<(), InvalidGraph> {
        warn!(
            procedure = %self.procedure().name,
            "validating markov graph; not intended for the transaction path"
        );
        let _epoch = self.exclusive();
        let vertices = self.vertices();
        let edges = self.edges();
        let epsilon = self.config().probability_epsilon;

        // Element ids are shared between vertices and edges
        let mut seen_ids = BTreeSet::new();
        let element_ids = vertices
            .iter()
            .map(|v| v.element_id())
            .chain(edges.iter().map(|e| e.element_id()));
        for element_id in element_ids {
            if !seen_ids.insert(element_id) {
                return Err(InvalidGraph::DuplicateElementId(element_id));
            }
        }

        let mut seen_pairs = BTreeSet::new();
        let mut totals = EdgeTotals::new(vertices.len());

        for edge in &edges {
            let pair = (edge.source(), edge.dest());
            if !seen_pairs.insert(pair) {
                return Err(InvalidGraph::ParallelEdge {
                    from: pair.0,
                    to: pair.1,
                });
            }
            let (Some(source), Some(dest)) = (
                vertices.get(edge.source().index()),
                vertices.get(edge.dest().index()),
            ) else {
                return Err(InvalidGraph::DanglingEdge(edge.id()));
            };

            if edge.total_hits() > source.total_hits() {
                return Err(InvalidGraph::EdgeExceedsSource {
                    edge: edge.id(),
                    edge_hits: edge.total_hits(),
                    source_hits: source.total_hits(),
                });
            }

            if self.config().use_past_partitions && dest.is_query() {
                let expected = match source.kind() {
                    VertexKind::Query => Some(source.touched_partitions()),
                    VertexKind::Start => Some(PartitionSet::new()),
                    VertexKind::Commit | VertexKind::Abort => None,
                };
                if let Some(expected) = expected
                    && &expected != dest.past_partitions()
                {
                    return Err(InvalidGraph::PastPartitionLineage {
                        edge: edge.id(),
                        expected,
                        found: dest.past_partitions().clone(),
                    });
                }
            }

            if source.is_query()
                && dest.is_query()
                && source.statement() == dest.statement()
                && source.instance_index().checked_add(1) != Some(dest.instance_index())
            {
                return Err(InvalidGraph::InstanceSuccession {
                    edge: edge.id(),
                    source_index: source.instance_index(),
                    dest_index: dest.instance_index(),
                });
            }

            totals.add(edge);
        }

        if let Some(violation) = vertices
            .iter()
            .find_map(|v| totals.outbound_violation(v, epsilon))
        {
            return Err(violation);
        }
        if let Some(violation) = vertices
            .iter()
            .find_map(|v| totals.inbound_violation(v, epsilon))
        {
            return Err(violation);
        }

        Ok(())
    }

    /// [`validate`](Self::validate) without the reason.
    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Every vertex that fails its own conservation checks, in id order.
    ///
    /// Unlike [`validate`](Self::validate) this does not stop at the first
    /// problem and ignores graph-wide structure (ids, parallel edges,
    /// lineage).
    pub fn invalid_vertices(&self) -> Vec<VertexId> {
        let _epoch = self.exclusive();
        let vertices = self.vertices();
        let totals = EdgeTotals::from_edges(vertices.len(), &self.edges());
        let epsilon = self.config().probability_epsilon;

        vertices
            .iter()
            .filter(|v| {
                totals.outbound_violation(v, epsilon).is_some()
                    || totals.inbound_violation(v, epsilon).is_some()
            })
            .map(|v| v.id())
            .collect()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Procedure, Statement};
    use crate::config::ModelConfig;
    use crate::trace::{QueryTrace, RecordedPartitions, TransactionTrace};
    use crate::{PartitionId, ProcedureId, StatementId, TxnId};

    fn graph() -> MarkovGraph {
        MarkovGraph::initialized(
            Procedure::new(
                ProcedureId(1),
                "payment",
                vec![
                    Statement::new(StatementId(1), "getCustomer"),
                    Statement::new(StatementId(2), "updateBalance"),
                ],
            ),
            ModelConfig::default(),
        )
    }

    fn learn(g: &MarkovGraph, id: u64, statements: &[(u32, u32)], aborted: bool) {
        let mut trace = TransactionTrace::new(TxnId(id), ProcedureId(1), 0)
            .with_base_partition(PartitionId(0));
        for (i, (statement, partition)) in statements.iter().enumerate() {
            let at = 10 * (i as u64 + 1);
            trace = trace.with_query(
                QueryTrace::new(StatementId(*statement), at, at + 5)
                    .with_partitions([PartitionId(*partition)]),
            );
        }
        if aborted {
            trace = trace.aborted();
        }
        g.process_transaction(&trace, &RecordedPartitions)
            .expect("learn");
    }

    #[test]
    fn learned_and_recomputed_graph_is_valid() {
        let g = graph();
        learn(&g, 1, &[(1, 0), (2, 0)], false);
        learn(&g, 2, &[(1, 0), (2, 1)], false);
        learn(&g, 3, &[(1, 0), (1, 1)], true);
        g.calculate_probabilities().expect("recompute");

        assert_eq!(g.validate(), Ok(()));
        assert!(g.is_valid());
    }

    #[test]
    fn stale_probabilities_fail_conservation() {
        let g = graph();
        learn(&g, 1, &[(1, 0)], false);
        // No recompute yet: outbound probabilities are still zero
        assert!(matches!(
            g.validate(),
            Err(InvalidGraph::ProbabilityNotConserved { .. })
        ));
    }

    #[test]
    fn empty_graph_is_valid() {
        assert!(graph().is_valid());
    }

    #[test]
    fn self_loop_breaks_past_partition_lineage() {
        let g = graph();
        learn(&g, 1, &[(1, 0)], false);
        learn(&g, 2, &[(1, 0), (1, 0)], false);
        let first = g
            .find_vertex(
                StatementId(1),
                &PartitionSet::from([PartitionId(0)]),
                &PartitionSet::new(),
                0,
            )
            .expect("first invocation");
        // An edge back into the same invocation
        let loop_edge = g.add_to_edge(first, first).expect("edge");

        assert!(matches!(
            g.validate(),
            Err(InvalidGraph::PastPartitionLineage { edge, .. }) if edge == loop_edge
        ));
    }

    #[test]
    fn hand_built_edge_breaks_succession_without_past_partitions() {
        let g = MarkovGraph::initialized(
            Procedure::new(
                ProcedureId(1),
                "payment",
                vec![Statement::new(StatementId(1), "getCustomer")],
            ),
            ModelConfig {
                use_past_partitions: false,
                ..ModelConfig::default()
            },
        );
        learn(&g, 1, &[(1, 0)], false);
        let first = g
            .find_vertex(
                StatementId(1),
                &PartitionSet::from([PartitionId(0)]),
                &PartitionSet::new(),
                0,
            )
            .expect("first invocation");
        let loop_edge = g.add_to_edge(first, first).expect("edge");

        assert_eq!(
            g.validate(),
            Err(InvalidGraph::InstanceSuccession {
                edge: loop_edge,
                source_index: 0,
                dest_index: 0,
            })
        );
    }

    #[test]
    fn error_message_names_vertex() {
        let err = InvalidGraph::HitsNotConserved {
            vertex: VertexId(4),
            vertex_hits: 3,
            edge_hits: 2,
        };
        assert!(err.to_string().contains("VertexId(4)"));
    }

    #[test]
    fn query_vertex_with_hits_needs_outbound_edges() {
        let g = graph();
        learn(&g, 1, &[(1, 0)], false);
        g.calculate_probabilities().expect("recompute");
        let orphan = g.get_or_create_vertex(&crate::vertex::VertexKey {
            statement: StatementId(2),
            partitions: PartitionSet::from([PartitionId(3)]),
            past_partitions: PartitionSet::new(),
            instance_index: 0,
        });
        assert_eq!(g.validate(), Ok(()));

        orphan.record_hit();
        assert_eq!(
            g.validate(),
            Err(InvalidGraph::HitsNotConserved {
                vertex: orphan.id(),
                vertex_hits: 1,
                edge_hits: 0,
            })
        );
        assert_eq!(g.invalid_vertices(), vec![orphan.id()]);
    }

    #[test]
    fn invalid_vertices_lists_every_offender() {
        let g = graph();
        learn(&g, 1, &[(1, 0), (2, 0)], false);
        learn(&g, 2, &[(1, 0), (2, 1)], false);

        // Before recompute every edge probability is zero: each query vertex
        // fails conservation and Commit has hits but no inbound probability
        let commit = g.commit_vertex().expect("commit");
        let mut expected = vec![commit];
        expected.extend(g.vertices().iter().filter(|v| v.is_query()).map(|v| v.id()));
        assert_eq!(expected.len(), 4);
        assert_eq!(g.invalid_vertices(), expected);

        g.calculate_probabilities().expect("recompute");
        assert!(g.invalid_vertices().is_empty());
    }

    #[test]
    fn parallel_edge_message_names_both_ends() {
        let err = InvalidGraph::ParallelEdge {
            from: VertexId(1),
            to: VertexId(2),
        };
        assert_eq!(
            err.to_string(),
            "more than one edge from VertexId(1) to VertexId(2)"
        );
    }
}
