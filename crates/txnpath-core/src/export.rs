//! # Graph Snapshots
//!
//! A detached, serializable copy of a [`MarkovGraph`] for offline tooling.
//!
//! A snapshot is taken under exclusive access, so its counts and
//! probabilities describe one consistent instant. Vertices are sorted by
//! [`VertexId`] and edges by [`EdgeId`]; two graphs that learned the same
//! traces in the same order produce identical snapshots.
//!
//! `Query` vertices that were never hit carry no information and are left
//! out, together with every edge that touches them.

use crate::graph::MarkovGraph;
use crate::vertex::{Vertex, VertexProbabilities};
use crate::{
    EdgeId, ElementId, PartitionSet, ProcedureId, StatementId, VertexId, VertexKind,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

// =============================================================================
// SNAPSHOT ELEMENTS
// =============================================================================

/// A vertex as captured in a [`GraphSnapshot`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotVertex {
    pub id: VertexId,
    pub element_id: ElementId,
    pub kind: VertexKind,
    pub statement: Option<StatementId>,
    pub instance_index: u32,
    pub partitions: PartitionSet,
    pub past_partitions: PartitionSet,
    pub total_hits: u64,
    pub instance_hits: u64,
    pub average_remaining_time: Option<f64>,
    pub probabilities: VertexProbabilities,
}

impl From<&Vertex> for SnapshotVertex {
    fn from(vertex: &Vertex) -> Self {
        Self {
            id: vertex.id(),
            element_id: vertex.element_id(),
            kind: vertex.kind(),
            statement: vertex.statement(),
            instance_index: vertex.instance_index(),
            partitions: vertex.partitions().clone(),
            past_partitions: vertex.past_partitions().clone(),
            total_hits: vertex.total_hits(),
            instance_hits: vertex.instance_hits(),
            average_remaining_time: vertex.average_remaining_time(),
            probabilities: vertex.probabilities(),
        }
    }
}

/// An edge as captured in a [`GraphSnapshot`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEdge {
    pub id: EdgeId,
    pub element_id: ElementId,
    pub source: VertexId,
    pub dest: VertexId,
    pub total_hits: u64,
    pub instance_hits: u64,
    pub probability: f64,
}

// =============================================================================
// SNAPSHOT
// =============================================================================

/// A consistent copy of one procedure's graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub procedure: ProcedureId,
    pub procedure_name: String,
    pub transaction_count: u64,
    pub recompute_count: u64,
    /// Sorted by id.
    pub vertices: Vec<SnapshotVertex>,
    /// Sorted by id.
    pub edges: Vec<SnapshotEdge>,
}

impl GraphSnapshot {
    pub fn vertex(&self, id: VertexId) -> Option<&SnapshotVertex> {
        self.vertices
            .binary_search_by_key(&id, |v| v.id)
            .ok()
            .and_then(|slot| self.vertices.get(slot))
    }

    pub fn edge_between(&self, source: VertexId, dest: VertexId) -> Option<&SnapshotEdge> {
        self.edges
            .iter()
            .find(|e| e.source == source && e.dest == dest)
    }

    /// Number of `Query` vertices kept in the snapshot.
    pub fn query_vertex_count(&self) -> usize {
        self.vertices
            .iter()
            .filter(|v| v.kind == VertexKind::Query)
            .count()
    }

    /// Every partition touched by any vertex of the snapshot.
    pub fn partitions(&self) -> PartitionSet {
        self.vertices
            .iter()
            .flat_map(|v| v.partitions.iter().copied())
            .collect()
    }
}

impl MarkovGraph {
    /// Capture the graph as a [`GraphSnapshot`].
    pub fn snapshot(&self) -> GraphSnapshot {
        let _epoch = self.exclusive();

        let vertices: Vec<SnapshotVertex> = self
            .vertices()
            .iter()
            .filter(|v| !v.is_query() || v.total_hits() > 0 || v.instance_hits() > 0)
            .map(|v| SnapshotVertex::from(v.as_ref()))
            .collect();
        let kept: BTreeSet<VertexId> = vertices.iter().map(|v| v.id).collect();

        let edges = self
            .edges()
            .iter()
            .filter(|e| kept.contains(&e.source()) && kept.contains(&e.dest()))
            .map(|e| SnapshotEdge {
                id: e.id(),
                element_id: e.element_id(),
                source: e.source(),
                dest: e.dest(),
                total_hits: e.total_hits(),
                instance_hits: e.instance_hits(),
                probability: e.probability(),
            })
            .collect();

        GraphSnapshot {
            procedure: self.procedure().id,
            procedure_name: self.procedure().name.clone(),
            transaction_count: self.transaction_count(),
            recompute_count: self.recompute_count(),
            vertices,
            edges,
        }
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
    use crate::{PartitionId, TxnId};

    fn graph() -> MarkovGraph {
        MarkovGraph::initialized(
            Procedure::new(
                ProcedureId(7),
                "delivery",
                vec![Statement::new(StatementId(1), "getNewOrder")],
            ),
            ModelConfig::default(),
        )
    }

    fn learn(g: &MarkovGraph, id: u64, aborted: bool) {
        let mut trace = TransactionTrace::new(TxnId(id), ProcedureId(7), 0)
            .with_base_partition(PartitionId(2))
            .with_query(QueryTrace::new(StatementId(1), 5, 10));
        if aborted {
            trace = trace.aborted();
        }
        g.process_transaction(&trace, &RecordedPartitions)
            .expect("learn");
    }

    #[test]
    fn fresh_graph_snapshot_has_markers_only() {
        let snapshot = graph().snapshot();
        assert_eq!(snapshot.vertices.len(), 3);
        assert!(snapshot.edges.is_empty());
        assert_eq!(snapshot.query_vertex_count(), 0);
    }

    #[test]
    fn snapshot_carries_counts_and_probabilities() {
        let g = graph();
        learn(&g, 1, false);
        learn(&g, 2, true);
        g.calculate_probabilities().expect("recompute");

        let snapshot = g.snapshot();
        assert_eq!(snapshot.procedure_name, "delivery");
        assert_eq!(snapshot.transaction_count, 2);
        assert_eq!(snapshot.recompute_count, 1);
        assert_eq!(snapshot.query_vertex_count(), 1);
        assert_eq!(snapshot.edges.len(), 3);
        assert_eq!(snapshot.partitions(), PartitionSet::from([PartitionId(2)]));

        let ids: Vec<_> = snapshot.vertices.iter().map(|v| v.id).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);

        let start = g.start_vertex().expect("start");
        let start_vertex = snapshot.vertex(start).expect("start in snapshot");
        assert_eq!(start_vertex.total_hits, 2);
        assert!((start_vertex.probabilities.abort - 0.5).abs() < 1e-9);
    }

    #[test]
    fn unhit_query_vertices_are_omitted() {
        let g = graph();
        learn(&g, 1, false);
        let query = g
            .find_vertex(
                StatementId(1),
                &PartitionSet::from([PartitionId(2)]),
                &PartitionSet::new(),
                0,
            )
            .expect("query vertex");
        let start = g.start_vertex().expect("start");
        assert!(g.snapshot().vertex(query).is_some());

        // Never folded, then discarded: the vertex has no hits left
        g.reset_counters();
        let snapshot = g.snapshot();
        assert!(snapshot.vertex(query).is_none());
        assert!(snapshot.edge_between(start, query).is_none());
        assert_eq!(snapshot.vertices.len(), 3);
        assert!(snapshot.edges.is_empty());
    }

    #[test]
    fn identical_histories_give_identical_snapshots() {
        let a = graph();
        let b = graph();
        for g in [&a, &b] {
            learn(g, 1, false);
            learn(g, 2, true);
            g.calculate_probabilities().expect("recompute");
        }
        assert_eq!(a.snapshot(), b.snapshot());
    }
}
