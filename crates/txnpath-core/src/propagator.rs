//! # Probability Propagator
//!
//! Derives per-vertex forecasts from per-edge probabilities.
//!
//! Each vertex's forecast is a probability-weighted sum over its successors'
//! forecasts, with `Commit` and `Abort` as fixed points. Most learned graphs
//! are DAGs, but two transactions running the same statements in different
//! orders on the same partitions can close a cycle (A then B in one, B then
//! A in the other). The pass is total: a depth-first post-order visit fills
//! every vertex exactly once and drops the edges that close a cycle.

use crate::edge::Edge;
use crate::vertex::{Vertex, VertexProbabilities};
use crate::{PartitionSet, TxnPathError, VertexId, VertexKind};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
    New,
    OnStack,
    Done,
}

/// What one propagation pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PropagationStats {
    pub(crate) vertices: usize,
    /// Edges skipped because they close a cycle.
    pub(crate) back_edges: usize,
}

/// One post-order pass over a consistent snapshot of the graph.
pub(crate) struct ProbabilityPropagator<'a> {
    vertices: &'a [Arc<Vertex>],
    /// Per vertex slot: `(destination slot, edge probability)`.
    outbound: Vec<Vec<(usize, f64)>>,
    /// Every partition any vertex touches.
    partitions: PartitionSet,
}

impl<'a> ProbabilityPropagator<'a> {
    pub(crate) fn new(vertices: &'a [Arc<Vertex>], edges: &[Arc<Edge>]) -> Self {
        let mut outbound = vec![Vec::new(); vertices.len()];
        for edge in edges {
            if let Some(out) = outbound.get_mut(edge.source().index()) {
                out.push((edge.dest().index(), edge.probability()));
            }
        }
        let partitions = vertices
            .iter()
            .flat_map(|v| v.touched_partitions())
            .collect();
        Self {
            vertices,
            outbound,
            partitions,
        }
    }

    /// Compute and store the forecasts of every vertex.
    ///
    /// Vertices are filled in depth-first post-order, so every successor is
    /// final before its predecessors read it. An edge back into a vertex
    /// still on the DFS stack closes a cycle; it contributes nothing, and the
    /// remaining outbound weight of its source is renormalized to one.
    pub(crate) fn calculate(&self) -> Result<PropagationStats, TxnPathError> {
        let n = self.vertices.len();
        let mut state = vec![Visit::New; n];
        let mut computed: Vec<Option<VertexProbabilities>> = vec![None; n];
        let mut back_edges = 0usize;
        // (vertex slot, next outbound edge to follow)
        let mut stack: Vec<(usize, usize)> = Vec::new();

        for root in 0..n {
            if state.get(root) != Some(&Visit::New) {
                continue;
            }
            state[root] = Visit::OnStack;
            stack.push((root, 0));

            while let Some(top) = stack.last_mut() {
                let (slot, cursor) = *top;
                match self.outbound.get(slot).and_then(|out| out.get(cursor)) {
                    Some(&(dest, _)) => {
                        top.1 = cursor.saturating_add(1);
                        let visit = state
                            .get_mut(dest)
                            .ok_or(TxnPathError::VertexNotFound(VertexId(dest as u32)))?;
                        match *visit {
                            Visit::New => {
                                *visit = Visit::OnStack;
                                stack.push((dest, 0));
                            }
                            Visit::OnStack => back_edges = back_edges.saturating_add(1),
                            Visit::Done => {}
                        }
                    }
                    None => {
                        stack.pop();
                        let forecast = self.forecast(slot, &computed)?;
                        if let Some(vertex) = self.vertices.get(slot) {
                            vertex.set_probabilities(forecast.clone());
                        }
                        computed[slot] = Some(forecast);
                        state[slot] = Visit::Done;
                    }
                }
            }
        }

        Ok(PropagationStats {
            vertices: n,
            back_edges,
        })
    }

    fn terminal(&self, kind: VertexKind) -> VertexProbabilities {
        VertexProbabilities {
            abort: if kind == VertexKind::Abort { 1.0 } else { 0.0 },
            single_partition: 1.0,
            no_new_partitions: 1.0,
            done: self.partitions.iter().map(|p| (*p, 1.0)).collect(),
        }
    }

    fn forecast(
        &self,
        slot: usize,
        computed: &[Option<VertexProbabilities>],
    ) -> Result<VertexProbabilities, TxnPathError> {
        let vertex = self
            .vertices
            .get(slot)
            .ok_or(TxnPathError::VertexNotFound(VertexId(slot as u32)))?;
        if vertex.kind().is_terminal() {
            return Ok(self.terminal(vertex.kind()));
        }

        let touched = vertex.touched_partitions();
        let mut abort = 0.0_f64;
        let mut single_partition = 0.0_f64;
        let mut no_new_partitions = 0.0_f64;
        let mut done: BTreeMap<_, f64> = self.partitions.iter().map(|p| (*p, 0.0)).collect();

        let mut included = 0.0_f64;
        let mut skipped = false;

        for &(dest, weight) in self.outbound.get(slot).map_or(&[][..], Vec::as_slice) {
            let next_vertex = self
                .vertices
                .get(dest)
                .ok_or(TxnPathError::VertexNotFound(VertexId(dest as u32)))?;
            // Not yet computed: the edge closes a cycle
            let Some(next) = computed.get(dest).and_then(Option::as_ref) else {
                skipped = true;
                continue;
            };
            included += weight;

            abort += weight * next.abort;
            single_partition += weight * next.single_partition;

            if next_vertex.kind().is_terminal() {
                no_new_partitions += weight;
                for value in done.values_mut() {
                    *value += weight;
                }
                continue;
            }

            if next_vertex.partitions().is_subset(&touched) {
                no_new_partitions += weight * next.no_new_partitions;
            }
            for (partition, value) in &mut done {
                if !next_vertex.partitions().contains(partition) {
                    *value += weight * next.done_with(*partition);
                }
            }
        }

        if skipped && included > 0.0 {
            abort /= included;
            single_partition /= included;
            no_new_partitions /= included;
            for value in done.values_mut() {
                *value /= included;
            }
        }
        if touched.len() > 1 {
            single_partition = 0.0;
        }
        for value in done.values_mut() {
            *value = value.min(1.0);
        }

        Ok(VertexProbabilities {
            abort: abort.min(1.0),
            single_partition: single_partition.min(1.0),
            no_new_partitions: no_new_partitions.min(1.0),
            done,
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vertex::VertexKey;
    use crate::{EdgeId, ElementId, PartitionId, StatementId};

    struct Fixture {
        vertices: Vec<Arc<Vertex>>,
        edges: Vec<Arc<Edge>>,
    }

    impl Fixture {
        /// Start, Commit, Abort in slots 0..3.
        fn new() -> Self {
            let vertices = [VertexKind::Start, VertexKind::Commit, VertexKind::Abort]
                .into_iter()
                .enumerate()
                .map(|(i, kind)| {
                    Arc::new(Vertex::marker(VertexId(i as u32), ElementId(i as u64), kind))
                })
                .collect();
            Self {
                vertices,
                edges: Vec::new(),
            }
        }

        fn query(&mut self, statement: u32, partitions: &[u32], past: &[u32], index: u32) -> usize {
            let slot = self.vertices.len();
            let key = VertexKey {
                statement: StatementId(statement),
                partitions: partitions.iter().copied().map(PartitionId).collect(),
                past_partitions: past.iter().copied().map(PartitionId).collect(),
                instance_index: index,
            };
            self.vertices.push(Arc::new(Vertex::query(
                VertexId(slot as u32),
                ElementId(100 + slot as u64),
                &key,
            )));
            slot
        }

        /// Edge carrying `hits` of `source_hits` transitions out of `source`.
        fn edge(&mut self, source: usize, dest: usize, hits: u64, source_hits: u64) {
            let id = self.edges.len();
            let edge = Edge::new(
                EdgeId(id as u32),
                ElementId(1000 + id as u64),
                VertexId(source as u32),
                VertexId(dest as u32),
            );
            for _ in 0..hits {
                edge.record_hit();
            }
            assert!(edge.compute_probability(source_hits));
            self.edges.push(Arc::new(edge));
        }

        fn run(&self) -> Result<PropagationStats, TxnPathError> {
            ProbabilityPropagator::new(&self.vertices, &self.edges).calculate()
        }

        fn probs(&self, slot: usize) -> VertexProbabilities {
            self.vertices[slot].probabilities()
        }
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn terminals_are_fixed_points() {
        let mut f = Fixture::new();
        let q = f.query(1, &[0], &[], 0);
        f.edge(0, q, 1, 1);
        f.edge(q, 1, 1, 1);
        f.run().expect("propagate");

        let commit = f.probs(1);
        assert!(close(commit.abort, 0.0));
        assert!(close(commit.single_partition, 1.0));
        assert!(close(commit.done_with(PartitionId(0)), 1.0));
        assert!(close(f.probs(2).abort, 1.0));
    }

    #[test]
    fn abort_probability_is_weighted() {
        let mut f = Fixture::new();
        let q = f.query(1, &[0], &[], 0);
        f.edge(0, q, 4, 4);
        f.edge(q, 1, 3, 4);
        f.edge(q, 2, 1, 4);
        f.run().expect("propagate");

        assert!(close(f.probs(q).abort, 0.25));
        assert!(close(f.probs(0).abort, 0.25));
    }

    #[test]
    fn multi_partition_paths_are_not_single_partition() {
        let mut f = Fixture::new();
        let a = f.query(1, &[0], &[], 0);
        let b = f.query(2, &[1], &[0], 0);
        let c = f.query(2, &[0], &[0], 0);
        f.edge(0, a, 2, 2);
        f.edge(a, b, 1, 2);
        f.edge(a, c, 1, 2);
        f.edge(b, 1, 1, 1);
        f.edge(c, 1, 1, 1);
        f.run().expect("propagate");

        assert!(close(f.probs(b).single_partition, 0.0));
        assert!(close(f.probs(c).single_partition, 1.0));
        assert!(close(f.probs(a).single_partition, 0.5));
        // From `a`, half the paths go on to touch partition 1
        assert!(close(f.probs(a).no_new_partitions, 0.5));
        assert!(close(f.probs(a).done_with(PartitionId(1)), 0.5));
        assert!(close(f.probs(a).done_with(PartitionId(0)), 0.5));
        assert!(close(f.probs(b).done_with(PartitionId(0)), 1.0));
    }

    #[test]
    fn cycle_edges_are_dropped_and_renormalized() {
        // a and b reached in either order, each continuing to the other or
        // ending the transaction
        let mut f = Fixture::new();
        let c = f.query(3, &[1], &[], 0);
        let a = f.query(1, &[1], &[1], 0);
        let b = f.query(2, &[1], &[1], 0);
        f.edge(0, c, 2, 2);
        f.edge(c, a, 1, 2);
        f.edge(c, b, 1, 2);
        f.edge(a, b, 1, 2);
        f.edge(a, 1, 1, 2);
        f.edge(b, a, 1, 2);
        f.edge(b, 2, 1, 2);

        let stats = f.run().expect("propagate");
        assert_eq!(stats.back_edges, 1);

        // DFS reaches a first, so b -> a is the dropped edge and b only sees
        // its abort half
        assert!(close(f.probs(b).abort, 1.0));
        assert!(close(f.probs(a).abort, 0.5));
        assert!(close(f.probs(c).abort, 0.75));
        for slot in [c, a, b] {
            let p = f.probs(slot);
            assert!(close(p.single_partition, 1.0));
            assert!(close(p.no_new_partitions, 1.0));
        }
        assert!(close(f.probs(0).single_partition, 1.0));
    }

    #[test]
    fn self_loop_is_dropped() {
        let mut f = Fixture::new();
        let a = f.query(1, &[0], &[], 0);
        f.edge(0, a, 2, 2);
        f.edge(a, a, 1, 2);
        f.edge(a, 2, 1, 2);

        assert_eq!(f.run().expect("propagate").back_edges, 1);
        assert!(close(f.probs(a).abort, 1.0));
        assert!(close(f.probs(0).abort, 1.0));
    }

    #[test]
    fn acyclic_graph_has_no_back_edges() {
        let mut f = Fixture::new();
        let q = f.query(1, &[0], &[], 0);
        f.edge(0, q, 1, 1);
        f.edge(q, 1, 1, 1);
        assert_eq!(f.run().expect("propagate").back_edges, 0);
    }

    #[test]
    fn unreachable_vertices_still_get_forecasts() {
        let f = Fixture::new();
        assert_eq!(f.run().expect("propagate").vertices, 3);
        assert!(close(f.probs(0).abort, 0.0));
    }
}
