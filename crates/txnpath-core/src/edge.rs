//! # Edge
//!
//! A directed transition between two vertices with observation counts and a
//! derived probability.
//!
//! Edges are created by [`MarkovGraph::add_to_edge`](crate::graph::MarkovGraph::add_to_edge)
//! (or during learning) and never removed. Counters follow the same
//! instance/lifetime split as vertices.

use crate::{EdgeId, ElementId, VertexId};
use std::sync::atomic::{AtomicU64, Ordering};

/// An edge of a [`MarkovGraph`](crate::graph::MarkovGraph).
#[derive(Debug)]
pub struct Edge {
    id: EdgeId,
    element_id: ElementId,
    source: VertexId,
    dest: VertexId,
    folded_hits: AtomicU64,
    instance_hits: AtomicU64,
    /// `f64` bit pattern.
    probability: AtomicU64,
}

impl Edge {
    pub(crate) fn new(id: EdgeId, element_id: ElementId, source: VertexId, dest: VertexId) -> Self {
        Self {
            id,
            element_id,
            source,
            dest,
            folded_hits: AtomicU64::new(0),
            instance_hits: AtomicU64::new(0),
            probability: AtomicU64::new(0f64.to_bits()),
        }
    }

    pub fn id(&self) -> EdgeId {
        self.id
    }

    pub fn element_id(&self) -> ElementId {
        self.element_id
    }

    pub fn source(&self) -> VertexId {
        self.source
    }

    pub fn dest(&self) -> VertexId {
        self.dest
    }

    /// Lifetime hits, including those not yet folded by a recompute.
    pub fn total_hits(&self) -> u64 {
        self.folded_hits
            .load(Ordering::Relaxed)
            .saturating_add(self.instance_hits.load(Ordering::Relaxed))
    }

    pub fn instance_hits(&self) -> u64 {
        self.instance_hits.load(Ordering::Relaxed)
    }

    pub fn record_hit(&self) {
        self.instance_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn fold_instance_into_total(&self) {
        let window = self.instance_hits.swap(0, Ordering::Relaxed);
        self.folded_hits.fetch_add(window, Ordering::Relaxed);
    }

    pub(crate) fn discard_instance_hits(&self) {
        self.instance_hits.store(0, Ordering::Relaxed);
    }

    pub fn probability(&self) -> f64 {
        f64::from_bits(self.probability.load(Ordering::Relaxed))
    }

    fn set_probability(&self, probability: f64) {
        self.probability
            .store(probability.to_bits(), Ordering::Relaxed);
    }

    /// Set the probability to `total_hits / source_total_hits`.
    ///
    /// A source without hits has no observations to divide by; the edge
    /// keeps its current value and `false` is returned.
    pub fn compute_probability(&self, source_total_hits: u64) -> bool {
        if source_total_hits == 0 {
            return false;
        }
        let ratio = self.total_hits() as f64 / source_total_hits as f64;
        self.set_probability(ratio.min(1.0));
        true
    }
}
