//! # Lookup Caches
//!
//! Memoizations the graph keeps next to its arenas:
//! - `StatementIndex`: statement -> vertices of that statement; bounds the
//!   identity scan in vertex lookup to one statement's bucket
//! - `SuccessorCache`: vertex -> out-neighbors
//! - `BatchOutcomeCache`: (start, statement, index, partitions, past) ->
//!   (edge, vertex) reached, for repeated runtime prediction queries
//!
//! Vertices and edges are never removed or renamed, so entries never need
//! eviction. The one thing that does grow is a vertex's successor set; the
//! graph invalidates that entry whenever it creates an edge.

use crate::vertex::{Vertex, VertexKey};
use crate::{EdgeId, PartitionSet, StatementId, VertexId};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

// =============================================================================
// STATEMENT INDEX
// =============================================================================

/// Statement -> `Query` vertices for that statement.
///
/// Built once when the graph is initialized, with one (possibly empty) bucket
/// per declared statement. Insertion is an atomic insert-if-absent keyed by
/// vertex identity.
#[derive(Debug, Default)]
pub(crate) struct StatementIndex {
    buckets: RwLock<BTreeMap<StatementId, Vec<Arc<Vertex>>>>,
    built: AtomicBool,
}

impl StatementIndex {
    /// Create the empty buckets for every statement of the procedure.
    pub(crate) fn build(&self, statements: impl IntoIterator<Item = StatementId>) {
        let mut buckets = self.buckets.write();
        for statement in statements {
            buckets.entry(statement).or_default();
        }
        self.built.store(true, Ordering::Release);
    }

    pub(crate) fn is_built(&self) -> bool {
        self.built.load(Ordering::Acquire)
    }

    /// Find the vertex with identity `key`.
    pub(crate) fn find(&self, key: &VertexKey, use_past_partitions: bool) -> Option<Arc<Vertex>> {
        let buckets = self.buckets.read();
        Self::scan(buckets.get(&key.statement)?, key, use_past_partitions)
    }

    /// Return the vertex with identity `key`, calling `create` to make it if
    /// none exists. The boolean is true when `create` ran.
    ///
    /// `create` runs while the index is write-locked, so two callers racing
    /// on the same identity always end up with the same vertex.
    pub(crate) fn get_or_insert_with(
        &self,
        key: &VertexKey,
        use_past_partitions: bool,
        create: impl FnOnce() -> Arc<Vertex>,
    ) -> (Arc<Vertex>, bool) {
        if let Some(found) = self.find(key, use_past_partitions) {
            return (found, false);
        }

        let mut buckets = self.buckets.write();
        let bucket = buckets.entry(key.statement).or_default();
        if let Some(found) = Self::scan(bucket, key, use_past_partitions) {
            return (found, false);
        }
        let vertex = create();
        bucket.push(Arc::clone(&vertex));
        (vertex, true)
    }

    pub(crate) fn bucket_len(&self, statement: StatementId) -> usize {
        self.buckets.read().get(&statement).map_or(0, Vec::len)
    }

    fn scan(bucket: &[Arc<Vertex>], key: &VertexKey, use_past: bool) -> Option<Arc<Vertex>> {
        bucket
            .iter()
            .find(|v| v.matches_key(key, use_past))
            .map(Arc::clone)
    }
}

// =============================================================================
// SUCCESSOR CACHE
// =============================================================================

/// Vertex -> out-neighbors, computed on first request.
#[derive(Debug, Default)]
pub(crate) struct SuccessorCache {
    entries: RwLock<BTreeMap<VertexId, Arc<[VertexId]>>>,
}

impl SuccessorCache {
    pub(crate) fn get(&self, vertex: VertexId) -> Option<Arc<[VertexId]>> {
        self.entries.read().get(&vertex).cloned()
    }

    pub(crate) fn insert(&self, vertex: VertexId, successors: Arc<[VertexId]>) {
        self.entries.write().insert(vertex, successors);
    }

    pub(crate) fn invalidate(&self, vertex: VertexId) {
        self.entries.write().remove(&vertex);
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.read().len()
    }
}

// =============================================================================
// BATCH OUTCOME CACHE
// =============================================================================

/// Inputs of one batch-outcome lookup, relative to a start vertex.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BatchKey {
    pub statement: StatementId,
    pub instance_index: u32,
    pub partitions: PartitionSet,
    pub past_partitions: PartitionSet,
}

/// Start vertex -> (batch inputs -> edge and vertex reached).
#[derive(Debug, Default)]
pub(crate) struct BatchOutcomeCache {
    entries: RwLock<BTreeMap<VertexId, BTreeMap<BatchKey, (EdgeId, VertexId)>>>,
}

impl BatchOutcomeCache {
    pub(crate) fn get(&self, start: VertexId, key: &BatchKey) -> Option<(EdgeId, VertexId)> {
        self.entries.read().get(&start)?.get(key).copied()
    }

    /// Insert unless an outcome is already cached; returns the cached value.
    pub(crate) fn insert_if_absent(
        &self,
        start: VertexId,
        key: BatchKey,
        outcome: (EdgeId, VertexId),
    ) -> (EdgeId, VertexId) {
        *self
            .entries
            .write()
            .entry(start)
            .or_default()
            .entry(key)
            .or_insert(outcome)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.read().values().map(BTreeMap::len).sum()
    }
}

// =============================================================================
// TESTS
// =============================================================================
