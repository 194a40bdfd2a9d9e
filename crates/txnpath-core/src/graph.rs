//! # Markov Graph
//!
//! The per-procedure transaction-path model.
//!
//! Vertices and edges live in flat arenas addressed by [`VertexId`] and
//! [`EdgeId`]; neither is ever removed. Learning
//! ([`MarkovGraph::process_transaction`]) runs concurrently from any number
//! of threads. Recompute, counter reset, validation and snapshotting take
//! the whole graph exclusively.
//!
//! ## Locking
//!
//! Locks are always taken in this order:
//!
//! 1. `epoch_gate` (shared for learning, exclusive for epoch operations)
//! 2. a source vertex's successor table
//! 3. the statement index
//! 4. the arena
//!
//! The arena lock is never held while any other lock is acquired, so readers
//! that only clone an `Arc` out of the arena never block learning for long.

use crate::cache::{BatchKey, BatchOutcomeCache, StatementIndex, SuccessorCache};
use crate::catalog::Procedure;
use crate::config::ModelConfig;
use crate::edge::Edge;
use crate::primitives::MAX_TRACE_QUERIES;
use crate::propagator::ProbabilityPropagator;
use crate::trace::{PartitionEstimator, TransactionTrace};
use crate::vertex::{SampleKey, Vertex, VertexKey};
use crate::{
    EdgeId, ElementId, PartitionSet, StatementId, TxnPathError, VertexId, VertexKind,
};
use parking_lot::{RwLock, RwLockWriteGuard};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, trace};

// =============================================================================
// INTERNAL STRUCTURE
// =============================================================================

/// Handles of the three singleton marker vertices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Markers {
    pub(crate) start: VertexId,
    pub(crate) commit: VertexId,
    pub(crate) abort: VertexId,
}

#[derive(Debug, Default)]
struct Arena {
    vertices: Vec<Arc<Vertex>>,
    edges: Vec<Arc<Edge>>,
}

/// One query of a trace, fully resolved before the graph is touched.
struct ResolvedQuery {
    key: VertexKey,
    remaining: u64,
}

/// Sizes of the lookup caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub successor_entries: usize,
    pub batch_entries: usize,
}

// =============================================================================
// GRAPH
// =============================================================================

/// The transaction-path model of one stored procedure.
#[derive(Debug)]
pub struct MarkovGraph {
    procedure: Procedure,
    config: ModelConfig,
    markers: Option<Markers>,

    /// Shared by learners, exclusive for epoch operations.
    epoch_gate: RwLock<()>,
    arena: RwLock<Arena>,
    next_element_id: AtomicU64,

    statement_index: StatementIndex,
    successor_cache: SuccessorCache,
    batch_cache: BatchOutcomeCache,

    transaction_count: AtomicU64,
    transactions_at_recompute: AtomicU64,
    mispredictions: AtomicU64,
    recompute_count: AtomicU64,
}

impl MarkovGraph {
    /// Create an empty graph. Call [`initialize`](Self::initialize) before
    /// learning.
    #[must_use]
    pub fn new(procedure: Procedure, config: ModelConfig) -> Self {
        Self {
            procedure,
            config,
            markers: None,
            epoch_gate: RwLock::new(()),
            arena: RwLock::new(Arena::default()),
            next_element_id: AtomicU64::new(0),
            statement_index: StatementIndex::default(),
            successor_cache: SuccessorCache::default(),
            batch_cache: BatchOutcomeCache::default(),
            transaction_count: AtomicU64::new(0),
            transactions_at_recompute: AtomicU64::new(0),
            mispredictions: AtomicU64::new(0),
            recompute_count: AtomicU64::new(0),
        }
    }

    /// Create a graph and seed it in one step.
    #[must_use]
    pub fn initialized(procedure: Procedure, config: ModelConfig) -> Self {
        let mut graph = Self::new(procedure, config);
        graph.initialize();
        graph
    }

    /// Add the `Start`, `Commit` and `Abort` vertices and build the
    /// statement index. Calling it again has no effect.
    pub fn initialize(&mut self) -> &mut Self {
        if self.markers.is_some() {
            return self;
        }
        let start = self.push_vertex(|id, element| Vertex::marker(id, element, VertexKind::Start));
        let commit =
            self.push_vertex(|id, element| Vertex::marker(id, element, VertexKind::Commit));
        let abort = self.push_vertex(|id, element| Vertex::marker(id, element, VertexKind::Abort));
        self.markers = Some(Markers {
            start: start.id(),
            commit: commit.id(),
            abort: abort.id(),
        });
        self.statement_index
            .build(self.procedure.statements.iter().map(|s| s.id));
        debug!(procedure = %self.procedure.name, "initialized markov graph");
        self
    }

    pub fn is_initialized(&self) -> bool {
        self.markers.is_some() && self.statement_index.is_built()
    }

    pub fn procedure(&self) -> &Procedure {
        &self.procedure
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub(crate) fn markers(&self) -> Result<Markers, TxnPathError> {
        self.markers
            .ok_or(TxnPathError::NotInitialized(self.procedure.id))
    }

    pub fn start_vertex(&self) -> Result<VertexId, TxnPathError> {
        Ok(self.markers()?.start)
    }

    pub fn commit_vertex(&self) -> Result<VertexId, TxnPathError> {
        Ok(self.markers()?.commit)
    }

    pub fn abort_vertex(&self) -> Result<VertexId, TxnPathError> {
        Ok(self.markers()?.abort)
    }

    /// Hold the graph exclusively: no learning runs until the guard drops.
    pub(crate) fn exclusive(&self) -> RwLockWriteGuard<'_, ()> {
        self.epoch_gate.write()
    }

    // -------------------------------------------------------------------------
    // Arena access
    // -------------------------------------------------------------------------

    fn allocate_element_id(&self) -> ElementId {
        ElementId(self.next_element_id.fetch_add(1, Ordering::Relaxed))
    }

    fn push_vertex(&self, build: impl FnOnce(VertexId, ElementId) -> Vertex) -> Arc<Vertex> {
        let mut arena = self.arena.write();
        let id = VertexId(arena.vertices.len() as u32);
        let vertex = Arc::new(build(id, self.allocate_element_id()));
        arena.vertices.push(Arc::clone(&vertex));
        vertex
    }

    fn push_edge(&self, source: VertexId, dest: VertexId) -> Arc<Edge> {
        let mut arena = self.arena.write();
        let id = EdgeId(arena.edges.len() as u32);
        let edge = Arc::new(Edge::new(id, self.allocate_element_id(), source, dest));
        arena.edges.push(Arc::clone(&edge));
        edge
    }

    pub fn vertex(&self, id: VertexId) -> Result<Arc<Vertex>, TxnPathError> {
        self.arena
            .read()
            .vertices
            .get(id.index())
            .cloned()
            .ok_or(TxnPathError::VertexNotFound(id))
    }

    pub fn edge(&self, id: EdgeId) -> Result<Arc<Edge>, TxnPathError> {
        self.arena
            .read()
            .edges
            .get(id.index())
            .cloned()
            .ok_or(TxnPathError::EdgeNotFound(id))
    }

    /// All vertices in id order.
    pub fn vertices(&self) -> Vec<Arc<Vertex>> {
        self.arena.read().vertices.clone()
    }

    /// All edges in id order.
    pub fn edges(&self) -> Vec<Arc<Edge>> {
        self.arena.read().edges.clone()
    }

    pub fn vertex_count(&self) -> usize {
        self.arena.read().vertices.len()
    }

    pub fn edge_count(&self) -> usize {
        self.arena.read().edges.len()
    }

    // -------------------------------------------------------------------------
    // Lookup
    // -------------------------------------------------------------------------

    /// Find the `Query` vertex with the given identity.
    pub fn find_vertex(
        &self,
        statement: StatementId,
        partitions: &PartitionSet,
        past_partitions: &PartitionSet,
        instance_index: u32,
    ) -> Option<VertexId> {
        let key = VertexKey {
            statement,
            partitions: partitions.clone(),
            past_partitions: past_partitions.clone(),
            instance_index,
        };
        self.statement_index
            .find(&key, self.config.use_past_partitions)
            .map(|v| v.id())
    }

    /// Number of `Query` vertices recorded for a statement.
    pub fn statement_vertex_count(&self, statement: StatementId) -> usize {
        self.statement_index.bucket_len(statement)
    }

    pub(crate) fn get_or_create_vertex(&self, key: &VertexKey) -> Arc<Vertex> {
        let (vertex, created) =
            self.statement_index
                .get_or_insert_with(key, self.config.use_past_partitions, || {
                    self.push_vertex(|id, element| Vertex::query(id, element, key))
                });
        if created {
            debug!(procedure = %self.procedure.name, vertex = %vertex, "created vertex");
        }
        vertex
    }

    /// The edge from `source` to `dest`, if one has been observed.
    pub fn edge_between(&self, source: VertexId, dest: VertexId) -> Option<EdgeId> {
        let source = self.vertex(source).ok()?;
        let successors = source.successors.lock();
        successors.get(&dest).copied()
    }

    /// Every edge entering any of `targets`, in id order.
    pub fn edges_to(&self, targets: &[VertexId]) -> Vec<EdgeId> {
        let targets: BTreeSet<VertexId> = targets.iter().copied().collect();
        self.arena
            .read()
            .edges
            .iter()
            .filter(|e| targets.contains(&e.dest()))
            .map(|e| e.id())
            .collect()
    }

    /// Get or create the edge from `source` to `dest`.
    ///
    /// Runs inside `source`'s exclusive region, so concurrent callers for the
    /// same pair always get the same edge. Hit counters are not touched.
    pub fn add_to_edge(&self, source: VertexId, dest: VertexId) -> Result<EdgeId, TxnPathError> {
        let source = self.vertex(source)?;
        self.vertex(dest)?;
        let mut successors = source.successors.lock();
        Ok(self.edge_locked(&source, &mut successors, dest).id())
    }

    fn edge_locked(
        &self,
        source: &Vertex,
        successors: &mut BTreeMap<VertexId, EdgeId>,
        dest: VertexId,
    ) -> Arc<Edge> {
        if let Some(existing) = successors.get(&dest).and_then(|id| self.edge(*id).ok()) {
            return existing;
        }
        let edge = self.push_edge(source.id(), dest);
        successors.insert(dest, edge.id());
        self.successor_cache.invalidate(source.id());
        trace!(source = ?source.id(), dest = ?dest, edge = ?edge.id(), "created edge");
        edge
    }

    /// Out-neighbors of a vertex, memoized until the vertex gains an edge.
    pub fn successors(&self, vertex: VertexId) -> Result<Arc<[VertexId]>, TxnPathError> {
        if let Some(cached) = self.successor_cache.get(vertex) {
            return Ok(cached);
        }
        let source = self.vertex(vertex)?;
        let successors = source.successors.lock();
        let computed: Arc<[VertexId]> = successors.keys().copied().collect();
        // Still holding the table: no edge can be added between computing
        // and caching.
        self.successor_cache.insert(vertex, Arc::clone(&computed));
        Ok(computed)
    }

    /// The `(edge, vertex)` a batch ending in the given query reached from
    /// `start`, if a runtime predictor cached it.
    pub fn cached_batch_end(
        &self,
        start: VertexId,
        statement: StatementId,
        instance_index: u32,
        partitions: &PartitionSet,
        past_partitions: &PartitionSet,
    ) -> Option<(EdgeId, VertexId)> {
        let key = BatchKey {
            statement,
            instance_index,
            partitions: partitions.clone(),
            past_partitions: past_partitions.clone(),
        };
        self.batch_cache.get(start, &key)
    }

    /// Remember the `(edge, vertex)` a batch reached from `start`. The first
    /// outcome cached for a key wins and is returned.
    pub fn add_cached_batch_end(
        &self,
        start: VertexId,
        edge: EdgeId,
        vertex: VertexId,
        statement: StatementId,
        instance_index: u32,
        partitions: &PartitionSet,
        past_partitions: &PartitionSet,
    ) -> (EdgeId, VertexId) {
        let key = BatchKey {
            statement,
            instance_index,
            partitions: partitions.clone(),
            past_partitions: past_partitions.clone(),
        };
        self.batch_cache.insert_if_absent(start, key, (edge, vertex))
    }

    pub fn cache_stats(&self) -> CacheStats {
        CacheStats {
            successor_entries: self.successor_cache.len(),
            batch_entries: self.batch_cache.len(),
        }
    }

    // -------------------------------------------------------------------------
    // Learning
    // -------------------------------------------------------------------------

    /// Fold one observed transaction into the graph and return the path of
    /// vertices it took, from `Start` to `Commit` or `Abort`.
    ///
    /// The trace is resolved completely (base partition, every query's
    /// partitions, statement membership) before anything is counted, so a
    /// rejected trace leaves the graph untouched. Estimator errors are
    /// returned as the estimator produced them.
    pub fn process_transaction(
        &self,
        txn: &TransactionTrace,
        estimator: &dyn PartitionEstimator,
    ) -> Result<Vec<VertexId>, TxnPathError> {
        let markers = self.markers()?;
        let resolved = self.resolve(txn, estimator)?;
        let sample = SampleKey {
            end_timestamp: txn.stop_timestamp,
            txn_id: txn.txn_id,
        };

        let _learning = self.epoch_gate.read();

        let mut previous = self.vertex(markers.start)?;
        previous.record_elapsed(sample, txn.elapsed());
        previous.record_hit();

        let mut path = Vec::with_capacity(resolved.len().saturating_add(2));
        path.push(previous.id());

        for query in &resolved {
            let next = {
                let mut successors = previous.successors.lock();
                let next = self.get_or_create_vertex(&query.key);
                let edge = self.edge_locked(&previous, &mut successors, next.id());
                next.record_hit();
                edge.record_hit();
                next.record_elapsed(sample, query.remaining);
                next
            };
            path.push(next.id());
            previous = next;
        }

        let terminal = if txn.aborted {
            markers.abort
        } else {
            markers.commit
        };
        {
            let terminal = self.vertex(terminal)?;
            let mut successors = previous.successors.lock();
            let edge = self.edge_locked(&previous, &mut successors, terminal.id());
            terminal.record_hit();
            edge.record_hit();
            terminal.record_elapsed(sample, 0);
            path.push(terminal.id());
        }

        self.transaction_count.fetch_add(1, Ordering::Relaxed);
        trace!(
            procedure = %self.procedure.name,
            txn = txn.txn_id.0,
            length = path.len(),
            aborted = txn.aborted,
            "learned transaction"
        );
        Ok(path)
    }

    fn resolve(
        &self,
        txn: &TransactionTrace,
        estimator: &dyn PartitionEstimator,
    ) -> Result<Vec<ResolvedQuery>, TxnPathError> {
        if txn.procedure != self.procedure.id {
            return Err(TxnPathError::ProcedureMismatch {
                expected: self.procedure.id,
                found: txn.procedure,
            });
        }
        if txn.queries.len() > MAX_TRACE_QUERIES {
            return Err(TxnPathError::TraceTooLong(txn.queries.len()));
        }

        let base_partition = estimator.base_partition(txn)?;
        let mut invocations: BTreeMap<StatementId, u32> = BTreeMap::new();
        let mut past_partitions = PartitionSet::new();
        let mut resolved = Vec::with_capacity(txn.queries.len());

        for query in &txn.queries {
            if !self.procedure.contains_statement(query.statement) {
                return Err(TxnPathError::UnknownStatement {
                    procedure: self.procedure.id,
                    statement: query.statement,
                });
            }
            let partitions = estimator.query_partitions(query, base_partition)?;
            if partitions.is_empty() {
                return Err(TxnPathError::EmptyPartitionSet(query.statement));
            }

            let counter = invocations.entry(query.statement).or_insert(0);
            let instance_index = *counter;
            *counter = counter.saturating_add(1);

            let next_past: PartitionSet = past_partitions.union(&partitions).copied().collect();
            resolved.push(ResolvedQuery {
                key: VertexKey {
                    statement: query.statement,
                    partitions,
                    past_partitions,
                    instance_index,
                },
                remaining: txn.stop_timestamp.saturating_sub(query.start_timestamp),
            });
            past_partitions = next_past;
        }
        Ok(resolved)
    }

    // -------------------------------------------------------------------------
    // Recompute
    // -------------------------------------------------------------------------

    /// Turn the accumulated counts into fresh probabilities.
    ///
    /// Resets derived fields, normalizes timing samples, folds instance hits
    /// into lifetime totals, recomputes edge probabilities and propagates
    /// vertex forecasts. Running it twice with no learning in between yields
    /// the same probabilities. Any graph built by
    /// [`process_transaction`](Self::process_transaction) recomputes, cycles
    /// included.
    pub fn calculate_probabilities(&self) -> Result<(), TxnPathError> {
        let markers = self.markers()?;
        let _epoch = self.exclusive();
        let vertices = self.vertices();
        let edges = self.edges();

        for vertex in &vertices {
            vertex.reset_derived_probabilities();
        }

        let dropped = self.normalize_times(&vertices, markers)?;

        for vertex in &vertices {
            vertex.fold_instance_into_total();
        }
        for edge in &edges {
            edge.fold_instance_into_total();
        }

        let skipped = Self::calculate_edge_probabilities(&vertices, &edges)?;
        let propagation = ProbabilityPropagator::new(&vertices, &edges).calculate()?;

        let epoch = self.recompute_count.fetch_add(1, Ordering::Relaxed).saturating_add(1);
        self.transactions_at_recompute
            .store(self.transaction_count.load(Ordering::Relaxed), Ordering::Relaxed);

        info!(
            procedure = %self.procedure.name,
            epoch,
            vertices = vertices.len(),
            edges = edges.len(),
            dropped_samples = dropped,
            skipped_edges = skipped,
            cycle_edges = propagation.back_edges,
            "recomputed probabilities"
        );
        Ok(())
    }

    /// Keep the timing samples of finished transactions and drop the rest,
    /// according to the configured [`TimeNormalization`](crate::config::TimeNormalization).
    fn normalize_times(
        &self,
        vertices: &[Arc<Vertex>],
        markers: Markers,
    ) -> Result<usize, TxnPathError> {
        let marker = |id: VertexId| {
            vertices
                .get(id.index())
                .ok_or(TxnPathError::VertexNotFound(id))
        };
        let mut finished: BTreeSet<SampleKey> =
            marker(markers.commit)?.pending_sample_keys().into_iter().collect();
        if self.config.time_normalization.includes_aborted() {
            finished.extend(marker(markers.abort)?.pending_sample_keys());
        }
        Ok(vertices.iter().map(|v| v.normalize_times(&finished)).sum())
    }

    fn calculate_edge_probabilities(
        vertices: &[Arc<Vertex>],
        edges: &[Arc<Edge>],
    ) -> Result<usize, TxnPathError> {
        let mut skipped = 0usize;
        for edge in edges {
            let source = vertices
                .get(edge.source().index())
                .ok_or(TxnPathError::VertexNotFound(edge.source()))?;
            if !edge.compute_probability(source.total_hits()) {
                skipped = skipped.saturating_add(1);
            }
        }
        Ok(skipped)
    }

    /// Zero every instance counter without folding it.
    pub fn reset_counters(&self) {
        let _epoch = self.exclusive();
        for vertex in self.vertices() {
            vertex.discard_instance_hits();
        }
        for edge in self.edges() {
            edge.discard_instance_hits();
        }
        self.transactions_at_recompute
            .store(self.transaction_count.load(Ordering::Relaxed), Ordering::Relaxed);
        debug!(procedure = %self.procedure.name, "reset instance counters");
    }

    /// Transactions learned since the last recompute or counter reset.
    pub fn observed_since_recompute(&self) -> u64 {
        self.transaction_count
            .load(Ordering::Relaxed)
            .saturating_sub(self.transactions_at_recompute.load(Ordering::Relaxed))
    }

    /// Whether enough vertices have drifted to warrant a recompute.
    pub fn should_recompute(&self, observed_since_recompute: u64, tolerance: f64) -> bool {
        let lifetime = self.transactions_at_recompute.load(Ordering::Relaxed);
        let vertices = self.vertices();
        if vertices.is_empty() {
            return false;
        }
        let stale = vertices
            .iter()
            .filter(|v| v.is_stale(observed_since_recompute, tolerance, lifetime))
            .count();
        stale as f64 / vertices.len() as f64 >= self.config.stale_vertex_proportion
    }

    pub fn recompute_count(&self) -> u64 {
        self.recompute_count.load(Ordering::Relaxed)
    }

    // -------------------------------------------------------------------------
    // Prediction bookkeeping
    // -------------------------------------------------------------------------

    /// Whether a transaction at `vertex` is confidently expected to commit.
    pub fn predict_no_abort(&self, vertex: VertexId) -> Result<bool, TxnPathError> {
        let vertex = self.vertex(vertex)?;
        Ok(vertex.total_hits() >= self.config.min_hits_for_no_abort
            && vertex.abort_probability() <= self.config.abort_confidence_threshold)
    }

    /// Transactions learned by this graph.
    pub fn transaction_count(&self) -> u64 {
        self.transaction_count.load(Ordering::Relaxed)
    }

    pub fn record_misprediction(&self) {
        self.mispredictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn misprediction_count(&self) -> u64 {
        self.mispredictions.load(Ordering::Relaxed)
    }

    /// Share of learned transactions that were not mispredicted.
    pub fn accuracy_ratio(&self) -> f64 {
        let count = self.transaction_count();
        if count == 0 {
            return 1.0;
        }
        let good = count.saturating_sub(self.misprediction_count());
        good as f64 / count as f64
    }
}

// Graphs compare by the procedure they model.

impl PartialEq for MarkovGraph {
    fn eq(&self, other: &Self) -> bool {
        self.procedure.id == other.procedure.id
    }
}

impl Eq for MarkovGraph {}

impl PartialOrd for MarkovGraph {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MarkovGraph {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.procedure.id.cmp(&other.procedure.id)
    }
}

impl std::fmt::Display for MarkovGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MarkovGraph<{}>", self.procedure.name)
    }
}

// =============================================================================
// TESTS
// =============================================================================
