//! # Vertex
//!
//! A state in a transaction's execution: one of the three markers, or the
//! point just after the Nth invocation of a statement with a known
//! touched-partition set and accumulated past-partition set.
//!
//! Identity fields are immutable after construction. Everything that changes
//! while the graph learns (hit counters, timing samples, derived
//! probabilities, the successor table) sits behind an atomic or a lock, so
//! a vertex is shared between learning threads through an `Arc`.

use crate::{EdgeId, ElementId, PartitionId, PartitionSet, StatementId, TxnId, VertexId, VertexKind};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};

// =============================================================================
// IDENTITY KEY
// =============================================================================

/// The identity of a `Query` vertex.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VertexKey {
    pub statement: StatementId,
    pub partitions: PartitionSet,
    pub past_partitions: PartitionSet,
    pub instance_index: u32,
}

// =============================================================================
// TIMING
// =============================================================================

/// Key of a raw time sample: when the owning transaction ended, and which
/// transaction it was.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SampleKey {
    pub end_timestamp: u64,
    pub txn_id: TxnId,
}

#[derive(Debug, Default)]
struct TimeSamples {
    /// Raw samples awaiting normalization: sample key -> elapsed duration.
    pending: BTreeMap<SampleKey, u64>,
    /// Samples kept by earlier normalizations.
    count: u64,
    total: u64,
}

// =============================================================================
// DERIVED PROBABILITIES
// =============================================================================

/// Forecasts derived for a vertex at recompute time.
///
/// All fields are reset to zero at the start of every recompute.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VertexProbabilities {
    /// Probability that the transaction eventually aborts.
    pub abort: f64,
    /// Probability that the whole transaction stays on at most one partition.
    pub single_partition: f64,
    /// Probability that no partition beyond those already touched is needed.
    pub no_new_partitions: f64,
    /// Per partition: probability that it is never touched again.
    pub done: BTreeMap<PartitionId, f64>,
}

impl VertexProbabilities {
    /// Probability that `partition` is never touched again; unknown
    /// partitions are never touched at all.
    #[must_use]
    pub fn done_with(&self, partition: PartitionId) -> f64 {
        self.done.get(&partition).copied().unwrap_or(1.0)
    }
}

// =============================================================================
// VERTEX
// =============================================================================

/// A vertex of a [`MarkovGraph`](crate::graph::MarkovGraph).
#[derive(Debug)]
pub struct Vertex {
    id: VertexId,
    element_id: ElementId,
    kind: VertexKind,
    statement: Option<StatementId>,
    instance_index: u32,
    partitions: PartitionSet,
    past_partitions: PartitionSet,

    /// Hits folded in by earlier recomputes.
    folded_hits: AtomicU64,
    /// Hits since the last recompute.
    instance_hits: AtomicU64,

    times: Mutex<TimeSamples>,
    probabilities: RwLock<VertexProbabilities>,

    /// Outbound edges: destination -> edge. Locking this table is the
    /// exclusive region for learning transitions out of this vertex.
    pub(crate) successors: Mutex<BTreeMap<VertexId, EdgeId>>,
}

impl Vertex {
    fn with_identity(
        id: VertexId,
        element_id: ElementId,
        kind: VertexKind,
        statement: Option<StatementId>,
        instance_index: u32,
        partitions: PartitionSet,
        past_partitions: PartitionSet,
    ) -> Self {
        Self {
            id,
            element_id,
            kind,
            statement,
            instance_index,
            partitions,
            past_partitions,
            folded_hits: AtomicU64::new(0),
            instance_hits: AtomicU64::new(0),
            times: Mutex::new(TimeSamples::default()),
            probabilities: RwLock::new(VertexProbabilities::default()),
            successors: Mutex::new(BTreeMap::new()),
        }
    }

    /// Create one of the marker vertices (`Start`, `Commit`, `Abort`).
    pub(crate) fn marker(id: VertexId, element_id: ElementId, kind: VertexKind) -> Self {
        debug_assert!(kind.is_marker());
        Self::with_identity(
            id,
            element_id,
            kind,
            None,
            0,
            PartitionSet::new(),
            PartitionSet::new(),
        )
    }

    /// Create a `Query` vertex with the given identity.
    pub(crate) fn query(id: VertexId, element_id: ElementId, key: &VertexKey) -> Self {
        Self::with_identity(
            id,
            element_id,
            VertexKind::Query,
            Some(key.statement),
            key.instance_index,
            key.partitions.clone(),
            key.past_partitions.clone(),
        )
    }

    // -------------------------------------------------------------------------
    // Identity
    // -------------------------------------------------------------------------

    pub fn id(&self) -> VertexId {
        self.id
    }

    pub fn element_id(&self) -> ElementId {
        self.element_id
    }

    pub fn kind(&self) -> VertexKind {
        self.kind
    }

    pub fn is_query(&self) -> bool {
        self.kind == VertexKind::Query
    }

    pub fn statement(&self) -> Option<StatementId> {
        self.statement
    }

    /// 0-based ordinal of this statement's invocation within a transaction.
    pub fn instance_index(&self) -> u32 {
        self.instance_index
    }

    pub fn partitions(&self) -> &PartitionSet {
        &self.partitions
    }

    pub fn past_partitions(&self) -> &PartitionSet {
        &self.past_partitions
    }

    /// Partitions touched by the transaction once it has reached this vertex.
    pub fn touched_partitions(&self) -> PartitionSet {
        self.past_partitions
            .union(&self.partitions)
            .copied()
            .collect()
    }

    /// The identity test used for deduplication.
    ///
    /// `past_partitions` of `None` leaves past partitions out of the
    /// comparison.
    pub fn is_match(
        &self,
        statement: StatementId,
        partitions: &PartitionSet,
        past_partitions: Option<&PartitionSet>,
        instance_index: u32,
    ) -> bool {
        self.statement == Some(statement)
            && self.instance_index == instance_index
            && &self.partitions == partitions
            && past_partitions.is_none_or(|past| &self.past_partitions == past)
    }

    pub(crate) fn matches_key(&self, key: &VertexKey, use_past_partitions: bool) -> bool {
        self.is_match(
            key.statement,
            &key.partitions,
            use_past_partitions.then_some(&key.past_partitions),
            key.instance_index,
        )
    }

    // -------------------------------------------------------------------------
    // Counters
    // -------------------------------------------------------------------------

    /// Lifetime hits, including those not yet folded by a recompute.
    pub fn total_hits(&self) -> u64 {
        self.folded_hits
            .load(Ordering::Relaxed)
            .saturating_add(self.instance_hits.load(Ordering::Relaxed))
    }

    /// Hits since the last recompute.
    pub fn instance_hits(&self) -> u64 {
        self.instance_hits.load(Ordering::Relaxed)
    }

    /// Count one more transaction passing through this vertex.
    pub fn record_hit(&self) {
        self.instance_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Close the current observation window. Folding an empty window is a
    /// no-op.
    pub fn fold_instance_into_total(&self) {
        let window = self.instance_hits.swap(0, Ordering::Relaxed);
        self.folded_hits.fetch_add(window, Ordering::Relaxed);
    }

    /// Drop the current observation window without folding it.
    pub(crate) fn discard_instance_hits(&self) {
        self.instance_hits.store(0, Ordering::Relaxed);
    }

    /// Whether this vertex's share of recent transactions has drifted from
    /// its lifetime share by more than `tolerance` (relative).
    pub fn is_stale(
        &self,
        observed_since_last_recompute: u64,
        tolerance: f64,
        lifetime_txn_count: u64,
    ) -> bool {
        if observed_since_last_recompute == 0 {
            return false;
        }
        let recent_hits = self.instance_hits();
        let folded = self.folded_hits.load(Ordering::Relaxed);
        if folded == 0 || lifetime_txn_count == 0 {
            // Nothing to compare against yet; any traffic at all is news.
            return recent_hits > 0;
        }
        let recent = recent_hits as f64 / observed_since_last_recompute as f64;
        let historical = folded as f64 / lifetime_txn_count as f64;
        (recent - historical).abs() / historical > tolerance
    }

    // -------------------------------------------------------------------------
    // Timing
    // -------------------------------------------------------------------------

    /// Append a raw remaining-time sample for the transaction ending at
    /// `key`.
    pub fn record_elapsed(&self, key: SampleKey, duration: u64) {
        self.times.lock().pending.insert(key, duration);
    }

    /// Samples recorded since the last normalization.
    pub fn pending_samples(&self) -> usize {
        self.times.lock().pending.len()
    }

    pub(crate) fn pending_sample_keys(&self) -> Vec<SampleKey> {
        self.times.lock().pending.keys().copied().collect()
    }

    /// Keep pending samples whose key is in `finished`, drop the rest.
    /// Returns the number dropped.
    pub(crate) fn normalize_times(&self, finished: &BTreeSet<SampleKey>) -> usize {
        let mut times = self.times.lock();
        let pending = std::mem::take(&mut times.pending);
        let mut dropped = 0usize;
        for (key, duration) in pending {
            if finished.contains(&key) {
                times.count = times.count.saturating_add(1);
                times.total = times.total.saturating_add(duration);
            } else {
                dropped = dropped.saturating_add(1);
            }
        }
        dropped
    }

    /// Normalized samples kept so far.
    pub fn timing_samples(&self) -> u64 {
        self.times.lock().count
    }

    /// Mean remaining time over the normalized samples.
    pub fn average_remaining_time(&self) -> Option<f64> {
        let times = self.times.lock();
        (times.count > 0).then(|| times.total as f64 / times.count as f64)
    }

    // -------------------------------------------------------------------------
    // Derived probabilities
    // -------------------------------------------------------------------------

    pub fn reset_derived_probabilities(&self) {
        *self.probabilities.write() = VertexProbabilities::default();
    }

    pub(crate) fn set_probabilities(&self, probabilities: VertexProbabilities) {
        *self.probabilities.write() = probabilities;
    }

    pub fn probabilities(&self) -> VertexProbabilities {
        self.probabilities.read().clone()
    }

    pub fn abort_probability(&self) -> f64 {
        self.probabilities.read().abort
    }

    // -------------------------------------------------------------------------
    // Successors
    // -------------------------------------------------------------------------

    /// Outbound `(destination, edge)` pairs in destination order.
    pub fn successor_edges(&self) -> Vec<(VertexId, EdgeId)> {
        self.successors
            .lock()
            .iter()
            .map(|(dest, edge)| (*dest, *edge))
            .collect()
    }

    pub fn out_degree(&self) -> usize {
        self.successors.lock().len()
    }
}

impl std::fmt::Display for Vertex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.statement {
            Some(statement) => write!(
                f,
                "{}[stmt={} #{} parts={:?} past={:?}]",
                self.kind, statement.0, self.instance_index, self.partitions, self.past_partitions
            ),
            None => write!(f, "{}", self.kind),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
