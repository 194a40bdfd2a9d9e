//! # txnpath-core
//!
//! Statistical transaction-path model for a partitioned OLTP engine.
//!
//! One [`MarkovGraph`] per stored procedure learns, from observed
//! executions, which statements a transaction runs, on which partitions, and
//! how it ends. Periodic recomputes turn the accumulated counts into edge
//! probabilities and per-vertex forecasts (abort probability, single-partition
//! probability, per-partition "done" probability, remaining time) that a
//! scheduler can query while a transaction is still running.
//!
//! ## Architectural Constraints
//!
//! - No I/O: traces come in as values, snapshots go out as values or bytes
//! - No async: learning is safe to call from many OS threads at once
//! - Deterministic: the same traces in the same order give the same graph,
//!   down to every id and every probability

// =============================================================================
// MODULES
// =============================================================================

pub mod cache;
pub mod catalog;
pub mod config;
pub mod edge;
pub mod export;
pub mod formats;
pub mod graph;
pub mod primitives;
mod propagator;
pub mod trace;
pub mod types;
pub mod validation;
pub mod vertex;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    EdgeId, ElementId, PartitionId, PartitionSet, ProcedureId, StatementId, TxnId, TxnPathError,
    VertexId, VertexKind,
};

// =============================================================================
// RE-EXPORTS: Model
// =============================================================================

pub use cache::BatchKey;
pub use catalog::{Catalog, Procedure, Statement};
pub use config::{ModelConfig, TimeNormalization};
pub use edge::Edge;
pub use export::{GraphSnapshot, SnapshotEdge, SnapshotVertex};
pub use graph::{CacheStats, MarkovGraph};
pub use trace::{PartitionEstimator, QueryTrace, RecordedPartitions, TransactionTrace};
pub use validation::InvalidGraph;
pub use vertex::{SampleKey, Vertex, VertexKey, VertexProbabilities};

// =============================================================================
// RE-EXPORTS: Formats (from formats module)
// =============================================================================

pub use formats::{PersistenceHeader, snapshot_from_bytes, snapshot_to_bytes};
