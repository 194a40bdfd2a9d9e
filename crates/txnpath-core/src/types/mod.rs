//! # Core Type Definitions
//!
//! This module contains the identifiers and the error type shared by every
//! part of the transaction-path model:
//! - Catalog handles (`ProcedureId`, `StatementId`) and `PartitionId`
//! - Graph handles (`VertexId`, `EdgeId`) and the graph-unique `ElementId`
//! - Trace identity (`TxnId`)
//! - The vertex marker kind (`VertexKind`)
//! - Error types (`TxnPathError`)
//!
//! ## Determinism Guarantees
//!
//! All identifiers implement `Ord` so that every collection in the crate can
//! be a `BTreeMap`/`BTreeSet`; replaying the same traces in the same order
//! always produces the same ids and the same iteration order.

use crate::validation::InvalidGraph;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

// =============================================================================
// CATALOG IDENTIFIERS
// =============================================================================

/// Identifier of a stored procedure in the external catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProcedureId(pub u32);

/// Identifier of a statement within a procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StatementId(pub u32);

/// Identifier of a horizontally-sharded data partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PartitionId(pub u32);

/// An ordered set of partitions.
///
/// Ordered so that two sets with the same members compare, hash and print
/// identically regardless of insertion order.
pub type PartitionSet = BTreeSet<PartitionId>;

/// Identifier of one executed transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TxnId(pub u64);

// =============================================================================
// GRAPH HANDLES
// =============================================================================

/// Handle of a vertex: its slot in the graph's vertex arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VertexId(pub u32);

impl VertexId {
    /// Arena slot for this handle.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Handle of an edge: its slot in the graph's edge arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EdgeId(pub u32);

impl EdgeId {
    /// Arena slot for this handle.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Element id shared by vertices and edges.
///
/// Drawn from one counter per graph, so no vertex and edge ever share an id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ElementId(pub u64);

// =============================================================================
// VERTEX KIND
// =============================================================================

/// The kind of state a vertex represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum VertexKind {
    /// Entry point of every transaction.
    Start,
    /// The point just after one statement invocation.
    Query,
    /// Successful end of a transaction.
    Commit,
    /// Aborted end of a transaction.
    Abort,
}

impl VertexKind {
    /// True for `Commit` and `Abort`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Commit | Self::Abort)
    }

    /// True for the three singleton markers.
    #[must_use]
    pub const fn is_marker(self) -> bool {
        !matches!(self, Self::Query)
    }
}

impl std::fmt::Display for VertexKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Start => "START",
            Self::Query => "QUERY",
            Self::Commit => "COMMIT",
            Self::Abort => "ABORT",
        };
        f.write_str(name)
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur in the transaction-path model.
///
/// - No silent failures
/// - Use `Result<T, TxnPathError>` for fallible operations
/// - The model never panics on malformed input; the caller decides whether
///   to skip or retry a rejected trace
#[derive(Debug, Error)]
pub enum TxnPathError {
    /// The graph has not been seeded with its marker vertices yet.
    #[error("Graph for procedure {0:?} is not initialized")]
    NotInitialized(ProcedureId),

    /// A trace was fed to the graph of a different procedure.
    #[error("Trace for procedure {found:?} fed to graph of procedure {expected:?}")]
    ProcedureMismatch {
        expected: ProcedureId,
        found: ProcedureId,
    },

    /// A query referenced a statement the procedure does not declare.
    #[error("Statement {statement:?} is not part of procedure {procedure:?}")]
    UnknownStatement {
        procedure: ProcedureId,
        statement: StatementId,
    },

    /// A trace carries more queries than the model accepts.
    #[error("Trace has {0} queries, exceeding the per-trace limit")]
    TraceTooLong(usize),

    /// The partition estimator produced no partitions for a query.
    #[error("Partition estimate for statement {0:?} is empty")]
    EmptyPartitionSet(StatementId),

    /// The partition estimator could not map a query or transaction.
    #[error("Partition estimation failed: {0}")]
    Estimation(String),

    /// The requested vertex does not exist in the graph.
    #[error("Vertex not found: {0:?}")]
    VertexNotFound(VertexId),

    /// The requested edge does not exist in the graph.
    #[error("Edge not found: {0:?}")]
    EdgeNotFound(EdgeId),

    /// The graph failed its consistency audit.
    #[error("Invalid graph: {0}")]
    InvalidGraph(#[from] InvalidGraph),

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(String),
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_set_ignores_insertion_order() {
        let a: PartitionSet = [PartitionId(3), PartitionId(1)].into_iter().collect();
        let b: PartitionSet = [PartitionId(1), PartitionId(3)].into_iter().collect();
        assert_eq!(a, b);
        assert_eq!(format!("{a:?}"), format!("{b:?}"));
    }

    #[test]
    fn marker_kinds() {
        assert!(VertexKind::Start.is_marker());
        assert!(!VertexKind::Start.is_terminal());
        assert!(VertexKind::Commit.is_terminal());
        assert!(VertexKind::Abort.is_terminal());
        assert!(!VertexKind::Query.is_marker());
    }

    #[test]
    fn handles_index_arena_slots() {
        assert_eq!(VertexId(7).index(), 7);
        assert_eq!(EdgeId(0).index(), 0);
    }

    #[test]
    fn error_messages_name_the_offender() {
        let err = TxnPathError::UnknownStatement {
            procedure: ProcedureId(2),
            statement: StatementId(9),
        };
        let text = err.to_string();
        assert!(text.contains("StatementId(9)"));
        assert!(text.contains("ProcedureId(2)"));
    }
}
