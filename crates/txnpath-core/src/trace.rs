//! # Transaction Traces
//!
//! The observed executions the model learns from, and the partition
//! estimation seam the model calls to place each query.

use crate::{PartitionId, PartitionSet, ProcedureId, StatementId, TxnId, TxnPathError};
use serde::{Deserialize, Serialize};

/// One executed query within a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryTrace {
    pub statement: StatementId,
    pub start_timestamp: u64,
    pub stop_timestamp: u64,
    /// Partitions recorded alongside the trace, if the recorder knew them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partitions: Option<PartitionSet>,
}

impl QueryTrace {
    #[must_use]
    pub fn new(statement: StatementId, start_timestamp: u64, stop_timestamp: u64) -> Self {
        Self {
            statement,
            start_timestamp,
            stop_timestamp,
            partitions: None,
        }
    }

    /// Attach the partitions this query touched.
    #[must_use]
    pub fn with_partitions(mut self, partitions: impl IntoIterator<Item = PartitionId>) -> Self {
        self.partitions = Some(partitions.into_iter().collect());
        self
    }
}

/// One executed transaction: its queries in order and how it ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionTrace {
    pub txn_id: TxnId,
    pub procedure: ProcedureId,
    pub start_timestamp: u64,
    pub stop_timestamp: u64,
    #[serde(default)]
    pub aborted: bool,
    /// Partition the procedure's control code ran on, if recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_partition: Option<PartitionId>,
    pub queries: Vec<QueryTrace>,
}

impl TransactionTrace {
    #[must_use]
    pub fn new(txn_id: TxnId, procedure: ProcedureId, start_timestamp: u64) -> Self {
        Self {
            txn_id,
            procedure,
            start_timestamp,
            stop_timestamp: start_timestamp,
            aborted: false,
            base_partition: None,
            queries: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_base_partition(mut self, base: PartitionId) -> Self {
        self.base_partition = Some(base);
        self
    }

    /// Append a query; the transaction's stop time grows to cover it.
    #[must_use]
    pub fn with_query(mut self, query: QueryTrace) -> Self {
        self.stop_timestamp = self.stop_timestamp.max(query.stop_timestamp);
        self.queries.push(query);
        self
    }

    #[must_use]
    pub fn finished_at(mut self, stop_timestamp: u64) -> Self {
        self.stop_timestamp = stop_timestamp;
        self
    }

    #[must_use]
    pub fn aborted(mut self) -> Self {
        self.aborted = true;
        self
    }

    /// Total elapsed time of the transaction.
    #[must_use]
    pub fn elapsed(&self) -> u64 {
        self.stop_timestamp.saturating_sub(self.start_timestamp)
    }
}

// =============================================================================
// PARTITION ESTIMATION
// =============================================================================

/// Maps transactions and queries to the partitions they touch.
///
/// Implemented outside the model; errors are returned to the caller of
/// [`MarkovGraph::process_transaction`](crate::graph::MarkovGraph::process_transaction)
/// exactly as the estimator produced them.
pub trait PartitionEstimator: Send + Sync {
    /// The partition the transaction's control code runs on.
    fn base_partition(&self, trace: &TransactionTrace) -> Result<PartitionId, TxnPathError>;

    /// Every partition the query touches.
    fn query_partitions(
        &self,
        query: &QueryTrace,
        base_partition: PartitionId,
    ) -> Result<PartitionSet, TxnPathError>;
}

/// Estimator that trusts the partitions recorded in the trace itself.
///
/// Queries without recorded partitions are placed on the base partition.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordedPartitions;

impl PartitionEstimator for RecordedPartitions {
    fn base_partition(&self, trace: &TransactionTrace) -> Result<PartitionId, TxnPathError> {
        trace.base_partition.ok_or_else(|| {
            TxnPathError::Estimation(format!(
                "transaction {:?} has no recorded base partition",
                trace.txn_id
            ))
        })
    }

    fn query_partitions(
        &self,
        query: &QueryTrace,
        base_partition: PartitionId,
    ) -> Result<PartitionSet, TxnPathError> {
        Ok(query
            .partitions
            .clone()
            .unwrap_or_else(|| PartitionSet::from([base_partition])))
    }
}
