//! # Workload Replay
//!
//! Loads a catalog and a trace file and folds every trace into the graph of
//! its procedure.
//!
//! Input formats (JSON):
//! - catalog: `{"procedures": [{"id": 1, "name": "...", "statements": [{"id": 1, "name": "..."}]}]}`
//! - workload: an array of transaction traces, each with `txn_id`,
//!   `procedure`, `start_timestamp`, `stop_timestamp`, `aborted`,
//!   `base_partition` and `queries`

use crate::config::DriverConfig;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, warn};
use txnpath_core::{
    Catalog, MarkovGraph, ProcedureId, RecordedPartitions, TransactionTrace, TxnPathError,
};

// =============================================================================
// FILE LOADING
// =============================================================================

/// Read a whole file, refusing anything larger than `max_bytes`.
pub fn read_bounded(path: &Path, max_bytes: u64) -> Result<Vec<u8>, TxnPathError> {
    let metadata = std::fs::metadata(path).map_err(|e| {
        TxnPathError::IoError(format!("Cannot read '{}': {}", path.display(), e))
    })?;
    if !metadata.is_file() {
        return Err(TxnPathError::IoError(format!(
            "Path '{}' is not a regular file",
            path.display()
        )));
    }
    if metadata.len() > max_bytes {
        return Err(TxnPathError::SerializationError(format!(
            "File size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            max_bytes
        )));
    }
    std::fs::read(path)
        .map_err(|e| TxnPathError::IoError(format!("Cannot read '{}': {}", path.display(), e)))
}

pub fn load_catalog(path: &Path, max_bytes: u64) -> Result<Catalog, TxnPathError> {
    let bytes = read_bounded(path, max_bytes)?;
    serde_json::from_slice(&bytes)
        .map_err(|e| TxnPathError::SerializationError(format!("Invalid catalog: {}", e)))
}

pub fn load_traces(path: &Path, max_bytes: u64) -> Result<Vec<TransactionTrace>, TxnPathError> {
    let bytes = read_bounded(path, max_bytes)?;
    serde_json::from_slice(&bytes)
        .map_err(|e| TxnPathError::SerializationError(format!("Invalid workload: {}", e)))
}

// =============================================================================
// REPLAY
// =============================================================================

/// Outcome of replaying one procedure's traces.
#[derive(Debug)]
pub struct ProcedureModel {
    pub graph: MarkovGraph,
    pub learned: u64,
    pub rejected: u64,
}

/// The models built from one workload.
#[derive(Debug, Default)]
pub struct BuildOutcome {
    /// One model per catalog procedure, by procedure id.
    pub models: BTreeMap<ProcedureId, ProcedureModel>,
    /// Traces naming a procedure the catalog does not have.
    pub orphaned: u64,
}

impl BuildOutcome {
    pub fn learned(&self) -> u64 {
        self.models.values().map(|m| m.learned).sum()
    }

    pub fn rejected(&self) -> u64 {
        self.models.values().map(|m| m.rejected).sum()
    }
}

/// Replay `traces` into one graph per procedure and recompute each graph.
///
/// A trace the model rejects is logged and skipped; it never aborts the
/// build.
pub fn build_models(
    catalog: &Catalog,
    traces: &[TransactionTrace],
    config: &DriverConfig,
) -> Result<BuildOutcome, TxnPathError> {
    let mut by_procedure: BTreeMap<ProcedureId, Vec<&TransactionTrace>> = BTreeMap::new();
    for trace in traces {
        by_procedure.entry(trace.procedure).or_default().push(trace);
    }

    let mut outcome = BuildOutcome::default();
    for procedure in &catalog.procedures {
        let batch = by_procedure.remove(&procedure.id).unwrap_or_default();
        let graph = MarkovGraph::initialized(procedure.clone(), config.model.clone());
        let (learned, rejected) = replay(&graph, &batch, config.threads);
        graph.calculate_probabilities()?;

        info!(
            procedure = %procedure.name,
            learned,
            rejected,
            vertices = graph.vertex_count(),
            edges = graph.edge_count(),
            "built model"
        );
        outcome.models.insert(
            procedure.id,
            ProcedureModel {
                graph,
                learned,
                rejected,
            },
        );
    }

    for (procedure, batch) in by_procedure {
        warn!(procedure = ?procedure, traces = batch.len(), "procedure missing from catalog");
        outcome.orphaned = outcome.orphaned.saturating_add(batch.len() as u64);
    }
    Ok(outcome)
}

/// Feed `batch` to `graph` from up to `threads` threads. Returns
/// `(learned, rejected)`.
fn replay(graph: &MarkovGraph, batch: &[&TransactionTrace], threads: usize) -> (u64, u64) {
    let learned = AtomicU64::new(0);
    let rejected = AtomicU64::new(0);
    let learn = |chunk: &[&TransactionTrace]| {
        for trace in chunk {
            match graph.process_transaction(trace, &RecordedPartitions) {
                Ok(_) => learned.fetch_add(1, Ordering::Relaxed),
                Err(e) => {
                    warn!(txn = trace.txn_id.0, error = %e, "skipping trace");
                    rejected.fetch_add(1, Ordering::Relaxed)
                }
            };
        }
    };

    if threads <= 1 || batch.len() < 2 {
        learn(batch);
    } else {
        let chunk_size = batch.len().div_ceil(threads);
        std::thread::scope(|scope| {
            for chunk in batch.chunks(chunk_size) {
                scope.spawn(move || learn(chunk));
            }
        });
    }
    (learned.into_inner(), rejected.into_inner())
}
